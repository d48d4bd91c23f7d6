// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! The fixed catalog of watched Istio resource kinds.
//!
//! The kinds are custom resources without static types, so each one is
//! described by a hand-written `ApiResource` and handled as `DynamicObject`.

use anyhow::{Result, anyhow};
use kube::discovery::ApiResource;
use std::fmt;
use std::str::FromStr;

use crate::extract::{KindSchema, destination_rules, rules, virtual_services};

/// A resource kind the exporter knows how to mirror and flatten
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollectorKind {
    DestinationRules,
    Rules,
    VirtualServices,
}

impl CollectorKind {
    /// Every kind, in collector-name order
    pub const ALL: [CollectorKind; 3] = [
        CollectorKind::DestinationRules,
        CollectorKind::Rules,
        CollectorKind::VirtualServices,
    ];

    /// Name used on the command line and in the config file
    pub fn name(self) -> &'static str {
        match self {
            CollectorKind::DestinationRules => "destinationrules",
            CollectorKind::Rules => "rules",
            CollectorKind::VirtualServices => "virtualservices",
        }
    }

    pub fn api_resource(self) -> ApiResource {
        let (group, version, kind) = match self {
            CollectorKind::DestinationRules => {
                ("networking.istio.io", "v1alpha3", "DestinationRule")
            }
            CollectorKind::Rules => ("config.istio.io", "v1alpha2", "rule"),
            CollectorKind::VirtualServices => ("networking.istio.io", "v1alpha3", "VirtualService"),
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: format!("{}/{}", group, version),
            kind: kind.to_string(),
            plural: self.name().to_string(),
        }
    }

    pub fn schema(self) -> &'static KindSchema {
        match self {
            CollectorKind::DestinationRules => &destination_rules::SCHEMA,
            CollectorKind::Rules => &rules::SCHEMA,
            CollectorKind::VirtualServices => &virtual_services::SCHEMA,
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|k| k.name()).collect();
                anyhow!(
                    "Unknown collector '{}' (available: {})",
                    s.trim(),
                    known.join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::WatchedResource;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_parse_collector_names() {
        assert_eq!(
            "destinationrules".parse::<CollectorKind>().unwrap(),
            CollectorKind::DestinationRules
        );
        assert_eq!(
            " VirtualServices ".parse::<CollectorKind>().unwrap(),
            CollectorKind::VirtualServices
        );
        let err = "gateways".parse::<CollectorKind>().unwrap_err();
        assert!(err.to_string().contains("gateways"));
        assert!(err.to_string().contains("destinationrules, rules, virtualservices"));
    }

    #[test]
    fn test_api_resources() {
        let ar = CollectorKind::DestinationRules.api_resource();
        assert_eq!(ar.api_version, "networking.istio.io/v1alpha3");
        assert_eq!(ar.plural, "destinationrules");

        let ar = CollectorKind::Rules.api_resource();
        assert_eq!(ar.group, "config.istio.io");
        assert_eq!(ar.version, "v1alpha2");
    }

    #[test]
    fn test_schema_label_arity_matches_sources() {
        for kind in CollectorKind::ALL {
            for family in kind.schema().families {
                assert_eq!(
                    family.family.labels.len(),
                    family.sources.len(),
                    "{} label arity",
                    family.family.name
                );
            }
        }
    }

    #[test]
    fn test_derived_rows_match_label_arity() {
        let snapshot = vec![Arc::new(WatchedResource::new(
            "promhttp",
            Some("istio-system"),
            json!({
                "actions": [
                    {"handler": "h", "instances": ["requestcount.metric", "a.b.c.d", "accesslog"]}
                ]
            }),
        ))];
        for kind in CollectorKind::ALL {
            for derived in kind.schema().derived {
                let rows = (derived.derive)(&snapshot);
                for labels in &rows {
                    assert_eq!(
                        labels.len(),
                        derived.family.labels.len(),
                        "{} label arity",
                        derived.family.name
                    );
                }
            }
        }
        let instances = (rules::INSTANCES.derive)(&snapshot);
        assert_eq!(instances.len(), 3);
        assert!(
            instances
                .iter()
                .all(|labels| labels.len() == rules::INSTANCES.family.labels.len())
        );
    }

    #[test]
    fn test_family_names_unique_across_catalog() {
        let mut seen = HashSet::new();
        for kind in CollectorKind::ALL {
            for family in kind.schema().metric_families() {
                assert!(seen.insert(family.name), "duplicate family {}", family.name);
            }
        }
        assert_eq!(seen.len(), 18);
    }

    #[test]
    fn test_label_names_unique_within_family() {
        for kind in CollectorKind::ALL {
            for family in kind.schema().metric_families() {
                let labels: HashSet<_> = family.labels.iter().collect();
                assert_eq!(labels.len(), family.labels.len(), "{}", family.name);
            }
        }
    }
}
