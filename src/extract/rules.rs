// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Metric families for `config.istio.io` Mixer rules
//!
//! Besides the per-rule families, the instances referenced by rule actions are
//! reported once per scrape across every rule in the snapshot.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::schema::{DerivedFamily, FamilySchema, KindSchema, MetricFamily, Scope, Source, Step};
use crate::kubernetes::WatchedResource;

/// Kind reported for references that do not name one
const UNKNOWN_KIND: &str = "unknown";

pub const INFO: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_mixer_rule_info",
        help: "Information about Mixer Rules",
        labels: &["rule", "namespace"],
    },
    walk: &[],
    sources: &[Source::Name, Source::Namespace],
};

pub const ACTIONS: FamilySchema = FamilySchema {
    family: MetricFamily {
        name: "istio_mixer_rule_actions",
        help: "Information about Actions in Mixer Rules",
        labels: &["rule", "match", "handler", "instances"],
    },
    walk: &[Step::FanOut("actions")],
    sources: &[
        Source::Identity,
        Source::Field(Scope::Root, "match"),
        Source::Field(Scope::Current, "handler"),
        Source::Join(Scope::Current, "instances"),
    ],
};

pub const INSTANCES: DerivedFamily = DerivedFamily {
    family: MetricFamily {
        name: "istio_mixer_instance_info",
        help: "Information about Mixer Instances",
        labels: &["instance", "kind", "namespace"],
    },
    derive: referenced_instances,
};

pub const SCHEMA: KindSchema = KindSchema {
    resource: "rule",
    families: &[INFO, ACTIONS],
    derived: &[INSTANCES],
};

/// A resolved `name.kind.namespace` instance reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceRef {
    pub name: String,
    pub kind: String,
    pub namespace: String,
}

impl InstanceRef {
    /// Split a reference on its first two dots.
    ///
    /// The namespace keeps any further dots. A missing or empty kind becomes
    /// `unknown`, a missing or empty namespace falls back to `rule_namespace`.
    /// Returns `None` for an empty name.
    pub fn parse(reference: &str, rule_namespace: &str) -> Option<Self> {
        let mut parts = reference.splitn(3, '.');
        let name = parts.next().filter(|s| !s.is_empty())?;
        let kind = parts
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_KIND);
        let namespace = parts
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(rule_namespace);

        Some(Self {
            name: name.to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

/// Every distinct instance referenced by any action of any rule
fn referenced_instances(rules: &[Arc<WatchedResource>]) -> Vec<Vec<String>> {
    let mut seen = BTreeSet::new();
    for rule in rules {
        let rule_namespace = rule.namespace.as_deref().unwrap_or_default();
        let actions = rule.spec.get("actions").and_then(Value::as_array);
        for action in actions.into_iter().flatten() {
            let references = action.get("instances").and_then(Value::as_array);
            for reference in references.into_iter().flatten().filter_map(Value::as_str) {
                if let Some(instance) = InstanceRef::parse(reference, rule_namespace) {
                    seen.insert(instance);
                }
            }
        }
    }

    seen.into_iter()
        .map(|i| vec![i.name, i.kind, i.namespace])
        .collect()
}
