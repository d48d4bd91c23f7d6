// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Collector registry and scrape coordination.
//!
//! Every scrape reads each collector's snapshot and flattens it. A collector
//! that fails is counted in the scrape telemetry and contributes no rows to
//! that scrape, while the others are unaffected.

use anyhow::{Context, Result, bail};
use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto;
use prometheus::{GaugeVec, Opts};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Collector, ResourceSource, ScrapeTelemetry};
use crate::extract::{KindSchema, MetricFamily, MetricRow};
use crate::kubernetes::Workers;

/// Enabled collectors by name
pub struct Registry {
    collectors: BTreeMap<String, Collector>,
    telemetry: ScrapeTelemetry,
}

impl Registry {
    pub fn new(telemetry: ScrapeTelemetry) -> Self {
        Self {
            collectors: BTreeMap::new(),
            telemetry,
        }
    }

    /// Add a collector; names must be unique
    pub fn register(
        &mut self,
        name: &str,
        source: Box<dyn ResourceSource>,
        schema: &'static KindSchema,
    ) -> Result<()> {
        if self.collectors.contains_key(name) {
            bail!("Collector '{}' is already registered", name);
        }
        self.collectors
            .insert(name.to_string(), Collector::new(source, schema));
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.collectors.keys().map(String::as_str).collect()
    }

    /// Start every collector's background synchronization
    pub fn start(&self, workers: &mut Workers) {
        for collector in self.collectors.values() {
            collector.start(workers);
        }
    }

    /// Every family any enabled collector may emit
    pub fn describe(&self) -> Vec<MetricFamily> {
        self.collectors
            .values()
            .flat_map(Collector::describe)
            .collect()
    }

    /// Rows of every collector that succeeded this scrape
    pub fn collect(&self) -> Vec<MetricRow> {
        let mut rows = Vec::new();
        for (name, collector) in &self.collectors {
            match collector.collect() {
                Ok((resources, collected)) => {
                    debug!(
                        collector = %name,
                        resources,
                        rows = collected.len(),
                        "Collected"
                    );
                    self.telemetry.record_success(collector.resource(), resources);
                    rows.extend(collected);
                }
                Err(e) => {
                    warn!(collector = %name, error = %e, "Collector failed, skipping");
                    self.telemetry.record_error(collector.resource());
                }
            }
        }
        rows
    }
}

/// Exposes a `Registry` as a single prometheus collector.
///
/// Rows become gauge samples; families without rows are left out.
pub struct ScrapeCoordinator {
    registry: Arc<Registry>,
    families: Vec<MetricFamily>,
    descs: Vec<Desc>,
}

impl ScrapeCoordinator {
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let families = registry.describe();
        let descs = families
            .iter()
            .map(|family| {
                Desc::new(
                    family.name.to_string(),
                    family.help.to_string(),
                    family.labels.iter().map(|l| l.to_string()).collect(),
                    HashMap::new(),
                )
                .with_context(|| format!("Invalid metric family '{}'", family.name))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            registry,
            families,
            descs,
        })
    }

    /// One gauge family per metric family that has rows
    fn render(&self, rows: Vec<MetricRow>) -> Vec<proto::MetricFamily> {
        let mut by_family: HashMap<&str, Vec<MetricRow>> = HashMap::new();
        for row in rows {
            by_family.entry(row.family).or_default().push(row);
        }

        let mut rendered = Vec::new();
        for family in &self.families {
            let Some(rows) = by_family.remove(family.name) else {
                continue;
            };
            let gauges = match GaugeVec::new(Opts::new(family.name, family.help), family.labels) {
                Ok(gauges) => gauges,
                Err(e) => {
                    warn!(family = %family.name, error = %e, "Cannot render family");
                    continue;
                }
            };
            for row in &rows {
                let values: Vec<&str> = row.labels.iter().map(String::as_str).collect();
                match gauges.get_metric_with_label_values(&values) {
                    Ok(gauge) => gauge.set(row.value),
                    Err(e) => warn!(family = %family.name, error = %e, "Dropping malformed row"),
                }
            }
            rendered.extend(gauges.collect());
        }
        rendered
    }
}

impl PromCollector for ScrapeCoordinator {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        self.render(self.registry.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DerivedFamily, FamilySchema, Scope, Source, Step};
    use crate::kubernetes::{CollectorKind, WatchedResource};
    use anyhow::anyhow;
    use serde_json::json;

    struct StaticSource(Vec<Arc<WatchedResource>>);

    impl ResourceSource for StaticSource {
        fn start(&self, _workers: &mut Workers) {}

        fn snapshot(&self) -> Result<Vec<Arc<WatchedResource>>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl ResourceSource for FailingSource {
        fn start(&self, _workers: &mut Workers) {}

        fn snapshot(&self) -> Result<Vec<Arc<WatchedResource>>> {
            Err(anyhow!("store unavailable"))
        }
    }

    fn explode(_: &[Arc<WatchedResource>]) -> Vec<Vec<String>> {
        panic!("malformed resource")
    }

    const PANICKING: KindSchema = KindSchema {
        resource: "broken",
        families: &[FamilySchema {
            family: MetricFamily {
                name: "test_broken_info",
                help: "test",
                labels: &["name"],
            },
            walk: &[Step::FanOut("items")],
            sources: &[Source::Field(Scope::Current, "")],
        }],
        derived: &[DerivedFamily {
            family: MetricFamily {
                name: "test_broken_derived",
                help: "test",
                labels: &["name"],
            },
            derive: explode,
        }],
    };

    fn destination_rules() -> Box<dyn ResourceSource> {
        Box::new(StaticSource(vec![
            Arc::new(WatchedResource::new(
                "foo",
                Some("bar"),
                json!({"host": "svc.example"}),
            )),
            Arc::new(WatchedResource::new(
                "pool",
                Some("bar"),
                json!({
                    "host": "pool.example",
                    "trafficPolicy": {"connectionPool": {"tcp": {"maxConnections": 10}}}
                }),
            )),
        ]))
    }

    fn telemetry() -> (ScrapeTelemetry, prometheus::Registry) {
        let registry = prometheus::Registry::new();
        let telemetry = ScrapeTelemetry::new().unwrap();
        telemetry.register(&registry).unwrap();
        (telemetry, registry)
    }

    fn error_count(registry: &prometheus::Registry, resource: &str) -> Option<f64> {
        registry
            .gather()
            .iter()
            .find(|f| f.get_name() == "istio_state_metrics_scrape_error_total")?
            .get_metric()
            .iter()
            .find(|m| m.get_label()[0].get_value() == resource)
            .map(|m| m.get_counter().get_value())
    }

    /// (sample count, sample sum) of the resources-per-scrape histogram
    fn resources_observed(registry: &prometheus::Registry, resource: &str) -> Option<(u64, f64)> {
        registry
            .gather()
            .iter()
            .find(|f| f.get_name() == "istio_state_metrics_resources_per_scrape")?
            .get_metric()
            .iter()
            .find(|m| m.get_label()[0].get_value() == resource)
            .map(|m| {
                let histogram = m.get_histogram();
                (histogram.get_sample_count(), histogram.get_sample_sum())
            })
    }

    fn label_sets(rows: &[MetricRow]) -> Vec<(String, Vec<String>)> {
        let mut sets: Vec<_> = rows
            .iter()
            .map(|r| (r.family.to_string(), r.labels.clone()))
            .collect();
        sets.sort();
        sets
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (telemetry, _) = telemetry();
        let mut registry = Registry::new(telemetry);
        let schema = CollectorKind::DestinationRules.schema();
        registry
            .register("destinationrules", destination_rules(), schema)
            .unwrap();
        assert!(
            registry
                .register("destinationrules", destination_rules(), schema)
                .is_err()
        );
        assert_eq!(registry.names(), ["destinationrules"]);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let (telemetry, _) = telemetry();
        let mut registry = Registry::new(telemetry);
        registry
            .register(
                "destinationrules",
                destination_rules(),
                CollectorKind::DestinationRules.schema(),
            )
            .unwrap();

        let first = registry.collect();
        let second = registry.collect();
        assert_eq!(first.len(), 5);
        assert_eq!(label_sets(&first), label_sets(&second));
    }

    #[test]
    fn test_failing_source_is_isolated() {
        let (telemetry, prom) = telemetry();
        let mut registry = Registry::new(telemetry);
        registry
            .register(
                "destinationrules",
                destination_rules(),
                CollectorKind::DestinationRules.schema(),
            )
            .unwrap();
        registry
            .register(
                "virtualservices",
                Box::new(FailingSource),
                CollectorKind::VirtualServices.schema(),
            )
            .unwrap();

        let rows = registry.collect();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.family.starts_with("istio_pilot_destination_rule")));
        assert_eq!(error_count(&prom, "virtual_service"), Some(1.0));
        assert_eq!(error_count(&prom, "DestinationRule"), Some(0.0));
        assert_eq!(resources_observed(&prom, "DestinationRule"), Some((1, 2.0)));
        assert_eq!(resources_observed(&prom, "virtual_service"), None);
    }

    #[test]
    fn test_oversized_duration_does_not_fail_the_kind() {
        let (telemetry, prom) = telemetry();
        let mut registry = Registry::new(telemetry);
        registry
            .register(
                "destinationrules",
                Box::new(StaticSource(vec![
                    Arc::new(WatchedResource::new("good", Some("bar"), json!({"host": "a"}))),
                    Arc::new(WatchedResource::new(
                        "huge",
                        Some("bar"),
                        json!({
                            "host": "b",
                            "trafficPolicy": {
                                "outlierDetection": {"interval": "99999999999999999999s"}
                            }
                        }),
                    )),
                ])),
                CollectorKind::DestinationRules.schema(),
            )
            .unwrap();

        let rows = registry.collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(error_count(&prom, "DestinationRule"), Some(0.0));
    }

    #[test]
    fn test_panicking_extraction_is_isolated() {
        let (telemetry, prom) = telemetry();
        let mut registry = Registry::new(telemetry);
        registry
            .register(
                "broken",
                Box::new(StaticSource(vec![Arc::new(WatchedResource::new(
                    "x",
                    Some("y"),
                    json!({"items": ["a"]}),
                ))])),
                &PANICKING,
            )
            .unwrap();
        registry
            .register(
                "destinationrules",
                destination_rules(),
                CollectorKind::DestinationRules.schema(),
            )
            .unwrap();

        let rows = registry.collect();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.family != "test_broken_info"));
        assert_eq!(error_count(&prom, "broken"), Some(1.0));
    }

    #[test]
    fn test_describe_is_stable() {
        let (telemetry, _) = telemetry();
        let mut registry = Registry::new(telemetry);
        for kind in CollectorKind::ALL {
            registry
                .register(kind.name(), Box::new(StaticSource(vec![])), kind.schema())
                .unwrap();
        }
        let first = registry.describe();
        assert_eq!(first.len(), 18);
        assert_eq!(first, registry.describe());
    }

    #[test]
    fn test_coordinator_exposes_gauges() {
        let (telemetry, _) = telemetry();
        let mut registry = Registry::new(telemetry);
        for kind in CollectorKind::ALL {
            let source: Box<dyn ResourceSource> = match kind {
                CollectorKind::DestinationRules => destination_rules(),
                _ => Box::new(StaticSource(vec![])),
            };
            registry.register(kind.name(), source, kind.schema()).unwrap();
        }

        let exposed = prometheus::Registry::new();
        let coordinator = ScrapeCoordinator::new(Arc::new(registry)).unwrap();
        exposed.register(Box::new(coordinator)).unwrap();

        let families = exposed.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(
            names,
            [
                "istio_pilot_destination_rule_host",
                "istio_pilot_destination_rule_info",
                "istio_pilot_destination_rule_traffic_policy_connection_pool_settings",
            ]
        );

        let info = &families[1];
        assert_eq!(info.get_metric().len(), 2);
        let sample = &info.get_metric()[0];
        assert_eq!(sample.get_gauge().get_value(), 1.0);
        let labels: Vec<_> = sample
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();
        assert_eq!(
            labels,
            [("destination_rule", "foo.bar"), ("namespace", "bar")]
        );

        let pool = &families[2].get_metric()[0];
        let max_connections = pool
            .get_label()
            .iter()
            .find(|l| l.get_name() == "max_connections")
            .unwrap();
        assert_eq!(max_connections.get_value(), "10");
        let connect_timeout = pool
            .get_label()
            .iter()
            .find(|l| l.get_name() == "connect_timeout")
            .unwrap();
        assert_eq!(connect_timeout.get_value(), "");
    }
}
