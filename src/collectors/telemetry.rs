// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Context, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

const NAMESPACE: &str = "istio_state_metrics";

/// The exporter's own scrape metrics, labelled by resource kind
#[derive(Clone)]
pub struct ScrapeTelemetry {
    scrape_errors: IntCounterVec,
    resources_per_scrape: HistogramVec,
}

impl ScrapeTelemetry {
    pub fn new() -> Result<Self> {
        let scrape_errors = IntCounterVec::new(
            Opts::new(
                "scrape_error_total",
                "Total scrape errors encountered when scraping a resource",
            )
            .namespace(NAMESPACE),
            &["resource"],
        )
        .context("Failed to create scrape error counter")?;

        let buckets = prometheus::exponential_buckets(1.0, 2.0, 16)
            .context("Failed to create histogram buckets")?;
        let resources_per_scrape = HistogramVec::new(
            HistogramOpts::new(
                "resources_per_scrape",
                "Number of resources returned per scrape",
            )
            .namespace(NAMESPACE)
            .buckets(buckets),
            &["resource"],
        )
        .context("Failed to create resources per scrape histogram")?;

        Ok(Self {
            scrape_errors,
            resources_per_scrape,
        })
    }

    /// Expose these metrics through `registry`
    pub fn register(&self, registry: &prometheus::Registry) -> Result<()> {
        registry
            .register(Box::new(self.scrape_errors.clone()))
            .context("Failed to register scrape error counter")?;
        registry
            .register(Box::new(self.resources_per_scrape.clone()))
            .context("Failed to register resources per scrape histogram")?;
        Ok(())
    }

    pub fn record_error(&self, resource: &str) {
        self.scrape_errors.with_label_values(&[resource]).inc();
    }

    /// Touch the error counter so the series exists, and record the resource count
    pub fn record_success(&self, resource: &str, resources: usize) {
        self.scrape_errors.with_label_values(&[resource]).inc_by(0);
        self.resources_per_scrape
            .with_label_values(&[resource])
            .observe(resources as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_record() {
        let registry = prometheus::Registry::new();
        let telemetry = ScrapeTelemetry::new().unwrap();
        telemetry.register(&registry).unwrap();

        telemetry.record_success("rule", 3);
        telemetry.record_error("virtual_service");

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(
            names,
            [
                "istio_state_metrics_resources_per_scrape",
                "istio_state_metrics_scrape_error_total",
            ]
        );

        let errors = &families[1];
        assert_eq!(errors.get_metric().len(), 2);
        let rule = errors
            .get_metric()
            .iter()
            .find(|m| m.get_label()[0].get_value() == "rule")
            .unwrap();
        assert_eq!(rule.get_counter().get_value(), 0.0);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = prometheus::Registry::new();
        let telemetry = ScrapeTelemetry::new().unwrap();
        telemetry.register(&registry).unwrap();
        assert!(telemetry.register(&registry).is_err());
    }
}
