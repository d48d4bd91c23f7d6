// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Collectors bind a resource source to the schema that flattens it.

mod registry;
mod telemetry;

pub use registry::{Registry, ScrapeCoordinator};
pub use telemetry::ScrapeTelemetry;

use anyhow::{Result, anyhow};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::extract::{KindSchema, MetricFamily, MetricRow};
use crate::kubernetes::{MirrorSet, WatchedResource, Workers};

/// Where a collector reads its resources from
pub trait ResourceSource: Send + Sync {
    /// Start background synchronization, if the source has any
    fn start(&self, workers: &mut Workers);

    /// Current resources; must not block
    fn snapshot(&self) -> Result<Vec<Arc<WatchedResource>>>;
}

impl ResourceSource for MirrorSet {
    fn start(&self, workers: &mut Workers) {
        MirrorSet::start(self, workers);
    }

    fn snapshot(&self) -> Result<Vec<Arc<WatchedResource>>> {
        Ok(self.list())
    }
}

/// One resource kind's source plus its extraction schema
pub struct Collector {
    source: Box<dyn ResourceSource>,
    schema: &'static KindSchema,
}

impl Collector {
    pub fn new(source: Box<dyn ResourceSource>, schema: &'static KindSchema) -> Self {
        Self { source, schema }
    }

    /// Value of the `resource` label on scrape telemetry
    pub fn resource(&self) -> &'static str {
        self.schema.resource
    }

    pub fn describe(&self) -> Vec<MetricFamily> {
        self.schema.metric_families()
    }

    /// Rows for the current snapshot, with the number of resources it held.
    /// A failing source or a panic during extraction is an error.
    ///
    /// A caught panic still goes through the process panic hook, so the default
    /// hook prints it (and a backtrace with `RUST_BACKTRACE`) on every scrape,
    /// next to the registry's own warning.
    pub fn collect(&self) -> Result<(usize, Vec<MetricRow>)> {
        let resources = self.source.snapshot()?;
        let schema = self.schema;

        let rows = catch_unwind(AssertUnwindSafe(|| {
            let mut rows: Vec<MetricRow> = resources
                .iter()
                .flat_map(|resource| schema.extract(resource))
                .collect();
            rows.extend(schema.derive(&resources));
            rows
        }))
        .map_err(|payload| anyhow!("Extraction panicked: {}", panic_message(payload.as_ref())))?;

        Ok((resources.len(), rows))
    }

    fn start(&self, workers: &mut Workers) {
        self.source.start(workers);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
