// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Extraction engine: flattens resource spec trees into metric rows
//!
//! A single recursive-descent routine walks each family's `Step`s:
//! - `Section` gates on an optional sub-object
//! - `FanOut` emits one row per list element, keeping ancestor frames
//!   reachable through `Scope::Root` / `Scope::Up(n)`
//!
//! Per-kind knowledge lives only in the static tables of the kind modules.
//! Extraction is pure and total: a missing field is an empty label, never an error.

pub mod destination_rules;
mod render;
pub mod rules;
mod schema;
pub mod virtual_services;

pub use schema::{
    DerivedFamily, FamilySchema, KindSchema, MetricFamily, MetricRow, PairStyle, Scope, Source,
    Step,
};

use serde_json::Value;
use std::sync::Arc;

use crate::kubernetes::WatchedResource;

/// A node reached by the walk, with its position when it came from a list
#[derive(Debug, Clone, Copy)]
struct Frame<'a> {
    value: &'a Value,
    index: Option<usize>,
}

impl KindSchema {
    /// Flatten one resource into rows for every per-resource family
    pub fn extract(&self, resource: &WatchedResource) -> Vec<MetricRow> {
        let mut rows = Vec::new();
        for family in self.families {
            flatten(family, resource, &mut rows);
        }
        rows
    }

    /// Rows of the families derived from the whole snapshot
    pub fn derive(&self, resources: &[Arc<WatchedResource>]) -> Vec<MetricRow> {
        self.derived
            .iter()
            .flat_map(|d| {
                (d.derive)(resources)
                    .into_iter()
                    .map(|labels| MetricRow::info(d.family.name, labels))
            })
            .collect()
    }
}

/// Append the rows `resource` yields for one family
pub fn flatten(family: &FamilySchema, resource: &WatchedResource, rows: &mut Vec<MetricRow>) {
    let mut frames = vec![Frame {
        value: &resource.spec,
        index: None,
    }];
    descend(family, resource, family.walk, &mut frames, rows);
}

fn descend<'a>(
    family: &FamilySchema,
    resource: &WatchedResource,
    steps: &[Step],
    frames: &mut Vec<Frame<'a>>,
    rows: &mut Vec<MetricRow>,
) {
    let Some((step, rest)) = steps.split_first() else {
        let labels = family
            .sources
            .iter()
            .map(|source| resolve(source, resource, frames))
            .collect();
        rows.push(MetricRow::info(family.family.name, labels));
        return;
    };

    let current = frames[frames.len() - 1].value;
    match *step {
        Step::Section(path) => {
            if let Some(value) = render::lookup(current, path) {
                frames.push(Frame { value, index: None });
                descend(family, resource, rest, frames, rows);
                frames.pop();
            }
        }
        Step::FanOut(path) => match render::lookup(current, path) {
            Some(Value::Array(items)) => {
                for (i, value) in items.iter().enumerate() {
                    frames.push(Frame {
                        value,
                        index: Some(i),
                    });
                    descend(family, resource, rest, frames, rows);
                    frames.pop();
                }
            }
            // A lone element where a list was expected still has identity
            Some(value) => {
                frames.push(Frame {
                    value,
                    index: Some(0),
                });
                descend(family, resource, rest, frames, rows);
                frames.pop();
            }
            None => {}
        },
    }
}

fn frame<'f, 'a>(frames: &'f [Frame<'a>], scope: Scope) -> &'f Frame<'a> {
    let last = frames.len() - 1;
    match scope {
        Scope::Root => &frames[0],
        Scope::Current => &frames[last],
        Scope::Up(n) => &frames[last.saturating_sub(n)],
    }
}

fn resolve(source: &Source, resource: &WatchedResource, frames: &[Frame<'_>]) -> String {
    match *source {
        Source::Identity => resource.identity(),
        Source::Name => resource.name.clone(),
        Source::Namespace => resource.namespace.clone().unwrap_or_default(),
        Source::Field(scope, path) => {
            render::scalar(render::lookup(frame(frames, scope).value, path))
        }
        Source::Duration(scope, path) => {
            render::duration(render::lookup(frame(frames, scope).value, path))
        }
        Source::FirstDuration(scope, paths) => {
            let value = frame(frames, scope).value;
            render::duration(paths.iter().find_map(|path| render::lookup(value, path)))
        }
        Source::Join(scope, path) => render::join(render::lookup(frame(frames, scope).value, path)),
        Source::Pairs(scope, path, style) => {
            render::pairs(render::lookup(frame(frames, scope).value, path), style)
        }
        Source::Variant(scope, path, cases, default) => {
            match render::lookup(frame(frames, scope).value, path) {
                None => String::new(),
                Some(value) => cases
                    .iter()
                    .find(|(member, _)| render::lookup(value, member).is_some())
                    .map(|(_, tag)| *tag)
                    .unwrap_or(default)
                    .to_string(),
            }
        }
        Source::FirstOf(scope, paths) => {
            let value = frame(frames, scope).value;
            render::scalar(paths.iter().find_map(|path| render::lookup(value, path)))
        }
        Source::Index(scope) => frame(frames, scope)
            .index
            .map(|i| i.to_string())
            .unwrap_or_default(),
    }
}
