// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Static schema tables that drive the flattening routine
//!
//! Each resource kind declares its metric families as `FamilySchema` constants:
//! a `walk` from the resource spec down to the node a row is emitted for,
//! and one `Source` per label describing where that label's value comes from.

use std::sync::Arc;

use crate::kubernetes::WatchedResource;

/// A metric family: name, help text and the ordered label schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricFamily {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// One flattened sample of a metric family
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub family: &'static str,
    pub labels: Vec<String>,
    pub value: f64,
}

impl MetricRow {
    /// An info-style row (value 1)
    pub fn info(family: &'static str, labels: Vec<String>) -> Self {
        Self {
            family,
            labels,
            value: 1.0,
        }
    }
}

/// Which frame of the walk a label path is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The resource spec
    Root,
    /// The innermost node reached by the walk
    Current,
    /// `n` levels above the innermost node
    Up(usize),
}

/// One step from the spec root towards the node a row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Optional sub-object: absent closes the gate, present (even empty) descends
    Section(&'static str),
    /// List of independently identified elements: one row per element
    FanOut(&'static str),
}

/// Rendering of key/value collections joined into a single label value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStyle {
    /// `{key:K,value:V}`
    KeyValue,
    /// `{header:K,value:EXACT,PREFIX,REGEX}` for string match maps
    HeaderMatch,
}

/// Where a label value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// `<name>.<namespace>`
    Identity,
    Name,
    Namespace,
    /// Scalar leaf (string, integer, bool); empty path means the node itself
    Field(Scope, &'static str),
    /// Duration leaf rendered in seconds
    Duration(Scope, &'static str),
    /// First present duration leaf, rendered in seconds
    FirstDuration(Scope, &'static [&'static str]),
    /// List of scalars joined with commas
    Join(Scope, &'static str),
    /// Map joined as one bracketed literal per pair, sorted by key
    Pairs(Scope, &'static str, PairStyle),
    /// Names the member of a oneof object that is present.
    /// Falls back to the default tag when the object exists but no listed member does.
    Variant(
        Scope,
        &'static str,
        &'static [(&'static str, &'static str)],
        &'static str,
    ),
    /// First present path wins
    FirstOf(Scope, &'static [&'static str]),
    /// Position of the node in the list it was fanned out from
    Index(Scope),
}

/// A metric family together with how to flatten a resource into it
#[derive(Debug, Clone, Copy)]
pub struct FamilySchema {
    pub family: MetricFamily,
    pub walk: &'static [Step],
    pub sources: &'static [Source],
}

/// Family whose rows are derived from the whole snapshot rather than one resource
#[derive(Debug, Clone, Copy)]
pub struct DerivedFamily {
    pub family: MetricFamily,
    pub derive: fn(&[Arc<WatchedResource>]) -> Vec<Vec<String>>,
}

/// All families of one resource kind
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    /// Value of the `resource` label on scrape telemetry
    pub resource: &'static str,
    pub families: &'static [FamilySchema],
    pub derived: &'static [DerivedFamily],
}

impl KindSchema {
    /// Every family this kind can emit, per-resource families first
    pub fn metric_families(&self) -> Vec<MetricFamily> {
        self.families
            .iter()
            .map(|f| f.family)
            .chain(self.derived.iter().map(|d| d.family))
            .collect()
    }
}
