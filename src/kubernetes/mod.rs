// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

pub mod catalog;
mod client;
pub mod mirror;
mod workers;

pub use catalog::CollectorKind;
pub use client::{ClusterOptions, connect};
pub use mirror::MirrorSet;
pub use workers::Workers;

use kube::ResourceExt;
use kube::api::DynamicObject;
use serde_json::Value;

/// Identity of a resource within one kind
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

/// A mirrored resource: identity plus its `spec` tree
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedResource {
    pub name: String,
    pub namespace: Option<String>,
    /// The resource's `spec`, `Null` when it has none
    pub spec: Value,
}

impl WatchedResource {
    pub fn new(name: &str, namespace: Option<&str>, spec: Value) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            spec,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// `<name>.<namespace>`, the way Istio refers to namespaced config
    pub fn identity(&self) -> String {
        format!(
            "{}.{}",
            self.name,
            self.namespace.as_deref().unwrap_or_default()
        )
    }
}

impl From<DynamicObject> for WatchedResource {
    fn from(obj: DynamicObject) -> Self {
        let key = object_key(&obj);
        let spec = match obj.data {
            Value::Object(mut fields) => fields.remove("spec").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self::new(&key.name, key.namespace.as_deref(), spec)
    }
}

/// Key of a deleted object as reported by the watch stream
pub fn object_key(obj: &DynamicObject) -> ObjectKey {
    ObjectKey {
        namespace: obj.namespace(),
        name: obj.name_any(),
    }
}
