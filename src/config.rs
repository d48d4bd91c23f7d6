// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration resolution for istio-state-metrics
//!
//! Settings come from three layers, highest precedence first:
//! - command-line flags (or their `ISM_*` environment variables)
//! - the optional JSON file given with `--config`
//! - built-in defaults
//!
//! The core only ever sees the validated `Options`.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::kubernetes::CollectorKind;

/// Token selecting every namespace
pub const ALL_NAMESPACES: &str = "*";

/// Default full resync interval
pub const DEFAULT_RESYNC: Duration = Duration::from_secs(300);

/// Unvalidated settings from one configuration layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Collector names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collectors: Option<Vec<String>>,
    /// Namespace names, or `*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
    /// Resync interval (`5m`, `90s`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync: Option<String>,
}

impl Settings {
    /// Load settings from a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(settings)
    }

    /// Fill every unset field from `lower`
    pub fn or(self, lower: Settings) -> Settings {
        Settings {
            collectors: self.collectors.or(lower.collectors),
            namespaces: self.namespaces.or(lower.namespaces),
            resync: self.resync.or(lower.resync),
        }
    }
}

/// Split a comma-separated flag value into trimmed, non-empty tokens
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Which namespaces to mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    /// One cluster-wide mirror per kind
    All,
    /// One mirror per kind and namespace, sorted and deduplicated
    Only(Vec<String>),
}

impl NamespaceScope {
    pub fn parse(tokens: &[String]) -> Result<Self> {
        let tokens: BTreeSet<&str> = tokens
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        if tokens.is_empty() {
            return Ok(NamespaceScope::All);
        }
        if tokens.contains(ALL_NAMESPACES) {
            if tokens.len() > 1 {
                bail!(
                    "Namespace '{}' (all namespaces) cannot be combined with named namespaces",
                    ALL_NAMESPACES
                );
            }
            return Ok(NamespaceScope::All);
        }

        for ns in &tokens {
            validate_namespace(ns)?;
        }
        Ok(NamespaceScope::Only(
            tokens.into_iter().map(String::from).collect(),
        ))
    }
}

impl std::fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceScope::All => f.write_str("all namespaces"),
            NamespaceScope::Only(namespaces) => f.write_str(&namespaces.join(",")),
        }
    }
}

/// Namespaces are DNS-1123 labels
fn validate_namespace(ns: &str) -> Result<()> {
    let valid_chars = ns
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = !ns.starts_with('-') && !ns.ends_with('-');

    if ns.len() > 63 || !valid_chars || !valid_ends {
        return Err(anyhow!(
            "Invalid namespace '{}': must be a lowercase DNS-1123 label",
            ns
        ));
    }
    Ok(())
}

/// Validated configuration consumed by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Enabled collectors, sorted and deduplicated
    pub collectors: Vec<CollectorKind>,
    pub namespaces: NamespaceScope,
    pub resync: Duration,
}

impl Options {
    /// Validate merged settings, applying defaults for unset fields
    pub fn resolve(settings: Settings) -> Result<Self> {
        let collectors = match settings.collectors {
            None => CollectorKind::ALL.to_vec(),
            Some(names) => {
                let kinds = names
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::parse)
                    .collect::<Result<BTreeSet<CollectorKind>>>()?;
                if kinds.is_empty() {
                    bail!("No collectors selected");
                }
                kinds.into_iter().collect()
            }
        };

        let namespaces = match settings.namespaces {
            None => NamespaceScope::All,
            Some(tokens) => NamespaceScope::parse(&tokens)?,
        };

        let resync = match settings.resync {
            None => DEFAULT_RESYNC,
            Some(value) => parse_resync(&value)?,
        };

        Ok(Options {
            collectors,
            namespaces,
            resync,
        })
    }
}

fn parse_resync(value: &str) -> Result<Duration> {
    let resync = humantime::parse_duration(value.trim())
        .with_context(|| format!("Invalid resync interval '{}'", value))?;
    if resync.is_zero() {
        bail!("Resync interval must be greater than zero");
    }
    Ok(resync)
}
