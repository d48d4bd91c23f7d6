// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::Parser;
use std::path::PathBuf;

use crate::config::{Settings, split_list};
use crate::kubernetes::ClusterOptions;

#[derive(Parser, Debug)]
#[command(name = "istio-state-metrics")]
#[command(author, version, about = "Expose Istio configuration resources as Prometheus metrics")]
pub struct Args {
    /// Comma-separated list of collectors to enable
    /// [default: destinationrules,rules,virtualservices]
    #[arg(long, env = "ISM_COLLECTORS", value_name = "LIST")]
    pub collectors: Option<String>,

    /// Comma-separated list of namespaces to watch, `*` for all [default: *]
    #[arg(long, env = "ISM_NAMESPACE", value_name = "LIST")]
    pub namespace: Option<String>,

    /// Full resync interval [default: 5m]
    #[arg(long, env = "ISM_RESYNC", value_name = "DURATION")]
    pub resync: Option<String>,

    /// JSON file with `collectors`, `namespaces` and `resync`; flags take precedence
    #[arg(long, env = "ISM_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to expose metrics on
    #[arg(long, env = "ISM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to expose metrics on
    #[arg(long, env = "ISM_PORT", default_value_t = 9090)]
    pub port: u16,

    /// Address to expose the exporter's own metrics on
    #[arg(long, env = "ISM_TELEMETRY_HOST", default_value = "0.0.0.0")]
    pub telemetry_host: String,

    /// Port to expose the exporter's own metrics on
    #[arg(long, env = "ISM_TELEMETRY_PORT", default_value_t = 9093)]
    pub telemetry_port: u16,

    /// Path to the kubeconfig file; in-cluster configuration is used when unset
    #[arg(long, env = "ISM_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, env = "ISM_CONTEXT")]
    pub context: Option<String>,

    /// URL of the API server, overriding the kubeconfig
    #[arg(long, env = "ISM_APISERVER", value_name = "URL")]
    pub apiserver: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "ISM_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    /// The settings given on the command line
    pub fn settings(&self) -> Settings {
        Settings {
            collectors: self.collectors.as_deref().map(split_list),
            namespaces: self.namespace.as_deref().map(split_list),
            resync: self.resync.clone(),
        }
    }

    pub fn cluster(&self) -> ClusterOptions {
        ClusterOptions {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            apiserver: self.apiserver.clone(),
        }
    }
}
