// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod collectors;
mod config;
mod daemon;
mod extract;
mod kubernetes;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use cli::Args;
use collectors::{Registry, ScrapeCoordinator, ScrapeTelemetry};
use config::{Options, Settings};
use kubernetes::{MirrorSet, Workers};

/// Initialize logging to stderr; `RUST_LOG` overrides the default filter
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let filter = if verbose {
        "istio_state_metrics=debug,tower_http=debug"
    } else {
        "istio_state_metrics=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NONE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

/// Command line settings layered over the optional config file
fn load_options(args: &Args) -> Result<Options> {
    let mut settings = args.settings();
    if let Some(path) = &args.config {
        settings = settings.or(Settings::load(path)?);
    }
    Options::resolve(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    init_logging(args.verbose);

    let options = load_options(&args)?;
    info!(
        collectors = ?options.collectors.iter().map(|k| k.name()).collect::<Vec<_>>(),
        namespaces = %options.namespaces,
        resync = %humantime::format_duration(options.resync),
        "Starting istio-state-metrics"
    );

    let client = kubernetes::connect(&args.cluster()).await?;

    // Exporter self-metrics
    let telemetry_registry = prometheus::Registry::new();
    let telemetry = ScrapeTelemetry::new()?;
    telemetry.register(&telemetry_registry)?;
    #[cfg(target_os = "linux")]
    telemetry_registry
        .register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))
        .context("Failed to register process collector")?;

    let mut workers = Workers::new();
    let mut registry = Registry::new(telemetry);
    for kind in &options.collectors {
        let mirrors = MirrorSet::for_kind(&client, *kind, &options.namespaces, options.resync);
        mirrors.report_initial_sync(&mut workers);
        registry.register(kind.name(), Box::new(mirrors), kind.schema())?;
    }
    registry.start(&mut workers);
    info!(
        collectors = ?registry.names(),
        workers = workers.count(),
        "Collectors started"
    );

    let registry = Arc::new(registry);
    let metrics_registry = prometheus::Registry::new();
    metrics_registry
        .register(Box::new(ScrapeCoordinator::new(Arc::clone(&registry))?))
        .context("Failed to register scrape coordinator")?;

    let metrics_addr = format!("{}:{}", args.host, args.port);
    let telemetry_addr = format!("{}:{}", args.telemetry_host, args.telemetry_port);
    let mut metrics_server = tokio::spawn(daemon::serve(
        "metrics",
        metrics_addr,
        daemon::metrics_router(metrics_registry),
        workers.token(),
    ));
    let mut telemetry_server = tokio::spawn(daemon::serve(
        "telemetry",
        telemetry_addr,
        daemon::telemetry_router(telemetry_registry),
        workers.token(),
    ));

    // Run until a signal arrives or either server exits on its own
    let outcome = tokio::select! {
        signal = shutdown_signal() => signal,
        result = &mut metrics_server => flatten(result),
        result = &mut telemetry_server => flatten(result),
    };

    info!("Shutting down");
    workers.shutdown().await;
    for server in [metrics_server, telemetry_server] {
        if !server.is_finished()
            && let Err(e) = flatten(server.await)
        {
            warn!(error = %e, "Server did not stop cleanly");
        }
    }

    outcome
}

fn flatten(result: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    result.context("Server task failed")?
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
