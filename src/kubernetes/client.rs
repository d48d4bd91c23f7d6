// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Context, Result, anyhow};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses.
/// Watch requests carry their own server-side timeout below this.
const READ_TIMEOUT: Duration = Duration::from_secs(330);

/// Maximum attempts of the startup connectivity probe
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Where to find the cluster
#[derive(Debug, Clone, Default)]
pub struct ClusterOptions {
    /// Explicit kubeconfig file; otherwise in-cluster config or the default kubeconfig
    pub kubeconfig: Option<PathBuf>,
    /// Context to use from the kubeconfig
    pub context: Option<String>,
    /// Overrides the API server URL from the kubeconfig
    pub apiserver: Option<String>,
}

/// Build a client and verify the API server answers
pub async fn connect(options: &ClusterOptions) -> Result<Client> {
    let config = load_config(options).await?;
    let cluster_url = config.cluster_url.to_string();

    let client = Client::try_from(config)
        .with_context(|| format!("Failed to create client for '{}'", cluster_url))?;

    let version = probe_with_retry(&client, &cluster_url).await?;
    info!(
        apiserver = %cluster_url,
        version = %version,
        "Connected to Kubernetes API server"
    );

    Ok(client)
}

async fn load_config(options: &ClusterOptions) -> Result<Config> {
    let kube_options = KubeConfigOptions {
        context: options.context.clone(),
        ..Default::default()
    };

    let mut config = match (&options.kubeconfig, &options.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig '{}'", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &kube_options)
                .await
                .with_context(|| format!("Failed to load kubeconfig '{}'", path.display()))?
        }
        (None, Some(context)) => Config::from_kubeconfig(&kube_options)
            .await
            .with_context(|| format!("Failed to load kubeconfig for context '{}'", context))?,
        (None, None) => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    if let Some(apiserver) = &options.apiserver {
        config.cluster_url = apiserver
            .parse()
            .with_context(|| format!("Invalid API server URL '{}'", apiserver))?;
    }

    // Set timeouts for reliability
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    Ok(config)
}

/// Query the server version, retrying transient failures with exponential backoff
async fn probe_with_retry(client: &Client, cluster_url: &str) -> Result<String> {
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match client.apiserver_version().await {
            Ok(info) => return Ok(info.git_version),
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!(apiserver = %cluster_url, error = %e, "Non-retryable error");
                    return Err(anyhow!("K8s API error: {}", e));
                }
                if attempt + 1 < MAX_RETRIES {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        apiserver = %cluster_url,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(anyhow!(
        "Failed to reach '{}' after {} attempts: {}",
        cluster_url,
        MAX_RETRIES,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Check if an error is retryable (transient failures)
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        // Network/connection errors are retryable
        kube::Error::HyperError(_) => true,
        // API errors: retry on 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}
