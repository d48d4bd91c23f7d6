// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Background tasks sharing one shutdown token
pub struct Workers {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token handed to every worker; cancelled by `shutdown`
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Cancel every worker and wait until all of them have exited
    pub async fn shutdown(self) {
        debug!(workers = self.handles.len(), "Stopping workers");
        self.token.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker exited abnormally");
            }
        }
    }
}

impl Default for Workers {
    fn default() -> Self {
        Self::new()
    }
}
