//! Online/offline detection.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{NetworkConfig, ServerConfig};
use crate::error::Result;

#[async_trait]
pub trait Connectivity: Send + Sync {
    /// Connected and able to reach the backend.
    async fn is_online(&self) -> bool;
}

/// Probes the backend health endpoint. Any HTTP response counts as online.
pub struct HttpConnectivity {
    client: reqwest::Client,
    probe_url: String,
}

impl HttpConnectivity {
    pub fn new(server: &ServerConfig, network: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(network.probe_timeout())
            .connect_timeout(network.probe_timeout())
            .build()?;
        Ok(Self {
            client,
            probe_url: format!("{}/", server.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.probe_url).send().await {
            Ok(response) => {
                debug!("Connectivity probe returned {}", response.status());
                true
            }
            Err(e) => {
                debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }
}

/// Re-probes on a fixed interval and publishes the latest answer.
///
/// Advisory only: the upload queue always runs its own check before a batch.
pub struct ConnectivityMonitor {
    state: watch::Receiver<bool>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConnectivityMonitor {
    pub fn spawn(probe: Arc<dyn Connectivity>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(
                "Starting connectivity checks (interval={}s)",
                interval.as_secs()
            );
            loop {
                let online = probe.is_online().await;
                tx.send_if_modified(|current| {
                    if *current == online {
                        return false;
                    }
                    info!("Network is now {}", if online { "online" } else { "offline" });
                    *current = online;
                    true
                });

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self {
            state: rx,
            cancel,
            handle,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
