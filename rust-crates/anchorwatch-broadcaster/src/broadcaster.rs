use std::net::SocketAddr;
use std::time::Duration;

use anchorwatch_fusion::AnnotatedSample;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::client::{handle_client, ClientRegistry, Frame, PublishReport};
use crate::error::{BroadcasterError, Result};

/// Fan-out tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Frames a client may fall behind before it is dropped
    pub client_queue_capacity: usize,
    /// Upper bound for writing one frame to a client
    pub send_timeout_ms: u64,
    /// Upper bound for tearing down the listener and all clients
    pub shutdown_deadline_ms: u64,
    /// Send the latest sample to a client as soon as it connects
    pub replay_last_sample: bool,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            client_queue_capacity: 32,
            send_timeout_ms: 500,
            shutdown_deadline_ms: 1000,
            replay_last_sample: true,
        }
    }
}

impl BroadcastSettings {
    pub fn validate(&self) -> Result<()> {
        if self.client_queue_capacity == 0 {
            return Err(BroadcasterError::InvalidSettings(
                "client_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(BroadcasterError::InvalidSettings(
                "send_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

/// Real-time sample broadcaster for TCP clients
///
/// Any connection is a subscriber. Messages are newline-delimited JSON arrays.
pub struct BroadcastHub {
    listen_addr: String,
    settings: BroadcastSettings,
    registry: ClientRegistry,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl BroadcastHub {
    /// Create new hub; nothing is bound until [`start`](Self::start)
    pub fn new(listen_addr: impl Into<String>, settings: BroadcastSettings) -> Result<Self> {
        settings.validate()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listen_addr: listen_addr.into(),
            settings,
            registry: ClientRegistry::new(),
            shutdown,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    /// Bind the listener and spawn the accept loop; returns the bound address
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut accept_task = self.accept_task.lock().await;
        if accept_task.is_some() {
            return Err(BroadcasterError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| BroadcasterError::ListenAddress(format!("{}: {}", self.listen_addr, e)))?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Sample broadcaster listening on {}", local_addr);

        self.shutdown.send_replace(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.registry.clone(),
            self.settings.clone(),
            self.shutdown.subscribe(),
        ));

        *accept_task = Some(task);
        *self.local_addr.lock().await = Some(local_addr);

        Ok(local_addr)
    }

    /// Stop accepting, close every client, and wait at most `deadline`
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        let task = self
            .accept_task
            .lock()
            .await
            .take()
            .ok_or(BroadcasterError::NotStarted)?;

        self.shutdown.send_replace(true);

        let abort = task.abort_handle();
        match tokio::time::timeout(deadline, task).await {
            Ok(_) => tracing::info!("Sample broadcaster stopped"),
            Err(_) => {
                tracing::warn!("Broadcaster shutdown exceeded {:?}, aborting connections", deadline);
                abort.abort();
            }
        }

        let leftover = self.registry.clear().await;
        if leftover > 0 {
            tracing::debug!("Dropped {} client handles at shutdown", leftover);
        }
        *self.local_addr.lock().await = None;

        Ok(())
    }

    /// Serialize `sample` once and queue it for every client
    pub async fn publish(&self, sample: &AnnotatedSample) -> Result<PublishReport> {
        let line = sample.to_json_line()?;
        Ok(self.publish_frame(Frame::from(line.into_bytes())).await)
    }

    /// Queue an already framed message for every client
    pub async fn publish_frame(&self, frame: Frame) -> PublishReport {
        self.registry.publish(frame).await
    }

    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.settings
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: ClientRegistry,
    settings: BroadcastSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();
    let send_timeout = settings.send_timeout();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not disable Nagle for {}: {}", addr, e);
                    }
                    let (id, outbound) = registry
                        .register(addr, settings.client_queue_capacity, settings.replay_last_sample)
                        .await;
                    handlers.spawn(handle_client(
                        id,
                        stream,
                        addr,
                        outbound,
                        registry.clone(),
                        send_timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::error!("Failed to accept client: {}", e);
                    // Back off on accept errors such as EMFILE
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },

            Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = finished {
                    tracing::error!("Client handler failed: {}", e);
                }
            }
        }
    }

    drop(listener);
    while handlers.join_next().await.is_some() {}
    tracing::info!("Client acceptance task stopped");
}
