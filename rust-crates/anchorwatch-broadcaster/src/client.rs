use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};

/// Serialized message shared by every client queue
pub type Frame = Arc<[u8]>;

/// Identifier assigned to a connection on accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Registry side of a connection: where to queue outbound frames
struct ClientHandle {
    addr: SocketAddr,
    outbound: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    clients: HashMap<ClientId, ClientHandle>,
    last_frame: Option<Frame>,
}

/// Thread-safe set of subscribed clients
///
/// Accept inserts, connection handlers remove, publish iterates. All three
/// go through the same lock.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client with a bounded outbound queue
    ///
    /// With `replay_last` set, the most recent frame is queued right away so
    /// the client does not wait for the next cycle.
    pub async fn register(
        &self,
        addr: SocketAddr,
        capacity: usize,
        replay_last: bool,
    ) -> (ClientId, mpsc::Receiver<Frame>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let mut inner = self.inner.lock().await;

        if replay_last {
            if let Some(frame) = inner.last_frame.clone() {
                let _ = outbound.try_send(frame);
            }
        }

        let id = ClientId(inner.next_id);
        inner.next_id += 1;
        inner.clients.insert(id, ClientHandle { addr, outbound });
        tracing::info!("Client {} ({}) registered. Total clients: {}", id, addr, inner.clients.len());

        (id, receiver)
    }

    /// Remove a client; returns false when it was already gone
    pub async fn remove(&self, id: ClientId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.clients.remove(&id) {
            Some(handle) => {
                tracing::info!(
                    "Client {} ({}) removed. Remaining: {}",
                    id,
                    handle.addr,
                    inner.clients.len()
                );
                true
            }
            None => false,
        }
    }

    /// Queue `frame` for every client, dropping clients whose queue is full or closed
    pub async fn publish(&self, frame: Frame) -> PublishReport {
        let mut inner = self.inner.lock().await;
        let mut report = PublishReport::default();
        let mut dead = Vec::new();

        for (id, client) in inner.clients.iter() {
            match client.outbound.try_send(Frame::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Client {} ({}) is too slow, dropping it", id, client.addr);
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!("Client {} ({}) stopped receiving, dropping it", id, client.addr);
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            inner.clients.remove(&id);
            report.dropped += 1;
        }
        if report.dropped > 0 {
            tracing::info!("Removed {} dead clients. Remaining: {}", report.dropped, inner.clients.len());
        }

        inner.last_frame = Some(frame);
        report
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.clients.is_empty()
    }

    /// Remote addresses of the current clients
    pub async fn addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .await
            .clients
            .values()
            .map(|c| c.addr)
            .collect()
    }

    /// Drop every client handle; their handlers see a closed queue and exit
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.clients.len();
        inner.clients.clear();
        count
    }
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    Eof,
    ReceiveError,
    SendError,
    SendTimeout,
    Dropped,
    Shutdown,
}

/// Lifecycle of one client connection
///
/// Inbound bytes are logged and discarded. The connection ends on EOF, a
/// receive or send failure, a send exceeding `send_timeout`, removal by the
/// publisher, or shutdown. It is deregistered and closed in every case.
pub async fn handle_client(
    id: ClientId,
    stream: TcpStream,
    addr: SocketAddr,
    mut outbound: mpsc::Receiver<Frame>,
    registry: ClientRegistry,
    send_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Disconnect {
    let (mut reader, mut writer) = stream.into_split();
    let mut inbound = [0u8; 1024];

    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => break Disconnect::Shutdown,

            read = reader.read(&mut inbound) => match read {
                Ok(0) => break Disconnect::Eof,
                Ok(n) => {
                    tracing::debug!(
                        "Received from {}: {}",
                        addr,
                        String::from_utf8_lossy(&inbound[..n]).trim_end()
                    );
                }
                Err(e) => {
                    tracing::warn!("Error receiving data from {}: {}", addr, e);
                    break Disconnect::ReceiveError;
                }
            },

            frame = outbound.recv() => match frame {
                Some(frame) => match tokio::time::timeout(send_timeout, writer.write_all(&frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("Error sending data to {}: {}", addr, e);
                        break Disconnect::SendError;
                    }
                    Err(_) => {
                        tracing::warn!("Send to {} exceeded {:?}", addr, send_timeout);
                        break Disconnect::SendTimeout;
                    }
                },
                None => break Disconnect::Dropped,
            },
        }
    };

    registry.remove(id).await;
    let _ = tokio::time::timeout(send_timeout, writer.shutdown()).await;
    tracing::info!("Client {} ({}) disconnected: {:?}", id, addr, reason);

    reason
}
