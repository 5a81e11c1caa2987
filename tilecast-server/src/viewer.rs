//! TCP viewer connections and the viewer registry.
//!
//! Each connected viewer receives length-delimited bincode
//! [`UpdateMessage`]s. A viewer is a [`RecipientLink`]: the dispatcher
//! asks it for liveness and join age at call time and hands it
//! messages one at a time. Write failures that mean "peer is gone"
//! flip the viewer offline so the dispatcher stops addressing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tilecast_core::dispatch::RecipientLink;
use tilecast_core::error::{CastError, DeliveryError};
use tilecast_core::session::RecipientDirectory;
use tilecast_core::wire::UpdateMessage;

// ── TcpRecipient ─────────────────────────────────────────────────

/// One connected viewer.
pub struct TcpRecipient {
    name: String,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    online: AtomicBool,
    connected_at: Instant,
}

impl TcpRecipient {
    /// Wrap an accepted stream. The read half is dropped; viewers
    /// only listen.
    pub fn new(stream: TcpStream, name: String) -> Self {
        let (_read, write) = stream.into_split();
        Self {
            name,
            writer: Mutex::new(FramedWrite::new(write, LengthDelimitedCodec::new())),
            online: AtomicBool::new(true),
            connected_at: Instant::now(),
        }
    }

    pub fn mark_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecipientLink for TcpRecipient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    async fn deliver(&self, message: &UpdateMessage) -> Result<(), DeliveryError> {
        let bytes = message
            .to_bytes()
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Bytes::from(bytes)).await {
            let classified = DeliveryError::classify_io(&e);
            if classified.is_disconnect() {
                self.mark_offline();
            }
            return Err(classified);
        }
        Ok(())
    }
}

// ── ViewerRegistry ───────────────────────────────────────────────

/// Accepts viewer connections and supplies the live set to the
/// dispatcher.
pub struct ViewerRegistry {
    viewers: Arc<std::sync::Mutex<Vec<Arc<TcpRecipient>>>>,
    cancel: CancellationToken,
    acceptor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self {
            viewers: Arc::new(std::sync::Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
            acceptor: std::sync::Mutex::new(None),
        }
    }

    /// Bind the viewer port and start accepting connections.
    pub async fn start(&self, port: u16) -> Result<u16, CastError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| CastError::Bind { port, source: e })?;
        let bound = listener.local_addr()?.port();
        info!(port = bound, "viewer listener bound");

        let viewers = Arc::clone(&self.viewers);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = listener.accept() => r,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "viewer connected");
                        let recipient =
                            Arc::new(TcpRecipient::new(stream, peer.to_string()));
                        let mut set = viewers.lock().unwrap_or_else(|e| e.into_inner());
                        // Drop viewers already seen dead.
                        set.retain(|v| v.is_online());
                        set.push(recipient);
                    }
                    Err(e) => {
                        warn!(error = %e, "viewer accept failed");
                    }
                }
            }
            info!("viewer listener stopped");
        });
        *self
            .acceptor
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(bound)
    }

    /// Stop accepting and wait for the acceptor to exit. Existing
    /// viewer connections are left to drop with the registry.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .acceptor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "viewer acceptor ended abnormally");
            }
        }
    }

    /// Number of viewers currently believed online.
    pub fn online_count(&self) -> usize {
        self.viewers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|v| v.is_online())
            .count()
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecipientDirectory for ViewerRegistry {
    async fn recipients(&self) -> Vec<Arc<dyn RecipientLink>> {
        let mut set = self.viewers.lock().unwrap_or_else(|e| e.into_inner());
        // Dead viewers are dropped here as well as on accept, so the
        // registry shrinks even without new connections.
        set.retain(|v| v.is_online());
        set.iter()
            .map(|v| Arc::clone(v) as Arc<dyn RecipientLink>)
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    use tilecast_core::types::SurfaceId;
    use tilecast_core::wire::{FieldValue, MessageSchema};

    fn message(tag: i32) -> UpdateMessage {
        let mut m = UpdateMessage::empty(&MessageSchema::modern());
        m.write(0, FieldValue::SurfaceId(SurfaceId::new(tag))).unwrap();
        m
    }

    #[tokio::test]
    async fn delivered_messages_arrive_length_delimited() {
        let registry = ViewerRegistry::new();
        let port = registry.start(0).await.expect("bind");

        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut reader = FramedRead::new(client, LengthDelimitedCodec::new());

        // Wait for the acceptor to register the connection.
        for _ in 0..50 {
            if registry.online_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let recipients = registry.recipients().await;
        assert_eq!(recipients.len(), 1);

        recipients[0].deliver(&message(7)).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), reader.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("codec ok");
        let decoded = UpdateMessage::from_bytes(&frame).unwrap();
        assert_eq!(
            decoded.value(0),
            Some(&FieldValue::SurfaceId(SurfaceId::new(7)))
        );

        registry.stop().await;
    }

    #[tokio::test]
    async fn disconnect_marks_the_viewer_offline() {
        let registry = ViewerRegistry::new();
        let port = registry.start(0).await.expect("bind");

        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        for _ in 0..50 {
            if registry.online_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(client);

        let recipients = registry.recipients().await;
        assert_eq!(recipients.len(), 1);

        // Writes into a closed socket eventually classify as a
        // disconnect; the first may still land in the send buffer.
        let mut saw_disconnect = false;
        for i in 0..20 {
            match recipients[0].deliver(&message(i)).await {
                Err(e) if e.is_disconnect() => {
                    saw_disconnect = true;
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        assert!(saw_disconnect);
        assert!(!recipients[0].is_online());
        // The dead viewer is pruned on the next directory read, with
        // no new connection needed.
        assert!(registry.recipients().await.is_empty());
        assert_eq!(registry.online_count(), 0);

        registry.stop().await;
    }
}
