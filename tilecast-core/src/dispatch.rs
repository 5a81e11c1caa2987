//! Batched, partial-failure-tolerant message distribution.
//!
//! `send` pushes a message sequence to a recipient set. It never
//! fails as a whole: per-recipient and per-message failures are
//! counted and logged, and only a "recipient gone" classification
//! stops further sends to that one recipient. Messages reach each
//! recipient in the order provided; nothing is guaranteed *across*
//! concurrent dispatch calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::telemetry::DispatchTelemetry;
use crate::wire::UpdateMessage;

// ── Constants ────────────────────────────────────────────────────

/// A recipient connected more recently than this is skipped: pushing
/// updates at a client still completing its own connection handshake
/// can destabilise it.
pub const JOIN_GRACE: Duration = Duration::from_millis(3000);

/// Messages per transmission batch.
const BATCH_SIZE: usize = 10;

/// Pause between batches, bounding instantaneous per-recipient
/// throughput.
const BATCH_PAUSE: Duration = Duration::from_millis(50);

// ── RecipientLink ────────────────────────────────────────────────

/// One connected client, supplied per dispatch call and never cached
/// by the dispatcher.
#[async_trait]
pub trait RecipientLink: Send + Sync {
    /// Identifying name for logs.
    fn name(&self) -> &str;

    /// Whether the client is currently connected.
    fn is_online(&self) -> bool;

    /// Time since the client joined.
    fn connected_for(&self) -> Duration;

    /// Deliver one message.
    async fn deliver(&self, message: &UpdateMessage) -> Result<(), DeliveryError>;
}

// ── PacketDispatcher ─────────────────────────────────────────────

/// Delivers synthesized messages to recipient sets with batching,
/// rate control and telemetry.
pub struct PacketDispatcher {
    telemetry: Arc<DispatchTelemetry>,
}

impl PacketDispatcher {
    /// The telemetry collector is handed in so counters stay visible
    /// to the owning process.
    pub fn new(telemetry: Arc<DispatchTelemetry>) -> Self {
        Self { telemetry }
    }

    pub fn telemetry(&self) -> &Arc<DispatchTelemetry> {
        &self.telemetry
    }

    /// Deliver `messages` to every eligible recipient; returns the
    /// number of individually successful deliveries.
    pub async fn send(
        &self,
        recipients: &[Arc<dyn RecipientLink>],
        messages: &[UpdateMessage],
    ) -> usize {
        self.send_until(recipients, messages, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), but stops at the next batch boundary
    /// once `cancel` fires. The batch in flight always completes; the
    /// token is never checked mid-batch.
    pub async fn send_until(
        &self,
        recipients: &[Arc<dyn RecipientLink>],
        messages: &[UpdateMessage],
        cancel: &CancellationToken,
    ) -> usize {
        if cancel.is_cancelled() {
            debug!("dispatch skipped, stop already requested");
            return 0;
        }
        info!(
            messages = messages.len(),
            recipients = recipients.len(),
            "dispatching update messages"
        );

        let eligible: Vec<&Arc<dyn RecipientLink>> = recipients
            .iter()
            .filter(|r| {
                if !r.is_online() {
                    warn!(recipient = r.name(), "recipient offline, skipping");
                    return false;
                }
                let joined = r.connected_for();
                if joined < JOIN_GRACE {
                    warn!(
                        recipient = r.name(),
                        joined_ms = joined.as_millis() as u64,
                        "recipient joined recently, skipping to avoid destabilising it"
                    );
                    return false;
                }
                true
            })
            .collect();

        if eligible.is_empty() {
            warn!("no eligible recipients");
            return 0;
        }

        let mut sent = 0usize;
        for recipient in eligible {
            if cancel.is_cancelled() {
                debug!("stop requested, remaining recipients skipped");
                break;
            }
            sent += self.send_to(recipient.as_ref(), messages, cancel).await;
        }

        debug!(sent, "dispatch complete");
        sent
    }

    /// Deliver the full sequence to one recipient in batches.
    async fn send_to(
        &self,
        recipient: &dyn RecipientLink,
        messages: &[UpdateMessage],
        cancel: &CancellationToken,
    ) -> usize {
        let mut sent = 0usize;
        let mut errors = 0usize;
        let batches = messages.chunks(BATCH_SIZE).count();

        'batches: for (batch_index, batch) in messages.chunks(BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                // Boundary checks only: a stop request or an offline
                // recipient ends the sequence, never the batch in
                // flight.
                if cancel.is_cancelled() {
                    debug!(
                        recipient = recipient.name(),
                        batch = batch_index,
                        "stop requested, remaining batches skipped"
                    );
                    break;
                }
                if !recipient.is_online() {
                    warn!(
                        recipient = recipient.name(),
                        batch = batch_index,
                        "recipient went offline between batches"
                    );
                    break;
                }
            }

            for message in batch {
                match recipient.deliver(message).await {
                    Ok(()) => {
                        sent += 1;
                        if let Some(rate) = self.telemetry.record_sent(message.encoded_len()) {
                            let stats = self.telemetry.snapshot();
                            info!(
                                total_sent = stats.sent,
                                total_errors = stats.errors,
                                rate = format_args!("{rate:.2}"),
                                "dispatch throughput (messages/sec)"
                            );
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        self.telemetry.record_error();
                        warn!(
                            recipient = recipient.name(),
                            error = %e,
                            "message delivery failed"
                        );
                        if e.is_disconnect() {
                            warn!(
                                recipient = recipient.name(),
                                "recipient disconnected mid-stream, skipping the rest"
                            );
                            break 'batches;
                        }
                    }
                }
            }

            if batch_index + 1 < batches {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        debug!(
            recipient = recipient.name(),
            sent,
            errors,
            of = messages.len(),
            "finished recipient"
        );
        sent
    }
}

// ── Tests ────────────────────────────────────────────────────────
