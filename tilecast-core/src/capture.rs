//! Inbound stream receiver — reconstructs frames from UDP datagrams.
//!
//! The receiver owns one UDP socket for its lifetime and runs a
//! dedicated worker task. Every received byte goes through the
//! [`MarkerScanner`](crate::scanner::MarkerScanner); each candidate
//! frame is decoded into a [`Bitmap`] and handed to the registered
//! frame callback *on the receive worker itself* — a slow callback
//! directly throttles frame intake, so callbacks must either be fast
//! or hand off elsewhere if sustained frame rate matters.
//!
//! Shutdown is cooperative: the cancellation token is checked once
//! per datagram (never mid-scan), and [`CaptureServer::stop`] closes
//! the loop and joins the worker before returning.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::CastError;
use crate::scanner::MarkerScanner;
use crate::telemetry::CaptureStats;
use crate::types::Bitmap;

// ── Constants ────────────────────────────────────────────────────

/// Bounded wait on the socket read; a timeout is not an error.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Cadence of the "still waiting" log while no data arrives.
const STILL_WAITING_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence of the frame-rate log while frames flow.
const FRAME_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Receive buffer size — comfortably above any single datagram.
const RECV_BUF_LEN: usize = 64 * 1024;

/// Callback invoked once per successfully decoded frame.
pub type FrameCallback =
    Box<dyn Fn(Bitmap) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// ── CaptureServer ────────────────────────────────────────────────

/// Stateful demultiplexer for the inbound image stream.
///
/// # Lifetime
///
/// Register a callback with [`on_frame`](Self::on_frame), then call
/// [`start`](Self::start); the receive loop runs until
/// [`stop`](Self::stop), which blocks until the worker has exited and
/// the socket is released.
pub struct CaptureServer {
    port: u16,
    callback: Option<FrameCallback>,
    cancel: CancellationToken,
    stats: Arc<CaptureStats>,
    local_addr: Option<SocketAddr>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureServer {
    /// Create a receiver for the given UDP port (0 = OS-assigned).
    pub fn new(port: u16) -> Self {
        Self {
            port,
            callback: None,
            cancel: CancellationToken::new(),
            stats: Arc::new(CaptureStats::new()),
            local_addr: None,
            worker: None,
        }
    }

    /// Register the frame consumer. Must be called before `start`.
    pub fn on_frame<F, Fut>(&mut self, callback: F)
    where
        F: Fn(Bitmap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callback = Some(Box::new(move |frame| Box::pin(callback(frame))));
    }

    /// Receiver counters (frames, bytes, decode errors).
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Address the socket actually bound to (available after `start`).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the socket and start the receive worker.
    ///
    /// A bind failure is fatal: the subsystem must not start
    /// partially.
    pub async fn start(&mut self) -> Result<(), CastError> {
        let socket = UdpSocket::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| CastError::Bind {
                port: self.port,
                source: e,
            })?;
        let addr = socket.local_addr()?;
        self.local_addr = Some(addr);
        info!(%addr, "stream receiver bound");

        let callback = self.callback.take();
        let cancel = self.cancel.clone();
        let stats = Arc::clone(&self.stats);
        let port = addr.port();

        self.worker = Some(tokio::spawn(async move {
            Self::receive_loop(socket, callback, cancel, stats, port).await;
        }));
        Ok(())
    }

    /// Stop the receive loop and wait for the worker to exit.
    pub async fn stop(&mut self) {
        info!(port = self.port, "stopping stream receiver");
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "stream receiver worker ended abnormally");
            }
        }
    }

    /// Whether the receive worker is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    // ── Receive loop ─────────────────────────────────────────────

    async fn receive_loop(
        socket: UdpSocket,
        callback: Option<FrameCallback>,
        cancel: CancellationToken,
        stats: Arc<CaptureStats>,
        port: u16,
    ) {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        let mut scanner = MarkerScanner::new();
        let mut last_wait_log = Instant::now();
        let mut last_frame_log = Instant::now();
        let mut frames_at_last_log: u64 = 0;
        let mut first_datagram = true;

        info!(port, "stream receive loop started");

        loop {
            let recv = tokio::select! {
                _ = cancel.cancelled() => break,
                r = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)) => r,
            };

            let (len, peer) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!(port, error = %e, "datagram receive failed");
                    continue;
                }
                Err(_elapsed) => {
                    // Timeout: nothing is discarded, the loop simply
                    // retries. Say so occasionally.
                    if last_wait_log.elapsed() >= STILL_WAITING_INTERVAL {
                        warn!(
                            port,
                            frames = stats.frames(),
                            kib = stats.bytes() / 1024,
                            "still waiting for stream data"
                        );
                        last_wait_log = Instant::now();
                    }
                    continue;
                }
            };

            if first_datagram {
                info!(port, %peer, bytes = len, "first datagram received");
                first_datagram = false;
            }
            stats.record_bytes(len as u64);

            for &b in &buf[..len] {
                let Some(candidate) = scanner.push(b) else {
                    continue;
                };
                match Bitmap::from_encoded(&candidate) {
                    Ok(frame) => {
                        let total = stats.record_frame();
                        if total % 100 == 0 || last_frame_log.elapsed() >= FRAME_LOG_INTERVAL {
                            let elapsed = last_frame_log.elapsed().as_secs_f64();
                            let fps = (total - frames_at_last_log) as f64 / elapsed.max(1e-3);
                            info!(
                                port,
                                frame = total,
                                width = frame.width,
                                height = frame.height,
                                fps = format_args!("{fps:.2}"),
                                "frame received"
                            );
                            last_frame_log = Instant::now();
                            frames_at_last_log = total;
                        }
                        if let Some(cb) = &callback {
                            cb(frame).await;
                        }
                    }
                    Err(e) => {
                        let errors = stats.record_error();
                        if errors == 1 || errors % 10 == 0 {
                            error!(port, errors, error = %e, "frame decode failed, discarding");
                        }
                    }
                }
            }
        }

        info!(port, frames = stats.frames(), "stream receive loop stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────
