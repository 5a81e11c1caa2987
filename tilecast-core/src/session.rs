//! Per-user session execution.
//!
//! A session owns at most one background worker at a time and drives
//! the "check cache, else resolve + quantize + synthesize + cache,
//! then dispatch" pass for one content key. Starting a new pass while
//! one is running stops the old worker first, so a session is always
//! single-flight: content changes restart it, they never stack.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{RasterCache, RasterRecord};
use crate::dispatch::{PacketDispatcher, RecipientLink};
use crate::error::CastError;
use crate::types::{Bitmap, RASTER_LEN, SurfaceId};
use crate::wire::PacketSynthesizer;

// ── Constants ────────────────────────────────────────────────────

/// Cache key of the fallback record dispatched when content
/// resolution fails.
pub const BLANK_KEY: &str = "blank";

// ── Collaborator traits ──────────────────────────────────────────

/// Turns a content key into source pixels. May block on file I/O, so
/// the session calls it from a blocking worker.
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Result<Bitmap, CastError>;
}

/// Maps a bitmap to the fixed-size palette raster for one surface.
/// Deterministic; the same bitmap always yields the same raster.
pub trait PaletteQuantizer: Send + Sync {
    fn quantize(&self, bitmap: &Bitmap) -> Vec<u8>;
}

/// Supplies the candidate recipient set at call time. The session
/// never caches the set itself.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn recipients(&self) -> Vec<Arc<dyn RecipientLink>>;
}

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of the session's current (or last) pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Running = 1,
    Complete = 2,
    Failed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Running,
            2 => SessionState::Complete,
            3 => SessionState::Failed,
            _ => SessionState::Idle,
        }
    }
}

// ── SessionContext ───────────────────────────────────────────────

/// Everything a session pass needs, shared across passes.
pub struct SessionContext {
    pub cache: Arc<RasterCache>,
    pub synthesizer: Arc<PacketSynthesizer>,
    pub dispatcher: Arc<PacketDispatcher>,
    pub resolver: Arc<dyn ImageResolver>,
    pub quantizer: Arc<dyn PaletteQuantizer>,
    pub directory: Arc<dyn RecipientDirectory>,
}

// ── SessionRuntime ───────────────────────────────────────────────

/// One user's display session, bound to one allocated surface.
pub struct SessionRuntime {
    surface: SurfaceId,
    ctx: Arc<SessionContext>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    pub fn new(surface: SurfaceId, ctx: Arc<SessionContext>) -> Self {
        Self {
            surface,
            ctx,
            state: Arc::new(AtomicU8::new(SessionState::Idle as u8)),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Run one display pass for `key` on a background worker. A pass
    /// already in flight is stopped and awaited first.
    pub async fn run_once(&mut self, key: impl Into<String>) {
        self.stop().await;

        let key = key.into();
        let surface = self.surface;
        let ctx = self.ctx.clone();
        let state = self.state.clone();
        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();

        state.store(SessionState::Running as u8, Ordering::SeqCst);
        info!(surface = %surface, key = %key, "session pass starting");

        self.worker = Some(tokio::spawn(async move {
            let outcome = match run_pass(surface, &ctx, &key, &cancel).await {
                Ok(sent) if cancel.is_cancelled() => {
                    debug!(surface = %surface, key = %key, sent, "session pass stopped");
                    SessionState::Idle
                }
                Ok(sent) => {
                    info!(surface = %surface, key = %key, sent, "session pass complete");
                    SessionState::Complete
                }
                Err(e) => {
                    warn!(surface = %surface, key = %key, error = %e, "session pass failed");
                    SessionState::Failed
                }
            };
            state.store(outcome as u8, Ordering::SeqCst);
        }));
    }

    /// Cooperative stop: signal the worker and await it. The current
    /// unit of work (an in-flight dispatch batch) completes first.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(surface = %self.surface, error = %e, "session worker panicked");
            }
        }
    }

    /// Await the current pass without cancelling it.
    pub async fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(surface = %self.surface, error = %e, "session worker panicked");
            }
        }
    }
}

/// One full pass: cache lookup, else resolve + synthesize, then
/// dispatch. Returns the number of successful deliveries.
///
/// The cancellation token is consulted between stages and handed to
/// the dispatcher for its batch boundaries; no stage is interrupted
/// mid-flight. A resolution failure degrades to the blank record so
/// the surface never shows an error state; a synthesis failure
/// propagates and fails the pass.
async fn run_pass(
    surface: SurfaceId,
    ctx: &Arc<SessionContext>,
    key: &str,
    cancel: &CancellationToken,
) -> Result<usize, CastError> {
    let record = match ctx.cache.get(key) {
        Some(record) => {
            debug!(key, "cache hit");
            record
        }
        None => match resolve_content(ctx, key).await {
            Ok(bitmap) => {
                let record = synthesize_record(surface, ctx, key, &bitmap)?;
                ctx.cache.put(key, record)
            }
            Err(e) => {
                warn!(key, error = %e, "content resolution failed, falling back to blank");
                blank_record(surface, ctx)?
            }
        },
    };

    if cancel.is_cancelled() {
        return Ok(0);
    }
    let recipients = ctx.directory.recipients().await;
    Ok(ctx
        .dispatcher
        .send_until(&recipients, &record.messages, cancel)
        .await)
}

/// Resolve `key` to source pixels on the blocking pool; it may touch
/// the filesystem.
async fn resolve_content(ctx: &Arc<SessionContext>, key: &str) -> Result<Bitmap, CastError> {
    let resolver = ctx.resolver.clone();
    let owned_key = key.to_string();
    tokio::task::spawn_blocking(move || resolver.resolve(&owned_key))
        .await
        .map_err(|e| CastError::Worker(e.to_string()))?
}

/// Quantize and synthesize one record for `key`.
fn synthesize_record(
    surface: SurfaceId,
    ctx: &Arc<SessionContext>,
    key: &str,
    bitmap: &Bitmap,
) -> Result<RasterRecord, CastError> {
    let raster = ctx.quantizer.quantize(bitmap);
    let built = ctx.synthesizer.build(surface, &raster)?;
    if !built.report.wrote_patch {
        warn!(key, "message synthesized without a raster patch");
    }
    Ok(RasterRecord::new(surface, vec![built.message]))
}

/// The all-transparent fallback record, synthesized on first use and
/// cached under [`BLANK_KEY`].
fn blank_record(
    surface: SurfaceId,
    ctx: &Arc<SessionContext>,
) -> Result<Arc<RasterRecord>, CastError> {
    if let Some(record) = ctx.cache.get(BLANK_KEY) {
        return Ok(record);
    }
    let built = ctx.synthesizer.build(surface, &[0u8; RASTER_LEN])?;
    Ok(ctx
        .cache
        .put(BLANK_KEY, RasterRecord::new(surface, vec![built.message])))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::error::DeliveryError;
    use crate::telemetry::DispatchTelemetry;
    use crate::types::{SURFACE_HEIGHT, SURFACE_WIDTH};
    use crate::wire::{MessageSchema, UpdateMessage};

    struct CountingResolver {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ImageResolver for CountingResolver {
        fn resolve(&self, key: &str) -> Result<Bitmap, CastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CastError::FrameDecode(format!("no such content: {key}")));
            }
            let data = vec![0u8; SURFACE_WIDTH * SURFACE_HEIGHT * 4];
            Bitmap::from_rgba8(SURFACE_WIDTH as u32, SURFACE_HEIGHT as u32, data)
        }
    }

    struct FlatQuantizer;

    impl PaletteQuantizer for FlatQuantizer {
        fn quantize(&self, _bitmap: &Bitmap) -> Vec<u8> {
            vec![4u8; RASTER_LEN]
        }
    }

    struct SinkRecipient {
        delivered: Mutex<Vec<UpdateMessage>>,
    }

    #[async_trait]
    impl RecipientLink for SinkRecipient {
        fn name(&self) -> &str {
            "sink"
        }

        fn is_online(&self) -> bool {
            true
        }

        fn connected_for(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn deliver(&self, message: &UpdateMessage) -> Result<(), DeliveryError> {
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct OneSinkDirectory {
        sink: Arc<SinkRecipient>,
    }

    #[async_trait]
    impl RecipientDirectory for OneSinkDirectory {
        async fn recipients(&self) -> Vec<Arc<dyn RecipientLink>> {
            vec![self.sink.clone()]
        }
    }

    fn context_with(
        fail_resolve: bool,
        schema: MessageSchema,
    ) -> (Arc<SessionContext>, Arc<SinkRecipient>, Arc<CountingResolver>) {
        let sink = Arc::new(SinkRecipient {
            delivered: Mutex::new(Vec::new()),
        });
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: fail_resolve,
        });
        let ctx = Arc::new(SessionContext {
            cache: Arc::new(RasterCache::new()),
            synthesizer: Arc::new(PacketSynthesizer::new(schema)),
            dispatcher: Arc::new(PacketDispatcher::new(Arc::new(DispatchTelemetry::new()))),
            resolver: resolver.clone(),
            quantizer: Arc::new(FlatQuantizer),
            directory: Arc::new(OneSinkDirectory { sink: sink.clone() }),
        });
        (ctx, sink, resolver)
    }

    fn context(fail_resolve: bool) -> (Arc<SessionContext>, Arc<SinkRecipient>, Arc<CountingResolver>) {
        context_with(fail_resolve, MessageSchema::modern())
    }

    #[tokio::test]
    async fn cached_key_dispatches_twice_but_synthesizes_once() {
        let (ctx, sink, resolver) = context(false);
        let mut session = SessionRuntime::new(SurfaceId::new(1), ctx);

        session.run_once("img/cat.png").await;
        session.join().await;
        session.run_once("img/cat.png").await;
        session.join().await;

        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resolution_failure_falls_back_to_blank_and_completes() {
        let (ctx, sink, _) = context(true);
        let cache = ctx.cache.clone();
        let mut session = SessionRuntime::new(SurfaceId::new(2), ctx);

        session.run_once("missing.png").await;
        session.join().await;

        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
        // The failed key is not cached; the blank fallback is.
        assert!(cache.get("missing.png").is_none());
        assert!(cache.get(BLANK_KEY).is_some());
    }

    #[tokio::test]
    async fn state_starts_idle_and_ends_complete() {
        let (ctx, _, _) = context(false);
        let mut session = SessionRuntime::new(SurfaceId::new(3), ctx);
        assert_eq!(session.state(), SessionState::Idle);

        session.run_once("img/dog.png").await;
        session.join().await;
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[tokio::test]
    async fn synthesis_failure_marks_the_session_failed() {
        // Resolution succeeds but no schema slot can carry the
        // identifier, so the pass fails instead of showing blank.
        let schema = MessageSchema::new("no-id", vec![crate::wire::FieldKind::OptionalPatch]);
        let (ctx, sink, _) = context_with(false, schema);
        let cache = ctx.cache.clone();
        let mut session = SessionRuntime::new(SurfaceId::new(5), ctx);

        session.run_once("img/cat.png").await;
        session.join().await;

        assert_eq!(session.state(), SessionState::Failed);
        assert!(sink.delivered.lock().unwrap().is_empty());
        assert!(cache.get("img/cat.png").is_none());
    }

    #[tokio::test]
    async fn stop_mid_dispatch_finishes_the_current_batch() {
        struct SlowRecipient {
            delivered: Mutex<Vec<UpdateMessage>>,
        }

        #[async_trait]
        impl RecipientLink for SlowRecipient {
            fn name(&self) -> &str {
                "slow"
            }

            fn is_online(&self) -> bool {
                true
            }

            fn connected_for(&self) -> Duration {
                Duration::from_secs(60)
            }

            async fn deliver(&self, message: &UpdateMessage) -> Result<(), DeliveryError> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.delivered.lock().unwrap().push(message.clone());
                Ok(())
            }
        }

        struct SlowDirectory {
            slow: Arc<SlowRecipient>,
        }

        #[async_trait]
        impl RecipientDirectory for SlowDirectory {
            async fn recipients(&self) -> Vec<Arc<dyn RecipientLink>> {
                vec![self.slow.clone()]
            }
        }

        let slow = Arc::new(SlowRecipient {
            delivered: Mutex::new(Vec::new()),
        });
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let synthesizer = Arc::new(PacketSynthesizer::new(MessageSchema::modern()));
        let ctx = Arc::new(SessionContext {
            cache: Arc::new(RasterCache::new()),
            synthesizer: synthesizer.clone(),
            dispatcher: Arc::new(PacketDispatcher::new(Arc::new(DispatchTelemetry::new()))),
            resolver,
            quantizer: Arc::new(FlatQuantizer),
            directory: Arc::new(SlowDirectory { slow: slow.clone() }),
        });

        // Pre-cache a single-batch record of five slow deliveries.
        let surface = SurfaceId::new(6);
        let built = synthesizer.build(surface, &[0u8; RASTER_LEN]).unwrap();
        ctx.cache.put(
            "five",
            RasterRecord::new(surface, vec![built.message; 5]),
        );

        let mut session = SessionRuntime::new(surface, ctx);
        session.run_once("five").await;
        // Stop lands mid-batch; the batch must still complete before
        // the worker exits.
        tokio::time::sleep(Duration::from_millis(250)).await;
        session.stop().await;

        assert_eq!(slow.delivered.lock().unwrap().len(), 5);
        assert_ne!(session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn restart_replaces_the_previous_pass() {
        let (ctx, sink, _) = context(false);
        let cache = ctx.cache.clone();
        let mut session = SessionRuntime::new(SurfaceId::new(4), ctx);

        session.run_once("img/a.png").await;
        session.run_once("img/b.png").await;
        session.join().await;

        assert_eq!(session.state(), SessionState::Complete);
        assert!(cache.get("img/b.png").is_some());
        // At least the second pass delivered.
        assert!(!sink.delivered.lock().unwrap().is_empty());
    }
}
