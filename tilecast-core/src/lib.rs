//! # tilecast-core
//!
//! Core pipeline library for the tilecast display streamer.
//!
//! This crate contains:
//! - **Capture**: `CaptureServer` + `MarkerScanner` — stateful UDP demuxer
//!   extracting complete JPEG frames from an unframed byte stream
//! - **Wire**: `MessageSchema`, `UpdateMessage`, `PacketSynthesizer` —
//!   display-update messages built by structural slot discovery
//! - **Dispatch**: `PacketDispatcher` + `RecipientLink` — batched,
//!   partial-failure-tolerant delivery with rate control
//! - **Cache**: `RasterCache` — content-keyed store of synthesized sequences
//! - **Session**: `SessionRuntime` — single-flight per-user display passes
//! - **Surface**: `SurfacePool` — allocator over the reserved identifier pool
//! - **Telemetry**: throughput meters and dispatch/capture counters
//! - **Error**: `CastError` — typed, `thiserror`-based error hierarchy

pub mod cache;
pub mod capture;
pub mod dispatch;
pub mod error;
pub mod scanner;
pub mod session;
pub mod surface;
pub mod telemetry;
pub mod types;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use cache::{RasterCache, RasterRecord};
pub use capture::CaptureServer;
pub use dispatch::{JOIN_GRACE, PacketDispatcher, RecipientLink};
pub use error::{CastError, DeliveryError, SynthesisError};
pub use scanner::MarkerScanner;
pub use session::{
    BLANK_KEY, ImageResolver, PaletteQuantizer, RecipientDirectory, SessionContext,
    SessionRuntime, SessionState,
};
pub use surface::SurfacePool;
pub use telemetry::{CaptureStats, DispatchTelemetry, ThroughputMeter};
pub use types::{Bitmap, RASTER_LEN, SURFACE_HEIGHT, SURFACE_WIDTH, SurfaceId};
pub use wire::{
    FieldKind, FieldValue, MessageSchema, PacketSynthesizer, SurfacePatch, UpdateMessage,
};
