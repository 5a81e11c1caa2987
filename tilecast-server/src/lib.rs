//! # tilecast-server — display streaming daemon
//!
//! Standalone daemon around the `tilecast-core` pipeline: ingests a
//! JPEG byte stream over UDP, quantizes frames to palette rasters,
//! synthesizes display-update messages and fans them out to connected
//! TCP viewers.
//!
//! ## Modes
//!
//! - **Video**: every decoded frame from the UDP stream is pushed to
//!   viewers as it arrives.
//! - **Still**: `--show <key>` runs one session pass for an image
//!   under the configured image directory.

pub mod config;
pub mod resolver;
pub mod viewer;
