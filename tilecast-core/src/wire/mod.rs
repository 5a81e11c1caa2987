//! Outbound display-update wire messages.
//!
//! The host environment's update message is not a fixed binary
//! layout: its field order and field types drift across protocol
//! revisions. This module therefore models a message as a typed slot
//! list described by a [`MessageSchema`], and synthesizes messages by
//! *structurally* discovering compatible slots instead of writing to
//! hard-coded indices.
//!
//! | Module    | Purpose                                            |
//! |-----------|----------------------------------------------------|
//! | `schema`  | Field-kind layouts, one per known wire revision     |
//! | `message` | The slot-list message and patch/decoration values   |
//! | `synth`   | Capability probe + per-field message synthesis      |

pub mod message;
pub mod schema;
pub mod synth;

// ── Re-exports ───────────────────────────────────────────────────

pub use message::{Decoration, FieldValue, SlotError, SurfacePatch, UpdateMessage};
pub use schema::{FieldKind, MessageSchema};
pub use synth::{PacketSynthesizer, SchemaBinding, SynthReport, Synthesized};
