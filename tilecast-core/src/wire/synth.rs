//! Message synthesis via structural slot discovery.
//!
//! The synthesizer never assumes a fixed field index. At construction
//! it runs a one-time capability probe over the schema, discovering
//! compatible slots in priority order with graceful fallback:
//!
//! 1. **Typed identifier**: a slot declared as the dedicated
//!    surface-identifier value type.
//! 2. **Primitive fallback**: the first bare integer slot, else any
//!    integer slot found by a full scan.
//! 3. Neither ⇒ identifier synthesis is impossible for this schema.
//!
//! Patch discovery is parallel: a slot optionally wrapping the patch
//! type directly, else one wrapping a patch *collection* (the single
//! patch is then wrapped in a one-element set — the protocol's
//! multi-patch representation, here always used with exactly one
//! element). Discovered decoration slots are recorded so every built
//! message clears them. The probe result (a [`SchemaBinding`]) is
//! what `build` consults per call, so behaviour is auditable per
//! revision instead of being re-derived on every message.

use std::sync::Once;

use tracing::{info, warn};

use crate::error::SynthesisError;
use crate::types::{RASTER_LEN, SURFACE_HEIGHT, SURFACE_WIDTH, SurfaceId};
use crate::wire::message::{FieldValue, SurfacePatch, UpdateMessage};
use crate::wire::schema::{FieldKind, MessageSchema};

// ── SchemaBinding ────────────────────────────────────────────────

/// Where the identifier lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierSlot {
    /// Dedicated surface-identifier value type at this index.
    Typed(usize),
    /// Bare integer written directly at this index.
    Primitive(usize),
}

/// Where the raster patch lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSlot {
    /// Optional slot holding the patch directly.
    Direct(usize),
    /// Optional slot holding a patch collection; the single patch is
    /// wrapped in a one-element set.
    SetWrapped(usize),
}

/// Result of the one-time capability probe over a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaBinding {
    pub identifier: Option<IdentifierSlot>,
    pub patch: Option<PatchSlot>,
    /// Decoration slots to clear on every message.
    pub decorations: Vec<usize>,
    /// First byte slot, for the scale value (absence is not an error).
    pub scale: Option<usize>,
    /// First bool slot, for the locked flag (absence is not an error).
    pub lock: Option<usize>,
}

/// Probe a schema for compatible slots, in priority order.
pub fn probe(schema: &MessageSchema) -> SchemaBinding {
    let fields = schema.fields();

    // Identifier: typed construction first, then the primitive
    // fallback over integer slots.
    let identifier = fields
        .iter()
        .position(|&k| k == FieldKind::SurfaceId)
        .map(IdentifierSlot::Typed)
        .or_else(|| {
            fields
                .iter()
                .position(|&k| k == FieldKind::Int)
                .map(IdentifierSlot::Primitive)
        });

    let patch = fields
        .iter()
        .position(|&k| k == FieldKind::OptionalPatch)
        .map(PatchSlot::Direct)
        .or_else(|| {
            fields
                .iter()
                .position(|&k| k == FieldKind::OptionalPatchSet)
                .map(PatchSlot::SetWrapped)
        });

    let decorations = fields
        .iter()
        .enumerate()
        .filter(|&(_, &k)| k == FieldKind::OptionalDecorations)
        .map(|(i, _)| i)
        .collect();

    let scale = fields.iter().position(|&k| k == FieldKind::Byte);
    let lock = fields.iter().position(|&k| k == FieldKind::Bool);

    SchemaBinding {
        identifier,
        patch,
        decorations,
        scale,
        lock,
    }
}

// ── SynthReport ──────────────────────────────────────────────────

/// Per-sub-field success flags. Callers must check these rather than
/// relying on an error alone: identifier-written-but-patch-missing is
/// a valid state to detect and report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthReport {
    pub wrote_identifier: bool,
    pub wrote_patch: bool,
}

/// A built message together with its per-field report.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub message: UpdateMessage,
    pub report: SynthReport,
}

// ── PacketSynthesizer ────────────────────────────────────────────

static STRUCTURE_LOGGED: Once = Once::new();

/// Builds display-update messages for one wire-schema revision.
pub struct PacketSynthesizer {
    schema: MessageSchema,
    binding: SchemaBinding,
}

impl PacketSynthesizer {
    /// Probe `schema` once and log its field census (once per
    /// process lifetime, never repeated).
    pub fn new(schema: MessageSchema) -> Self {
        let binding = probe(&schema);
        STRUCTURE_LOGGED.call_once(|| {
            info!(
                revision = schema.revision(),
                total = schema.fields().len(),
                ints = schema.count_of(FieldKind::Int),
                bytes = schema.count_of(FieldKind::Byte),
                bools = schema.count_of(FieldKind::Bool),
                byte_arrays = schema.count_of(FieldKind::ByteArray),
                optionals = schema.count_of(FieldKind::OptionalPatch)
                    + schema.count_of(FieldKind::OptionalPatchSet)
                    + schema.count_of(FieldKind::OptionalDecorations),
                "update-message structure"
            );
        });
        Self { schema, binding }
    }

    /// Schema this synthesizer targets.
    pub fn schema(&self) -> &MessageSchema {
        &self.schema
    }

    /// Probe result, for diagnostics.
    pub fn binding(&self) -> &SchemaBinding {
        &self.binding
    }

    /// Build one update message carrying `surface` and a full-surface
    /// raster patch.
    ///
    /// A missing identifier slot aborts with
    /// [`SynthesisError::NoIdentifierField`]. A missing patch slot is
    /// soft: the message is returned with `report.wrote_patch ==
    /// false` and the caller decides whether to send it anyway.
    pub fn build(
        &self,
        surface: SurfaceId,
        raster: &[u8],
    ) -> Result<Synthesized, SynthesisError> {
        if raster.len() != RASTER_LEN {
            return Err(SynthesisError::RasterSize {
                got: raster.len(),
                expected: RASTER_LEN,
            });
        }

        let mut message = UpdateMessage::empty(&self.schema);

        let wrote_identifier = match self.binding.identifier {
            Some(IdentifierSlot::Typed(i)) => {
                Self::try_write(&mut message, i, FieldValue::SurfaceId(surface))
            }
            Some(IdentifierSlot::Primitive(i)) => {
                Self::try_write(&mut message, i, FieldValue::Int(surface.value()))
            }
            None => false,
        };
        if !wrote_identifier {
            return Err(SynthesisError::NoIdentifierField);
        }

        let patch = SurfacePatch::new(
            0,
            0,
            SURFACE_WIDTH as u32,
            SURFACE_HEIGHT as u32,
            raster.to_vec(),
        );
        let wrote_patch = match self.binding.patch {
            Some(PatchSlot::Direct(i)) => {
                Self::try_write(&mut message, i, FieldValue::Patch(Some(patch)))
            }
            Some(PatchSlot::SetWrapped(i)) => {
                Self::try_write(&mut message, i, FieldValue::PatchSet(Some(vec![patch])))
            }
            None => {
                warn!(
                    revision = self.schema.revision(),
                    surface = %surface,
                    "no raster-patch field found"
                );
                false
            }
        };

        // Stale decoration data must never go out.
        for &i in &self.binding.decorations {
            Self::try_write(&mut message, i, FieldValue::Decorations(None));
        }
        if let Some(i) = self.binding.scale {
            Self::try_write(&mut message, i, FieldValue::Byte(0));
        }
        if let Some(i) = self.binding.lock {
            Self::try_write(&mut message, i, FieldValue::Bool(false));
        }

        Ok(Synthesized {
            message,
            report: SynthReport {
                wrote_identifier,
                wrote_patch,
            },
        })
    }

    fn try_write(message: &mut UpdateMessage, index: usize, value: FieldValue) -> bool {
        match message.write(index, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(index, error = %e, "slot write failed");
                false
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raster() -> Vec<u8> {
        vec![7u8; RASTER_LEN]
    }

    #[test]
    fn modern_schema_uses_typed_identifier_and_patch_set() {
        let synth = PacketSynthesizer::new(MessageSchema::modern());
        assert_eq!(synth.binding().identifier, Some(IdentifierSlot::Typed(0)));
        assert_eq!(synth.binding().patch, Some(PatchSlot::SetWrapped(4)));

        let out = synth.build(SurfaceId::new(5), &raster()).unwrap();
        assert!(out.report.wrote_identifier);
        assert!(out.report.wrote_patch);
        assert_eq!(
            out.message.value(0),
            Some(&FieldValue::SurfaceId(SurfaceId::new(5)))
        );
        // Exactly one element in the wrapped set.
        match out.message.value(4) {
            Some(FieldValue::PatchSet(Some(set))) => {
                assert_eq!(set.len(), 1);
                assert_eq!(set[0].width, SURFACE_WIDTH as u32);
                assert_eq!(set[0].height, SURFACE_HEIGHT as u32);
                assert_eq!(set[0].data.len(), RASTER_LEN);
            }
            other => panic!("expected patch set, got {other:?}"),
        }
    }

    #[test]
    fn legacy_schema_falls_back_to_primitive_int() {
        let synth = PacketSynthesizer::new(MessageSchema::legacy());
        assert_eq!(
            synth.binding().identifier,
            Some(IdentifierSlot::Primitive(0))
        );

        let out = synth.build(SurfaceId::new(9), &raster()).unwrap();
        assert_eq!(out.message.value(0), Some(&FieldValue::Int(9)));
        assert!(matches!(
            out.message.value(4),
            Some(FieldValue::Patch(Some(_)))
        ));
    }

    #[test]
    fn missing_patch_slot_is_partial_success() {
        // Identifier-compatible slot but nothing patch-shaped.
        let schema = MessageSchema::new("no-patch", vec![FieldKind::Int, FieldKind::Byte]);
        let synth = PacketSynthesizer::new(schema);

        let out = synth.build(SurfaceId::new(3), &raster()).unwrap();
        assert!(out.report.wrote_identifier);
        assert!(!out.report.wrote_patch);
        assert_eq!(out.message.value(0), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn missing_identifier_slot_aborts() {
        let schema = MessageSchema::new("no-id", vec![FieldKind::OptionalPatch]);
        let synth = PacketSynthesizer::new(schema);
        assert_eq!(
            synth.build(SurfaceId::new(1), &raster()),
            Err(SynthesisError::NoIdentifierField)
        );
    }

    #[test]
    fn decoration_slots_are_cleared() {
        let out = PacketSynthesizer::new(MessageSchema::modern())
            .build(SurfaceId::new(2), &raster())
            .unwrap();
        assert_eq!(out.message.value(3), Some(&FieldValue::Decorations(None)));
    }

    #[test]
    fn scale_and_lock_written_when_present() {
        let out = PacketSynthesizer::new(MessageSchema::legacy())
            .build(SurfaceId::new(2), &raster())
            .unwrap();
        assert_eq!(out.message.value(1), Some(&FieldValue::Byte(0)));
        assert_eq!(out.message.value(2), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn scale_and_lock_absence_is_not_an_error() {
        let schema = MessageSchema::new("bare", vec![FieldKind::Int, FieldKind::OptionalPatch]);
        let out = PacketSynthesizer::new(schema)
            .build(SurfaceId::new(2), &raster())
            .unwrap();
        assert!(out.report.wrote_identifier);
        assert!(out.report.wrote_patch);
    }

    #[test]
    fn short_raster_is_rejected() {
        let synth = PacketSynthesizer::new(MessageSchema::modern());
        assert_eq!(
            synth.build(SurfaceId::new(1), &[0u8; 100]),
            Err(SynthesisError::RasterSize {
                got: 100,
                expected: RASTER_LEN
            })
        );
    }
}
