//! The display-update message and its field values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CastError;
use crate::types::SurfaceId;
use crate::wire::schema::{FieldKind, MessageSchema};

// ── SurfacePatch ─────────────────────────────────────────────────

/// A rectangular raster update applied to a surface: offset, size
/// and one palette byte per cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacePatch {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SurfacePatch {
    /// The canonical 5-argument constructor.
    pub fn new(x: u32, y: u32, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            x,
            y,
            width,
            height,
            data,
        }
    }
}

// ── Decoration ───────────────────────────────────────────────────

/// One marker entry in the surface's decoration overlay. The
/// synthesizer never produces these; discovered decoration slots are
/// explicitly cleared so stale overlay data is never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    pub kind: u8,
    pub x: i8,
    pub y: i8,
    pub rotation: u8,
}

// ── FieldValue ───────────────────────────────────────────────────

/// Runtime value of one message slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Slot exists in the schema but nothing was written to it.
    Unset,
    Int(i32),
    Byte(u8),
    Bool(bool),
    Bytes(Vec<u8>),
    SurfaceId(SurfaceId),
    Patch(Option<SurfacePatch>),
    PatchSet(Option<Vec<SurfacePatch>>),
    Decorations(Option<Vec<Decoration>>),
}

impl FieldValue {
    /// Whether this value may be written into a slot of `kind`.
    fn fits(&self, kind: FieldKind) -> bool {
        matches!(
            (kind, self),
            (FieldKind::Int, FieldValue::Int(_))
                | (FieldKind::Byte, FieldValue::Byte(_))
                | (FieldKind::Bool, FieldValue::Bool(_))
                | (FieldKind::ByteArray, FieldValue::Bytes(_))
                | (FieldKind::SurfaceId, FieldValue::SurfaceId(_))
                | (FieldKind::OptionalPatch, FieldValue::Patch(_))
                | (FieldKind::OptionalPatchSet, FieldValue::PatchSet(_))
                | (FieldKind::OptionalDecorations, FieldValue::Decorations(_))
        ) || matches!(self, FieldValue::Unset)
    }
}

// ── SlotError ────────────────────────────────────────────────────

/// Failure to write one slot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot index {0} out of range")]
    OutOfRange(usize),

    #[error("value does not fit slot {index} of kind {kind:?}")]
    KindMismatch { index: usize, kind: FieldKind },
}

// ── UpdateMessage ────────────────────────────────────────────────

/// One outbound display-update message: the schema's slot kinds plus
/// a value per slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    revision: String,
    kinds: Vec<FieldKind>,
    values: Vec<FieldValue>,
}

impl UpdateMessage {
    /// A message with every slot unset, shaped by `schema`.
    pub fn empty(schema: &MessageSchema) -> Self {
        Self {
            revision: schema.revision().to_string(),
            kinds: schema.fields().to_vec(),
            values: vec![FieldValue::Unset; schema.fields().len()],
        }
    }

    /// Schema revision this message was shaped by.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Declared kind of every slot, in wire order.
    pub fn kinds(&self) -> &[FieldKind] {
        &self.kinds
    }

    /// Value currently held in slot `index`.
    pub fn value(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    /// Write `value` into slot `index`, enforcing the declared kind.
    pub fn write(&mut self, index: usize, value: FieldValue) -> Result<(), SlotError> {
        let kind = *self.kinds.get(index).ok_or(SlotError::OutOfRange(index))?;
        if !value.fits(kind) {
            return Err(SlotError::KindMismatch { index, kind });
        }
        self.values[index] = value;
        Ok(())
    }

    /// The raster patch carried by this message, regardless of which
    /// representation (direct or collection) the schema uses.
    pub fn patch(&self) -> Option<&SurfacePatch> {
        self.values.iter().find_map(|v| match v {
            FieldValue::Patch(Some(p)) => Some(p),
            FieldValue::PatchSet(Some(set)) => set.first(),
            _ => None,
        })
    }

    /// Serialize for the viewer wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CastError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the viewer wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CastError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encoded size in bytes, for throughput accounting.
    pub fn encoded_len(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_enforces_declared_kind() {
        let mut msg = UpdateMessage::empty(&MessageSchema::legacy());
        // Slot 0 of the legacy schema is Int.
        assert!(msg.write(0, FieldValue::Int(7)).is_ok());
        assert_eq!(
            msg.write(0, FieldValue::Bool(true)),
            Err(SlotError::KindMismatch {
                index: 0,
                kind: FieldKind::Int
            })
        );
        assert_eq!(
            msg.write(99, FieldValue::Int(1)),
            Err(SlotError::OutOfRange(99))
        );
    }

    #[test]
    fn patch_is_found_in_either_representation() {
        let patch = SurfacePatch::new(0, 0, 2, 2, vec![1, 2, 3, 4]);

        let mut legacy = UpdateMessage::empty(&MessageSchema::legacy());
        legacy
            .write(4, FieldValue::Patch(Some(patch.clone())))
            .unwrap();
        assert_eq!(legacy.patch(), Some(&patch));

        let mut modern = UpdateMessage::empty(&MessageSchema::modern());
        modern
            .write(4, FieldValue::PatchSet(Some(vec![patch.clone()])))
            .unwrap();
        assert_eq!(modern.patch(), Some(&patch));
    }

    #[test]
    fn wire_roundtrip() {
        let mut msg = UpdateMessage::empty(&MessageSchema::modern());
        msg.write(0, FieldValue::SurfaceId(SurfaceId::new(12)))
            .unwrap();
        msg.write(3, FieldValue::Decorations(None)).unwrap();

        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len() as u64, msg.encoded_len());
        let back = UpdateMessage::from_bytes(&bytes).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.revision(), "modern");
    }
}
