//! Wire-schema descriptions of the display-update message.
//!
//! A schema names a protocol revision and lists the declared kind of
//! every field slot, in wire order. The built-in revisions model the
//! layout drift actually observed in the host protocol; tests add
//! degenerate layouts to exercise the synthesizer's fallbacks.

use serde::{Deserialize, Serialize};

// ── FieldKind ────────────────────────────────────────────────────

/// Declared type of one message field slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Bare integer slot.
    Int,
    /// Single byte slot (used for the display scale).
    Byte,
    /// Boolean slot (used for the locked flag).
    Bool,
    /// Raw byte-array slot.
    ByteArray,
    /// Dedicated surface-identifier value type.
    SurfaceId,
    /// Optional wrapper holding one raster patch directly.
    OptionalPatch,
    /// Optional wrapper holding a *collection* of raster patches —
    /// the protocol's multi-patch representation.
    OptionalPatchSet,
    /// Optional wrapper holding a decoration list unrelated to the
    /// raster patch.
    OptionalDecorations,
}

// ── MessageSchema ────────────────────────────────────────────────

/// Field layout of the update message for one protocol revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    revision: String,
    fields: Vec<FieldKind>,
}

impl MessageSchema {
    pub fn new(revision: impl Into<String>, fields: Vec<FieldKind>) -> Self {
        Self {
            revision: revision.into(),
            fields,
        }
    }

    /// Revision label, for logs only.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Declared slot kinds, in wire order.
    pub fn fields(&self) -> &[FieldKind] {
        &self.fields
    }

    /// Number of slots whose declared kind is `kind`.
    pub fn count_of(&self, kind: FieldKind) -> usize {
        self.fields.iter().filter(|&&k| k == kind).count()
    }

    /// Legacy revision: bare-int identifier, patch carried directly
    /// in an optional slot.
    pub fn legacy() -> Self {
        Self::new(
            "legacy",
            vec![
                FieldKind::Int,
                FieldKind::Byte,
                FieldKind::Bool,
                FieldKind::OptionalDecorations,
                FieldKind::OptionalPatch,
            ],
        )
    }

    /// Modern revision: dedicated surface-identifier value type,
    /// patch carried inside an optional patch collection.
    pub fn modern() -> Self {
        Self::new(
            "modern",
            vec![
                FieldKind::SurfaceId,
                FieldKind::Byte,
                FieldKind::Bool,
                FieldKind::OptionalDecorations,
                FieldKind::OptionalPatchSet,
            ],
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_revisions_differ_in_identifier_kind() {
        assert_eq!(MessageSchema::legacy().count_of(FieldKind::SurfaceId), 0);
        assert_eq!(MessageSchema::modern().count_of(FieldKind::SurfaceId), 1);
        assert_eq!(MessageSchema::legacy().count_of(FieldKind::Int), 1);
    }

    #[test]
    fn both_revisions_carry_one_patch_slot() {
        let legacy = MessageSchema::legacy();
        let modern = MessageSchema::modern();
        assert_eq!(
            legacy.count_of(FieldKind::OptionalPatch)
                + legacy.count_of(FieldKind::OptionalPatchSet),
            1
        );
        assert_eq!(
            modern.count_of(FieldKind::OptionalPatch)
                + modern.count_of(FieldKind::OptionalPatchSet),
            1
        );
    }
}
