//! Cache of fully synthesized message sequences, keyed by content.
//!
//! Synthesis is the expensive step; redisplaying known content should
//! cost one lookup plus dispatch. Records are immutable once inserted
//! and shared by `Arc`, so readers never block each other and a
//! `clear` cannot invalidate a sequence mid-dispatch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::types::SurfaceId;
use crate::wire::UpdateMessage;

// ── RasterRecord ─────────────────────────────────────────────────

/// One cached synthesis result: the surface it targets and the ready
/// message sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRecord {
    pub surface: SurfaceId,
    pub messages: Vec<UpdateMessage>,
}

impl RasterRecord {
    pub fn new(surface: SurfaceId, messages: Vec<UpdateMessage>) -> Self {
        Self { surface, messages }
    }
}

// ── RasterCache ──────────────────────────────────────────────────

/// Content-key to record map. A content key names what is displayed
/// (an image path, a generated-pattern name, the blank key), never
/// where.
pub struct RasterCache {
    records: RwLock<HashMap<String, Arc<RasterRecord>>>,
}

impl RasterCache {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Record for `key`, if one was ever inserted.
    pub fn get(&self, key: &str) -> Option<Arc<RasterRecord>> {
        let records = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner());
        records.get(key).cloned()
    }

    /// Insert (or replace) the record for `key`.
    pub fn put(&self, key: impl Into<String>, record: RasterRecord) -> Arc<RasterRecord> {
        let key = key.into();
        let record = Arc::new(record);
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner());
        debug!(key = %key, messages = record.messages.len(), "caching raster record");
        records.insert(key, record.clone());
        record
    }

    /// Drop every record. In-flight dispatches holding an `Arc` keep
    /// their sequence.
    pub fn clear(&self) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let dropped = records.len();
        records.clear();
        debug!(dropped, "raster cache cleared");
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RasterCache {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FieldValue, MessageSchema, UpdateMessage};

    fn record(surface: i32, tag: i32) -> RasterRecord {
        let mut m = UpdateMessage::empty(&MessageSchema::legacy());
        m.write(0, FieldValue::Int(tag)).unwrap();
        RasterRecord::new(SurfaceId::new(surface), vec![m])
    }

    #[test]
    fn get_after_put_returns_the_record() {
        let cache = RasterCache::new();
        assert!(cache.get("img/a.png").is_none());

        cache.put("img/a.png", record(1, 10));
        let hit = cache.get("img/a.png").unwrap();
        assert_eq!(hit.surface, SurfaceId::new(1));
        assert_eq!(hit.messages.len(), 1);
    }

    #[test]
    fn put_replaces_existing_record() {
        let cache = RasterCache::new();
        cache.put("k", record(1, 10));
        cache.put("k", record(2, 20));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").unwrap().surface, SurfaceId::new(2));
    }

    #[test]
    fn concurrent_puts_to_one_key_leave_exactly_one_record() {
        let cache = Arc::new(RasterCache::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    cache.put("contested", record(i, i * 100 + j));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        // Whichever write won, the record is internally consistent.
        let winner = cache.get("contested").unwrap();
        assert_eq!(winner.messages.len(), 1);
        assert!(winner.surface.value() < 8);
    }

    #[test]
    fn clear_keeps_outstanding_handles_alive() {
        let cache = RasterCache::new();
        cache.put("k", record(3, 30));
        let held = cache.get("k").unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("k").is_none());
        // The handle taken before the clear still reads fine.
        assert_eq!(held.surface, SurfaceId::new(3));
    }
}
