//! Surface-identifier allocation.
//!
//! Identifiers come from a pre-reserved pool handed in at startup.
//! One authoritative allocator serialises assignment, so no two live
//! sessions ever hold the same identifier.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::error::CastError;
use crate::types::SurfaceId;

struct PoolState {
    free: Vec<SurfaceId>,
    live: HashSet<SurfaceId>,
}

/// Mutex-guarded allocator over the reserved identifier pool.
pub struct SurfacePool {
    state: Mutex<PoolState>,
}

impl SurfacePool {
    /// Pool over `ids`; duplicates in the input are collapsed.
    pub fn new(ids: impl IntoIterator<Item = SurfaceId>) -> Self {
        let mut seen = HashSet::new();
        let free: Vec<SurfaceId> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        Self {
            state: Mutex::new(PoolState {
                free,
                live: HashSet::new(),
            }),
        }
    }

    /// Take one identifier out of the pool.
    pub fn allocate(&self) -> Result<SurfaceId, CastError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.free.pop().ok_or(CastError::SurfacesExhausted)?;
        state.live.insert(id);
        debug!(surface = %id, remaining = state.free.len(), "surface allocated");
        Ok(id)
    }

    /// Return a live identifier to the pool.
    pub fn release(&self, id: SurfaceId) -> Result<(), CastError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.live.remove(&id) {
            return Err(CastError::SurfaceNotAllocated(id));
        }
        state.free.push(id);
        debug!(surface = %id, "surface released");
        Ok(())
    }

    /// Identifiers still available.
    pub fn available(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .free
            .len()
    }

    /// Identifiers currently held by sessions.
    pub fn live(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .live
            .len()
    }
}

// ── Tests ────────────────────────────────────────────────────────
