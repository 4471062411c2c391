//! # Graph Store
//!
//! The [`GraphStore`] trait is the single source of truth for anchors.
//!
//! The graph is an arena: every anchor a session touches lives in the store
//! under its id, and relations between anchors are plain ids. Transient
//! anchors live in the store too, so stubs always resolve while a session is
//! open; only persistent anchors survive [`GraphStore::close`].
//!
//! Stores use interior mutability so one store can be shared between worker
//! threads behind an `Arc`.

use crate::anchor::Anchor;
use crate::types::{AnchorId, WaypointError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity-indexed anchor storage.
pub trait GraphStore: Send + Sync + fmt::Debug {
    /// Look up an anchor. Returns a hydrated handle sharing the stored cell.
    fn find_by_id(&self, id: AnchorId) -> Result<Option<Anchor>, WaypointError>;

    /// Insert or replace an anchor. The anchor must be hydrated.
    fn put(&self, anchor: &Anchor) -> Result<(), WaypointError>;

    /// Remove an anchor. Returns whether it was present.
    fn remove(&self, id: AnchorId) -> Result<bool, WaypointError>;

    /// Every id currently in the store, in id order.
    fn ids(&self) -> Result<Vec<AnchorId>, WaypointError>;

    /// Write pending persistent anchors durably.
    fn commit(&self) -> Result<(), WaypointError> {
        Ok(())
    }

    /// Commit, then drop every transient anchor.
    fn close(&self) -> Result<(), WaypointError>;

    /// Look up an anchor that must exist.
    fn get(&self, id: AnchorId) -> Result<Anchor, WaypointError> {
        self.find_by_id(id)?
            .ok_or(WaypointError::ReferenceError(id))
    }

    /// Owning root of an anchor, if the anchor exists and has one.
    fn root_of(&self, id: AnchorId) -> Result<Option<AnchorId>, WaypointError> {
        match self.find_by_id(id)? {
            Some(anchor) => anchor.root(),
            None => Ok(None),
        }
    }

    /// Number of anchors in the store.
    fn len(&self) -> Result<usize, WaypointError> {
        Ok(self.ids()?.len())
    }

    /// Whether the store holds no anchors.
    fn is_empty(&self) -> Result<bool, WaypointError> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// A store that lives entirely in memory.
///
/// `close` keeps persistent anchors, so a long-lived process can reuse one
/// `MemoryGraph` across many sessions.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    anchors: RwLock<BTreeMap<AnchorId, Anchor>>,
    /// Ids removed during this session; lookups treat them as gone.
    gc: RwLock<BTreeSet<AnchorId>>,
}

impl MemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids removed since the store was created or last closed.
    pub fn collected(&self) -> Vec<AnchorId> {
        self.gc.read().iter().copied().collect()
    }
}

impl GraphStore for MemoryGraph {
    fn find_by_id(&self, id: AnchorId) -> Result<Option<Anchor>, WaypointError> {
        if self.gc.read().contains(&id) {
            return Ok(None);
        }
        Ok(self.anchors.read().get(&id).cloned())
    }

    fn put(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        anchor.cell()?;
        self.gc.write().remove(&anchor.id());
        self.anchors.write().insert(anchor.id(), anchor.clone());
        Ok(())
    }

    fn remove(&self, id: AnchorId) -> Result<bool, WaypointError> {
        let removed = self.anchors.write().remove(&id).is_some();
        if removed {
            self.gc.write().insert(id);
        }
        Ok(removed)
    }

    fn ids(&self) -> Result<Vec<AnchorId>, WaypointError> {
        Ok(self.anchors.read().keys().copied().collect())
    }

    fn close(&self) -> Result<(), WaypointError> {
        let mut anchors = self.anchors.write();
        let mut dropped = 0usize;
        let mut kept = BTreeMap::new();
        for (id, anchor) in std::mem::take(&mut *anchors) {
            if anchor.is_persistent()? {
                kept.insert(id, anchor);
            } else {
                dropped += 1;
            }
        }
        *anchors = kept;
        self.gc.write().clear();
        tracing::debug!(kept = anchors.len(), dropped, "memory store closed");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::{GenericEdge, Root};

    #[test]
    fn put_find_remove() {
        let store = MemoryGraph::new();
        let root = Anchor::new(Box::new(Root));
        store.put(&root).expect("put");

        assert_eq!(store.find_by_id(root.id()).expect("find"), Some(root.clone()));
        assert_eq!(store.len(), Ok(1));
        assert_eq!(store.root_of(root.id()), Ok(Some(root.id())));

        assert_eq!(store.remove(root.id()), Ok(true));
        assert_eq!(store.find_by_id(root.id()).expect("find"), None);
        assert_eq!(store.collected(), vec![root.id()]);
        assert_eq!(store.remove(root.id()), Ok(false));
    }

    #[test]
    fn stubs_cannot_be_stored() {
        let store = MemoryGraph::new();
        let stub = Anchor::new(Box::new(Root)).make_stub();
        assert!(store.put(&stub).is_err());
    }

    #[test]
    fn get_missing_is_reference_error() {
        let store = MemoryGraph::new();
        let id = AnchorId::new();
        assert_eq!(store.get(id), Err(WaypointError::ReferenceError(id)));
    }

    #[test]
    fn close_drops_transient_anchors() {
        let store = MemoryGraph::new();
        let root = Anchor::new(Box::new(Root));
        let edge = Anchor::new(Box::new(GenericEdge));
        store.put(&root).expect("put");
        store.put(&edge).expect("put");

        store.close().expect("close");
        assert_eq!(store.ids(), Ok(vec![root.id()]));
        assert!(store.collected().is_empty());
    }
}
