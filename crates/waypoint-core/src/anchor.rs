//! # Anchor Layer
//!
//! An [`Anchor`] is the identity wrapper around every archetype instance.
//!
//! Anchors are cheap handles: a hydrated anchor shares one [`AnchorCell`]
//! with every other handle to the same id, so a mutation through one handle
//! is visible through all of them. A stub carries only the id and kind and
//! must be resolved through a [`GraphStore`] before its contents can be
//! touched.
//!
//! ## Locking
//!
//! Each cell holds two locks:
//! - an `RwLock` around the archetype (user fields)
//! - a `Mutex` around [`AnchorState`] (owner, permission, relations)
//!
//! Code that needs both takes the archetype lock first. No code path holds
//! two state mutexes at once.

use crate::archetype::{AnyArchetype, Archetype, Root};
use crate::formats::{AnchorRecord, HydratedRecord};
use crate::graph::GraphStore;
use crate::registry::ArchetypeRegistry;
use crate::types::{AnchorId, AnchorReport, ArchetypeKind, Permission, WaypointError};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// SPATIAL RELATIONS
// =============================================================================

/// Incidence list of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnchor {
    /// Incident edges in connection order.
    pub edges: Vec<AnchorId>,
}

/// Endpoints of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAnchor {
    pub source: AnchorId,
    pub target: AnchorId,
    pub is_undirected: bool,
}

impl EdgeAnchor {
    /// The endpoint opposite `node`, if `node` is an endpoint.
    #[must_use]
    pub fn opposite(&self, node: AnchorId) -> Option<AnchorId> {
        if self.source == node {
            Some(self.target)
        } else if self.target == node {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Stored traversal state of a walker between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkerAnchor {
    pub path: Vec<AnchorId>,
    pub next: Vec<AnchorId>,
    pub ignores: Vec<AnchorId>,
    pub disengaged: bool,
}

/// Kind-specific relations of an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spatial {
    Node(NodeAnchor),
    Edge(EdgeAnchor),
    Walker(WalkerAnchor),
    Object,
}

impl Spatial {
    /// Empty relations for a fresh anchor of `kind`.
    ///
    /// Edges get a self-referencing placeholder until `connect` wires them.
    fn empty(kind: ArchetypeKind, id: AnchorId) -> Self {
        match kind {
            ArchetypeKind::Node => Self::Node(NodeAnchor::default()),
            ArchetypeKind::Edge => Self::Edge(EdgeAnchor {
                source: id,
                target: id,
                is_undirected: false,
            }),
            ArchetypeKind::Walker => Self::Walker(WalkerAnchor::default()),
            ArchetypeKind::Object => Self::Object,
        }
    }
}

/// Mutable bookkeeping of an anchor.
#[derive(Debug, Clone)]
pub struct AnchorState {
    /// Owning root; `None` until the anchor is first saved.
    pub root: Option<AnchorId>,
    pub access: Permission,
    pub persistent: bool,
    pub spatial: Spatial,
}

// =============================================================================
// ANCHOR CELL
// =============================================================================

/// Shared storage behind every hydrated handle of one anchor.
pub struct AnchorCell {
    type_name: &'static str,
    archetype: RwLock<Box<dyn AnyArchetype>>,
    state: Mutex<AnchorState>,
}

impl AnchorCell {
    /// Type name of the wrapped archetype; fixed for the cell's lifetime.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Read lock on the archetype.
    pub fn archetype(&self) -> RwLockReadGuard<'_, Box<dyn AnyArchetype>> {
        self.archetype.read()
    }

    /// Write lock on the archetype.
    pub fn archetype_mut(&self) -> RwLockWriteGuard<'_, Box<dyn AnyArchetype>> {
        self.archetype.write()
    }

    /// Lock on the bookkeeping state.
    pub fn state(&self) -> MutexGuard<'_, AnchorState> {
        self.state.lock()
    }
}

// =============================================================================
// HYDRATION
// =============================================================================

/// A value that is either loaded or only known by id.
#[derive(Debug, Clone)]
pub enum Ref<T> {
    Hydrated(T),
    Stub(AnchorId),
}

// =============================================================================
// ANCHOR
// =============================================================================

/// Identity handle of a node, edge, walker or object.
///
/// Two anchors are equal iff they have the same kind and id, whatever
/// their hydration state.
#[derive(Clone)]
pub struct Anchor {
    id: AnchorId,
    kind: ArchetypeKind,
    inner: Ref<Arc<AnchorCell>>,
}

impl Anchor {
    /// Wrap an archetype in a fresh anchor with a new id.
    ///
    /// `Root` archetypes start persistent; everything else starts transient.
    #[must_use]
    pub fn new(archetype: Box<dyn AnyArchetype>) -> Self {
        Self::with_id(AnchorId::new(), archetype)
    }

    /// Wrap an archetype under a chosen id.
    #[must_use]
    pub fn with_id(id: AnchorId, archetype: Box<dyn AnyArchetype>) -> Self {
        let kind = archetype.kind();
        let is_root = archetype.type_name() == Root::NAME;
        let state = AnchorState {
            root: is_root.then_some(id),
            access: Permission::default(),
            persistent: is_root,
            spatial: Spatial::empty(kind, id),
        };
        Self::from_parts(id, archetype, state)
    }

    fn from_parts(id: AnchorId, archetype: Box<dyn AnyArchetype>, state: AnchorState) -> Self {
        let kind = archetype.kind();
        let cell = AnchorCell {
            type_name: archetype.type_name(),
            archetype: RwLock::new(archetype),
            state: Mutex::new(state),
        };
        Self {
            id,
            kind,
            inner: Ref::Hydrated(Arc::new(cell)),
        }
    }

    /// A stub for `id`; it must be resolved before use.
    #[must_use]
    pub fn stub(id: AnchorId, kind: ArchetypeKind) -> Self {
        Self {
            id,
            kind,
            inner: Ref::Stub(id),
        }
    }

    /// A stub handle to this anchor.
    #[must_use]
    pub fn make_stub(&self) -> Self {
        Self::stub(self.id, self.kind)
    }

    #[must_use]
    pub fn id(&self) -> AnchorId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> ArchetypeKind {
        self.kind
    }

    /// Whether the contents are loaded.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        matches!(self.inner, Ref::Hydrated(_))
    }

    /// Load the contents from `store` if this is a stub. Idempotent.
    pub fn populate(&mut self, store: &dyn GraphStore) -> Result<(), WaypointError> {
        if self.is_populated() {
            return Ok(());
        }
        let found = store
            .find_by_id(self.id)?
            .ok_or(WaypointError::ReferenceError(self.id))?;
        if found.kind != self.kind {
            return Err(WaypointError::InvalidTarget(format!(
                "{} is a {}, not a {}",
                self.id, found.kind, self.kind
            )));
        }
        match found.inner {
            Ref::Hydrated(cell) => {
                self.inner = Ref::Hydrated(cell);
                Ok(())
            }
            Ref::Stub(_) => Err(WaypointError::ReferenceError(self.id)),
        }
    }

    /// Populate, then return the cell.
    pub fn resolve(&mut self, store: &dyn GraphStore) -> Result<&Arc<AnchorCell>, WaypointError> {
        self.populate(store)?;
        self.cell()
    }

    /// The cell of a hydrated anchor; stubs fail with `ReferenceError`.
    pub fn cell(&self) -> Result<&Arc<AnchorCell>, WaypointError> {
        match &self.inner {
            Ref::Hydrated(cell) => Ok(cell),
            Ref::Stub(id) => Err(WaypointError::ReferenceError(*id)),
        }
    }

    /// Type name of the wrapped archetype.
    pub fn type_name(&self) -> Result<&'static str, WaypointError> {
        Ok(self.cell()?.type_name())
    }

    /// Lock and return the bookkeeping state.
    pub fn state(&self) -> Result<MutexGuard<'_, AnchorState>, WaypointError> {
        Ok(self.cell()?.state())
    }

    pub fn is_persistent(&self) -> Result<bool, WaypointError> {
        Ok(self.state()?.persistent)
    }

    pub fn root(&self) -> Result<Option<AnchorId>, WaypointError> {
        Ok(self.state()?.root)
    }

    /// Incident edge ids of a node; empty for other kinds.
    pub fn edge_ids(&self) -> Result<Vec<AnchorId>, WaypointError> {
        Ok(match &self.state()?.spatial {
            Spatial::Node(node) => node.edges.clone(),
            _ => Vec::new(),
        })
    }

    /// Endpoints of an edge; `None` for other kinds.
    pub fn endpoints(&self) -> Result<Option<EdgeAnchor>, WaypointError> {
        Ok(match &self.state()?.spatial {
            Spatial::Edge(edge) => Some(edge.clone()),
            _ => None,
        })
    }

    /// Id and field map of the archetype.
    pub fn report(&self) -> Result<AnchorReport, WaypointError> {
        let context = self.cell()?.archetype().context();
        Ok(AnchorReport {
            id: self.id.to_string(),
            context,
        })
    }

    /// Serialize this anchor. Stubs produce stub records.
    pub fn to_record(&self) -> Result<AnchorRecord, WaypointError> {
        let cell = match &self.inner {
            Ref::Stub(id) => {
                return Ok(AnchorRecord::Stub {
                    id: *id,
                    kind: self.kind,
                });
            }
            Ref::Hydrated(cell) => cell,
        };
        let fields = cell.archetype().fields_json()?;
        let state = cell.state();
        Ok(AnchorRecord::Hydrated(HydratedRecord {
            id: self.id,
            kind: self.kind,
            type_name: cell.type_name().to_string(),
            root: state.root,
            access: state.access.clone(),
            persistent: state.persistent,
            spatial: state.spatial.clone(),
            fields,
        }))
    }

    /// Rebuild an anchor from a record, decoding fields through `registry`.
    pub fn from_record(
        record: AnchorRecord,
        registry: &ArchetypeRegistry,
    ) -> Result<Self, WaypointError> {
        let record = match record {
            AnchorRecord::Stub { id, kind } => return Ok(Self::stub(id, kind)),
            AnchorRecord::Hydrated(record) => record,
        };
        let archetype = registry.decode(&record.type_name, &record.fields)?;
        if archetype.kind() != record.kind {
            return Err(WaypointError::DeserializationError(format!(
                "{} is registered as {}, record says {}",
                record.type_name,
                archetype.kind(),
                record.kind
            )));
        }
        let state = AnchorState {
            root: record.root,
            access: record.access,
            persistent: record.persistent,
            spatial: record.spatial,
        };
        Ok(Self::from_parts(record.id, archetype, state))
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for Anchor {}

impl Hash for Anchor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Anchor");
        dbg.field("id", &self.id.to_string()).field("kind", &self.kind);
        match &self.inner {
            Ref::Hydrated(cell) => dbg.field("type", &cell.type_name()),
            Ref::Stub(_) => dbg.field("stub", &true),
        };
        dbg.finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::GenericEdge;
    use crate::graph::MemoryGraph;

    #[test]
    fn equality_ignores_hydration() {
        let anchor = Anchor::new(Box::new(Root));
        let stub = anchor.make_stub();
        assert!(!stub.is_populated());
        assert_eq!(anchor, stub);
        assert_ne!(anchor, Anchor::stub(anchor.id(), ArchetypeKind::Edge));
    }

    #[test]
    fn roots_start_persistent_and_self_owned() {
        let root = Anchor::new(Box::new(Root));
        assert_eq!(root.is_persistent(), Ok(true));
        assert_eq!(root.root(), Ok(Some(root.id())));

        let edge = Anchor::new(Box::new(GenericEdge));
        assert_eq!(edge.is_persistent(), Ok(false));
        assert_eq!(edge.root(), Ok(None));
    }

    #[test]
    fn populate_is_idempotent() {
        let store = MemoryGraph::new();
        let anchor = Anchor::new(Box::new(Root));
        store.put(&anchor).expect("put");

        let mut stub = anchor.make_stub();
        stub.populate(&store).expect("first populate");
        let first = Arc::clone(stub.cell().expect("hydrated"));
        stub.populate(&store).expect("second populate");
        assert!(Arc::ptr_eq(&first, stub.cell().expect("hydrated")));
    }

    #[test]
    fn populate_unknown_id_is_reference_error() {
        let store = MemoryGraph::new();
        let mut stub = Anchor::stub(AnchorId::new(), ArchetypeKind::Node);
        assert_eq!(
            stub.populate(&store),
            Err(WaypointError::ReferenceError(stub.id()))
        );
        assert!(stub.cell().is_err());
    }

    #[test]
    fn record_roundtrip_restores_state() {
        let registry = ArchetypeRegistry::new();
        let root = Anchor::new(Box::new(Root));
        let record = root.to_record().expect("record");
        let restored = Anchor::from_record(record, &registry).expect("restore");

        assert_eq!(restored, root);
        assert_eq!(restored.is_persistent(), Ok(true));
        assert_eq!(restored.type_name(), Ok("Root"));
    }

    #[test]
    fn stub_record_restores_stub() {
        let registry = ArchetypeRegistry::new();
        let stub = Anchor::stub(AnchorId::new(), ArchetypeKind::Walker);
        let restored = Anchor::from_record(stub.to_record().expect("record"), &registry)
            .expect("restore");
        assert!(!restored.is_populated());
        assert_eq!(restored, stub);
    }

    #[test]
    fn opposite_endpoint() {
        let (a, b) = (AnchorId::new(), AnchorId::new());
        let edge = EdgeAnchor {
            source: a,
            target: b,
            is_undirected: false,
        };
        assert_eq!(edge.opposite(a), Some(b));
        assert_eq!(edge.opposite(b), Some(a));
        assert_eq!(edge.opposite(AnchorId::new()), None);
    }
}
