//! # Session
//!
//! A [`Session`] is the execution context of one root: it owns the report
//! buffer and answers every access check on behalf of that root. Sessions are
//! cheap to clone; clones share the machine and the report buffer, so walkers
//! run on worker threads report into the same sequence.
//!
//! The boundary operations of the runtime are gathered in the
//! [`ObjectSpatial`] trait, which `Session` implements by delegating to the
//! stateless engines (`AccessControl`, `EdgeResolver`, `MutationEngine`,
//! `Traversal`).

use crate::access::AccessControl;
use crate::anchor::Anchor;
use crate::archetype::{AnyArchetype, Archetype};
use crate::concurrency::{TaskHandle, WalkerGroups};
use crate::graph::GraphStore;
use crate::machine::Machine;
use crate::mutation::{EdgeSpec, MutationEngine};
use crate::primitives;
use crate::query::{EdgeQuery, EdgeResolver};
use crate::registry::ArchetypeRegistry;
use crate::types::{AccessLevel, AnchorId, AnchorReport, ArchetypeKind, WaypointError};
use crate::walker::Traversal;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// ARCHETYPE READS
// =============================================================================

/// Read access to archetypes.
///
/// The dispatch context implements this too, serving the two archetypes it
/// holds write locks on from its own guards.
pub trait ArchetypeReader {
    fn with_archetype(
        &self,
        anchor: &Anchor,
        f: &mut dyn FnMut(&dyn AnyArchetype),
    ) -> Result<(), WaypointError>;

    /// `{id, context}` view of `anchor`.
    fn anchor_report(&self, anchor: &Anchor) -> Result<AnchorReport, WaypointError> {
        let mut context = serde_json::Map::new();
        self.with_archetype(anchor, &mut |archetype| context = archetype.context())?;
        Ok(AnchorReport {
            id: anchor.id().to_string(),
            context,
        })
    }
}

// =============================================================================
// BOUNDARY TRAIT
// =============================================================================

/// Every object-spatial operation the runtime exposes.
pub trait ObjectSpatial {
    /// Run `walker` from `start` (a node, or an edge whose target is used)
    /// until its queue drains or it disengages. Returns the walker.
    fn spawn(&self, start: &Anchor, walker: &Anchor) -> Result<Anchor, WaypointError>;

    /// Continue a walker from its stored queue without resetting it.
    fn resume(&self, walker: &Anchor) -> Result<Anchor, WaypointError>;

    /// Enqueue targets on a walker's stored queue.
    fn visit(&self, walker: &Anchor, targets: &[Anchor]) -> Result<bool, WaypointError>;

    /// Add targets to a walker's stored ignore set.
    fn ignore(&self, walker: &Anchor, targets: &[Anchor]) -> Result<bool, WaypointError>;

    /// Mark a walker disengaged.
    fn disengage(&self, walker: &Anchor) -> Result<bool, WaypointError>;

    /// Create an edge from `source` to `target`.
    fn connect(
        &self,
        source: &Anchor,
        target: &Anchor,
        edge: EdgeSpec,
    ) -> Result<Anchor, WaypointError>;

    /// Remove matching edges between `source` and `targets`; an empty
    /// `targets` slice matches every opposite node.
    fn disconnect(
        &self,
        source: &Anchor,
        targets: &[Anchor],
        query: &EdgeQuery,
    ) -> Result<bool, WaypointError>;

    /// Opposite nodes of the edges matching `query`.
    fn refs(&self, origin: &Anchor, query: &EdgeQuery) -> Result<Vec<Anchor>, WaypointError>;

    /// The edges matching `query`.
    fn edges(&self, origin: &Anchor, query: &EdgeQuery) -> Result<Vec<Anchor>, WaypointError>;

    /// Append a value to the report sequence.
    fn report<S: Serialize>(&self, value: &S) -> Result<(), WaypointError>;

    /// Append an anchor's `{id, context}` to the report sequence.
    fn report_anchor(&self, anchor: &Anchor) -> Result<(), WaypointError>;

    /// Level the session's root holds on `anchor`.
    fn access_level(&self, anchor: &Anchor) -> Result<AccessLevel, WaypointError>;

    /// Whether the session's root holds at least `required`.
    fn check_access(&self, anchor: &Anchor, required: AccessLevel) -> Result<bool, WaypointError>;

    /// Grant `root` a level on `anchor` (and its reachable graph).
    fn allow_root(
        &self,
        anchor: &Anchor,
        root: AnchorId,
        level: AccessLevel,
        propagate: bool,
    ) -> Result<(), WaypointError>;

    /// Remove the override of `root` on `anchor` (and its reachable graph).
    fn disallow_root(
        &self,
        anchor: &Anchor,
        root: AnchorId,
        propagate: bool,
    ) -> Result<(), WaypointError>;

    /// Set the default grant of `anchor`.
    fn perm_grant(&self, anchor: &Anchor, level: AccessLevel) -> Result<(), WaypointError>;

    /// Reset the default grant of `anchor` to no access.
    fn perm_revoke(&self, anchor: &Anchor) -> Result<(), WaypointError>;

    /// Make `anchor` persistent, cascading to its transient neighbours.
    fn save(&self, anchor: &Anchor) -> Result<(), WaypointError>;

    /// Remove `anchor` and its incident edges.
    fn destroy(&self, anchor: &Anchor) -> Result<(), WaypointError>;

    /// Remove every anchor owned by `root` (default: the session root).
    fn reset_graph(&self, root: Option<AnchorId>) -> Result<usize, WaypointError>;

    /// Run `task` on the worker pool with a clone of this session.
    fn thread_run<T, F>(&self, task: F) -> Result<TaskHandle<T>, WaypointError>
    where
        T: Send + 'static,
        F: FnOnce(Session) -> Result<T, WaypointError> + Send + 'static;

    /// Block until a task finishes, re-raising its error or panic.
    fn thread_wait<T>(&self, handle: TaskHandle<T>) -> Result<T, WaypointError>;

    /// Copy `walker` once per node, each with a fresh queue.
    fn create_threads(
        &self,
        walker: &Anchor,
        nodes: &[Anchor],
    ) -> Result<WalkerGroups, WaypointError>;

    /// Spawn one copy of `walker` per node on the worker pool and wait.
    fn spawn_parallel(
        &self,
        walker: &Anchor,
        nodes: &[Anchor],
    ) -> Result<Vec<Anchor>, WaypointError>;
}

// =============================================================================
// SESSION
// =============================================================================

/// Execution context of one root.
#[derive(Clone)]
pub struct Session {
    machine: Arc<Machine>,
    root: Anchor,
    reports: Arc<Mutex<Vec<Value>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.root.id().to_string())
            .field("reports", &self.reports.lock().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(machine: Arc<Machine>, root: Anchor) -> Self {
        Self {
            machine,
            root,
            reports: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    #[must_use]
    pub fn store(&self) -> &dyn GraphStore {
        self.machine.store()
    }

    #[must_use]
    pub fn registry(&self) -> &ArchetypeRegistry {
        self.machine.registry()
    }

    /// The root this session acts as.
    #[must_use]
    pub fn root(&self) -> &Anchor {
        &self.root
    }

    #[must_use]
    pub fn root_id(&self) -> AnchorId {
        self.root.id()
    }

    #[must_use]
    pub fn system_root_id(&self) -> AnchorId {
        self.machine.system_root().id()
    }

    /// Wrap `value` in a new transient anchor and add it to the store.
    pub fn attach<T: Archetype>(&self, value: T) -> Result<Anchor, WaypointError> {
        self.registry().register::<T>();
        self.attach_boxed(Box::new(value))
    }

    /// Like [`Session::attach`] for an already boxed archetype whose type
    /// is registered.
    pub fn attach_boxed(&self, value: Box<dyn AnyArchetype>) -> Result<Anchor, WaypointError> {
        if self.registry().get(value.type_name()).is_none() {
            return Err(WaypointError::UnknownArchetype(value.type_name().to_string()));
        }
        let anchor = Anchor::new(value);
        self.store().put(&anchor)?;
        Ok(anchor)
    }

    /// A hydrated handle to `anchor`.
    pub fn hydrate(&self, anchor: &Anchor) -> Result<Anchor, WaypointError> {
        let mut anchor = anchor.clone();
        anchor.populate(self.store())?;
        Ok(anchor)
    }

    /// Look up an anchor that must exist.
    pub fn get(&self, id: AnchorId) -> Result<Anchor, WaypointError> {
        self.store().get(id)
    }

    /// Resolve a boundary id: `"root"` is the session root.
    pub fn get_object(&self, id: &str) -> Result<Anchor, WaypointError> {
        if id == primitives::ROOT_ALIAS {
            return Ok(self.root.clone());
        }
        self.get(id.parse()?)
    }

    /// Boundary id of `anchor`.
    #[must_use]
    pub fn object_ref(&self, anchor: &Anchor) -> String {
        anchor.id().to_string()
    }

    /// Borrow `anchor`'s archetype as `T` for the duration of `f`.
    pub fn read<T: Archetype, R>(
        &self,
        anchor: &Anchor,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, WaypointError> {
        let anchor = self.hydrate(anchor)?;
        let guard = anchor.cell()?.archetype();
        Ok(f((**guard).downcast_ref::<T>()?))
    }

    /// Mutably borrow `anchor`'s archetype as `T`; requires `Write`.
    pub fn write<T: Archetype, R>(
        &self,
        anchor: &Anchor,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, WaypointError> {
        let anchor = self.hydrate(anchor)?;
        AccessControl::require(self, &anchor, AccessLevel::Write)?;
        let mut guard = anchor.cell()?.archetype_mut();
        Ok(f((**guard).downcast_mut::<T>()?))
    }

    /// Drain the report sequence.
    pub fn take_reports(&self) -> Vec<Value> {
        std::mem::take(&mut *self.reports.lock())
    }

    /// Copy of the report sequence.
    pub fn reports(&self) -> Vec<Value> {
        self.reports.lock().clone()
    }

    pub(crate) fn push_report(&self, value: Value) {
        self.reports.lock().push(value);
    }

    fn expect_walker(&self, walker: &Anchor) -> Result<Anchor, WaypointError> {
        let walker = self.hydrate(walker)?;
        if walker.kind() != ArchetypeKind::Walker {
            return Err(WaypointError::InvalidTarget(format!(
                "{} is a {}, not a walker",
                walker.id(),
                walker.kind()
            )));
        }
        Ok(walker)
    }
}

impl ArchetypeReader for Session {
    fn with_archetype(
        &self,
        anchor: &Anchor,
        f: &mut dyn FnMut(&dyn AnyArchetype),
    ) -> Result<(), WaypointError> {
        let anchor = self.hydrate(anchor)?;
        let guard = anchor.cell()?.archetype();
        f(&**guard);
        Ok(())
    }
}

impl ObjectSpatial for Session {
    fn spawn(&self, start: &Anchor, walker: &Anchor) -> Result<Anchor, WaypointError> {
        Traversal::spawn(self, start, &self.expect_walker(walker)?)
    }

    fn resume(&self, walker: &Anchor) -> Result<Anchor, WaypointError> {
        Traversal::resume(self, &self.expect_walker(walker)?)
    }

    fn visit(&self, walker: &Anchor, targets: &[Anchor]) -> Result<bool, WaypointError> {
        Traversal::visit_stored(&self.expect_walker(walker)?, targets)
    }

    fn ignore(&self, walker: &Anchor, targets: &[Anchor]) -> Result<bool, WaypointError> {
        Traversal::ignore_stored(&self.expect_walker(walker)?, targets)
    }

    fn disengage(&self, walker: &Anchor) -> Result<bool, WaypointError> {
        Traversal::disengage_stored(&self.expect_walker(walker)?)
    }

    fn connect(
        &self,
        source: &Anchor,
        target: &Anchor,
        edge: EdgeSpec,
    ) -> Result<Anchor, WaypointError> {
        MutationEngine::connect(self, source, target, edge)
    }

    fn disconnect(
        &self,
        source: &Anchor,
        targets: &[Anchor],
        query: &EdgeQuery,
    ) -> Result<bool, WaypointError> {
        MutationEngine::disconnect(self, self, source, targets, query)
    }

    fn refs(&self, origin: &Anchor, query: &EdgeQuery) -> Result<Vec<Anchor>, WaypointError> {
        EdgeResolver::nodes(self, self, origin, query)
    }

    fn edges(&self, origin: &Anchor, query: &EdgeQuery) -> Result<Vec<Anchor>, WaypointError> {
        EdgeResolver::edges(self, self, origin, query)
    }

    fn report<S: Serialize>(&self, value: &S) -> Result<(), WaypointError> {
        let value = serde_json::to_value(value)
            .map_err(|e| WaypointError::SerializationError(e.to_string()))?;
        self.push_report(value);
        Ok(())
    }

    fn report_anchor(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        let report = self.anchor_report(anchor)?;
        self.report(&report)
    }

    fn access_level(&self, anchor: &Anchor) -> Result<AccessLevel, WaypointError> {
        AccessControl::level(self, anchor)
    }

    fn check_access(&self, anchor: &Anchor, required: AccessLevel) -> Result<bool, WaypointError> {
        AccessControl::check(self, anchor, required)
    }

    fn allow_root(
        &self,
        anchor: &Anchor,
        root: AnchorId,
        level: AccessLevel,
        propagate: bool,
    ) -> Result<(), WaypointError> {
        AccessControl::set_root_level(self, anchor, root, Some(level), propagate).map(|_| ())
    }

    fn disallow_root(
        &self,
        anchor: &Anchor,
        root: AnchorId,
        propagate: bool,
    ) -> Result<(), WaypointError> {
        AccessControl::set_root_level(self, anchor, root, None, propagate).map(|_| ())
    }

    fn perm_grant(&self, anchor: &Anchor, level: AccessLevel) -> Result<(), WaypointError> {
        AccessControl::set_all(self, anchor, level)
    }

    fn perm_revoke(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        AccessControl::set_all(self, anchor, AccessLevel::NoAccess)
    }

    fn save(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        MutationEngine::save(self, anchor)
    }

    fn destroy(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        MutationEngine::destroy(self, anchor)
    }

    fn reset_graph(&self, root: Option<AnchorId>) -> Result<usize, WaypointError> {
        MutationEngine::reset_graph(self, root)
    }

    fn thread_run<T, F>(&self, task: F) -> Result<TaskHandle<T>, WaypointError>
    where
        T: Send + 'static,
        F: FnOnce(Session) -> Result<T, WaypointError> + Send + 'static,
    {
        let session = self.clone();
        self.machine.pool().execute(move || task(session))
    }

    fn thread_wait<T>(&self, handle: TaskHandle<T>) -> Result<T, WaypointError> {
        handle.wait()
    }

    fn create_threads(
        &self,
        walker: &Anchor,
        nodes: &[Anchor],
    ) -> Result<WalkerGroups, WaypointError> {
        WalkerGroups::create(self, &self.expect_walker(walker)?, nodes)
    }

    fn spawn_parallel(
        &self,
        walker: &Anchor,
        nodes: &[Anchor],
    ) -> Result<Vec<Anchor>, WaypointError> {
        let groups = Arc::new(self.create_threads(walker, nodes)?);
        let mut handles = Vec::new();
        for node in groups.nodes() {
            let groups = Arc::clone(&groups);
            handles.push(self.thread_run(move |session| {
                let walker = groups.get_walker(node.id()).ok_or_else(|| {
                    WaypointError::WorkerError(format!("no walker queued for {}", node.id()))
                })?;
                Traversal::spawn(&session, &node, &walker)
            })?);
        }
        handles.into_iter().map(|h| self.thread_wait(h)).collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
