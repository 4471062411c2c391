//! # Mutation Engine
//!
//! Every structural change to the graph goes through here: creating and
//! removing edges, saving anchors, destroying anchors and wiping a root's
//! graph.
//!
//! Mutations only touch anchor state (relations, owner, permission), never
//! archetype fields, so they are safe to call from inside a dispatch step
//! that holds archetype write locks.

use crate::access::AccessControl;
use crate::anchor::{Anchor, EdgeAnchor, Spatial};
use crate::archetype::{AnyArchetype, Archetype, GenericEdge};
use crate::query::{EdgeQuery, EdgeResolver};
use crate::registry::ArchetypeRegistry;
use crate::session::{ArchetypeReader, Session};
use crate::types::{AccessLevel, AnchorId, ArchetypeKind, WaypointError};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

// =============================================================================
// EDGE SPEC
// =============================================================================

fn register_as<T: Archetype>(registry: &ArchetypeRegistry) {
    registry.register::<T>();
}

/// What `connect` should create: the edge archetype, its direction and
/// field overrides applied before linking.
pub struct EdgeSpec {
    archetype: Box<dyn AnyArchetype>,
    register: fn(&ArchetypeRegistry),
    undirected: bool,
    attrs: Vec<(String, Value)>,
}

impl fmt::Debug for EdgeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeSpec")
            .field("archetype", &self.archetype)
            .field("undirected", &self.undirected)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl Default for EdgeSpec {
    fn default() -> Self {
        Self::generic()
    }
}

impl EdgeSpec {
    /// A directed [`GenericEdge`].
    #[must_use]
    pub fn generic() -> Self {
        Self::of(GenericEdge)
    }

    /// A directed edge wrapping `edge`.
    #[must_use]
    pub fn of<T: Archetype>(edge: T) -> Self {
        Self {
            archetype: Box::new(edge),
            register: register_as::<T>,
            undirected: false,
            attrs: Vec::new(),
        }
    }

    #[must_use]
    pub fn undirected(mut self) -> Self {
        self.undirected = true;
        self
    }

    /// Overwrite field `name` on the new edge.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }
}

// =============================================================================
// MUTATION ENGINE
// =============================================================================

/// Stateless mutation engine.
pub struct MutationEngine;

impl MutationEngine {
    /// Create an edge from `source` to `target`.
    ///
    /// Both endpoints must be nodes on which the session holds `Connect`.
    /// Field overrides are applied before anything is linked, so an unknown
    /// field leaves the graph untouched. The edge is saved when either
    /// endpoint is persistent.
    pub fn connect(
        session: &Session,
        source: &Anchor,
        target: &Anchor,
        spec: EdgeSpec,
    ) -> Result<Anchor, WaypointError> {
        let source = session.hydrate(source)?;
        let target = session.hydrate(target)?;
        for end in [&source, &target] {
            if end.kind() != ArchetypeKind::Node {
                return Err(WaypointError::InvalidTarget(format!(
                    "cannot connect a {} ({})",
                    end.kind(),
                    end.id()
                )));
            }
        }
        if spec.archetype.kind() != ArchetypeKind::Edge {
            return Err(WaypointError::InvalidTarget(format!(
                "{} is not an edge archetype",
                spec.archetype.type_name()
            )));
        }
        AccessControl::require(session, &source, AccessLevel::Connect)?;
        AccessControl::require(session, &target, AccessLevel::Connect)?;

        (spec.register)(session.registry());
        let EdgeSpec {
            mut archetype,
            undirected,
            attrs,
            ..
        } = spec;
        for (name, value) in attrs {
            archetype.set_field(&name, value)?;
        }

        let edge = Anchor::new(archetype);
        edge.state()?.spatial = Spatial::Edge(EdgeAnchor {
            source: source.id(),
            target: target.id(),
            is_undirected: undirected,
        });
        session.store().put(&edge)?;
        Self::link(&source, edge.id())?;
        if target.id() != source.id() {
            Self::link(&target, edge.id())?;
        }

        if source.is_persistent()? || target.is_persistent()? {
            Self::save(session, &edge)?;
        }
        tracing::debug!(
            edge = %edge.id(),
            source = %source.id(),
            target = %target.id(),
            undirected,
            "connected"
        );
        Ok(edge)
    }

    /// Remove every edge matching `query` from `source` to `targets` (all
    /// opposite nodes when `targets` is empty) on which the session holds
    /// `Write`. Returns whether anything was removed.
    pub fn disconnect(
        session: &Session,
        reader: &dyn ArchetypeReader,
        source: &Anchor,
        targets: &[Anchor],
        query: &EdgeQuery,
    ) -> Result<bool, WaypointError> {
        let query = if targets.is_empty() {
            query.clone()
        } else {
            query.clone().to(targets)
        };
        let hops = EdgeResolver::hops(session, reader, source, &query, AccessLevel::NoAccess)?;

        let mut seen = BTreeSet::new();
        let mut removed = false;
        for hop in hops {
            if !seen.insert(hop.edge.id()) {
                continue;
            }
            if !AccessControl::check(session, &hop.edge, AccessLevel::Write)? {
                continue;
            }
            Self::detach(session, &hop.edge)?;
            removed |= session.store().remove(hop.edge.id())?;
        }
        tracing::debug!(source = %source.id(), removed, "disconnected");
        Ok(removed)
    }

    /// Make `anchor` persistent, then every transient anchor reachable
    /// through incident edges and edge endpoints. Unowned anchors are
    /// adopted by the session root.
    pub fn save(session: &Session, anchor: &Anchor) -> Result<(), WaypointError> {
        let store = session.store();
        let start = session.hydrate(anchor)?;
        let mut seen = BTreeSet::from([start.id()]);
        let mut queue = VecDeque::from([start]);
        let mut saved = 0usize;

        while let Some(current) = queue.pop_front() {
            let neighbours = {
                let mut state = current.state()?;
                state.persistent = true;
                if state.root.is_none() {
                    state.root = Some(session.root_id());
                }
                match &state.spatial {
                    Spatial::Node(node) => node.edges.clone(),
                    Spatial::Edge(edge) => vec![edge.source, edge.target],
                    Spatial::Walker(_) | Spatial::Object => Vec::new(),
                }
            };
            store.put(&current)?;
            saved += 1;

            for id in neighbours {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(next) = store.find_by_id(id)? {
                    if !next.is_persistent()? {
                        queue.push_back(next);
                    }
                }
            }
        }
        tracing::debug!(anchor = %anchor.id(), saved, "saved");
        Ok(())
    }

    /// Remove `anchor` from the graph. A node takes its incident edges with
    /// it; an edge is unlinked from both endpoints.
    pub fn destroy(session: &Session, anchor: &Anchor) -> Result<(), WaypointError> {
        let anchor = session.hydrate(anchor)?;
        if anchor.id() == session.system_root_id() {
            return Err(WaypointError::InvalidTarget(
                "the system root cannot be destroyed".to_string(),
            ));
        }
        AccessControl::require(session, &anchor, AccessLevel::Write)?;
        let store = session.store();

        match anchor.kind() {
            ArchetypeKind::Node => {
                for edge_id in anchor.edge_ids()? {
                    if let Some(edge) = store.find_by_id(edge_id)? {
                        Self::detach(session, &edge)?;
                        store.remove(edge_id)?;
                    }
                }
            }
            ArchetypeKind::Edge => Self::detach(session, &anchor)?,
            ArchetypeKind::Walker | ArchetypeKind::Object => {}
        }
        store.remove(anchor.id())?;
        tracing::debug!(anchor = %anchor.id(), kind = %anchor.kind(), "destroyed");
        Ok(())
    }

    /// Remove every anchor owned by `root` (the session root by default),
    /// keeping the root itself. Foreign edges touching removed nodes go too.
    /// Only the root itself or the system root may reset a graph.
    pub fn reset_graph(session: &Session, root: Option<AnchorId>) -> Result<usize, WaypointError> {
        let root = root.unwrap_or_else(|| session.root_id());
        if session.root_id() != root && session.root_id() != session.system_root_id() {
            return Err(WaypointError::AccessDenied {
                id: root,
                required: AccessLevel::Write,
            });
        }
        let store = session.store();

        let mut owned = Vec::new();
        for id in store.ids()? {
            if id == root {
                continue;
            }
            if let Some(anchor) = store.find_by_id(id)? {
                if anchor.root()? == Some(root) {
                    owned.push(anchor);
                }
            }
        }
        // Edges first, so node cleanup only sees foreign edges.
        owned.sort_by_key(|a| a.kind() != ArchetypeKind::Edge);

        let mut count = 0usize;
        for anchor in &owned {
            match anchor.kind() {
                ArchetypeKind::Edge => Self::detach(session, anchor)?,
                ArchetypeKind::Node => {
                    for edge_id in anchor.edge_ids()? {
                        if let Some(edge) = store.find_by_id(edge_id)? {
                            Self::detach(session, &edge)?;
                            store.remove(edge_id)?;
                        }
                    }
                }
                ArchetypeKind::Walker | ArchetypeKind::Object => {}
            }
            if store.remove(anchor.id())? {
                count += 1;
            }
        }
        tracing::info!(%root, removed = count, "graph reset");
        Ok(count)
    }

    fn link(node: &Anchor, edge: AnchorId) -> Result<(), WaypointError> {
        if let Spatial::Node(node) = &mut node.state()?.spatial {
            node.edges.push(edge);
        }
        Ok(())
    }

    /// Drop `edge` from the incidence lists of its endpoints.
    fn detach(session: &Session, edge: &Anchor) -> Result<(), WaypointError> {
        let Some(ends) = edge.endpoints()? else {
            return Ok(());
        };
        for end in [ends.source, ends.target] {
            if let Some(node) = session.store().find_by_id(end)? {
                if let Spatial::Node(node) = &mut node.state()?.spatial {
                    node.edges.retain(|id| *id != edge.id());
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::session::ObjectSpatial;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Place {
        name: String,
    }

    impl Archetype for Place {
        const NAME: &'static str = "Place";
        const KIND: ArchetypeKind = ArchetypeKind::Node;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Link {
        weight: u32,
    }

    impl Archetype for Link {
        const NAME: &'static str = "Link";
        const KIND: ArchetypeKind = ArchetypeKind::Edge;
    }

    fn place(session: &Session, name: &str) -> Anchor {
        session
            .attach(Place {
                name: name.to_string(),
            })
            .expect("attach")
    }

    fn user(machine: &Arc<Machine>) -> Session {
        let root = machine.create_root().expect("root");
        machine.session(Some(root.id())).expect("session")
    }

    #[test]
    fn connect_links_both_endpoints() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b) = (place(&s, "a"), place(&s, "b"));
        let edge = s.connect(&a, &b, EdgeSpec::generic()).expect("connect");

        assert_eq!(a.edge_ids(), Ok(vec![edge.id()]));
        assert_eq!(b.edge_ids(), Ok(vec![edge.id()]));
        let ends = edge.endpoints().expect("state").expect("edge");
        assert_eq!((ends.source, ends.target), (a.id(), b.id()));
        assert!(!ends.is_undirected);
    }

    #[test]
    fn connect_applies_attributes_or_links_nothing() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b) = (place(&s, "a"), place(&s, "b"));

        let edge = s
            .connect(&a, &b, EdgeSpec::of(Link { weight: 1 }).with("weight", 7))
            .expect("connect");
        assert_eq!(s.read(&edge, |l: &Link| l.weight), Ok(7));

        let err = s.connect(&a, &b, EdgeSpec::of(Link { weight: 1 }).with("colour", "red"));
        assert!(matches!(err, Err(WaypointError::InvalidAttribute { .. })));
        assert_eq!(a.edge_ids().map(|e| e.len()), Ok(1));
    }

    #[test]
    fn connect_rejects_non_nodes_and_missing_grants() {
        let machine = Machine::in_memory().expect("machine");
        let owner = user(&machine);
        let stranger = user(&machine);
        let a = place(&owner, "a");
        let edge = owner.connect(owner.root(), &a, EdgeSpec::generic()).expect("connect");

        assert!(matches!(
            owner.connect(&edge, &a, EdgeSpec::generic()),
            Err(WaypointError::InvalidTarget(_))
        ));
        let mine = place(&stranger, "mine");
        assert!(matches!(
            stranger.connect(&mine, &a, EdgeSpec::generic()),
            Err(WaypointError::AccessDenied { .. })
        ));
    }

    #[test]
    fn connecting_to_a_persistent_node_saves_the_subgraph() {
        let machine = Machine::in_memory().expect("machine");
        let s = user(&machine);
        let (a, b) = (place(&s, "a"), place(&s, "b"));
        s.connect(&a, &b, EdgeSpec::generic()).expect("a->b");
        assert_eq!(a.is_persistent(), Ok(false));

        s.connect(s.root(), &a, EdgeSpec::generic()).expect("root->a");
        assert_eq!(a.is_persistent(), Ok(true));
        assert_eq!(b.is_persistent(), Ok(true));
        assert_eq!(b.root(), Ok(Some(s.root_id())));
    }

    #[test]
    fn disconnect_removes_matching_edges() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b, c) = (place(&s, "a"), place(&s, "b"), place(&s, "c"));
        let ab = s.connect(&a, &b, EdgeSpec::generic()).expect("connect");
        s.connect(&a, &c, EdgeSpec::generic()).expect("connect");

        assert_eq!(s.disconnect(&a, std::slice::from_ref(&b), &EdgeQuery::out()), Ok(true));
        assert_eq!(s.store().find_by_id(ab.id()).expect("find"), None);
        assert!(b.edge_ids().expect("edges").is_empty());
        assert_eq!(s.refs(&a, &EdgeQuery::out()), Ok(vec![c]));
        assert_eq!(s.disconnect(&a, &[b], &EdgeQuery::out()), Ok(false));
    }

    #[test]
    fn destroy_node_takes_its_edges() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b) = (place(&s, "a"), place(&s, "b"));
        let edge = s.connect(&a, &b, EdgeSpec::generic()).expect("connect");

        s.destroy(&b).expect("destroy");
        assert_eq!(s.store().find_by_id(edge.id()).expect("find"), None);
        assert!(a.edge_ids().expect("edges").is_empty());
        assert!(matches!(
            s.destroy(s.root()),
            Err(WaypointError::InvalidTarget(_))
        ));
    }

    #[test]
    fn reset_graph_keeps_root_and_foreign_anchors() {
        let machine = Machine::in_memory().expect("machine");
        let s = user(&machine);
        let other = user(&machine);
        let a = place(&s, "a");
        s.connect(s.root(), &a, EdgeSpec::generic()).expect("connect");
        let theirs = place(&other, "theirs");
        other.connect(other.root(), &theirs, EdgeSpec::generic()).expect("connect");

        assert_eq!(s.reset_graph(None), Ok(2));
        assert!(s.root().edge_ids().expect("edges").is_empty());
        assert!(s.store().find_by_id(theirs.id()).expect("find").is_some());
        assert!(matches!(
            s.reset_graph(Some(other.root_id())),
            Err(WaypointError::AccessDenied { .. })
        ));
    }
}
