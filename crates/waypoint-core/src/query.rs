//! # Edge Queries
//!
//! Directional, filtered adjacency resolution.
//!
//! An [`EdgeQuery`] describes which incident edges of a node to follow:
//! - direction relative to the origin (undirected edges match every direction)
//! - an optional edge type trigger
//! - an optional predicate over the edge's archetype
//! - an optional set of acceptable opposite nodes
//!
//! [`EdgeResolver`] applies a query in incidence order and filters the
//! result through access control. Self-loops are never followed.

use crate::access::AccessControl;
use crate::anchor::Anchor;
use crate::archetype::{AnyArchetype, Archetype, Trigger};
use crate::session::{ArchetypeReader, Session};
use crate::types::{AccessLevel, AnchorId, ArchetypeKind, EdgeDir, WaypointError};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Predicate over an edge's archetype.
pub type EdgePredicate = Arc<dyn Fn(&dyn AnyArchetype) -> bool + Send + Sync>;

// =============================================================================
// EDGE QUERY
// =============================================================================

/// Filter applied to the incident edges of a node.
#[derive(Clone, Default)]
pub struct EdgeQuery {
    dir: EdgeDir,
    edge_type: Option<Trigger>,
    predicate: Option<EdgePredicate>,
    targets: Option<BTreeSet<AnchorId>>,
}

impl fmt::Debug for EdgeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeQuery")
            .field("dir", &self.dir)
            .field("edge_type", &self.edge_type)
            .field("predicate", &self.predicate.is_some())
            .field("targets", &self.targets.as_ref().map(BTreeSet::len))
            .finish()
    }
}

impl EdgeQuery {
    #[must_use]
    pub fn new(dir: EdgeDir) -> Self {
        Self {
            dir,
            ..Self::default()
        }
    }

    /// Outgoing edges.
    #[must_use]
    pub fn out() -> Self {
        Self::new(EdgeDir::Out)
    }

    /// Incoming edges.
    #[must_use]
    pub fn incoming() -> Self {
        Self::new(EdgeDir::In)
    }

    /// Edges in either direction.
    #[must_use]
    pub fn any() -> Self {
        Self::new(EdgeDir::Any)
    }

    /// Keep only edges of archetype `T`. Repeated calls widen the filter.
    #[must_use]
    pub fn edge_type<T: Archetype>(mut self) -> Self {
        self.edge_type = Some(match self.edge_type.take() {
            Some(trigger) => trigger.or::<T>(),
            None => Trigger::of::<T>(),
        });
        self
    }

    /// Keep only edges whose archetype satisfies `predicate`.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn AnyArchetype) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Keep only edges of archetype `T` whose fields satisfy `predicate`.
    #[must_use]
    pub fn where_edge<T, F>(self, predicate: F) -> Self
    where
        T: Archetype,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.edge_type::<T>()
            .filter(move |edge| edge.downcast_ref::<T>().map(&predicate).unwrap_or(false))
    }

    /// Keep only edges whose opposite node is one of `nodes`.
    #[must_use]
    pub fn to(mut self, nodes: &[Anchor]) -> Self {
        self.targets = Some(nodes.iter().map(Anchor::id).collect());
        self
    }

    #[must_use]
    pub fn direction(&self) -> EdgeDir {
        self.dir
    }

    fn follows(&self, origin: AnchorId, source: AnchorId, target: AnchorId, undirected: bool) -> bool {
        let outgoing = source == origin;
        let incoming = target == origin;
        match self.dir {
            EdgeDir::Out => outgoing || (undirected && incoming),
            EdgeDir::In => incoming || (undirected && outgoing),
            EdgeDir::Any => outgoing || incoming,
        }
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// One matching edge and the node at its far end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub edge: Anchor,
    pub node: Anchor,
}

/// Stateless query engine.
pub struct EdgeResolver;

impl EdgeResolver {
    /// Matching hops from `origin` in incidence order, keeping only those
    /// where the session holds `required` on both the edge and the node.
    ///
    /// Dangling edge ids are skipped with a warning.
    pub fn hops(
        session: &Session,
        reader: &dyn ArchetypeReader,
        origin: &Anchor,
        query: &EdgeQuery,
        required: AccessLevel,
    ) -> Result<Vec<Hop>, WaypointError> {
        let origin = session.hydrate(origin)?;
        if origin.kind() != ArchetypeKind::Node {
            return Err(WaypointError::InvalidTarget(format!(
                "edge queries start from nodes, {} is a {}",
                origin.id(),
                origin.kind()
            )));
        }
        let store = session.store();
        let mut hops = Vec::new();

        for edge_id in origin.edge_ids()? {
            let Some(edge) = store.find_by_id(edge_id)? else {
                tracing::warn!(node = %origin.id(), edge = %edge_id, "dangling edge reference");
                continue;
            };
            let Some(ends) = edge.endpoints()? else { continue };
            if ends.source == ends.target {
                continue;
            }
            if !query.follows(origin.id(), ends.source, ends.target, ends.is_undirected) {
                continue;
            }
            let Some(far) = ends.opposite(origin.id()) else { continue };
            if let Some(targets) = &query.targets {
                if !targets.contains(&far) {
                    continue;
                }
            }
            if let Some(trigger) = &query.edge_type {
                if !trigger.matches(edge.kind(), edge.type_name()?) {
                    continue;
                }
            }
            if let Some(predicate) = &query.predicate {
                let mut keep = false;
                reader.with_archetype(&edge, &mut |archetype| keep = predicate(archetype))?;
                if !keep {
                    continue;
                }
            }
            let Some(node) = store.find_by_id(far)? else {
                tracing::warn!(edge = %edge.id(), node = %far, "edge endpoint missing");
                continue;
            };
            if !AccessControl::check(session, &edge, required)?
                || !AccessControl::check(session, &node, required)?
            {
                continue;
            }
            hops.push(Hop { edge, node });
        }
        Ok(hops)
    }

    /// Readable opposite nodes, first occurrence only.
    pub fn nodes(
        session: &Session,
        reader: &dyn ArchetypeReader,
        origin: &Anchor,
        query: &EdgeQuery,
    ) -> Result<Vec<Anchor>, WaypointError> {
        let mut seen = BTreeSet::new();
        Ok(Self::hops(session, reader, origin, query, AccessLevel::Read)?
            .into_iter()
            .filter(|hop| seen.insert(hop.node.id()))
            .map(|hop| hop.node)
            .collect())
    }

    /// Readable matching edges.
    pub fn edges(
        session: &Session,
        reader: &dyn ArchetypeReader,
        origin: &Anchor,
        query: &EdgeQuery,
    ) -> Result<Vec<Anchor>, WaypointError> {
        let mut seen = BTreeSet::new();
        Ok(Self::hops(session, reader, origin, query, AccessLevel::Read)?
            .into_iter()
            .filter(|hop| seen.insert(hop.edge.id()))
            .map(|hop| hop.edge)
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::mutation::EdgeSpec;
    use crate::session::ObjectSpatial;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Stop {
        name: String,
    }

    impl Archetype for Stop {
        const NAME: &'static str = "Stop";
        const KIND: ArchetypeKind = ArchetypeKind::Node;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Road {
        km: u32,
    }

    impl Archetype for Road {
        const NAME: &'static str = "Road";
        const KIND: ArchetypeKind = ArchetypeKind::Edge;
    }

    fn stop(session: &Session, name: &str) -> Anchor {
        session
            .attach(Stop {
                name: name.to_string(),
            })
            .expect("attach")
    }

    #[test]
    fn direction_and_undirected_edges() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b, c) = (stop(&s, "a"), stop(&s, "b"), stop(&s, "c"));
        s.connect(&a, &b, EdgeSpec::generic()).expect("a->b");
        s.connect(&c, &a, EdgeSpec::generic()).expect("c->a");
        let d = stop(&s, "d");
        s.connect(&d, &a, EdgeSpec::generic().undirected()).expect("d-a");

        assert_eq!(s.refs(&a, &EdgeQuery::out()), Ok(vec![b.clone(), d.clone()]));
        assert_eq!(s.refs(&a, &EdgeQuery::incoming()), Ok(vec![c.clone(), d.clone()]));
        assert_eq!(s.refs(&a, &EdgeQuery::any()), Ok(vec![b, c, d]));
    }

    #[test]
    fn type_predicate_and_target_filters() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b, c) = (stop(&s, "a"), stop(&s, "b"), stop(&s, "c"));
        s.connect(&a, &b, EdgeSpec::of(Road { km: 5 })).expect("road");
        s.connect(&a, &c, EdgeSpec::of(Road { km: 50 })).expect("road");
        s.connect(&a, &c, EdgeSpec::generic()).expect("generic");

        let roads = EdgeQuery::out().edge_type::<Road>();
        assert_eq!(s.edges(&a, &roads).map(|e| e.len()), Ok(2));

        let short = EdgeQuery::out().where_edge::<Road, _>(|r| r.km < 10);
        assert_eq!(s.refs(&a, &short), Ok(vec![b.clone()]));

        let to_c = EdgeQuery::out().to(std::slice::from_ref(&c));
        assert_eq!(s.edges(&a, &to_c).map(|e| e.len()), Ok(2));
        assert_eq!(s.refs(&a, &to_c), Ok(vec![c]));
    }

    #[test]
    fn self_loops_are_not_followed() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let a = stop(&s, "a");
        s.connect(&a, &a, EdgeSpec::generic()).expect("loop");
        assert_eq!(s.refs(&a, &EdgeQuery::any()), Ok(Vec::new()));
    }

    #[test]
    fn unreadable_hops_are_skipped() {
        let machine = Machine::in_memory().expect("machine");
        let owner = machine
            .session(Some(machine.create_root().expect("root").id()))
            .expect("session");
        let guest_root = machine.create_root().expect("root");
        let guest = machine.session(Some(guest_root.id())).expect("session");

        let hub = owner.root().clone();
        let secret = stop(&owner, "secret");
        let open = stop(&owner, "open");
        owner.connect(&hub, &secret, EdgeSpec::generic()).expect("connect");
        owner.connect(&hub, &open, EdgeSpec::generic()).expect("connect");
        owner
            .allow_root(&hub, guest_root.id(), AccessLevel::Read, true)
            .expect("grant");
        owner
            .allow_root(&secret, guest_root.id(), AccessLevel::NoAccess, false)
            .expect("deny");

        assert_eq!(guest.refs(&hub, &EdgeQuery::out()), Ok(vec![open]));
    }

    #[test]
    fn queries_start_from_nodes() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let (a, b) = (stop(&s, "a"), stop(&s, "b"));
        let edge = s.connect(&a, &b, EdgeSpec::generic()).expect("connect");
        assert!(matches!(
            s.refs(&edge, &EdgeQuery::out()),
            Err(WaypointError::InvalidTarget(_))
        ));
    }
}
