//! # Access Control
//!
//! Capability checks between a requesting root and an anchor.
//!
//! ## Level resolution
//!
//! 1. Transient anchors grant `Write` to everyone.
//! 2. The system root, the owning root and the anchor itself get `Write`.
//! 3. Otherwise start from the anchor's `permission.all`.
//! 4. Raise to the owning root's `permission.all` if that is higher.
//! 5. The owning root's per-root entry for the requester overrides.
//! 6. The anchor's own per-root entry for the requester overrides last.
//!
//! Steps 4 and 5 let a root share its whole graph with one grant.

use crate::anchor::{Anchor, Spatial};
use crate::session::Session;
use crate::types::{AccessLevel, AnchorId, ArchetypeKind, WaypointError};
use std::collections::{BTreeSet, VecDeque};

/// Stateless access-control engine.
pub struct AccessControl;

impl AccessControl {
    /// Level the session's root holds on `anchor`.
    pub fn level(session: &Session, anchor: &Anchor) -> Result<AccessLevel, WaypointError> {
        let anchor = session.hydrate(anchor)?;
        let requester = session.root_id();
        let (persistent, owner, access) = {
            let state = anchor.state()?;
            (state.persistent, state.root, state.access.clone())
        };

        if !persistent
            || requester == session.system_root_id()
            || owner == Some(requester)
            || requester == anchor.id()
        {
            return Ok(AccessLevel::Write);
        }

        let mut level = access.all;
        if let Some(owner_id) = owner.filter(|o| *o != anchor.id()) {
            if let Some(owner_root) = session.store().find_by_id(owner_id)? {
                let owner_state = owner_root.state()?;
                if owner_state.access.all > level {
                    level = owner_state.access.all;
                }
                if let Some(granted) = owner_state.access.roots.get(&requester) {
                    level = *granted;
                }
            }
        }
        if let Some(granted) = access.roots.get(&requester) {
            level = *granted;
        }
        Ok(level)
    }

    /// Whether the session's root holds at least `required` on `anchor`.
    ///
    /// Denials are logged at info level.
    pub fn check(
        session: &Session,
        anchor: &Anchor,
        required: AccessLevel,
    ) -> Result<bool, WaypointError> {
        let level = Self::level(session, anchor)?;
        let granted = level.allows(required);
        if !granted {
            tracing::info!(
                root = %session.root_id(),
                target = %anchor.id(),
                %required,
                %level,
                "access denied"
            );
        }
        Ok(granted)
    }

    /// Like [`AccessControl::check`] but fails with `AccessDenied`.
    pub fn require(
        session: &Session,
        anchor: &Anchor,
        required: AccessLevel,
    ) -> Result<(), WaypointError> {
        if Self::check(session, anchor, required)? {
            Ok(())
        } else {
            Err(WaypointError::AccessDenied {
                id: anchor.id(),
                required,
            })
        }
    }

    /// Set or clear the per-root override of `root` on `anchor`.
    ///
    /// With `propagate`, the change also applies to every node reachable
    /// through outgoing or undirected edges and to the edges joining them,
    /// skipping anchors the session cannot write.
    pub fn set_root_level(
        session: &Session,
        anchor: &Anchor,
        root: AnchorId,
        level: Option<AccessLevel>,
        propagate: bool,
    ) -> Result<usize, WaypointError> {
        let anchor = session.hydrate(anchor)?;
        Self::require(session, &anchor, AccessLevel::Write)?;

        let targets = if propagate {
            Self::reachable(session, &anchor)?
        } else {
            vec![anchor]
        };

        let mut changed = 0usize;
        for target in targets {
            if !Self::check(session, &target, AccessLevel::Write)? {
                continue;
            }
            let mut state = target.state()?;
            match level {
                Some(level) => {
                    state.access.roots.insert(root, level);
                }
                None => {
                    state.access.roots.remove(&root);
                }
            }
            changed += 1;
        }
        tracing::debug!(%root, ?level, changed, "root permission updated");
        Ok(changed)
    }

    /// Set the default grant of `anchor`.
    pub fn set_all(
        session: &Session,
        anchor: &Anchor,
        level: AccessLevel,
    ) -> Result<(), WaypointError> {
        let anchor = session.hydrate(anchor)?;
        Self::require(session, &anchor, AccessLevel::Write)?;
        anchor.state()?.access.all = level;
        Ok(())
    }

    /// `origin` plus every node reachable through outgoing or undirected
    /// edges, and those edges, in breadth-first order.
    pub fn reachable(session: &Session, origin: &Anchor) -> Result<Vec<Anchor>, WaypointError> {
        let origin = session.hydrate(origin)?;
        let store = session.store();
        let mut seen = BTreeSet::from([origin.id()]);
        let mut found = vec![origin.clone()];
        let mut queue = VecDeque::from([origin]);

        while let Some(node) = queue.pop_front() {
            if node.kind() != ArchetypeKind::Node {
                continue;
            }
            for edge_id in node.edge_ids()? {
                let Some(edge) = store.find_by_id(edge_id)? else {
                    tracing::warn!(node = %node.id(), edge = %edge_id, "dangling edge reference");
                    continue;
                };
                let next = match &edge.state()?.spatial {
                    Spatial::Edge(e) if e.source == node.id() => Some(e.target),
                    Spatial::Edge(e) if e.is_undirected && e.target == node.id() => Some(e.source),
                    _ => None,
                };
                let Some(next) = next else { continue };
                if seen.insert(edge.id()) {
                    found.push(edge.clone());
                }
                if seen.insert(next) {
                    if let Some(next_node) = store.find_by_id(next)? {
                        found.push(next_node.clone());
                        queue.push_back(next_node);
                    }
                }
            }
        }
        Ok(found)
    }
}

// =============================================================================
// TESTS
// =============================================================================
