//! # Traversal Engine
//!
//! Runs walkers over the graph and dispatches abilities.
//!
//! ## Run
//!
//! 1. `spawn` resets the walker: `path = []`, `next = [start]`.
//! 2. The walker's unconditional entry abilities fire once.
//! 3. While `next` is non-empty and the walker is engaged, the head target is
//!    popped, skipped if ignored or unreadable, and dispatched.
//! 4. Without a disengage, the walker's unconditional exit abilities fire once.
//! 5. `path`, the remaining `next` and `disengaged` are written back to the
//!    walker anchor, even when an ability failed.
//!
//! ## Step
//!
//! A step copies the target's and the walker's archetypes out of their
//! cells, fires abilities against the copies without holding any archetype
//! lock, and writes modified copies back when the step ends. It fires, in
//! order:
//! - the target's entry abilities matching the walker
//! - the walker's triggered entry abilities matching the target
//! - the walker's triggered exit abilities matching the target
//! - the target's exit abilities matching the walker
//!
//! Disengaging aborts the rest of the step. [`Visit`] serves `here` and the
//! walker from its copies. Pending writes to them are copied back before an
//! ability gets hold of the session, so nested walkers and other threads see
//! them; writes a nested walker makes to `here` show up on the next step.

use crate::access::AccessControl;
use crate::anchor::{Anchor, Spatial, WalkerAnchor};
use crate::archetype::{Ability, AnyArchetype, Archetype};
use crate::mutation::MutationEngine;
use crate::query::{EdgeQuery, EdgeResolver};
use crate::session::{ArchetypeReader, ObjectSpatial, Session};
use crate::types::{AccessLevel, AnchorId, ArchetypeKind, WaypointError};
use serde::Serialize;
use std::cell::Cell;
use std::collections::{BTreeSet, VecDeque};

// =============================================================================
// RUN STATE
// =============================================================================

/// Private traversal state of one run.
#[derive(Debug, Default)]
struct WalkerRun {
    path: Vec<Anchor>,
    next: VecDeque<Anchor>,
    ignores: BTreeSet<AnchorId>,
    disengaged: bool,
}

/// Whose ability is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Here,
    Walker,
}

fn check_visitable(target: &Anchor) -> Result<(), WaypointError> {
    match target.kind() {
        ArchetypeKind::Node | ArchetypeKind::Edge => Ok(()),
        kind => Err(WaypointError::InvalidTarget(format!(
            "walkers visit nodes and edges, {} is a {}",
            target.id(),
            kind
        ))),
    }
}

// =============================================================================
// CHECKED-OUT ARCHETYPES
// =============================================================================

/// An archetype copied out of its cell for the length of one step.
struct Checkout {
    value: Box<dyn AnyArchetype>,
    dirty: Cell<bool>,
}

impl Checkout {
    fn take(anchor: &Anchor) -> Result<Self, WaypointError> {
        let value = anchor.cell()?.archetype().duplicate();
        Ok(Self {
            value,
            dirty: Cell::new(false),
        })
    }

    fn get(&self) -> &dyn AnyArchetype {
        &*self.value
    }

    fn get_mut(&mut self) -> &mut dyn AnyArchetype {
        self.dirty.set(true);
        &mut *self.value
    }

    /// Copy pending writes into the cell, keeping the copy.
    fn flush(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        if self.dirty.get() {
            *anchor.cell()?.archetype_mut() = self.value.duplicate();
            self.dirty.set(false);
        }
        Ok(())
    }

    /// Move pending writes into the cell.
    fn restore(self, anchor: &Anchor) -> Result<(), WaypointError> {
        if self.dirty.get() {
            *anchor.cell()?.archetype_mut() = self.value;
        }
        Ok(())
    }
}

// =============================================================================
// DISPATCH CONTEXT
// =============================================================================

/// What an ability sees: the anchor being visited (`here`), the walker, and
/// the run's queue.
pub struct Visit<'a> {
    session: &'a Session,
    run: &'a mut WalkerRun,
    here: &'a Anchor,
    walker: &'a Anchor,
    here_arch: Checkout,
    walker_arch: Checkout,
    here_level: AccessLevel,
    role: Role,
}

impl<'a> Visit<'a> {
    fn new(
        session: &'a Session,
        run: &'a mut WalkerRun,
        here: &'a Anchor,
        walker: &'a Anchor,
        role: Role,
    ) -> Result<Self, WaypointError> {
        Ok(Self {
            here_level: AccessControl::level(session, here)?,
            here_arch: Checkout::take(here)?,
            walker_arch: Checkout::take(walker)?,
            session,
            run,
            here,
            walker,
            role,
        })
    }

    /// Write both copies back and end the step.
    fn check_in(self) -> Result<(), WaypointError> {
        let here = self.here_arch.restore(self.here);
        let walker = self.walker_arch.restore(self.walker);
        here.and(walker)
    }
}

impl Visit<'_> {
    /// The session, after copying this step's writes back to their cells.
    #[must_use]
    pub fn session(&self) -> &Session {
        let synced = self
            .here_arch
            .flush(self.here)
            .and_then(|()| self.walker_arch.flush(self.walker));
        if let Err(err) = synced {
            tracing::warn!(walker = %self.walker.id(), error = %err, "step writes not synced");
        }
        self.session
    }

    /// The anchor being visited.
    #[must_use]
    pub fn here(&self) -> &Anchor {
        self.here
    }

    #[must_use]
    pub fn walker(&self) -> &Anchor {
        self.walker
    }

    /// The session root.
    #[must_use]
    pub fn root(&self) -> &Anchor {
        self.session.root()
    }

    /// Nodes visited so far in this run.
    #[must_use]
    pub fn path(&self) -> &[Anchor] {
        &self.run.path
    }

    pub fn here_ref<T: Archetype>(&self) -> Result<&T, WaypointError> {
        self.here_arch.get().downcast_ref::<T>()
    }

    /// Mutable access to `here`; requires `Write` on it.
    pub fn here_mut<T: Archetype>(&mut self) -> Result<&mut T, WaypointError> {
        if !self.here_level.allows(AccessLevel::Write) {
            tracing::info!(
                root = %self.session.root_id(),
                target = %self.here.id(),
                level = %self.here_level,
                "write to visited archetype denied"
            );
            return Err(WaypointError::AccessDenied {
                id: self.here.id(),
                required: AccessLevel::Write,
            });
        }
        self.here_arch.get_mut().downcast_mut::<T>()
    }

    pub fn walker_ref<T: Archetype>(&self) -> Result<&T, WaypointError> {
        self.walker_arch.get().downcast_ref::<T>()
    }

    pub fn walker_mut<T: Archetype>(&mut self) -> Result<&mut T, WaypointError> {
        self.walker_arch.get_mut().downcast_mut::<T>()
    }

    /// The archetype that declared the running ability.
    pub fn owner_mut<T: Archetype>(&mut self) -> Result<&mut T, WaypointError> {
        match self.role {
            Role::Here => self.here_mut::<T>(),
            Role::Walker => self.walker_mut::<T>(),
        }
    }

    /// The archetype that triggered the running ability.
    pub fn counterpart_ref<T: Archetype>(&self) -> Result<&T, WaypointError> {
        match self.role {
            Role::Here => self.walker_ref::<T>(),
            Role::Walker => self.here_ref::<T>(),
        }
    }

    /// Borrow any anchor's archetype as `T`.
    pub fn read<T: Archetype, R>(
        &self,
        anchor: &Anchor,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, WaypointError> {
        let mut f = Some(f);
        let mut out = None;
        self.with_archetype(anchor, &mut |archetype| {
            if let Some(f) = f.take() {
                out = Some(archetype.downcast_ref::<T>().map(f));
            }
        })?;
        out.ok_or(WaypointError::ReferenceError(anchor.id()))?
    }

    /// Enqueue nodes or edges. Ignored targets are dropped; returns whether
    /// anything was enqueued.
    pub fn visit(&mut self, targets: &[Anchor]) -> Result<bool, WaypointError> {
        let mut queued = false;
        for target in targets {
            check_visitable(target)?;
            if self.run.ignores.contains(&target.id()) {
                continue;
            }
            self.run.next.push_back(target.clone());
            queued = true;
        }
        Ok(queued)
    }

    /// Enqueue the nodes `query` resolves from `here`.
    pub fn visit_refs(&mut self, query: &EdgeQuery) -> Result<bool, WaypointError> {
        let nodes = self.refs(query)?;
        self.visit(&nodes)
    }

    /// Exclude targets from the rest of the run. Returns whether any target
    /// was newly ignored.
    pub fn ignore(&mut self, targets: &[Anchor]) -> bool {
        let mut added = false;
        for target in targets {
            added |= self.run.ignores.insert(target.id());
        }
        added
    }

    /// Enqueue `here` again.
    pub fn revisit(&mut self) -> bool {
        self.run.next.push_back(self.here.clone());
        true
    }

    /// Stop the walker; the rest of this step is skipped.
    pub fn disengage(&mut self) -> bool {
        self.run.disengaged = true;
        true
    }

    #[must_use]
    pub fn is_disengaged(&self) -> bool {
        self.run.disengaged
    }

    /// Readable opposite nodes of `here`'s matching edges.
    pub fn refs(&self, query: &EdgeQuery) -> Result<Vec<Anchor>, WaypointError> {
        EdgeResolver::nodes(self.session, self, self.here, query)
    }

    /// Readable matching edges of `here`.
    pub fn edges(&self, query: &EdgeQuery) -> Result<Vec<Anchor>, WaypointError> {
        EdgeResolver::edges(self.session, self, self.here, query)
    }

    /// Remove matching edges from `source` to `targets`.
    pub fn disconnect(
        &self,
        source: &Anchor,
        targets: &[Anchor],
        query: &EdgeQuery,
    ) -> Result<bool, WaypointError> {
        MutationEngine::disconnect(self.session, self, source, targets, query)
    }

    pub fn report<S: Serialize>(&self, value: &S) -> Result<(), WaypointError> {
        self.session.report(value)
    }

    /// Report `{id, context}` of any anchor, `here` and the walker included.
    pub fn report_anchor(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        let report = self.anchor_report(anchor)?;
        self.session.report(&report)
    }
}

impl ArchetypeReader for Visit<'_> {
    fn with_archetype(
        &self,
        anchor: &Anchor,
        f: &mut dyn FnMut(&dyn AnyArchetype),
    ) -> Result<(), WaypointError> {
        if anchor.id() == self.here.id() {
            f(self.here_arch.get());
            Ok(())
        } else if anchor.id() == self.walker.id() {
            f(self.walker_arch.get());
            Ok(())
        } else {
            self.session.with_archetype(anchor, f)
        }
    }
}

// =============================================================================
// TRAVERSAL
// =============================================================================

/// Stateless walker scheduler.
pub struct Traversal;

impl Traversal {
    /// Reset `walker` and run it from `start`. An edge start begins at the
    /// edge's target node.
    pub fn spawn(session: &Session, start: &Anchor, walker: &Anchor) -> Result<Anchor, WaypointError> {
        let walker = Self::walker(session, walker)?;
        let start = Self::start_node(session, start)?;
        let mut run = WalkerRun {
            next: VecDeque::from([start.clone()]),
            ..WalkerRun::default()
        };
        tracing::debug!(walker = %walker.id(), start = %start.id(), "walker spawned");
        let outcome = Self::execute(session, &mut run, &walker, Some(&start));
        Self::finish(walker, &run, outcome)
    }

    /// Continue `walker` from its stored queue.
    pub fn resume(session: &Session, walker: &Anchor) -> Result<Anchor, WaypointError> {
        let walker = Self::walker(session, walker)?;
        let stored = Self::stored(&walker)?;
        let store = session.store();
        let mut run = WalkerRun {
            disengaged: stored.disengaged,
            ignores: stored.ignores.into_iter().collect(),
            ..WalkerRun::default()
        };
        for id in stored.path {
            run.path.push(
                store
                    .find_by_id(id)?
                    .unwrap_or_else(|| Anchor::stub(id, ArchetypeKind::Node)),
            );
        }
        for id in stored.next {
            match store.find_by_id(id)? {
                Some(target) => run.next.push_back(target),
                None => tracing::warn!(walker = %walker.id(), target = %id, "queued target missing"),
            }
        }
        tracing::debug!(walker = %walker.id(), queued = run.next.len(), "walker resumed");
        let outcome = Self::execute(session, &mut run, &walker, None);
        Self::finish(walker, &run, outcome)
    }

    /// Traversal state stored on a walker anchor.
    pub fn stored(walker: &Anchor) -> Result<WalkerAnchor, WaypointError> {
        match &walker.state()?.spatial {
            Spatial::Walker(stored) => Ok(stored.clone()),
            _ => Err(WaypointError::InvalidTarget(format!("{} is not a walker", walker.id()))),
        }
    }

    /// Enqueue targets on a walker that is not running.
    pub fn visit_stored(walker: &Anchor, targets: &[Anchor]) -> Result<bool, WaypointError> {
        for target in targets {
            check_visitable(target)?;
        }
        Self::update_stored(walker, |stored| {
            let mut queued = false;
            for target in targets {
                if !stored.ignores.contains(&target.id()) {
                    stored.next.push(target.id());
                    queued = true;
                }
            }
            queued
        })
    }

    /// Ignore targets on a walker that is not running.
    pub fn ignore_stored(walker: &Anchor, targets: &[Anchor]) -> Result<bool, WaypointError> {
        Self::update_stored(walker, |stored| {
            let mut added = false;
            for target in targets {
                if !stored.ignores.contains(&target.id()) {
                    stored.ignores.push(target.id());
                    added = true;
                }
            }
            added
        })
    }

    /// Disengage a walker that is not running.
    pub fn disengage_stored(walker: &Anchor) -> Result<bool, WaypointError> {
        Self::update_stored(walker, |stored| {
            stored.disengaged = true;
            true
        })
    }

    fn update_stored(
        walker: &Anchor,
        f: impl FnOnce(&mut WalkerAnchor) -> bool,
    ) -> Result<bool, WaypointError> {
        match &mut walker.state()?.spatial {
            Spatial::Walker(stored) => Ok(f(stored)),
            _ => Err(WaypointError::InvalidTarget(format!("{} is not a walker", walker.id()))),
        }
    }

    fn walker(session: &Session, walker: &Anchor) -> Result<Anchor, WaypointError> {
        let walker = session.hydrate(walker)?;
        if walker.kind() != ArchetypeKind::Walker {
            return Err(WaypointError::InvalidTarget(format!(
                "{} is a {}, not a walker",
                walker.id(),
                walker.kind()
            )));
        }
        Ok(walker)
    }

    fn start_node(session: &Session, start: &Anchor) -> Result<Anchor, WaypointError> {
        let start = session.hydrate(start)?;
        match start.kind() {
            ArchetypeKind::Node => Ok(start),
            ArchetypeKind::Edge => match start.endpoints()? {
                Some(ends) => session.get(ends.target),
                None => Err(WaypointError::ReferenceError(start.id())),
            },
            kind => Err(WaypointError::InvalidTarget(format!(
                "walkers start on nodes or edges, {} is a {}",
                start.id(),
                kind
            ))),
        }
    }

    fn execute(
        session: &Session,
        run: &mut WalkerRun,
        walker: &Anchor,
        start: Option<&Anchor>,
    ) -> Result<(), WaypointError> {
        if let Some(start) = start {
            Self::fire_unconditional(session, run, start, walker, false)?;
        }

        while !run.disengaged {
            let Some(target) = run.next.pop_front() else {
                break;
            };
            if run.ignores.contains(&target.id()) {
                tracing::debug!(target = %target.id(), "ignored target skipped");
                continue;
            }
            let target = if target.is_populated() {
                match session.store().find_by_id(target.id())? {
                    Some(target) => target,
                    None => {
                        tracing::debug!(target = %target.id(), "removed target skipped");
                        continue;
                    }
                }
            } else {
                session.hydrate(&target)?
            };
            if !AccessControl::check(session, &target, AccessLevel::Read)? {
                continue;
            }
            if target.kind() == ArchetypeKind::Node {
                run.path.push(target.clone());
            }

            Self::step(session, run, &target, walker)?;

            if target.kind() == ArchetypeKind::Edge && !run.disengaged {
                if let Some(ends) = target.endpoints()? {
                    let onward = run
                        .path
                        .last()
                        .and_then(|from| ends.opposite(from.id()))
                        .unwrap_or(ends.target);
                    run.next.push_front(Anchor::stub(onward, ArchetypeKind::Node));
                }
            }
        }

        if !run.disengaged && Self::has_unconditional(session, walker, true)? {
            let last = match run.path.last() {
                Some(last) => session.store().find_by_id(last.id())?,
                None => start.cloned(),
            };
            match last {
                Some(last) => Self::fire_unconditional(session, run, &last, walker, true)?,
                None => {
                    tracing::debug!(walker = %walker.id(), "last node gone, exit abilities skipped");
                }
            }
        }
        Ok(())
    }

    /// Dispatch one target.
    fn step(
        session: &Session,
        run: &mut WalkerRun,
        target: &Anchor,
        walker: &Anchor,
    ) -> Result<(), WaypointError> {
        let registry = session.registry();
        let target_type = target.type_name()?;
        let walker_type = walker.type_name()?;
        let target_entry = registry.get(target_type);
        let walker_entry = registry.get(walker_type);
        tracing::debug!(
            walker = %walker.id(),
            target = %target.id(),
            target_type,
            "dispatch"
        );

        let none: &[Ability] = &[];
        let (here_in, here_out) = target_entry
            .as_ref()
            .map_or((none, none), |e| (e.entry.as_slice(), e.exit.as_slice()));
        let (walker_in, walker_out) = walker_entry
            .as_ref()
            .map_or((none, none), |e| (e.entry.as_slice(), e.exit.as_slice()));

        let phases = [
            (Role::Here, here_in, ArchetypeKind::Walker, walker_type, false),
            (Role::Walker, walker_in, target.kind(), target_type, true),
            (Role::Walker, walker_out, target.kind(), target_type, true),
            (Role::Here, here_out, ArchetypeKind::Walker, walker_type, false),
        ];

        let mut visit = Visit::new(session, run, target, walker, Role::Here)?;
        let mut outcome = Ok(());
        for (role, abilities, kind, type_name, triggered_only) in phases {
            match Self::fire(&mut visit, role, abilities, kind, type_name, triggered_only) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        visit.check_in()?;
        outcome
    }

    fn has_unconditional(
        session: &Session,
        walker: &Anchor,
        exit: bool,
    ) -> Result<bool, WaypointError> {
        let Some(entry) = session.registry().get(walker.type_name()?) else {
            return Ok(false);
        };
        let list = if exit { &entry.exit } else { &entry.entry };
        Ok(list.iter().any(|a| a.trigger.is_unconditional()))
    }

    /// Fire the walker's unconditional entry or exit abilities once, with
    /// `here` as the counterpart.
    fn fire_unconditional(
        session: &Session,
        run: &mut WalkerRun,
        here: &Anchor,
        walker: &Anchor,
        exit: bool,
    ) -> Result<(), WaypointError> {
        let Some(entry) = session.registry().get(walker.type_name()?) else {
            return Ok(());
        };
        let list = if exit { &entry.exit } else { &entry.entry };
        let abilities: Vec<&Ability> = list
            .iter()
            .filter(|a| a.trigger.is_unconditional())
            .collect();
        if abilities.is_empty() {
            return Ok(());
        }

        let mut visit = Visit::new(session, run, here, walker, Role::Walker)?;
        let mut outcome = Ok(());
        for ability in abilities {
            tracing::trace!(ability = %ability.name, exit, "walker ability");
            if let Err(err) = ability.call(&mut visit) {
                outcome = Err(err);
                break;
            }
            if visit.run.disengaged {
                break;
            }
        }
        visit.check_in()?;
        outcome
    }

    /// Returns `false` once the walker disengages.
    fn fire(
        visit: &mut Visit<'_>,
        role: Role,
        abilities: &[Ability],
        kind: ArchetypeKind,
        type_name: &str,
        triggered_only: bool,
    ) -> Result<bool, WaypointError> {
        for ability in abilities {
            if triggered_only && ability.trigger.is_unconditional() {
                continue;
            }
            if !ability.trigger.matches(kind, type_name) {
                continue;
            }
            visit.role = role;
            tracing::trace!(ability = %ability.name, ?role, "ability");
            ability.call(visit)?;
            if visit.run.disengaged {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write the run back to the walker, then surface the run's outcome.
    fn finish(
        walker: Anchor,
        run: &WalkerRun,
        outcome: Result<(), WaypointError>,
    ) -> Result<Anchor, WaypointError> {
        let stored = Self::update_stored(&walker, |stored| {
            stored.path = run.path.iter().map(Anchor::id).collect();
            stored.next = run.next.iter().map(Anchor::id).collect();
            stored.ignores.clear();
            stored.disengaged = run.disengaged;
            true
        });
        if let Err(err) = &outcome {
            tracing::warn!(walker = %walker.id(), error = %err, "walker run failed");
        }
        outcome?;
        stored?;
        tracing::debug!(
            walker = %walker.id(),
            visited = run.path.len(),
            disengaged = run.disengaged,
            "walker finished"
        );
        Ok(walker)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::{Abilities, Root};
    use crate::machine::Machine;
    use crate::mutation::EdgeSpec;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Town {
        name: String,
        visits: u32,
    }

    impl Archetype for Town {
        const NAME: &'static str = "Town";
        const KIND: ArchetypeKind = ArchetypeKind::Node;

        fn abilities(abilities: &mut Abilities<Self>) {
            abilities
                .on_entry::<Tourist, _>("greet", |v| {
                    let name = v.here_ref::<Town>()?.name.clone();
                    v.report(&format!("town-entry:{}", name))
                })
                .on_exit::<Tourist, _>("farewell", |v| v.report(&"town-exit"));
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Tourist {
        seen: Vec<String>,
        stop_at: Option<String>,
    }

    impl Archetype for Tourist {
        const NAME: &'static str = "Tourist";
        const KIND: ArchetypeKind = ArchetypeKind::Walker;

        fn abilities(abilities: &mut Abilities<Self>) {
            abilities
                .on_entry_any("start", |v| v.report(&"start"))
                .on_entry::<Town, _>("look", |v| {
                    let name = v.here_ref::<Town>()?.name.clone();
                    v.report(&format!("tourist-entry:{}", name))?;
                    let tourist = v.walker_mut::<Tourist>()?;
                    tourist.seen.push(name.clone());
                    if tourist.stop_at.as_deref() == Some(name.as_str()) {
                        v.disengage();
                        return Ok(());
                    }
                    v.visit_refs(&EdgeQuery::out())?;
                    Ok(())
                })
                .on_exit::<Town, _>("leave", |v| v.report(&"tourist-exit"))
                .on_exit_any("done", |v| v.report(&"done"));
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Stamper;

    impl Archetype for Stamper {
        const NAME: &'static str = "Stamper";
        const KIND: ArchetypeKind = ArchetypeKind::Walker;

        fn abilities(abilities: &mut Abilities<Self>) {
            abilities.on_entry::<Town, _>("stamp", |v| {
                match v.here_mut::<Town>() {
                    Ok(town) => town.visits += 1,
                    Err(err) => v.report(&err.to_string())?,
                }
                v.visit_refs(&EdgeQuery::out())?;
                Ok(())
            });
        }
    }

    /// Sends a `Stamper` from inside its own step on the same town.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Guide;

    impl Archetype for Guide {
        const NAME: &'static str = "Guide";
        const KIND: ArchetypeKind = ArchetypeKind::Walker;

        fn abilities(abilities: &mut Abilities<Self>) {
            abilities.on_entry::<Town, _>("send stamper", |v| {
                v.here_mut::<Town>()?.visits += 10;
                let here = v.here().clone();
                let session = v.session().clone();
                let stamper = session.attach(Stamper)?;
                session.spawn(&here, &stamper)?;
                v.report(&"guided")
            });
        }
    }

    /// Reads every other town while standing on one.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Surveyor {
        others: Vec<AnchorId>,
    }

    impl Archetype for Surveyor {
        const NAME: &'static str = "Surveyor";
        const KIND: ArchetypeKind = ArchetypeKind::Walker;

        fn abilities(abilities: &mut Abilities<Self>) {
            abilities.on_entry::<Town, _>("survey", |v| {
                v.here_mut::<Town>()?.visits += 1;
                let others = v.walker_ref::<Surveyor>()?.others.clone();
                for _ in 0..50 {
                    for id in &others {
                        let other = v.session().get(*id)?;
                        v.read(&other, |t: &Town| t.visits)?;
                    }
                }
                Ok(())
            });
        }
    }

    fn town(session: &Session, name: &str) -> Anchor {
        session
            .attach(Town {
                name: name.to_string(),
                visits: 0,
            })
            .expect("attach")
    }

    fn chain(session: &Session, names: &[&str]) -> Vec<Anchor> {
        let towns: Vec<Anchor> = names.iter().map(|n| town(session, n)).collect();
        for pair in towns.windows(2) {
            session.connect(&pair[0], &pair[1], EdgeSpec::generic()).expect("connect");
        }
        towns
    }

    fn strings(reports: Vec<Value>) -> Vec<String> {
        reports
            .into_iter()
            .map(|r| r.as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn dispatch_order_node_then_walker() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a", "b"]);
        let walker = s.attach(Tourist::default()).expect("walker");

        s.spawn(&towns[0], &walker).expect("spawn");
        assert_eq!(
            strings(s.take_reports()),
            vec![
                "start",
                "town-entry:a",
                "tourist-entry:a",
                "tourist-exit",
                "town-exit",
                "town-entry:b",
                "tourist-entry:b",
                "tourist-exit",
                "town-exit",
                "done",
            ]
        );
        let stored = Traversal::stored(&walker).expect("stored");
        assert_eq!(stored.path, vec![towns[0].id(), towns[1].id()]);
        assert!(stored.next.is_empty());
        assert!(!stored.disengaged);
    }

    #[test]
    fn disengage_halts_the_run() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a", "b", "c"]);
        let walker = s
            .attach(Tourist {
                seen: Vec::new(),
                stop_at: Some("b".to_string()),
            })
            .expect("walker");

        s.spawn(&towns[0], &walker).expect("spawn");
        let reports = strings(s.take_reports());
        assert_eq!(reports.last().map(String::as_str), Some("tourist-entry:b"));
        assert!(!reports.contains(&"done".to_string()));
        assert_eq!(
            s.read(&walker, |t: &Tourist| t.seen.clone()),
            Ok(vec!["a".to_string(), "b".to_string()])
        );
        assert!(Traversal::stored(&walker).expect("stored").disengaged);
    }

    #[test]
    fn ignored_targets_are_never_dispatched() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a", "b"]);
        let walker = s.attach(Tourist::default()).expect("walker");

        assert_eq!(s.ignore(&walker, std::slice::from_ref(&towns[1])), Ok(true));
        assert_eq!(s.visit(&walker, std::slice::from_ref(&towns[1])), Ok(false));
        assert_eq!(s.visit(&walker, std::slice::from_ref(&towns[0])), Ok(true));
        s.resume(&walker).expect("resume");
        assert_eq!(
            s.read(&walker, |t: &Tourist| t.seen.clone()),
            Ok(vec!["a".to_string()])
        );
        assert!(Traversal::stored(&walker).expect("stored").ignores.is_empty());
    }

    #[test]
    fn edge_targets_continue_to_the_far_node() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a", "b"]);
        let edge = s.edges(&towns[0], &EdgeQuery::out()).expect("edges").remove(0);
        let walker = s.attach(Tourist::default()).expect("walker");

        s.spawn(&edge, &walker).expect("spawn from edge");
        assert_eq!(
            s.read(&walker, |t: &Tourist| t.seen.clone()),
            Ok(vec!["b".to_string()])
        );

        let walker = s.attach(Tourist::default()).expect("walker");
        s.visit(&walker, &[edge]).expect("visit edge");
        s.resume(&walker).expect("resume");
        assert_eq!(Traversal::stored(&walker).expect("stored").path, vec![towns[1].id()]);
    }

    #[test]
    fn writes_to_here_need_write_access() {
        let machine = Machine::in_memory().expect("machine");
        let owner = machine
            .session(Some(machine.create_root().expect("root").id()))
            .expect("session");
        let guest_root = machine.create_root().expect("root");
        let guest = machine.session(Some(guest_root.id())).expect("session");
        let towns = chain(&owner, &["a", "b"]);
        owner.connect(owner.root(), &towns[0], EdgeSpec::generic()).expect("connect");
        owner
            .allow_root(owner.root(), guest_root.id(), AccessLevel::Read, true)
            .expect("grant");

        let walker = guest.attach(Stamper).expect("walker");
        guest.spawn(&towns[0], &walker).expect("spawn");
        let reports = guest.take_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(guest.read(&towns[1], |t: &Town| t.visits), Ok(0));

        let walker = owner.attach(Stamper).expect("walker");
        owner.spawn(&towns[0], &walker).expect("spawn");
        assert_eq!(owner.read(&towns[1], |t: &Town| t.visits), Ok(1));
    }

    #[test]
    fn unreadable_targets_are_skipped() {
        let machine = Machine::in_memory().expect("machine");
        let owner = machine
            .session(Some(machine.create_root().expect("root").id()))
            .expect("session");
        let stranger = machine
            .session(Some(machine.create_root().expect("root").id()))
            .expect("session");
        let a = town(&owner, "a");
        owner.connect(owner.root(), &a, EdgeSpec::generic()).expect("connect");

        let walker = stranger.attach(Tourist::default()).expect("walker");
        stranger.spawn(&a, &walker).expect("spawn");
        assert_eq!(strings(stranger.take_reports()), vec!["start", "done"]);
        assert!(Traversal::stored(&walker).expect("stored").path.is_empty());
    }

    #[test]
    fn walkers_only_visit_nodes_and_edges() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let walker = s.attach(Tourist::default()).expect("walker");
        let other = s.attach(Tourist::default()).expect("walker");
        assert!(matches!(
            s.visit(&walker, &[other.clone()]),
            Err(WaypointError::InvalidTarget(_))
        ));
        assert!(matches!(
            s.spawn(&other, &walker),
            Err(WaypointError::InvalidTarget(_))
        ));
        assert!(matches!(
            s.spawn(s.root(), &Anchor::new(Box::new(Root))),
            Err(WaypointError::InvalidTarget(_))
        ));
    }

    #[test]
    fn nested_spawn_on_here_completes() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a"]);
        let guide = s.attach(Guide).expect("walker");

        let (tx, rx) = std::sync::mpsc::channel();
        {
            let s = s.clone();
            let start = towns[0].clone();
            std::thread::spawn(move || {
                let _ = tx.send(s.spawn(&start, &guide).map(|_| ()));
            });
        }
        let outcome = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("nested spawn finished");
        assert_eq!(outcome, Ok(()));
        assert_eq!(strings(s.take_reports()), vec!["guided"]);
        // The stamper saw the guide's write and its own write was kept.
        assert_eq!(s.read(&towns[0], |t: &Town| t.visits), Ok(11));
    }

    #[test]
    fn parallel_walkers_read_each_others_node() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a", "b"]);
        let walker = s
            .attach(Surveyor {
                others: towns.iter().map(Anchor::id).collect(),
            })
            .expect("walker");

        let (tx, rx) = std::sync::mpsc::channel();
        {
            let s = s.clone();
            let nodes = towns.clone();
            std::thread::spawn(move || {
                let _ = tx.send(s.spawn_parallel(&walker, &nodes).map(|w| w.len()));
            });
        }
        let outcome = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("parallel walkers finished");
        assert_eq!(outcome, Ok(2));
        assert_eq!(s.read(&towns[0], |t: &Town| t.visits), Ok(1));
        assert_eq!(s.read(&towns[1], |t: &Town| t.visits), Ok(1));
    }

    #[test]
    fn resume_survives_a_removed_last_node() {
        let machine = Machine::in_memory().expect("machine");
        let s = machine.session(None).expect("session");
        let towns = chain(&s, &["a", "b"]);

        let stamper = s.attach(Stamper).expect("walker");
        s.spawn(&towns[0], &stamper).expect("spawn");
        s.destroy(&towns[1]).expect("destroy");
        assert!(s.resume(&stamper).is_ok());

        let tourist = s.attach(Tourist::default()).expect("walker");
        s.spawn(&towns[0], &tourist).expect("spawn");
        s.take_reports();
        s.destroy(&towns[0]).expect("destroy");
        assert!(s.resume(&tourist).is_ok());
        assert!(!strings(s.take_reports()).contains(&"done".to_string()));
    }
}
