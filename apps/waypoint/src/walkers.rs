//! # Built-in Archetypes
//!
//! The archetypes the server and CLI can run without user code: an `Item`
//! node hanging off a root, walkers that create, list, update and delete
//! items, and walkers that grant or revoke another root's access to the
//! node they start on.
//!
//! Walkers are looked up by name in a [`WalkerCatalog`] and built from the
//! JSON arguments of the request.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use waypoint_core::{
    Abilities, AccessLevel, AnchorId, AnyArchetype, Archetype, ArchetypeKind, ArchetypeRegistry,
    EdgeQuery, EdgeSpec, ObjectSpatial, Root, Session, WaypointError,
};

// =============================================================================
// ITEM NODE
// =============================================================================

/// A named value stored under a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl Archetype for Item {
    const NAME: &'static str = "Item";
    const KIND: ArchetypeKind = ArchetypeKind::Node;
}

// =============================================================================
// ITEM WALKERS
// =============================================================================

/// Creates an `Item` connected to the root it starts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItem {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl Archetype for CreateItem {
    const NAME: &'static str = "create_item";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities.on_entry::<Root, _>("create", |v| {
            let spec = v.walker_ref::<CreateItem>()?.clone();
            let item = v.session().attach(Item {
                name: spec.name,
                value: spec.value,
            })?;
            v.session().connect(v.here(), &item, EdgeSpec::generic())?;
            v.report_anchor(&item)
        });
    }
}

/// Reports every item below the start node, or the start item itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListItems {}

impl Archetype for ListItems {
    const NAME: &'static str = "list_items";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities
            .on_entry::<Root, _>("descend", |v| {
                v.visit_refs(&EdgeQuery::out())?;
                Ok(())
            })
            .on_entry::<Item, _>("collect", |v| {
                let here = v.here().clone();
                v.report_anchor(&here)
            });
    }
}

/// Overwrites the value of the start item, or of every item below a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItem {
    #[serde(default)]
    pub name: Option<String>,
    pub value: Value,
}

impl Archetype for UpdateItem {
    const NAME: &'static str = "update_item";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities
            .on_entry::<Root, _>("descend", |v| {
                v.visit_refs(&EdgeQuery::out())?;
                Ok(())
            })
            .on_entry::<Item, _>("update", |v| {
                let UpdateItem { name, value } = v.walker_ref::<UpdateItem>()?.clone();
                let item = v.here_mut::<Item>()?;
                item.value = value;
                if let Some(name) = name {
                    item.name = name;
                }
                let here = v.here().clone();
                v.report_anchor(&here)
            });
    }
}

/// Destroys the start item, or every item below a root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteItem {}

impl Archetype for DeleteItem {
    const NAME: &'static str = "delete_item";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities
            .on_entry::<Root, _>("descend", |v| {
                v.visit_refs(&EdgeQuery::out())?;
                Ok(())
            })
            .on_entry::<Item, _>("delete", |v| {
                let here = v.here().clone();
                v.session().destroy(&here)?;
                v.report(&json!({ "deleted": here.id().to_string() }))
            });
    }
}

// =============================================================================
// PERMISSION WALKERS
// =============================================================================

fn default_level() -> String {
    AccessLevel::Read.as_str().to_string()
}

/// Grants `root` a level on the node the walker starts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowOtherRootAccess {
    pub root: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub propagate: bool,
}

impl Archetype for AllowOtherRootAccess {
    const NAME: &'static str = "allow_other_root_access";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities.on_entry_kind(ArchetypeKind::Node, "allow", |v| {
            let (root, level, propagate) = {
                let spec = v.walker_ref::<AllowOtherRootAccess>()?;
                (
                    spec.root.parse::<AnchorId>()?,
                    spec.level.parse::<AccessLevel>()?,
                    spec.propagate,
                )
            };
            let here = v.here().clone();
            v.session().allow_root(&here, root, level, propagate)?;
            v.report(&json!({
                "anchor": here.id().to_string(),
                "root": root.to_string(),
                "level": level.as_str(),
            }))
        });
    }
}

/// Removes the override of `root` on the node the walker starts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisallowOtherRootAccess {
    pub root: String,
    #[serde(default)]
    pub propagate: bool,
}

impl Archetype for DisallowOtherRootAccess {
    const NAME: &'static str = "disallow_other_root_access";
    const KIND: ArchetypeKind = ArchetypeKind::Walker;

    fn abilities(abilities: &mut Abilities<Self>) {
        abilities.on_entry_kind(ArchetypeKind::Node, "disallow", |v| {
            let (root, propagate) = {
                let spec = v.walker_ref::<DisallowOtherRootAccess>()?;
                (spec.root.parse::<AnchorId>()?, spec.propagate)
            };
            let here = v.here().clone();
            v.session().disallow_root(&here, root, propagate)?;
            v.report(&json!({
                "anchor": here.id().to_string(),
                "root": root.to_string(),
                "level": Value::Null,
            }))
        });
    }
}

// =============================================================================
// CATALOG
// =============================================================================

type BuildFn = fn(Value) -> Result<Box<dyn AnyArchetype>, WaypointError>;

fn build<T: Archetype>(args: Value) -> Result<Box<dyn AnyArchetype>, WaypointError> {
    let walker: T = serde_json::from_value(args)
        .map_err(|e| WaypointError::DeserializationError(format!("{}: {}", T::NAME, e)))?;
    Ok(Box::new(walker))
}

/// Registry with `Item` and every built-in walker registered.
///
/// Opening a durable store needs this before the first read.
#[must_use]
pub fn builtin_registry() -> Arc<ArchetypeRegistry> {
    let registry = ArchetypeRegistry::new();
    registry.register::<Item>();
    registry.register::<CreateItem>();
    registry.register::<ListItems>();
    registry.register::<UpdateItem>();
    registry.register::<DeleteItem>();
    registry.register::<AllowOtherRootAccess>();
    registry.register::<DisallowOtherRootAccess>();
    Arc::new(registry)
}

/// Walkers that can be started by name.
#[derive(Debug, Clone)]
pub struct WalkerCatalog {
    builders: BTreeMap<&'static str, BuildFn>,
}

impl Default for WalkerCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl WalkerCatalog {
    /// The built-in walkers.
    #[must_use]
    pub fn builtin() -> Self {
        let mut builders: BTreeMap<&'static str, BuildFn> = BTreeMap::new();
        builders.insert(CreateItem::NAME, build::<CreateItem>);
        builders.insert(ListItems::NAME, build::<ListItems>);
        builders.insert(UpdateItem::NAME, build::<UpdateItem>);
        builders.insert(DeleteItem::NAME, build::<DeleteItem>);
        builders.insert(AllowOtherRootAccess::NAME, build::<AllowOtherRootAccess>);
        builders.insert(DisallowOtherRootAccess::NAME, build::<DisallowOtherRootAccess>);
        Self { builders }
    }

    /// Walker names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.builders.keys().copied().collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Build walker `name` from its JSON arguments. `null` counts as `{}`.
    pub fn build(&self, name: &str, args: Value) -> Result<Box<dyn AnyArchetype>, WaypointError> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| WaypointError::UnknownArchetype(name.to_string()))?;
        let args = if args.is_null() { json!({}) } else { args };
        builder(args)
    }
}

// =============================================================================
// RUNNING
// =============================================================================

/// Run walker `name` from `start` (`"root"` or an anchor id) and return
/// its reports.
///
/// The caller must be able to read the start node. The walker anchor is
/// discarded afterwards and pending persistent changes are committed.
pub fn run_walker(
    session: &Session,
    catalog: &WalkerCatalog,
    name: &str,
    start: &str,
    args: Value,
) -> Result<Vec<Value>, WaypointError> {
    let archetype = catalog.build(name, args)?;
    let start = session.get_object(start)?;
    if !session.check_access(&start, AccessLevel::Read)? {
        tracing::info!(
            root = %session.root_id(),
            start = %start.id(),
            walker = name,
            "walker start not readable"
        );
        return Err(WaypointError::AccessDenied {
            id: start.id(),
            required: AccessLevel::Read,
        });
    }

    let walker = session.attach_boxed(archetype)?;
    let outcome = session.spawn(&start, &walker);
    session.destroy(&walker)?;
    outcome?;
    session.machine().commit()?;

    let reports = session.take_reports();
    tracing::debug!(walker = name, reports = reports.len(), "walker finished");
    Ok(reports)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::{GraphStore, Machine, MachineConfig, MemoryGraph};

    fn machine() -> Arc<Machine> {
        Machine::with_store(
            Arc::new(MemoryGraph::new()),
            builtin_registry(),
            MachineConfig { workers: 2 },
        )
        .expect("machine")
    }

    fn user(machine: &Arc<Machine>) -> Session {
        let root = machine.create_root().expect("root");
        machine.session(Some(root.id())).expect("session")
    }

    fn item_id(reports: &[Value]) -> String {
        reports[0]["id"].as_str().expect("id").to_string()
    }

    #[test]
    fn create_list_update_delete() {
        let machine = machine();
        let s = user(&machine);
        let catalog = WalkerCatalog::builtin();

        let created = run_walker(&s, &catalog, "create_item", "root", json!({"name": "pen", "value": 1}))
            .expect("create");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["context"]["name"], json!("pen"));
        let id = item_id(&created);

        run_walker(&s, &catalog, "create_item", "root", json!({"name": "cup"})).expect("create");
        let listed = run_walker(&s, &catalog, "list_items", "root", Value::Null).expect("list");
        assert_eq!(listed.len(), 2);

        let updated = run_walker(&s, &catalog, "update_item", &id, json!({"value": 5})).expect("update");
        assert_eq!(updated[0]["context"]["value"], json!(5));
        assert_eq!(updated[0]["context"]["name"], json!("pen"));

        let deleted = run_walker(&s, &catalog, "delete_item", "root", json!({})).expect("delete");
        assert_eq!(deleted.len(), 2);
        let listed = run_walker(&s, &catalog, "list_items", "root", Value::Null).expect("list");
        assert!(listed.is_empty());
    }

    #[test]
    fn items_are_owned_and_persistent() {
        let machine = machine();
        let s = user(&machine);
        let created = run_walker(&s, &WalkerCatalog::builtin(), "create_item", "root", json!({"name": "a"}))
            .expect("create");
        let item = s.get_object(&item_id(&created)).expect("item");
        assert_eq!(item.root().expect("root"), Some(s.root_id()));
        assert_eq!(item.is_persistent(), Ok(true));
    }

    #[test]
    fn walker_anchor_is_discarded() {
        let machine = machine();
        let s = user(&machine);
        let before = machine.store().len().expect("len");
        run_walker(&s, &WalkerCatalog::builtin(), "list_items", "root", Value::Null).expect("list");
        assert_eq!(machine.store().len().expect("len"), before);
    }

    #[test]
    fn cross_root_grant_and_revoke() {
        let machine = machine();
        let alice = user(&machine);
        let bob = user(&machine);
        let catalog = WalkerCatalog::builtin();

        let created = run_walker(&alice, &catalog, "create_item", "root", json!({"name": "doc", "value": 1}))
            .expect("create");
        let id = item_id(&created);

        let denied = run_walker(&bob, &catalog, "update_item", &id, json!({"value": 2}));
        assert!(matches!(denied, Err(WaypointError::AccessDenied { .. })));

        let bob_root = bob.root_id().to_string();
        run_walker(
            &alice,
            &catalog,
            "allow_other_root_access",
            &id,
            json!({"root": bob_root, "level": "WRITE"}),
        )
        .expect("allow");
        run_walker(&bob, &catalog, "update_item", &id, json!({"value": 2})).expect("update");

        let listed = run_walker(&alice, &catalog, "list_items", "root", Value::Null).expect("list");
        assert_eq!(listed[0]["context"]["value"], json!(2));

        run_walker(&alice, &catalog, "disallow_other_root_access", &id, json!({"root": bob_root}))
            .expect("disallow");
        let denied = run_walker(&bob, &catalog, "list_items", &id, Value::Null);
        assert!(matches!(
            denied,
            Err(WaypointError::AccessDenied { required: AccessLevel::Read, .. })
        ));
    }

    #[test]
    fn read_grant_does_not_allow_updates() {
        let machine = machine();
        let alice = user(&machine);
        let bob = user(&machine);
        let catalog = WalkerCatalog::builtin();
        let created = run_walker(&alice, &catalog, "create_item", "root", json!({"name": "doc"}))
            .expect("create");
        let id = item_id(&created);

        run_walker(
            &alice,
            &catalog,
            "allow_other_root_access",
            &id,
            json!({"root": bob.root_id().to_string()}),
        )
        .expect("allow");
        assert_eq!(
            run_walker(&bob, &catalog, "list_items", &id, Value::Null).expect("list").len(),
            1
        );
        assert!(matches!(
            run_walker(&bob, &catalog, "update_item", &id, json!({"value": 3})),
            Err(WaypointError::AccessDenied { required: AccessLevel::Write, .. })
        ));
    }

    #[test]
    fn catalog_rejects_unknown_walkers_and_bad_args() {
        let catalog = WalkerCatalog::builtin();
        assert_eq!(catalog.names().len(), 6);
        assert!(catalog.contains("create_item"));
        assert!(matches!(
            catalog.build("launch_rocket", Value::Null),
            Err(WaypointError::UnknownArchetype(_))
        ));
        assert!(matches!(
            catalog.build("create_item", json!({"value": 1})),
            Err(WaypointError::DeserializationError(_))
        ));
    }

    #[test]
    fn unknown_start_is_a_reference_error() {
        let machine = machine();
        let s = user(&machine);
        let missing = AnchorId::new().to_string();
        assert!(matches!(
            run_walker(&s, &WalkerCatalog::builtin(), "list_items", &missing, Value::Null),
            Err(WaypointError::ReferenceError(_))
        ));
    }
}
