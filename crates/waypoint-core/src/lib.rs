//! # waypoint-core
//!
//! The object-spatial runtime for Waypoint.
//!
//! Computation is expressed as walkers travelling a graph of nodes and
//! edges. Behaviour lives in entry and exit abilities attached to archetype
//! types and fires when a walker and a node meet, instead of at explicit
//! call sites.
//!
//! ## Layers
//!
//! - `archetype` / `registry`: user types and their ability tables
//! - `anchor`: identity, hydration and relations of every instance
//! - `graph` / `storage`: in-memory and redb anchor stores
//! - `access`: root-scoped capability checks
//! - `query` / `mutation`: adjacency resolution and graph edits
//! - `walker`: the traversal loop and dual dispatch
//! - `concurrency`: the worker pool and parallel spawns
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - Every id-keyed collection is ordered (BTreeMap/BTreeSet)
//! - Relations are ids into the store; stubs resolve explicitly

// =============================================================================
// MODULES
// =============================================================================

pub mod access;
pub mod anchor;
pub mod archetype;
pub mod concurrency;
pub mod export;
pub mod formats;
pub mod graph;
pub mod machine;
pub mod mutation;
pub mod primitives;
pub mod query;
pub mod registry;
pub mod session;
pub mod storage;
pub mod types;
pub mod walker;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AccessLevel, AnchorId, AnchorReport, ArchetypeKind, EdgeDir, Permission, WaypointError,
};

// =============================================================================
// RE-EXPORTS: Runtime
// =============================================================================

pub use access::AccessControl;
pub use anchor::{Anchor, AnchorState, EdgeAnchor, NodeAnchor, Spatial, WalkerAnchor};
pub use archetype::{Abilities, Ability, AnyArchetype, Archetype, GenericEdge, Root, Trigger};
pub use concurrency::{TaskHandle, WalkerGroups, WorkerPool};
pub use export::export_dot;
pub use graph::{GraphStore, MemoryGraph};
pub use machine::{Machine, MachineConfig};
pub use mutation::{EdgeSpec, MutationEngine};
pub use query::{EdgePredicate, EdgeQuery, EdgeResolver, Hop};
pub use registry::{ArchetypeEntry, ArchetypeRegistry};
pub use session::{ArchetypeReader, ObjectSpatial, Session};
pub use storage::RedbGraph;
pub use walker::{Traversal, Visit};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{AnchorRecord, HydratedRecord, PersistenceHeader, record_from_bytes, record_to_bytes};
