//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Waypoint runtime:
//! - Anchor identifiers (`AnchorId`)
//! - Archetype kinds (`ArchetypeKind`)
//! - Capability levels and permissions (`AccessLevel`, `Permission`)
//! - Edge directions (`EdgeDir`)
//! - Report payloads (`AnchorReport`)
//! - Error types (`WaypointError`)
//!
//! ## Ordering Guarantees
//!
//! Every identifier implements `Ord` so id-keyed collections can use
//! `BTreeMap`/`BTreeSet` and iterate in a stable order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// ANCHOR IDENTIFIERS
// =============================================================================

/// Globally unique identifier of an anchor.
///
/// Ids are UUID v4 values and never change for the lifetime of an anchor.
/// They print as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnchorId(pub Uuid);

impl AnchorId {
    /// Id of the system root, which owns every anchor no user root owns.
    pub const SUPER_ROOT: Self = Self(Uuid::nil());

    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The id as a 128-bit integer (durable table key).
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0.as_u128()
    }

    /// Rebuild an id from its 128-bit integer form.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for AnchorId {
    type Err = WaypointError;

    /// Accepts both the 32-digit hex form and the hyphenated UUID form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| WaypointError::InvalidTarget(format!("invalid anchor id '{}': {}", s, e)))
    }
}

// =============================================================================
// ARCHETYPE KINDS
// =============================================================================

/// The four archetype kinds an anchor can wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArchetypeKind {
    /// A graph vertex with an ordered incidence list.
    Node,
    /// A graph edge with a source, a target and a direction flag.
    Edge,
    /// A mobile agent that traverses nodes and edges.
    Walker,
    /// A plain value with no graph relations.
    Object,
}

impl ArchetypeKind {
    /// Lowercase name used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Walker => "walker",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ArchetypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ACCESS CONTROL PRIMITIVES
// =============================================================================

/// Totally ordered capability level.
///
/// `NoAccess < Read < Connect < Write`. Holding a level implies every
/// lower level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum AccessLevel {
    /// Not visible at all.
    #[default]
    NoAccess,
    /// May be read and visited.
    Read,
    /// May be used as an endpoint of new edges.
    Connect,
    /// May be mutated and destroyed.
    Write,
}

impl AccessLevel {
    /// Numeric form: `-1` for no access up to `2` for write.
    #[must_use]
    pub const fn value(self) -> i8 {
        match self {
            Self::NoAccess => -1,
            Self::Read => 0,
            Self::Connect => 1,
            Self::Write => 2,
        }
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoAccess => "NO_ACCESS",
            Self::Read => "READ",
            Self::Connect => "CONNECT",
            Self::Write => "WRITE",
        }
    }

    /// Whether this level satisfies `required`.
    #[must_use]
    pub fn allows(self, required: Self) -> bool {
        self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = WaypointError;

    /// Parses names case-insensitively, or the numeric form `-1..=2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO_ACCESS" | "-1" => Ok(Self::NoAccess),
            "READ" | "0" => Ok(Self::Read),
            "CONNECT" | "1" => Ok(Self::Connect),
            "WRITE" | "2" => Ok(Self::Write),
            other => Err(WaypointError::InvalidTarget(format!(
                "unknown access level '{}'",
                other
            ))),
        }
    }
}

/// Per-anchor permission: a default grant plus per-root overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permission {
    /// Level granted to every root without an override.
    pub all: AccessLevel,
    /// Overrides keyed by the requesting root's id.
    pub roots: BTreeMap<AnchorId, AccessLevel>,
}

impl Permission {
    /// Level this permission grants to `root`, ignoring ownership.
    #[must_use]
    pub fn level_for(&self, root: AnchorId) -> AccessLevel {
        self.roots.get(&root).copied().unwrap_or(self.all)
    }

    /// Whether `root` holds at least `required` under this permission.
    #[must_use]
    pub fn check(&self, root: AnchorId, required: AccessLevel) -> bool {
        self.level_for(root).allows(required)
    }
}

// =============================================================================
// EDGE DIRECTION
// =============================================================================

/// Direction of an edge relative to the node a query starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EdgeDir {
    /// Edges whose source is the origin.
    #[default]
    Out,
    /// Edges whose target is the origin.
    In,
    /// Either end.
    Any,
}

// =============================================================================
// REPORTS
// =============================================================================

/// The boundary view of an anchor: its id and its archetype's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorReport {
    /// Hex id of the anchor.
    pub id: String,
    /// The archetype's named fields.
    pub context: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Waypoint runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaypointError {
    /// A stub was resolved but the store has no record for its id.
    #[error("{0} is not a valid reference")]
    ReferenceError(AnchorId),

    /// The requesting root lacks the capability the operation needs.
    #[error("access denied: {required} required on {id}")]
    AccessDenied {
        /// The anchor the operation targeted.
        id: AnchorId,
        /// The level the operation needed.
        required: AccessLevel,
    },

    /// An operation was given an anchor of the wrong kind or a malformed id.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// No archetype with this name is registered.
    #[error("unknown archetype: {0}")]
    UnknownArchetype(String),

    /// An attribute write named a field the archetype does not have.
    #[error("{archetype} has no attribute '{field}'")]
    InvalidAttribute {
        /// Archetype type name.
        archetype: String,
        /// The rejected field name.
        field: String,
    },

    /// An archetype was downcast to the wrong concrete type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Requested type name.
        expected: String,
        /// Actual type name.
        found: String,
    },

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O or storage error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A worker task failed or panicked.
    #[error("worker failed: {0}")]
    WorkerError(String),
}

// =============================================================================
// TESTS
// =============================================================================
