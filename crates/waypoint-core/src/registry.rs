//! # Archetype Registry
//!
//! Maps archetype type names to their kind, their ability tables and a
//! decoder that rebuilds an instance from its durable field map.
//!
//! Registration is idempotent: the first registration of a type runs its
//! [`Archetype::abilities`] hook, later ones return the stored entry. Every
//! type attached to a session is registered on first use, so dispatch and
//! decoding never see an unknown name for locally created anchors.

use crate::archetype::{Abilities, Ability, AnyArchetype, Archetype, GenericEdge, Root};
use crate::primitives;
use crate::types::{ArchetypeKind, WaypointError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type DecodeFn = fn(&str) -> Result<Box<dyn AnyArchetype>, WaypointError>;

/// Registered information about one archetype type.
pub struct ArchetypeEntry {
    pub name: &'static str,
    pub kind: ArchetypeKind,
    pub entry: Vec<Ability>,
    pub exit: Vec<Ability>,
    decode: DecodeFn,
}

impl ArchetypeEntry {
    /// Rebuild an instance from its JSON field map.
    pub fn decode(&self, fields: &str) -> Result<Box<dyn AnyArchetype>, WaypointError> {
        (self.decode)(fields)
    }
}

impl fmt::Debug for ArchetypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("entry", &self.entry.len())
            .field("exit", &self.exit.len())
            .finish()
    }
}

fn decode_as<T: Archetype>(fields: &str) -> Result<Box<dyn AnyArchetype>, WaypointError> {
    let value: T = serde_json::from_str(fields)
        .map_err(|e| WaypointError::DeserializationError(format!("{}: {}", T::NAME, e)))?;
    Ok(Box::new(value))
}

/// Name-indexed table of archetype entries.
#[derive(Default)]
pub struct ArchetypeRegistry {
    entries: RwLock<BTreeMap<&'static str, Arc<ArchetypeEntry>>>,
}

impl fmt::Debug for ArchetypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeRegistry")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl ArchetypeRegistry {
    /// Create a registry with the built-in `Root` and `GenericEdge`.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::default();
        registry.register::<Root>();
        registry.register::<GenericEdge>();
        registry
    }

    /// Register `T`, running its ability hook on first registration.
    pub fn register<T: Archetype>(&self) -> Arc<ArchetypeEntry> {
        if let Some(entry) = self.entries.read().get(T::NAME) {
            return Arc::clone(entry);
        }

        let mut abilities = Abilities::<T>::new();
        T::abilities(&mut abilities);
        let (entry, exit) = abilities.into_parts();
        tracing::debug!(
            archetype = T::NAME,
            kind = %T::KIND,
            entry = entry.len(),
            exit = exit.len(),
            "registered archetype"
        );

        let built = Arc::new(ArchetypeEntry {
            name: T::NAME,
            kind: T::KIND,
            entry,
            exit,
            decode: decode_as::<T>,
        });
        // Another thread may have won the race; keep whichever landed first.
        Arc::clone(self.entries.write().entry(T::NAME).or_insert(built))
    }

    /// Look up an entry by type name.
    pub fn get(&self, name: &str) -> Option<Arc<ArchetypeEntry>> {
        self.entries.read().get(name).cloned()
    }

    /// Rebuild an archetype of type `name` from its JSON field map.
    pub fn decode(&self, name: &str, fields: &str) -> Result<Box<dyn AnyArchetype>, WaypointError> {
        if name.len() > primitives::MAX_TYPE_NAME_LENGTH {
            return Err(WaypointError::UnknownArchetype(format!(
                "type name of {} bytes exceeds limit",
                name.len()
            )));
        }
        self.get(name)
            .ok_or_else(|| WaypointError::UnknownArchetype(name.to_string()))?
            .decode(fields)
    }

    /// Registered names of one kind, in name order.
    pub fn names_of_kind(&self, kind: ArchetypeKind) -> Vec<&'static str> {
        self.entries
            .read()
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.name)
            .collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
