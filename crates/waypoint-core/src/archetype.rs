//! # Archetype Model
//!
//! Archetypes are the user-defined data and behaviour wrapped by anchors.
//!
//! A concrete archetype implements [`Archetype`]: it names itself, declares
//! its kind, and registers entry and exit abilities in
//! [`Archetype::abilities`]. The runtime only ever handles archetypes through
//! the object-safe [`AnyArchetype`], which the blanket impl provides for every
//! [`Archetype`].
//!
//! ## Abilities
//!
//! An ability is a named callback plus a [`Trigger`] naming the counterpart
//! types it reacts to. Triggers are fixed at registration time from the type
//! parameter given to `on_entry::<C>` / `on_exit::<C>`; an ability registered
//! with `on_entry_any` matches every counterpart. All matching abilities fire
//! in declaration order.

use crate::types::{ArchetypeKind, WaypointError};
use crate::walker::Visit;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// =============================================================================
// ARCHETYPE TRAITS
// =============================================================================

/// A user-defined node, edge, walker or object type.
///
/// Fields are serialized with serde; the field map doubles as the report
/// context and as the durable payload.
pub trait Archetype:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Unique type name, used for dispatch and for durable records.
    const NAME: &'static str;

    /// Which anchor kind wraps this archetype.
    const KIND: ArchetypeKind;

    /// Register entry and exit abilities.
    fn abilities(_abilities: &mut Abilities<Self>) {}
}

/// Object-safe view of an archetype.
pub trait AnyArchetype: Send + Sync + fmt::Debug {
    /// The type name given by [`Archetype::NAME`].
    fn type_name(&self) -> &'static str;

    /// The kind given by [`Archetype::KIND`].
    fn kind(&self) -> ArchetypeKind;

    /// Field map as a JSON object string.
    fn fields_json(&self) -> Result<String, WaypointError>;

    /// Named fields; empty for archetypes that do not serialize to a map.
    fn context(&self) -> Map<String, Value>;

    /// Overwrite one existing field.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), WaypointError>;

    /// Deep copy behind a new box.
    fn duplicate(&self) -> Box<dyn AnyArchetype>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Archetype> AnyArchetype for T {
    fn type_name(&self) -> &'static str {
        T::NAME
    }

    fn kind(&self) -> ArchetypeKind {
        T::KIND
    }

    fn fields_json(&self) -> Result<String, WaypointError> {
        serde_json::to_string(self).map_err(|e| WaypointError::SerializationError(e.to_string()))
    }

    fn context(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), WaypointError> {
        let mut fields = self.context();
        if !fields.contains_key(name) {
            return Err(WaypointError::InvalidAttribute {
                archetype: T::NAME.to_string(),
                field: name.to_string(),
            });
        }
        fields.insert(name.to_string(), value);
        *self = serde_json::from_value(Value::Object(fields))
            .map_err(|e| WaypointError::DeserializationError(format!("{}.{}: {}", T::NAME, name, e)))?;
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn AnyArchetype> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn AnyArchetype + '_ {
    /// Whether the concrete type is `T`.
    #[must_use]
    pub fn is<T: Archetype>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow as the concrete type `T`.
    pub fn downcast_ref<T: Archetype>(&self) -> Result<&T, WaypointError> {
        let found = self.type_name();
        self.as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch::<T>(found))
    }

    /// Mutably borrow as the concrete type `T`.
    pub fn downcast_mut<T: Archetype>(&mut self) -> Result<&mut T, WaypointError> {
        let found = self.type_name();
        self.as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| mismatch::<T>(found))
    }
}

fn mismatch<T: Archetype>(found: &str) -> WaypointError {
    WaypointError::TypeMismatch {
        expected: T::NAME.to_string(),
        found: found.to_string(),
    }
}

// =============================================================================
// BUILT-IN ARCHETYPES
// =============================================================================

/// The distinguished node every user's reachable graph hangs from.
///
/// Root anchors are always persistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Root;

impl Archetype for Root {
    const NAME: &'static str = "Root";
    const KIND: ArchetypeKind = ArchetypeKind::Node;
}

/// Edge archetype used when `connect` is not given one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenericEdge;

impl Archetype for GenericEdge {
    const NAME: &'static str = "GenericEdge";
    const KIND: ArchetypeKind = ArchetypeKind::Edge;
}

// =============================================================================
// TRIGGERS
// =============================================================================

/// Counterpart filter of an ability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Matches every counterpart.
    Any,
    /// Matches every archetype of one kind.
    Kind(ArchetypeKind),
    /// Matches any of the named archetype types.
    Types(Vec<&'static str>),
}

impl Trigger {
    /// Trigger for a single archetype type.
    #[must_use]
    pub fn of<T: Archetype>() -> Self {
        Self::Types(vec![T::NAME])
    }

    /// Widen a type trigger into a union with `T`.
    #[must_use]
    pub fn or<T: Archetype>(self) -> Self {
        match self {
            Self::Types(mut names) => {
                if !names.contains(&T::NAME) {
                    names.push(T::NAME);
                }
                Self::Types(names)
            }
            other => other,
        }
    }

    /// Whether an archetype of `kind` named `type_name` triggers this.
    #[must_use]
    pub fn matches(&self, kind: ArchetypeKind, type_name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Kind(k) => *k == kind,
            Self::Types(names) => names.iter().any(|n| *n == type_name),
        }
    }

    /// Whether this trigger matches unconditionally.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        matches!(self, Self::Any)
    }
}

// =============================================================================
// ABILITIES
// =============================================================================

/// Callback signature of every ability.
pub type AbilityFn = Arc<dyn Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync>;

/// A named, triggered callback attached to an archetype type.
#[derive(Clone)]
pub struct Ability {
    pub name: String,
    pub trigger: Trigger,
    func: AbilityFn,
}

impl Ability {
    /// Build an ability from a closure.
    pub fn new<F>(name: impl Into<String>, trigger: Trigger, func: F) -> Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            trigger,
            func: Arc::new(func),
        }
    }

    /// Run the ability against a dispatch context.
    pub fn call(&self, ctx: &mut Visit<'_>) -> Result<(), WaypointError> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ability")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

/// Ability lists collected for archetype `O` at registration.
pub struct Abilities<O> {
    entry: Vec<Ability>,
    exit: Vec<Ability>,
    _owner: PhantomData<fn() -> O>,
}

impl<O: Archetype> Abilities<O> {
    pub(crate) fn new() -> Self {
        Self {
            entry: Vec::new(),
            exit: Vec::new(),
            _owner: PhantomData,
        }
    }

    /// Entry ability fired when a `C` meets an `O`.
    pub fn on_entry<C, F>(&mut self, name: &str, func: F) -> &mut Self
    where
        C: Archetype,
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        self.on_entry_when(Trigger::of::<C>(), name, func)
    }

    /// Entry ability fired for every counterpart.
    pub fn on_entry_any<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        self.on_entry_when(Trigger::Any, name, func)
    }

    /// Entry ability fired for every counterpart of one kind.
    pub fn on_entry_kind<F>(&mut self, kind: ArchetypeKind, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        self.on_entry_when(Trigger::Kind(kind), name, func)
    }

    /// Entry ability with an explicit trigger.
    pub fn on_entry_when<F>(&mut self, trigger: Trigger, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        push_ability(&mut self.entry, Ability::new(name, trigger, func));
        self
    }

    /// Exit ability fired when a `C` leaves an `O`.
    pub fn on_exit<C, F>(&mut self, name: &str, func: F) -> &mut Self
    where
        C: Archetype,
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        self.on_exit_when(Trigger::of::<C>(), name, func)
    }

    /// Exit ability fired for every counterpart.
    pub fn on_exit_any<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        self.on_exit_when(Trigger::Any, name, func)
    }

    /// Exit ability fired for every counterpart of one kind.
    pub fn on_exit_kind<F>(&mut self, kind: ArchetypeKind, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        self.on_exit_when(Trigger::Kind(kind), name, func)
    }

    /// Exit ability with an explicit trigger.
    pub fn on_exit_when<F>(&mut self, trigger: Trigger, name: &str, func: F) -> &mut Self
    where
        F: Fn(&mut Visit<'_>) -> Result<(), WaypointError> + Send + Sync + 'static,
    {
        push_ability(&mut self.exit, Ability::new(name, trigger, func));
        self
    }

    pub(crate) fn into_parts(self) -> (Vec<Ability>, Vec<Ability>) {
        (self.entry, self.exit)
    }
}

/// A redefinition keeps the first position and the latest body.
fn push_ability(list: &mut Vec<Ability>, ability: Ability) {
    match list.iter_mut().find(|a| a.name == ability.name) {
        Some(slot) => *slot = ability,
        None => list.push(ability),
    }
}

// =============================================================================
// TESTS
// =============================================================================
