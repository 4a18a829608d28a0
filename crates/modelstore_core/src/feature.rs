//! Feature keys and stored elements.

use crate::id::Id;
use modelstore_codec::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses one feature of one entity.
///
/// Used for single-valued access and for whole-collection operations on
/// many-valued features (size, clear, enumeration).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SingleFeatureKey {
    /// The entity owning the feature.
    pub owner: Id,
    /// Name of the feature.
    pub name: String,
}

impl SingleFeatureKey {
    /// Creates a key.
    pub fn new(owner: Id, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    /// Returns a key addressing `position` of this feature.
    #[must_use]
    pub fn with_position(&self, position: u32) -> ManyFeatureKey {
        ManyFeatureKey {
            owner: self.owner,
            name: self.name.clone(),
            position,
        }
    }
}

impl fmt::Display for SingleFeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Addresses one position of a many-valued feature. Positions are zero-based.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManyFeatureKey {
    /// The entity owning the feature.
    pub owner: Id,
    /// Name of the feature.
    pub name: String,
    /// Position inside the feature.
    pub position: u32,
}

impl ManyFeatureKey {
    /// Creates a key.
    pub fn new(owner: Id, name: impl Into<String>, position: u32) -> Self {
        Self {
            owner,
            name: name.into(),
            position,
        }
    }

    /// Returns the key of the whole feature.
    #[must_use]
    pub fn without_position(&self) -> SingleFeatureKey {
        SingleFeatureKey {
            owner: self.owner,
            name: self.name.clone(),
        }
    }

    /// Returns a key for the same feature at another position.
    #[must_use]
    pub fn with_position(&self, position: u32) -> Self {
        Self {
            owner: self.owner,
            name: self.name.clone(),
            position,
        }
    }

    /// Returns `true` if both keys address the same feature.
    #[must_use]
    pub fn same_feature(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

impl fmt::Display for ManyFeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}]", self.owner, self.name, self.position)
    }
}

/// One stored element: an attribute value or a reference to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// An attribute value.
    Value(Value),
    /// A reference to another entity.
    Reference(Id),
}

impl Slot {
    /// Returns the value if this is an attribute slot.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Reference(_) => None,
        }
    }

    /// Returns the referenced id if this is a reference slot.
    #[must_use]
    pub fn as_reference(&self) -> Option<Id> {
        match self {
            Self::Reference(id) => Some(*id),
            Self::Value(_) => None,
        }
    }

    /// Returns `true` for reference slots.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Id> for Slot {
    fn from(id: Id) -> Self {
        Self::Reference(id)
    }
}

/// The inverse edge from a contained entity to its unique holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerEdge {
    /// The containing entity.
    pub container: Id,
    /// Name of the containment feature holding the child.
    pub feature: String,
}

impl ContainerEdge {
    /// Creates an edge.
    pub fn new(container: Id, feature: impl Into<String>) -> Self {
        Self {
            container,
            feature: feature.into(),
        }
    }

    /// Returns the key of the holding feature.
    #[must_use]
    pub fn holder_key(&self) -> SingleFeatureKey {
        SingleFeatureKey::new(self.container, self.feature.clone())
    }
}

/// How a feature is physically stored for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoredShape {
    /// One value.
    Single,
    /// An ordered sequence.
    Many,
}

/// A feature found while enumerating an entity's stored data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredFeature {
    /// Name of the feature.
    pub name: String,
    /// Physical shape.
    pub shape: StoredShape,
}
