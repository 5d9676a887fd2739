//! Mementos: opaque, nested attribute maps capturing the full state of a
//! component, a container subtree, or an entire table.
//!
//! Mementos are what a peer sends when an incremental patch cannot describe
//! a change: newly inserted components and full-table synchronisation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{LayoutId, Orientation, StrategyId, SurfaceDesignId};

/// A single attribute value inside a [`Memento`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MementoValue {
    /// A string attribute.
    Text(String),
    /// An integer attribute.
    Integer(i64),
    /// An ordered list of values.
    List(Vec<MementoValue>),
    /// A nested attribute map.
    Map(Memento),
}

impl From<&str> for MementoValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MementoValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MementoValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for MementoValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<Vec<MementoValue>> for MementoValue {
    fn from(value: Vec<MementoValue>) -> Self {
        Self::List(value)
    }
}

impl From<Memento> for MementoValue {
    fn from(value: Memento) -> Self {
        Self::Map(value)
    }
}

/// Errors raised while reconstructing state from a memento.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MementoError {
    /// A required attribute is absent.
    #[error("memento attribute `{0}` is missing")]
    MissingAttribute(String),

    /// An attribute holds a value of the wrong shape.
    #[error("memento attribute `{name}` is not a valid {expected}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// Description of the expected shape.
        expected: &'static str,
    },

    /// The component strategy is not registered locally.
    #[error("unknown component strategy `{0}`")]
    UnknownStrategy(StrategyId),

    /// The strategy exists but produces the other kind of object.
    #[error("strategy `{0}` does not describe the expected kind of component")]
    KindMismatch(StrategyId),

    /// A surface design is not registered locally.
    #[error("unknown surface design `{0}`")]
    UnknownSurfaceDesign(SurfaceDesignId),

    /// A container layout is not registered locally.
    #[error("unknown container layout `{0}`")]
    UnknownLayout(LayoutId),

    /// The orientation is not supported by the component's strategy.
    #[error("orientation `{orientation}` is not supported by strategy `{strategy}`")]
    UnsupportedOrientation {
        /// Strategy of the component being decoded.
        strategy: StrategyId,
        /// The offending orientation.
        orientation: Orientation,
    },

    /// Containers are nested deeper than [`MAX_NESTING_DEPTH`].
    #[error("components are nested deeper than {limit} levels")]
    TooDeep {
        /// The nesting limit.
        limit: usize,
    },
}

/// Deepest container nesting a table tree may have, counted from the
/// tabletop root.
pub const MAX_NESTING_DEPTH: usize = 64;

/// An ordered string-keyed attribute map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memento(BTreeMap<String, MementoValue>);

impl Memento {
    /// Creates an empty memento.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<MementoValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces an attribute.
    pub fn insert(&mut self, name: &str, value: impl Into<MementoValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Removes an attribute, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<MementoValue> {
        self.0.remove(name)
    }

    /// Raw attribute access.
    pub fn get(&self, name: &str) -> Option<&MementoValue> {
        self.0.get(name)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the memento has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MementoValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn required(&self, name: &str) -> Result<&MementoValue, MementoError> {
        self.0
            .get(name)
            .ok_or_else(|| MementoError::MissingAttribute(name.to_string()))
    }

    /// A required text attribute.
    pub fn text(&self, name: &str) -> Result<&str, MementoError> {
        match self.required(name)? {
            MementoValue::Text(text) => Ok(text),
            _ => Err(invalid(name, "text value")),
        }
    }

    /// A required integer attribute.
    pub fn integer(&self, name: &str) -> Result<i64, MementoError> {
        match self.required(name)? {
            MementoValue::Integer(value) => Ok(*value),
            _ => Err(invalid(name, "integer value")),
        }
    }

    /// A required integer attribute that must fit in an `i32`.
    pub fn integer_i32(&self, name: &str) -> Result<i32, MementoError> {
        i32::try_from(self.integer(name)?).map_err(|_| invalid(name, "32-bit integer"))
    }

    /// A required list attribute.
    pub fn list(&self, name: &str) -> Result<&[MementoValue], MementoError> {
        match self.required(name)? {
            MementoValue::List(items) => Ok(items),
            _ => Err(invalid(name, "list value")),
        }
    }

    /// A required nested map attribute.
    pub fn map(&self, name: &str) -> Result<&Memento, MementoError> {
        match self.required(name)? {
            MementoValue::Map(map) => Ok(map),
            _ => Err(invalid(name, "nested memento")),
        }
    }
}

fn invalid(name: &str, expected: &'static str) -> MementoError {
    MementoError::InvalidAttribute {
        name: name.to_string(),
        expected,
    }
}
