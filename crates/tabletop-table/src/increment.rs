//! Tree patches: sparse descriptions of a change to one node of the
//! component tree.
//!
//! Every field is independently optional. An absent field means "unchanged",
//! never "cleared". The paired structural fields (removal index and count,
//! insertion index and mementos) are grouped in one struct each, so a
//! half-specified pair cannot be expressed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{LayoutId, Orientation, Point, SurfaceDesignId};
use crate::memento::Memento;

/// Changes to the state every component has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentIncrement {
    /// New location.
    pub location: Option<Point>,
    /// New orientation.
    pub orientation: Option<Orientation>,
    /// New surface designs, per orientation. Orientations not listed keep
    /// their current design.
    pub surface_designs: Option<BTreeMap<Orientation, SurfaceDesignId>>,
}

impl ComponentIncrement {
    /// An increment that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the location change.
    pub fn with_location(mut self, location: Point) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the orientation change.
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    /// Adds one surface design change.
    pub fn with_surface_design(mut self, orientation: Orientation, id: SurfaceDesignId) -> Self {
        self.surface_designs
            .get_or_insert_with(BTreeMap::new)
            .insert(orientation, id);
        self
    }

    /// Whether applying this increment would change nothing.
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.orientation.is_none()
            && self.surface_designs.as_ref().is_none_or(BTreeMap::is_empty)
    }
}

/// A contiguous range of children to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedRange {
    /// Index of the first removed child.
    pub index: usize,
    /// Number of removed children.
    pub count: usize,
}

/// Children to insert, as mementos, starting at `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedComponents {
    /// Index the first added child lands at.
    pub index: usize,
    /// Serialized children, in order.
    pub mementos: Vec<Memento>,
}

/// Changes to a container: its component state, layout and children.
///
/// Structural changes apply removal first, then insertion, so the insertion
/// index refers to the child list after the removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIncrement {
    /// Changes to the container's own component state.
    pub component: ComponentIncrement,
    /// New layout.
    pub layout_id: Option<LayoutId>,
    /// Children to remove.
    pub removed: Option<RemovedRange>,
    /// Children to insert.
    pub added: Option<AddedComponents>,
}

impl ContainerIncrement {
    /// An increment that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the component-state part.
    pub fn with_component(mut self, component: ComponentIncrement) -> Self {
        self.component = component;
        self
    }

    /// Sets the layout change.
    pub fn with_layout(mut self, layout_id: LayoutId) -> Self {
        self.layout_id = Some(layout_id);
        self
    }

    /// Sets the structural removal.
    pub fn with_removal(mut self, index: usize, count: usize) -> Self {
        self.removed = Some(RemovedRange { index, count });
        self
    }

    /// Sets the structural insertion.
    pub fn with_addition(mut self, index: usize, mementos: Vec<Memento>) -> Self {
        self.added = Some(AddedComponents { index, mementos });
        self
    }

    /// Whether applying this increment would change nothing.
    pub fn is_empty(&self) -> bool {
        self.component.is_empty()
            && self.layout_id.is_none()
            && self.removed.is_none_or(|range| range.count == 0)
            && self
                .added
                .as_ref()
                .is_none_or(|added| added.mementos.is_empty())
    }
}

/// An increment for any node of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Increment {
    /// Component-state changes only.
    Component(ComponentIncrement),
    /// Container changes, possibly structural.
    Container(ContainerIncrement),
}

impl Increment {
    /// The component-state part, present in both kinds.
    pub fn component_part(&self) -> &ComponentIncrement {
        match self {
            Self::Component(increment) => increment,
            Self::Container(increment) => &increment.component,
        }
    }

    /// Whether applying this increment would change nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Component(increment) => increment.is_empty(),
            Self::Container(increment) => increment.is_empty(),
        }
    }
}

impl From<ComponentIncrement> for Increment {
    fn from(increment: ComponentIncrement) -> Self {
        Self::Component(increment)
    }
}

impl From<ContainerIncrement> for Increment {
    fn from(increment: ContainerIncrement) -> Self {
        Self::Container(increment)
    }
}
