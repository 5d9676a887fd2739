//! The component tree: leaf components, containers holding ordered children,
//! and paths addressing a node from the tabletop root.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{LayoutId, Orientation, Point, StrategyId, SurfaceDesignId};
use crate::memento::{MAX_NESTING_DEPTH, Memento, MementoError, MementoValue};
use crate::registry::{
    ComponentStrategy, ContainerLayout, LayoutRegistry, Registries, StrategyKind, SurfaceDesign,
};

/// Memento attribute names.
mod attr {
    pub const STRATEGY: &str = "strategy";
    pub const LOCATION: &str = "location";
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const ORIENTATION: &str = "orientation";
    pub const SURFACE_DESIGNS: &str = "surface_designs";
    pub const LAYOUT: &str = "layout";
    pub const CHILDREN: &str = "children";
}

/// Errors raised by direct edits of the component tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// The orientation is outside the component's supported set.
    #[error("orientation `{0}` is not supported by this component")]
    UnsupportedOrientation(Orientation),

    /// An insertion index lies past the end of the child list.
    #[error("insertion index {index} exceeds component count {count}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Current child count.
        count: usize,
    },

    /// A removal range does not lie within the child list.
    #[error("removal of {count} components at index {index} exceeds component count {len}")]
    RangeOutOfBounds {
        /// First index to remove.
        index: usize,
        /// Number of children to remove.
        count: usize,
        /// Current child count.
        len: usize,
    },
}

// ---------------------------------------------------------------------------
// ComponentPath
// ---------------------------------------------------------------------------

/// Ordered child indices leading from the tabletop root to one node. The
/// empty path addresses the tabletop itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentPath(Vec<usize>);

impl ComponentPath {
    /// The path of the tabletop itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// A path from explicit indices.
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// The path of this node's child at `index`.
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// The indices from the root.
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Whether this path addresses the tabletop.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for ComponentPath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for ComponentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A leaf on the tabletop, such as a card.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    strategy_id: StrategyId,
    location: Point,
    orientation: Orientation,
    supported_orientations: Vec<Orientation>,
    surface_designs: BTreeMap<Orientation, SurfaceDesign>,
}

impl Component {
    /// Creates a component at the origin in the strategy's default
    /// orientation, with no surface designs.
    pub fn new(strategy: &ComponentStrategy) -> Self {
        Self {
            strategy_id: strategy.id.clone(),
            location: Point::ORIGIN,
            orientation: strategy.default_orientation.clone(),
            supported_orientations: strategy.supported_orientations.clone(),
            surface_designs: BTreeMap::new(),
        }
    }

    /// Builder-style surface design assignment.
    pub fn with_surface_design(
        mut self,
        orientation: Orientation,
        design: SurfaceDesign,
    ) -> Result<Self, ComponentError> {
        self.set_surface_design(orientation, design)?;
        Ok(self)
    }

    /// The strategy this component was created from.
    pub fn strategy_id(&self) -> &StrategyId {
        &self.strategy_id
    }

    /// Current location.
    pub fn location(&self) -> Point {
        self.location
    }

    /// Moves the component.
    pub fn set_location(&mut self, location: Point) {
        self.location = location;
    }

    /// Current orientation.
    pub fn orientation(&self) -> &Orientation {
        &self.orientation
    }

    /// Orientations this component may take.
    pub fn supported_orientations(&self) -> &[Orientation] {
        &self.supported_orientations
    }

    /// Whether `orientation` is in the supported set.
    pub fn supports(&self, orientation: &Orientation) -> bool {
        self.supported_orientations.contains(orientation)
    }

    /// Changes the orientation.
    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), ComponentError> {
        if !self.supports(&orientation) {
            return Err(ComponentError::UnsupportedOrientation(orientation));
        }
        self.orientation = orientation;
        Ok(())
    }

    /// The design shown for `orientation`, if one is assigned.
    pub fn surface_design(&self, orientation: &Orientation) -> Option<&SurfaceDesign> {
        self.surface_designs.get(orientation)
    }

    /// All assigned surface designs.
    pub fn surface_designs(&self) -> &BTreeMap<Orientation, SurfaceDesign> {
        &self.surface_designs
    }

    /// Assigns the design shown for `orientation`.
    pub fn set_surface_design(
        &mut self,
        orientation: Orientation,
        design: SurfaceDesign,
    ) -> Result<(), ComponentError> {
        if !self.supports(&orientation) {
            return Err(ComponentError::UnsupportedOrientation(orientation));
        }
        self.surface_designs.insert(orientation, design);
        Ok(())
    }

    /// Captures this component's state.
    pub fn create_memento(&self) -> Memento {
        let mut memento = Memento::new();
        self.write_core(&mut memento);
        memento
    }

    /// Reconstructs a leaf component from a memento.
    pub fn from_memento(memento: &Memento, registries: &Registries) -> Result<Self, MementoError> {
        decode_core(memento, registries, StrategyKind::Component).map(|(core, _)| core)
    }

    fn write_core(&self, memento: &mut Memento) {
        memento.insert(attr::STRATEGY, self.strategy_id.as_str());
        memento.insert(
            attr::LOCATION,
            Memento::new()
                .with(attr::X, self.location.x)
                .with(attr::Y, self.location.y),
        );
        memento.insert(attr::ORIENTATION, self.orientation.as_str());

        let mut designs = Memento::new();
        for (orientation, design) in &self.surface_designs {
            designs.insert(orientation.as_str(), design.id.as_str());
        }
        memento.insert(attr::SURFACE_DESIGNS, designs);
    }
}

fn decode_core(
    memento: &Memento,
    registries: &Registries,
    expected: StrategyKind,
) -> Result<(Component, ComponentStrategy), MementoError> {
    let strategy_id = StrategyId::new(memento.text(attr::STRATEGY)?);
    let strategy = registries
        .strategies
        .strategy(&strategy_id)
        .ok_or_else(|| MementoError::UnknownStrategy(strategy_id.clone()))?;
    if strategy.kind != expected {
        return Err(MementoError::KindMismatch(strategy_id));
    }

    let location = memento.map(attr::LOCATION)?;
    let location = Point::new(location.integer_i32(attr::X)?, location.integer_i32(attr::Y)?);

    let orientation = Orientation::new(memento.text(attr::ORIENTATION)?);
    if !strategy.supports(&orientation) {
        return Err(MementoError::UnsupportedOrientation {
            strategy: strategy_id,
            orientation,
        });
    }

    let mut surface_designs = BTreeMap::new();
    for (name, value) in memento.map(attr::SURFACE_DESIGNS)?.iter() {
        let MementoValue::Text(id) = value else {
            return Err(MementoError::InvalidAttribute {
                name: format!("{}.{name}", attr::SURFACE_DESIGNS),
                expected: "surface design id",
            });
        };
        let design_orientation = Orientation::new(name);
        if !strategy.supports(&design_orientation) {
            return Err(MementoError::UnsupportedOrientation {
                strategy: strategy_id,
                orientation: design_orientation,
            });
        }
        let id = SurfaceDesignId::new(id.as_str());
        let design = registries
            .surface_designs
            .surface_design(&id)
            .ok_or(MementoError::UnknownSurfaceDesign(id))?;
        surface_designs.insert(design_orientation, design);
    }

    let core = Component {
        strategy_id,
        location,
        orientation,
        supported_orientations: strategy.supported_orientations.clone(),
        surface_designs,
    };
    Ok((core, strategy))
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// A component that holds an ordered list of children, arranged by a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    core: Component,
    layout: ContainerLayout,
    children: Vec<TableObject>,
}

impl Container {
    /// Creates an empty container from a container strategy.
    pub fn new(strategy: &ComponentStrategy, layout: ContainerLayout) -> Self {
        Self {
            core: Component::new(strategy),
            layout,
            children: Vec::new(),
        }
    }

    /// Creates an empty container laid out by its strategy's default layout.
    ///
    /// Returns `None` if the strategy names no default layout or `layouts`
    /// does not know it.
    pub fn from_strategy(
        strategy: &ComponentStrategy,
        layouts: &dyn LayoutRegistry,
    ) -> Option<Self> {
        let layout = layouts.layout(strategy.default_layout.as_ref()?)?;
        Some(Self::new(strategy, layout))
    }

    /// The container's own component state.
    pub fn component(&self) -> &Component {
        &self.core
    }

    /// Current location.
    pub fn location(&self) -> Point {
        self.core.location
    }

    /// Moves the container, carrying its children along.
    pub fn set_location(&mut self, location: Point) {
        let dx = location.x.saturating_sub(self.core.location.x);
        let dy = location.y.saturating_sub(self.core.location.y);
        self.core.location = location;
        for child in &mut self.children {
            child.translate(dx, dy);
        }
    }

    /// Changes the container's own orientation.
    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), ComponentError> {
        self.core.set_orientation(orientation)
    }

    /// Assigns the container's own design for `orientation`.
    pub fn set_surface_design(
        &mut self,
        orientation: Orientation,
        design: SurfaceDesign,
    ) -> Result<(), ComponentError> {
        self.core.set_surface_design(orientation, design)
    }

    /// The layout arranging the children.
    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    /// Replaces the layout and re-arranges the children.
    pub fn set_layout(&mut self, layout: ContainerLayout) {
        self.layout = layout;
        self.arrange();
    }

    /// Children in order.
    pub fn children(&self) -> &[TableObject] {
        &self.children
    }

    /// The child at `index`.
    pub fn child(&self, index: usize) -> Option<&TableObject> {
        self.children.get(index)
    }

    /// Mutable access to the child at `index`.
    pub fn child_mut(&mut self, index: usize) -> Option<&mut TableObject> {
        self.children.get_mut(index)
    }

    /// Number of direct children.
    pub fn component_count(&self) -> usize {
        self.children.len()
    }

    /// Appends a child.
    pub fn add_component(&mut self, child: impl Into<TableObject>) {
        self.children.push(child.into());
        self.arrange();
    }

    /// Inserts `children` so the first one lands at `index`.
    pub fn add_components(
        &mut self,
        index: usize,
        children: Vec<TableObject>,
    ) -> Result<(), ComponentError> {
        if index > self.children.len() {
            return Err(ComponentError::IndexOutOfBounds {
                index,
                count: self.children.len(),
            });
        }
        self.children.splice(index..index, children);
        self.arrange();
        Ok(())
    }

    /// Removes `count` children starting at `index` and returns them.
    pub fn remove_components(
        &mut self,
        index: usize,
        count: usize,
    ) -> Result<Vec<TableObject>, ComponentError> {
        let len = self.children.len();
        let end = index.checked_add(count).filter(|end| *end <= len);
        let Some(end) = end else {
            return Err(ComponentError::RangeOutOfBounds { index, count, len });
        };
        let removed = self.children.drain(index..end).collect();
        self.arrange();
        Ok(removed)
    }

    /// Removes every child and returns them.
    pub fn remove_all_components(&mut self) -> Vec<TableObject> {
        std::mem::take(&mut self.children)
    }

    /// Captures the container and its whole subtree.
    pub fn create_memento(&self) -> Memento {
        let mut memento = Memento::new();
        self.core.write_core(&mut memento);
        memento.insert(attr::LAYOUT, self.layout.id.as_str());
        let children = self
            .children
            .iter()
            .map(|child| MementoValue::Map(child.create_memento()))
            .collect::<Vec<_>>();
        memento.insert(attr::CHILDREN, children);
        memento
    }

    /// Reconstructs a container and its subtree from a memento.
    pub fn from_memento(memento: &Memento, registries: &Registries) -> Result<Self, MementoError> {
        Self::decode(memento, registries, 0)
    }

    fn decode(memento: &Memento, registries: &Registries, depth: usize) -> Result<Self, MementoError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(MementoError::TooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        let (core, _) = decode_core(memento, registries, StrategyKind::Container)?;

        let layout_id = LayoutId::new(memento.text(attr::LAYOUT)?);
        let layout = registries
            .layouts
            .layout(&layout_id)
            .ok_or(MementoError::UnknownLayout(layout_id))?;

        let mut children = Vec::new();
        for value in memento.list(attr::CHILDREN)? {
            let MementoValue::Map(child) = value else {
                return Err(MementoError::InvalidAttribute {
                    name: attr::CHILDREN.to_string(),
                    expected: "list of nested mementos",
                });
            };
            children.push(TableObject::decode(child, registries, depth + 1)?);
        }

        let mut container = Self {
            core,
            layout,
            children,
        };
        container.arrange();
        Ok(container)
    }

    fn arrange(&mut self) {
        let origin = self.core.location;
        for (index, child) in self.children.iter_mut().enumerate() {
            if let Some(location) = self.layout.child_location(origin, index) {
                child.set_location(location);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TableObject
// ---------------------------------------------------------------------------

/// Any node of the component tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TableObject {
    /// A leaf component.
    Component(Component),
    /// A container with children.
    Container(Container),
}

impl TableObject {
    /// The node's own component state.
    pub fn component(&self) -> &Component {
        match self {
            Self::Component(component) => component,
            Self::Container(container) => &container.core,
        }
    }

    /// The strategy this node was created from.
    pub fn strategy_id(&self) -> &StrategyId {
        self.component().strategy_id()
    }

    /// Current location.
    pub fn location(&self) -> Point {
        self.component().location()
    }

    /// Moves the node. Containers carry their children along.
    pub fn set_location(&mut self, location: Point) {
        match self {
            Self::Component(component) => component.set_location(location),
            Self::Container(container) => container.set_location(location),
        }
    }

    fn translate(&mut self, dx: i32, dy: i32) {
        let location = self.location().translate(dx, dy);
        self.set_location(location);
    }

    /// Current orientation.
    pub fn orientation(&self) -> &Orientation {
        self.component().orientation()
    }

    /// Changes the orientation.
    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), ComponentError> {
        match self {
            Self::Component(component) => component.set_orientation(orientation),
            Self::Container(container) => container.set_orientation(orientation),
        }
    }

    /// Assigns the design shown for `orientation`.
    pub fn set_surface_design(
        &mut self,
        orientation: Orientation,
        design: SurfaceDesign,
    ) -> Result<(), ComponentError> {
        match self {
            Self::Component(component) => component.set_surface_design(orientation, design),
            Self::Container(container) => container.set_surface_design(orientation, design),
        }
    }

    /// Whether the node is a container.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }

    /// The node as a container, if it is one.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Self::Container(container) => Some(container),
            Self::Component(_) => None,
        }
    }

    /// The node as a mutable container, if it is one.
    pub fn as_container_mut(&mut self) -> Option<&mut Container> {
        match self {
            Self::Container(container) => Some(container),
            Self::Component(_) => None,
        }
    }

    /// Follows `path` down from this node.
    pub fn resolve(&self, path: &ComponentPath) -> Option<&TableObject> {
        let mut current = self;
        for &index in path.indices() {
            current = current.as_container()?.child(index)?;
        }
        Some(current)
    }

    /// Follows `path` down from this node, mutably.
    pub fn resolve_mut(&mut self, path: &ComponentPath) -> Option<&mut TableObject> {
        let mut current = self;
        for &index in path.indices() {
            current = current.as_container_mut()?.child_mut(index)?;
        }
        Some(current)
    }

    /// Captures this node and, for containers, its subtree.
    pub fn create_memento(&self) -> Memento {
        match self {
            Self::Component(component) => component.create_memento(),
            Self::Container(container) => container.create_memento(),
        }
    }

    /// Reconstructs a node of whichever kind the memento's strategy names.
    pub fn from_memento(memento: &Memento, registries: &Registries) -> Result<Self, MementoError> {
        Self::decode(memento, registries, 0)
    }

    /// Like [`TableObject::from_memento`], for a node that will sit `depth`
    /// levels below the tabletop root. Fails with [`MementoError::TooDeep`]
    /// if its subtree would reach past [`MAX_NESTING_DEPTH`].
    pub fn from_memento_at_depth(
        memento: &Memento,
        registries: &Registries,
        depth: usize,
    ) -> Result<Self, MementoError> {
        Self::decode(memento, registries, depth)
    }

    fn decode(memento: &Memento, registries: &Registries, depth: usize) -> Result<Self, MementoError> {
        let strategy_id = StrategyId::new(memento.text(attr::STRATEGY)?);
        let strategy = registries
            .strategies
            .strategy(&strategy_id)
            .ok_or(MementoError::UnknownStrategy(strategy_id))?;
        match strategy.kind {
            StrategyKind::Component => Component::from_memento(memento, registries).map(Self::from),
            StrategyKind::Container => Container::decode(memento, registries, depth).map(Self::from),
        }
    }
}

impl From<Component> for TableObject {
    fn from(component: Component) -> Self {
        Self::Component(component)
    }
}

impl From<Container> for TableObject {
    fn from(container: Container) -> Self {
        Self::Container(container)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Registries and builders shared by the crate's tests.

    use super::*;
    use crate::registry::{InMemoryRegistry, LayoutKind};

    pub fn card_strategy() -> ComponentStrategy {
        ComponentStrategy {
            id: StrategyId::from("card"),
            kind: StrategyKind::Component,
            supported_orientations: vec![Orientation::from("back"), Orientation::from("face")],
            default_orientation: Orientation::from("back"),
            default_layout: None,
        }
    }

    pub fn pile_strategy() -> ComponentStrategy {
        ComponentStrategy {
            id: StrategyId::from("card-pile"),
            kind: StrategyKind::Container,
            supported_orientations: vec![Orientation::from("default")],
            default_orientation: Orientation::from("default"),
            default_layout: Some(LayoutId::from("stacked")),
        }
    }

    pub fn tabletop_strategy() -> ComponentStrategy {
        ComponentStrategy {
            id: StrategyId::from("tabletop"),
            kind: StrategyKind::Container,
            supported_orientations: vec![Orientation::from("default")],
            default_orientation: Orientation::from("default"),
            default_layout: Some(LayoutId::from("absolute")),
        }
    }

    pub fn absolute() -> ContainerLayout {
        ContainerLayout {
            id: LayoutId::from("absolute"),
            kind: LayoutKind::Absolute,
        }
    }

    pub fn stacked() -> ContainerLayout {
        ContainerLayout {
            id: LayoutId::from("stacked"),
            kind: LayoutKind::Stacked,
        }
    }

    pub fn fanned() -> ContainerLayout {
        ContainerLayout {
            id: LayoutId::from("fanned"),
            kind: LayoutKind::Spread { dx: 20, dy: 0 },
        }
    }

    pub fn design(id: &str) -> SurfaceDesign {
        SurfaceDesign {
            id: SurfaceDesignId::from(id),
            width: 70,
            height: 100,
        }
    }

    pub fn registries() -> Registries {
        let mut registry = InMemoryRegistry::new();
        registry
            .register_strategy(card_strategy())
            .register_strategy(pile_strategy())
            .register_strategy(tabletop_strategy())
            .register_layout(stacked())
            .register_layout(fanned())
            .register_layout(absolute())
            .register_surface_design(design("red-back"))
            .register_surface_design(design("blue-back"))
            .register_surface_design(design("ace-of-spades"));
        Registries::from_in_memory(registry)
    }

    pub fn card() -> Component {
        Component::new(&card_strategy())
    }

    pub fn card_with_back(design_id: &str) -> Component {
        card()
            .with_surface_design(Orientation::from("back"), design(design_id))
            .unwrap()
    }

    pub fn pile(cards: usize) -> Container {
        let mut pile = Container::new(&pile_strategy(), stacked());
        for _ in 0..cards {
            pile.add_component(card());
        }
        pile
    }
}
