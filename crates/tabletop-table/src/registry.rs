//! Identifier-addressed lookup services consulted while building or patching
//! the tabletop.
//!
//! Component strategies, surface designs and container layouts are
//! registered externally. The table only ever resolves them by id, and every
//! lookup answers `None` for an unknown id instead of failing, so callers can
//! decide whether a missing resource is fatal (decoding a memento) or merely
//! skipped (applying a patch).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::{LayoutId, Orientation, Point, StrategyId, SurfaceDesignId};

// ---------------------------------------------------------------------------
// Registered resources
// ---------------------------------------------------------------------------

/// Whether a strategy produces leaf components or containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// A leaf component such as a card.
    Component,
    /// A container such as a card pile.
    Container,
}

/// Describes one kind of component: its supported orientations and the
/// defaults new instances start with.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStrategy {
    /// Registered identifier.
    pub id: StrategyId,
    /// Leaf or container.
    pub kind: StrategyKind,
    /// Orientations components of this strategy may take. Never empty.
    pub supported_orientations: Vec<Orientation>,
    /// Orientation of a freshly created component.
    pub default_orientation: Orientation,
    /// Layout of a freshly created container. Ignored for leaves.
    pub default_layout: Option<LayoutId>,
}

impl ComponentStrategy {
    /// Returns whether `orientation` is one this strategy supports.
    pub fn supports(&self, orientation: &Orientation) -> bool {
        self.supported_orientations.contains(orientation)
    }
}

/// A visual design for one surface of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceDesign {
    /// Registered identifier.
    pub id: SurfaceDesignId,
    /// Width in table units.
    pub width: u32,
    /// Height in table units.
    pub height: u32,
}

/// How a layout arranges children relative to their container's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// Children keep whatever location they are given.
    Absolute,
    /// Every child sits exactly on the container's location.
    Stacked,
    /// Child `i` sits at the container location offset by `i * (dx, dy)`.
    Spread {
        /// Horizontal offset between consecutive children.
        dx: i32,
        /// Vertical offset between consecutive children.
        dy: i32,
    },
}

/// A registered arrangement strategy for container children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Registered identifier.
    pub id: LayoutId,
    /// Arrangement rule.
    pub kind: LayoutKind,
}

impl ContainerLayout {
    /// Location of the child at `index` for a container at `origin`, or
    /// `None` when the layout leaves child locations alone.
    pub fn child_location(&self, origin: Point, index: usize) -> Option<Point> {
        match self.kind {
            LayoutKind::Absolute => None,
            LayoutKind::Stacked => Some(origin),
            LayoutKind::Spread { dx, dy } => {
                let step = i32::try_from(index).unwrap_or(i32::MAX);
                Some(origin.translate(dx.saturating_mul(step), dy.saturating_mul(step)))
            }
        }
    }

    /// Whether child locations are derived from the container's location.
    pub fn derives_child_locations(&self) -> bool {
        !matches!(self.kind, LayoutKind::Absolute)
    }
}

// ---------------------------------------------------------------------------
// Lookup traits
// ---------------------------------------------------------------------------

/// Resolves component strategies by id.
pub trait ComponentStrategyRegistry: Send + Sync {
    /// The strategy registered under `id`, if any.
    fn strategy(&self, id: &StrategyId) -> Option<ComponentStrategy>;
}

/// Resolves surface designs by id.
pub trait SurfaceDesignRegistry: Send + Sync {
    /// The design registered under `id`, if any.
    fn surface_design(&self, id: &SurfaceDesignId) -> Option<SurfaceDesign>;
}

/// Resolves container layouts by id.
pub trait LayoutRegistry: Send + Sync {
    /// The layout registered under `id`, if any.
    fn layout(&self, id: &LayoutId) -> Option<ContainerLayout>;
}

// ---------------------------------------------------------------------------
// InMemoryRegistry
// ---------------------------------------------------------------------------

/// A registry backed by hash maps, implementing all three lookup traits.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    strategies: HashMap<StrategyId, ComponentStrategy>,
    surface_designs: HashMap<SurfaceDesignId, SurfaceDesign>,
    layouts: HashMap<LayoutId, ContainerLayout>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a component strategy.
    pub fn register_strategy(&mut self, strategy: ComponentStrategy) -> &mut Self {
        self.strategies.insert(strategy.id.clone(), strategy);
        self
    }

    /// Registers (or replaces) a surface design.
    pub fn register_surface_design(&mut self, design: SurfaceDesign) -> &mut Self {
        self.surface_designs.insert(design.id.clone(), design);
        self
    }

    /// Registers (or replaces) a container layout.
    pub fn register_layout(&mut self, layout: ContainerLayout) -> &mut Self {
        self.layouts.insert(layout.id.clone(), layout);
        self
    }
}

impl ComponentStrategyRegistry for InMemoryRegistry {
    fn strategy(&self, id: &StrategyId) -> Option<ComponentStrategy> {
        self.strategies.get(id).cloned()
    }
}

impl SurfaceDesignRegistry for InMemoryRegistry {
    fn surface_design(&self, id: &SurfaceDesignId) -> Option<SurfaceDesign> {
        self.surface_designs.get(id).cloned()
    }
}

impl LayoutRegistry for InMemoryRegistry {
    fn layout(&self, id: &LayoutId) -> Option<ContainerLayout> {
        self.layouts.get(id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Registries bundle
// ---------------------------------------------------------------------------

/// The lookup services injected into patch application and memento decoding.
#[derive(Clone)]
pub struct Registries {
    /// Component strategy lookup.
    pub strategies: Arc<dyn ComponentStrategyRegistry>,
    /// Surface design lookup.
    pub surface_designs: Arc<dyn SurfaceDesignRegistry>,
    /// Container layout lookup.
    pub layouts: Arc<dyn LayoutRegistry>,
}

impl Registries {
    /// Bundles three independent lookup services.
    pub fn new(
        strategies: Arc<dyn ComponentStrategyRegistry>,
        surface_designs: Arc<dyn SurfaceDesignRegistry>,
        layouts: Arc<dyn LayoutRegistry>,
    ) -> Self {
        Self {
            strategies,
            surface_designs,
            layouts,
        }
    }

    /// Uses one in-memory registry for all three lookups.
    pub fn from_in_memory(registry: InMemoryRegistry) -> Self {
        let shared = Arc::new(registry);
        Self {
            strategies: shared.clone(),
            surface_designs: shared.clone(),
            layouts: shared,
        }
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_ids_resolve_to_none() {
        let registry = InMemoryRegistry::new();
        assert!(registry.strategy(&StrategyId::from("card")).is_none());
        assert!(registry.surface_design(&SurfaceDesignId::from("red")).is_none());
        assert!(registry.layout(&LayoutId::from("stacked")).is_none());
    }

    #[test]
    fn test_registered_design_resolves() {
        let mut registry = InMemoryRegistry::new();
        registry.register_surface_design(SurfaceDesign {
            id: SurfaceDesignId::from("red"),
            width: 70,
            height: 100,
        });
        let registries = Registries::from_in_memory(registry);
        let design = registries
            .surface_designs
            .surface_design(&SurfaceDesignId::from("red"))
            .unwrap();
        assert_eq!(design.width, 70);
    }

    #[test]
    fn test_spread_layout_offsets_children() {
        let layout = ContainerLayout {
            id: LayoutId::from("fan"),
            kind: LayoutKind::Spread { dx: 10, dy: 2 },
        };
        let origin = Point::new(100, 100);
        assert_eq!(layout.child_location(origin, 0), Some(origin));
        assert_eq!(layout.child_location(origin, 3), Some(Point::new(130, 106)));
    }

    #[test]
    fn test_stacked_layout_keeps_origin() {
        let layout = ContainerLayout {
            id: LayoutId::from("stacked"),
            kind: LayoutKind::Stacked,
        };
        assert_eq!(layout.child_location(Point::new(5, 5), 9), Some(Point::new(5, 5)));
    }

    #[test]
    fn test_absolute_layout_leaves_children_alone() {
        let layout = ContainerLayout {
            id: LayoutId::from("absolute"),
            kind: LayoutKind::Absolute,
        };
        assert_eq!(layout.child_location(Point::new(5, 5), 0), None);
        assert!(!layout.derives_child_locations());
    }
}
