//! The shared tabletop: a tree of components and containers, its memento
//! format, the lookup registries it resolves identifiers against, and the
//! tree-patch model used to replicate it incrementally between peers.
//!
//! The table guards its content with its own re-entrant data lock, which is
//! independent of any node layer. [`PatchApplier`] takes that lock for the
//! duration of one patch so local edits never interleave with a partially
//! applied remote change.

pub mod applier;
pub mod component;
pub mod diff;
pub mod geometry;
pub mod increment;
pub mod memento;
pub mod registry;
pub mod table;

pub use applier::{PatchApplier, PatchReport, SkippedChange};
pub use component::{Component, ComponentError, ComponentPath, Container, TableObject};
pub use geometry::{LayoutId, Orientation, Point, StrategyId, SurfaceDesignId};
pub use increment::{
    AddedComponents, ComponentIncrement, ContainerIncrement, Increment, RemovedRange,
};
pub use memento::{MAX_NESTING_DEPTH, Memento, MementoError, MementoValue};
pub use registry::{
    ComponentStrategy, ComponentStrategyRegistry, ContainerLayout, InMemoryRegistry, LayoutKind,
    LayoutRegistry, Registries, StrategyKind, SurfaceDesign, SurfaceDesignRegistry,
};
pub use table::{Table, TableLock};
