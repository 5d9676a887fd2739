//! Applying incoming increments and whole-table states to a live [`Table`].
//!
//! Patch application is tolerant: anything an increment names that this
//! peer cannot honour (an unknown design id, an unsupported orientation, a
//! child memento that fails to decode) is logged and skipped, and the rest
//! of the increment still applies. The caller gets a [`PatchReport`] listing
//! what was skipped.

use crate::component::{ComponentPath, Container, TableObject};
use crate::geometry::{LayoutId, Orientation, SurfaceDesignId};
use crate::increment::{AddedComponents, ComponentIncrement, ContainerIncrement, Increment, RemovedRange};
use crate::memento::{MAX_NESTING_DEPTH, Memento, MementoError};
use crate::registry::Registries;
use crate::table::Table;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One part of an increment that was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum SkippedChange {
    /// The target does not support the requested orientation.
    UnsupportedOrientation(Orientation),
    /// No surface design is registered under `id`, or the target does not
    /// support `orientation`.
    UnknownSurfaceDesign {
        /// Orientation the design was meant for.
        orientation: Orientation,
        /// Requested design.
        id: SurfaceDesignId,
    },
    /// No layout is registered under the id.
    UnknownLayout(LayoutId),
    /// The removal range does not fit the child list.
    RemovalOutOfBounds(RemovedRange),
    /// The insertion index lies past the end of the child list.
    InsertionOutOfBounds {
        /// Requested index.
        index: usize,
    },
    /// One of the inserted mementos failed to decode.
    InvalidMemento {
        /// Position of the memento in the increment's list.
        index: usize,
        /// Why decoding failed.
        error: MementoError,
    },
    /// A container increment with structural or layout changes targeted a
    /// leaf component.
    StructuralChangeOnComponent,
}

/// Outcome of applying one increment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    /// Whether the path addressed an existing node.
    pub resolved: bool,
    /// Parts of the increment that were skipped.
    pub skipped: Vec<SkippedChange>,
}

impl PatchReport {
    /// Whether the path resolved and every part of the increment applied.
    pub fn is_clean(&self) -> bool {
        self.resolved && self.skipped.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PatchApplier
// ---------------------------------------------------------------------------

/// Applies increments and table states using the injected registries.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    registries: Registries,
}

impl PatchApplier {
    /// Creates an applier resolving ids through `registries`.
    pub fn new(registries: Registries) -> Self {
        Self { registries }
    }

    /// The registries ids are resolved through.
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Applies `increment` to the node at `path`.
    ///
    /// The table's data lock is held for the whole update. A path that does
    /// not resolve leaves the table untouched.
    pub fn increment_component_state(
        &self,
        table: &Table,
        path: &ComponentPath,
        increment: &Increment,
    ) -> PatchReport {
        let lock = table.lock();
        let mut root = lock.tabletop_mut();
        let Some(target) = root.resolve_mut(path) else {
            tracing::debug!("Ignoring increment for unresolved component path {path}");
            return PatchReport::default();
        };

        let mut report = PatchReport {
            resolved: true,
            skipped: Vec::new(),
        };
        self.apply_component(target, increment.component_part(), &mut report);

        if let Increment::Container(container_increment) = increment {
            self.apply_container(target, path, container_increment, &mut report);
        }
        report
    }

    /// Replaces the whole tabletop with the state `memento` describes.
    ///
    /// The memento is decoded in full before the live table is touched, so
    /// a decoding failure leaves the table as it was.
    pub fn set_table_state(&self, table: &Table, memento: &Memento) -> Result<(), MementoError> {
        let tabletop = match Table::decode_memento(memento, &self.registries) {
            Ok(tabletop) => tabletop,
            Err(e) => {
                tracing::error!("Rejected table state: {e}");
                return Err(e);
            }
        };

        let lock = table.lock();
        *lock.tabletop_mut() = TableObject::Container(tabletop);
        tracing::debug!(
            "Table state replaced ({} top-level components)",
            lock.component_count()
        );
        Ok(())
    }

    fn apply_component(
        &self,
        target: &mut TableObject,
        increment: &ComponentIncrement,
        report: &mut PatchReport,
    ) {
        if let Some(location) = increment.location {
            target.set_location(location);
        }

        if let Some(orientation) = &increment.orientation
            && target.set_orientation(orientation.clone()).is_err()
        {
            tracing::error!(
                "Component `{}` does not support orientation `{orientation}`",
                target.strategy_id()
            );
            report
                .skipped
                .push(SkippedChange::UnsupportedOrientation(orientation.clone()));
        }

        let Some(designs) = &increment.surface_designs else {
            return;
        };
        for (orientation, id) in designs {
            let design = self.registries.surface_designs.surface_design(id);
            let applied = match design {
                Some(design) => target.set_surface_design(orientation.clone(), design).is_ok(),
                None => false,
            };
            if !applied {
                tracing::error!(
                    "Cannot apply surface design `{id}` for orientation `{orientation}` on `{}`",
                    target.strategy_id()
                );
                report.skipped.push(SkippedChange::UnknownSurfaceDesign {
                    orientation: orientation.clone(),
                    id: id.clone(),
                });
            }
        }
    }

    fn apply_container(
        &self,
        target: &mut TableObject,
        path: &ComponentPath,
        increment: &ContainerIncrement,
        report: &mut PatchReport,
    ) {
        let Some(container) = target.as_container_mut() else {
            if increment.layout_id.is_some() || increment.removed.is_some() || increment.added.is_some() {
                tracing::error!("Structural increment targets leaf component at {path}");
                report.skipped.push(SkippedChange::StructuralChangeOnComponent);
            }
            return;
        };

        if let Some(layout_id) = &increment.layout_id {
            match self.registries.layouts.layout(layout_id) {
                Some(layout) => container.set_layout(layout),
                None => {
                    tracing::error!("Unknown layout `{layout_id}` for container at {path}");
                    report.skipped.push(SkippedChange::UnknownLayout(layout_id.clone()));
                }
            }
        }

        if let Some(range) = increment.removed
            && range.count > 0
        {
            if range.index == 0 && range.count == container.component_count() {
                container.remove_all_components();
            } else if let Err(e) = container.remove_components(range.index, range.count) {
                tracing::error!("Skipping removal at {path}: {e}");
                report.skipped.push(SkippedChange::RemovalOutOfBounds(range));
            }
        }

        if let Some(added) = &increment.added {
            self.insert_children(container, path, added, report);
        }
    }

    fn insert_children(
        &self,
        container: &mut Container,
        path: &ComponentPath,
        added: &AddedComponents,
        report: &mut PatchReport,
    ) {
        if added.mementos.is_empty() {
            return;
        }
        if added.index > container.component_count() {
            tracing::error!(
                "Skipping insertion at {path}: index {} exceeds component count {}",
                added.index,
                container.component_count()
            );
            report.skipped.push(SkippedChange::InsertionOutOfBounds { index: added.index });
            return;
        }

        let mut children = Vec::with_capacity(added.mementos.len());
        for (index, memento) in added.mementos.iter().enumerate() {
            let depth = path.indices().len() + 1;
            match TableObject::from_memento_at_depth(memento, &self.registries, depth) {
                Ok(child) => children.push(child),
                Err(error) => {
                    tracing::error!("Skipping invalid component memento {index} at {path}: {error}");
                    report.skipped.push(SkippedChange::InvalidMemento { index, error });
                }
            }
        }
        if let Err(e) = container.add_components(added.index, children) {
            tracing::error!("Skipping insertion at {path}: {e}");
            report.skipped.push(SkippedChange::InsertionOutOfBounds { index: added.index });
        }
    }
}
