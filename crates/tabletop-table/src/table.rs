//! The shared table and its data lock.

use std::cell::{Ref, RefCell, RefMut};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::component::{Container, TableObject};
use crate::memento::{Memento, MementoError};
use crate::registry::Registries;

const TABLETOP_ATTR: &str = "tabletop";

/// A shared tabletop. The root node is always a container.
///
/// All content access goes through [`Table::lock`]. The lock is re-entrant,
/// so code already holding it (a listener reacting to a patch, say) may lock
/// again on the same thread; the usual `RefCell` rules still forbid
/// overlapping mutable borrows.
pub struct Table {
    tabletop: ReentrantMutex<RefCell<TableObject>>,
}

impl Table {
    /// Creates a table around `tabletop`.
    pub fn new(tabletop: Container) -> Self {
        Self {
            tabletop: ReentrantMutex::new(RefCell::new(TableObject::Container(tabletop))),
        }
    }

    /// Acquires the table's data lock.
    pub fn lock(&self) -> TableLock<'_> {
        TableLock {
            guard: self.tabletop.lock(),
        }
    }

    /// Captures the whole table.
    pub fn create_memento(&self) -> Memento {
        let lock = self.lock();
        Memento::new().with(TABLETOP_ATTR, lock.tabletop().create_memento())
    }

    /// Decodes a table memento without touching any live table.
    pub fn decode_memento(
        memento: &Memento,
        registries: &Registries,
    ) -> Result<Container, MementoError> {
        let tabletop = memento.map(TABLETOP_ATTR)?;
        Container::from_memento(tabletop, registries)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lock = self.lock();
        f.debug_struct("Table")
            .field("tabletop", &*lock.tabletop())
            .finish()
    }
}

/// Guard proving the table's data lock is held.
pub struct TableLock<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<TableObject>>,
}

impl TableLock<'_> {
    /// Shared access to the root node.
    pub fn tabletop(&self) -> Ref<'_, TableObject> {
        self.guard.borrow()
    }

    /// Exclusive access to the root node.
    pub fn tabletop_mut(&self) -> RefMut<'_, TableObject> {
        self.guard.borrow_mut()
    }

    /// Number of children directly on the tabletop.
    pub fn component_count(&self) -> usize {
        self.tabletop()
            .as_container()
            .map_or(0, Container::component_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::test_support::*;
    use crate::geometry::Point;
    use std::sync::Arc;

    fn tabletop_with_pile() -> Container {
        let mut tabletop = Container::new(&tabletop_strategy(), absolute());
        tabletop.add_component(pile(3));
        tabletop
    }

    #[test]
    fn test_lock_is_reentrant() {
        let table = Table::new(tabletop_with_pile());
        let outer = table.lock();
        let inner = table.lock();
        assert_eq!(outer.component_count(), inner.component_count());
    }

    #[test]
    fn test_table_memento_reconstructs() {
        let registries = registries();
        let table = Table::new(tabletop_with_pile());
        let memento = table.create_memento();
        let decoded = Table::decode_memento(&memento, &registries).unwrap();
        assert_eq!(TableObject::from(decoded), *table.lock().tabletop());
    }

    #[test]
    fn test_lock_excludes_other_threads() {
        let table = Arc::new(Table::new(tabletop_with_pile()));
        let lock = table.lock();
        lock.tabletop_mut().set_location(Point::new(1, 1));

        let other = Arc::clone(&table);
        let handle = std::thread::spawn(move || other.lock().tabletop().location());

        std::thread::sleep(std::time::Duration::from_millis(20));
        lock.tabletop_mut().set_location(Point::new(2, 2));
        drop(lock);

        assert_eq!(handle.join().unwrap(), Point::new(2, 2));
    }
}
