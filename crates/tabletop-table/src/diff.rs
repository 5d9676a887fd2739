//! Producing increments from two states of the same tree.
//!
//! Nodes publish local edits by snapshotting the affected subtree before the
//! edit, diffing it against the state afterwards, and sending the resulting
//! `(path, increment)` pairs. Applying the pairs in order to a peer holding
//! the "before" state yields the "after" state.

use crate::component::{Component, ComponentPath, Container, TableObject};
use crate::increment::{ComponentIncrement, ContainerIncrement, Increment};
use crate::memento::{MAX_NESTING_DEPTH, Memento, MementoValue};

const LOCATION_ATTR: &str = "location";
const CHILDREN_ATTR: &str = "children";

/// The component-state changes turning `old` into `new`.
///
/// Increments cannot clear a field, so a surface design present in `old`
/// but absent from `new` is not reflected.
pub fn component_increment(old: &Component, new: &Component) -> ComponentIncrement {
    let mut increment = ComponentIncrement::new();
    if old.location() != new.location() {
        increment.location = Some(new.location());
    }
    if old.orientation() != new.orientation() {
        increment.orientation = Some(new.orientation().clone());
    }
    for (orientation, design) in new.surface_designs() {
        if old.surface_design(orientation) != Some(design) {
            increment = increment.with_surface_design(orientation.clone(), design.id.clone());
        }
    }
    increment
}

/// The changes turning `old` into `new` at the container level only.
///
/// The structural part treats children as opaque: the common prefix and
/// suffix of the child lists are kept, and everything between them is
/// replaced. Under a layout that derives child locations, children
/// differing only in location count as equal.
pub fn container_increment(old: &Container, new: &Container) -> ContainerIncrement {
    let mut increment =
        ContainerIncrement::new().with_component(component_increment(old.component(), new.component()));
    if old.layout().id != new.layout().id {
        increment.layout_id = Some(new.layout().id.clone());
    }

    let strip = old.layout().derives_child_locations() && new.layout().derives_child_locations();
    let old_keys: Vec<Memento> = old.children().iter().map(|c| structural_key(c, strip)).collect();
    let new_keys: Vec<Memento> = new.children().iter().map(|c| structural_key(c, strip)).collect();
    let (prefix, suffix) = common_ends(&old_keys, &new_keys);

    let removed = old_keys.len() - prefix - suffix;
    if removed > 0 {
        increment = increment.with_removal(prefix, removed);
    }
    let added = &new.children()[prefix..new_keys.len() - suffix];
    if !added.is_empty() {
        increment = increment.with_addition(
            prefix,
            added.iter().map(TableObject::create_memento).collect(),
        );
    }
    increment
}

/// The increment turning node `old` into node `new`, without descending
/// into children.
pub fn increment(old: &TableObject, new: &TableObject) -> Increment {
    match (old, new) {
        (TableObject::Container(old), TableObject::Container(new)) => {
            container_increment(old, new).into()
        }
        _ => component_increment(old.component(), new.component()).into(),
    }
}

/// Every non-empty increment needed to turn the subtree `old` at `path`
/// into `new`, parents before children.
///
/// Child paths refer to the tree after the parent's increment is applied.
/// Where child lists line up one-to-one (same length, same strategies) the
/// diff descends into each child instead of replacing it.
pub fn tree_increments(
    path: &ComponentPath,
    old: &TableObject,
    new: &TableObject,
) -> Vec<(ComponentPath, Increment)> {
    let mut out = Vec::new();
    collect(path, old, new, &mut out);
    out
}

fn collect(
    path: &ComponentPath,
    old: &TableObject,
    new: &TableObject,
    out: &mut Vec<(ComponentPath, Increment)>,
) {
    let (TableObject::Container(old_container), TableObject::Container(new_container)) = (old, new)
    else {
        push_non_empty(out, path, increment(old, new));
        return;
    };

    if children_align(old_container, new_container) {
        let mut own = container_increment(old_container, new_container);
        own.removed = None;
        own.added = None;
        push_non_empty(out, path, own.into());
        for (index, (old_child, new_child)) in old_container
            .children()
            .iter()
            .zip(new_container.children())
            .enumerate()
        {
            collect(&path.child(index), old_child, new_child, out);
        }
    } else {
        push_non_empty(out, path, container_increment(old_container, new_container).into());
    }
}

fn push_non_empty(
    out: &mut Vec<(ComponentPath, Increment)>,
    path: &ComponentPath,
    increment: Increment,
) {
    if !increment.is_empty() {
        out.push((path.clone(), increment));
    }
}

fn children_align(old: &Container, new: &Container) -> bool {
    old.component_count() == new.component_count()
        && old
            .children()
            .iter()
            .zip(new.children())
            .all(|(a, b)| a.strategy_id() == b.strategy_id() && a.is_container() == b.is_container())
}

fn structural_key(child: &TableObject, strip: bool) -> Memento {
    let memento = child.create_memento();
    if strip { strip_locations(memento, 0) } else { memento }
}

/// Drops locations down to [`MAX_NESTING_DEPTH`]; anything nested deeper is
/// compared as is.
fn strip_locations(mut memento: Memento, depth: usize) -> Memento {
    memento.remove(LOCATION_ATTR);
    if depth >= MAX_NESTING_DEPTH {
        return memento;
    }
    if let Some(MementoValue::List(children)) = memento.remove(CHILDREN_ATTR) {
        let stripped = children
            .into_iter()
            .map(|child| match child {
                MementoValue::Map(map) => MementoValue::Map(strip_locations(map, depth + 1)),
                other => other,
            })
            .collect::<Vec<_>>();
        memento.insert(CHILDREN_ATTR, stripped);
    }
    memento
}

fn common_ends(old: &[Memento], new: &[Memento]) -> (usize, usize) {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    (prefix, suffix)
}
