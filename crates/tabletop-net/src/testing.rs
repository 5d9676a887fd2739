//! Registries, tables and event helpers shared by the crate's tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tabletop_table::{
    Component, ComponentStrategy, Container, ContainerLayout, InMemoryRegistry, LayoutId,
    LayoutKind, Orientation, Registries, StrategyId, StrategyKind, Table,
};

use crate::node::NodeEvent;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn card_strategy() -> ComponentStrategy {
    ComponentStrategy {
        id: StrategyId::from("card"),
        kind: StrategyKind::Component,
        supported_orientations: vec![Orientation::from("back"), Orientation::from("face")],
        default_orientation: Orientation::from("back"),
        default_layout: None,
    }
}

fn container_strategy(id: &str, layout: &str) -> ComponentStrategy {
    ComponentStrategy {
        id: StrategyId::from(id),
        kind: StrategyKind::Container,
        supported_orientations: vec![Orientation::from("default")],
        default_orientation: Orientation::from("default"),
        default_layout: Some(LayoutId::from(layout)),
    }
}

fn absolute() -> ContainerLayout {
    ContainerLayout {
        id: LayoutId::from("absolute"),
        kind: LayoutKind::Absolute,
    }
}

fn stacked() -> ContainerLayout {
    ContainerLayout {
        id: LayoutId::from("stacked"),
        kind: LayoutKind::Stacked,
    }
}

pub fn registries() -> Registries {
    let mut registry = InMemoryRegistry::new();
    registry
        .register_strategy(card_strategy())
        .register_strategy(container_strategy("card-pile", "stacked"))
        .register_strategy(container_strategy("tabletop", "absolute"))
        .register_layout(absolute())
        .register_layout(stacked());
    Registries::from_in_memory(registry)
}

/// An empty tabletop.
pub fn empty_table() -> Arc<Table> {
    Arc::new(Table::new(Container::new(
        &container_strategy("tabletop", "absolute"),
        absolute(),
    )))
}

/// A tabletop holding one pile of `cards` face-down cards at path `[0]`.
pub fn table_with_pile(cards: usize) -> Arc<Table> {
    let mut pile = Container::new(&container_strategy("card-pile", "stacked"), stacked());
    for _ in 0..cards {
        pile.add_component(Component::new(&card_strategy()));
    }
    let mut tabletop = Container::new(&container_strategy("tabletop", "absolute"), absolute());
    tabletop.add_component(pile);
    Arc::new(Table::new(tabletop))
}

/// Receives events until one matches `predicate`, failing the test after a
/// short deadline.
pub fn wait_for(events: &Receiver<NodeEvent>, predicate: impl Fn(&NodeEvent) -> bool) -> NodeEvent {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return event,
            Ok(_) => {}
            Err(e) => panic!("no matching event: {e}"),
        }
    }
}

/// Polls `condition` until it holds, failing the test after a short deadline.
pub fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
