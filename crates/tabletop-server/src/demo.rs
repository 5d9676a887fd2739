//! The card table the server hosts out of the box.

use tabletop_table::{
    Component, ComponentPath, ComponentStrategy, Container, ContainerLayout, InMemoryRegistry,
    LayoutId, LayoutKind, Orientation, Point, Registries, StrategyId, StrategyKind,
    SurfaceDesign, SurfaceDesignId, SurfaceDesignRegistry, TableObject,
};

pub const CARDS_IN_DECK: usize = 3;

fn card() -> ComponentStrategy {
    ComponentStrategy {
        id: StrategyId::from("card"),
        kind: StrategyKind::Component,
        supported_orientations: vec![Orientation::from("back"), Orientation::from("face")],
        default_orientation: Orientation::from("back"),
        default_layout: None,
    }
}

fn container(id: &str, layout: &str) -> ComponentStrategy {
    ComponentStrategy {
        id: StrategyId::from(id),
        kind: StrategyKind::Container,
        supported_orientations: vec![Orientation::from("default")],
        default_orientation: Orientation::from("default"),
        default_layout: Some(LayoutId::from(layout)),
    }
}

fn layout(id: &str, kind: LayoutKind) -> ContainerLayout {
    ContainerLayout {
        id: LayoutId::from(id),
        kind,
    }
}

fn design(id: &str) -> SurfaceDesign {
    SurfaceDesign {
        id: SurfaceDesignId::from(id),
        width: 70,
        height: 100,
    }
}

/// Strategies, layouts and designs for a basic card game.
pub fn registries() -> Registries {
    let mut registry = InMemoryRegistry::new();
    registry
        .register_strategy(card())
        .register_strategy(container("card-pile", "stacked"))
        .register_strategy(container("tabletop", "absolute"))
        .register_layout(layout("absolute", LayoutKind::Absolute))
        .register_layout(layout("stacked", LayoutKind::Stacked))
        .register_layout(layout("fanned", LayoutKind::Spread { dx: 20, dy: 0 }))
        .register_surface_design(design("red-back"))
        .register_surface_design(design("ace-of-spades"));
    Registries::from_in_memory(registry)
}

/// A tabletop with nothing on it, for joining players.
pub fn empty_tabletop() -> Container {
    Container::new(&container("tabletop", "absolute"), layout("absolute", LayoutKind::Absolute))
}

/// A tabletop with one face-down deck.
pub fn tabletop() -> Container {
    let mut deck = Container::new(
        &container("card-pile", "stacked"),
        layout("stacked", LayoutKind::Stacked),
    );
    for _ in 0..CARDS_IN_DECK {
        deck.add_component(Component::new(&card()));
    }
    deck.set_location(Point::new(120, 80));

    let mut tabletop = empty_tabletop();
    tabletop.add_component(deck);
    tabletop
}

/// Path of the card on top of the deck.
pub fn top_card() -> ComponentPath {
    ComponentPath::new(vec![0, CARDS_IN_DECK - 1])
}

/// Turns the top card of the deck face up and gives it a face design.
pub fn flip_top_card(tabletop: &mut TableObject) {
    let Some(card) = tabletop.resolve_mut(&top_card()) else {
        tracing::warn!("The deck is empty");
        return;
    };
    let face = Orientation::from("face");
    if let Err(e) = card.set_orientation(face.clone()) {
        tracing::warn!("Cannot flip the top card: {e}");
        return;
    }
    let ace = SurfaceDesignId::from("ace-of-spades");
    if let Some(design) = registries().surface_designs.surface_design(&ace)
        && let Err(e) = card.set_surface_design(face, design)
    {
        tracing::warn!("Cannot show the card face: {e}");
    }
}
