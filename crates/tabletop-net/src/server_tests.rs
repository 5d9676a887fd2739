use super::*;
use crate::remote::test_support::RecordingContext;
use crate::testing::{self, wait_for};
use tabletop_table::{
    ComponentIncrement, ContainerIncrement, Orientation, PatchApplier, Point, TableObject,
};

fn server(max_players: u32) -> Arc<ServerNode> {
    server_with_table(max_players, testing::empty_table())
}

fn server_with_table(max_players: u32, table: Arc<Table>) -> Arc<ServerNode> {
    let settings = NodeSettings::new("host").with_password(SecurePassword::new("secret"));
    ServerNode::new(settings, max_players, testing::registries(), table).unwrap()
}

fn on_layer<T: Send + 'static>(
    server: &Arc<ServerNode>,
    task: impl FnOnce(&ServerNode) -> T + Send + 'static,
) -> T {
    let s = Arc::clone(server);
    server.layer().sync_exec(move || task(&s)).unwrap()
}

fn hello(name: &str, password: &str) -> NodeMessage {
    NodeMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        player_name: name.to_string(),
        password: SecurePassword::new(password),
    }
}

/// Accepts a connection and delivers `message` as its first message.
fn connect_with(
    server: &Arc<ServerNode>,
    message: NodeMessage,
) -> (Arc<RecordingContext>, Arc<RemoteClientNode>) {
    let context = RecordingContext::new();
    let ctx: Arc<dyn ServiceContext> = context.clone();
    let remote = on_layer(server, move |server| {
        let remote = server.accept(ctx)?;
        remote.receive(message)?;
        Ok::<_, NodeError>(remote)
    })
    .unwrap();
    (context, remote)
}

fn join(server: &Arc<ServerNode>, name: &str) -> (Arc<RecordingContext>, Arc<RemoteClientNode>) {
    connect_with(server, hello(name, "secret"))
}

/// Started but never named.
fn accepted(server: &Arc<ServerNode>) -> Arc<RemoteClientNode> {
    on_layer(server, |server| server.accept(RecordingContext::new())).unwrap()
}

fn bound_names(server: &Arc<ServerNode>) -> Vec<String> {
    on_layer(server, |server| server.node().bound_player_names()).unwrap()
}

fn rejection(context: &RecordingContext) -> JoinRejection {
    match context.sent().as_slice() {
        [NodeMessage::Rejected(rejection)] => rejection.clone(),
        other => panic!("expected a single rejection, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

#[test]
fn test_bind_then_unbind() {
    let server = server(4);
    let remote = accepted(&server);
    let (bound, unbound) = on_layer(&server, move |server| {
        remote.bind("carol")?;
        server.bind_remote_node(Arc::clone(&remote))?;
        let bound = server.is_bound("carol")?;
        server.unbind_remote_node(&remote)?;
        Ok::<_, NodeError>((bound, server.is_bound("carol")?))
    })
    .unwrap();
    assert!(bound);
    assert!(!unbound);
}

#[test]
fn test_double_bind_rejected() {
    let server = server(4);
    let remote = accepted(&server);
    let result = on_layer(&server, move |server| {
        remote.bind("carol").unwrap();
        server.bind_remote_node(Arc::clone(&remote)).unwrap();
        server.bind_remote_node(remote)
    });
    assert!(matches!(result, Err(NodeError::AlreadyBound(name)) if name == "carol"));
    assert_eq!(bound_names(&server), vec!["carol".to_string()]);
}

#[test]
fn test_same_name_from_two_connections_rejected() {
    let server = server(4);
    let first = accepted(&server);
    let second = accepted(&server);
    let result = on_layer(&server, move |server| {
        first.bind("carol").unwrap();
        second.bind("carol").unwrap();
        server.bind_remote_node(first).unwrap();
        server.bind_remote_node(second)
    });
    assert!(matches!(result, Err(NodeError::AlreadyBound(_))));
    assert_eq!(bound_names(&server).len(), 1);
}

#[test]
fn test_unbind_absent_node_rejected() {
    let server = server(4);
    let (_context, _alice) = join(&server, "alice");
    let stranger = accepted(&server);
    let result = on_layer(&server, move |server| {
        stranger.bind("dave").unwrap();
        server.unbind_remote_node(&stranger)
    });
    assert!(matches!(result, Err(NodeError::NotBound(name)) if name == "dave"));
    assert_eq!(bound_names(&server), vec!["alice".to_string()]);
}

#[test]
fn test_unbind_impostor_with_bound_name_rejected() {
    let server = server(4);
    let (_context, _alice) = join(&server, "alice");
    let impostor = accepted(&server);
    let result = on_layer(&server, move |server| {
        impostor.bind("alice").unwrap();
        server.unbind_remote_node(&impostor)
    });
    assert!(matches!(result, Err(NodeError::NotBound(_))));
    assert_eq!(bound_names(&server), vec!["alice".to_string()]);
}

#[test]
fn test_bind_unnamed_remote_rejected() {
    let server = server(4);
    let remote = accepted(&server);
    let result = on_layer(&server, move |server| server.bind_remote_node(remote));
    assert!(matches!(result, Err(NodeError::UnnamedRemoteNode)));
    assert!(bound_names(&server).is_empty());
}

#[test]
fn test_foreign_remote_rejected() {
    let server = server(4);
    let other = self::server(4);
    let foreign = RemoteClientNode::new(&other);
    let result = on_layer(&server, move |server| server.bind_remote_node(foreign));
    assert!(matches!(result, Err(NodeError::ForeignRemoteNode)));
}

#[test]
fn test_bind_off_layer_rejected() {
    let server = server(4);
    let remote = accepted(&server);
    assert!(matches!(
        server.bind_remote_node(remote),
        Err(NodeError::NotOnNodeLayerThread)
    ));
    assert!(matches!(
        server.is_bound("alice"),
        Err(NodeError::NotOnNodeLayerThread)
    ));
}

#[test]
fn test_leaving_player_unbound() {
    let server = server(4);
    let events = server.events();
    let (_alice_context, alice) = join(&server, "alice");
    let (bob_context, _bob) = join(&server, "bob");
    assert_eq!(bound_names(&server), vec!["alice".to_string(), "bob".to_string()]);

    on_layer(&server, move |_| alice.receive(NodeMessage::Goodbye)).unwrap();

    assert_eq!(bound_names(&server), vec!["bob".to_string()]);
    wait_for(&events, |e| *e == NodeEvent::PlayerLeft("alice".into()));
    let Some(NodeMessage::Players(players)) = bob_context.sent().last().cloned() else {
        panic!("bob was not told about the departure");
    };
    assert_eq!(
        players.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["host", "bob"]
    );
}

#[test]
fn test_stopped_twice_is_noop() {
    let server = server(4);
    let events = server.events();
    let (_context, alice) = join(&server, "alice");
    on_layer(&server, move |_| {
        alice.stopped()?;
        alice.stopped()
    })
    .unwrap();
    wait_for(&events, |e| matches!(e, NodeEvent::PlayerLeft(_)));
    assert!(
        events
            .try_iter()
            .all(|e| !matches!(e, NodeEvent::PlayerLeft(_)))
    );
}

// ---------------------------------------------------------------------------
// Join handshake
// ---------------------------------------------------------------------------

#[test]
fn test_join_sends_welcome_then_table_state() {
    let server = server(4);
    let events = server.events();
    let (context, alice) = join(&server, "alice");

    assert_eq!(context.kinds(), vec!["Welcome", "TableState"]);
    let sent = context.sent();
    let NodeMessage::Welcome {
        server_player_name,
        players,
    } = &sent[0]
    else {
        panic!("expected Welcome");
    };
    assert_eq!(server_player_name, "host");
    assert_eq!(
        players,
        &vec![
            PlayerInfo {
                name: "host".into(),
                is_host: true
            },
            PlayerInfo {
                name: "alice".into(),
                is_host: false
            },
        ]
    );

    assert_eq!(alice.player_name().unwrap(), "alice");
    let state = on_layer(&server, move |_| alice.state()).unwrap();
    assert_eq!(state, RemoteNodeState::Bound);
    wait_for(&events, |e| *e == NodeEvent::PlayerJoined("alice".into()));
}

#[test]
fn test_existing_players_told_about_newcomer() {
    let server = server(4);
    let (alice_context, _alice) = join(&server, "alice");
    let (bob_context, _bob) = join(&server, "bob");

    assert_eq!(alice_context.kinds(), vec!["Welcome", "TableState", "Players"]);
    assert_eq!(bob_context.kinds(), vec!["Welcome", "TableState"]);
}

#[test]
fn test_name_taken_rejected() {
    let server = server(4);
    let (_context, _alice) = join(&server, "alice");
    let (context, remote) = join(&server, "alice");

    assert_eq!(rejection(&context), JoinRejection::NameTaken("alice".into()));
    assert!(context.is_closed());
    let state = on_layer(&server, move |_| remote.state()).unwrap();
    assert_eq!(state, RemoteNodeState::Stopped);
    assert_eq!(bound_names(&server), vec!["alice".to_string()]);
}

#[test]
fn test_host_name_is_taken() {
    let server = server(4);
    let (context, _remote) = join(&server, "host");
    assert_eq!(rejection(&context), JoinRejection::NameTaken("host".into()));
    assert!(bound_names(&server).is_empty());
}

#[test]
fn test_bad_password_rejected() {
    let server = server(4);
    let (context, _remote) = connect_with(&server, hello("alice", "guess"));
    assert_eq!(rejection(&context), JoinRejection::BadPassword);
    assert!(bound_names(&server).is_empty());
}

#[test]
fn test_empty_name_rejected() {
    let server = server(4);
    let (context, _remote) = join(&server, "");
    assert_eq!(rejection(&context), JoinRejection::InvalidName);
}

#[test]
fn test_protocol_mismatch_rejected() {
    let server = server(4);
    let message = NodeMessage::Hello {
        protocol_version: PROTOCOL_VERSION + 1,
        player_name: "alice".into(),
        password: SecurePassword::new("secret"),
    };
    let (context, _remote) = connect_with(&server, message);
    assert_eq!(
        rejection(&context),
        JoinRejection::ProtocolMismatch {
            expected: PROTOCOL_VERSION,
            actual: PROTOCOL_VERSION + 1,
        }
    );
}

#[test]
fn test_full_table_rejected() {
    let server = server(2);
    let (first, _alice) = join(&server, "alice");
    let (second, _bob) = join(&server, "bob");

    assert_eq!(first.kinds(), vec!["Welcome", "TableState"]);
    assert_eq!(rejection(&second), JoinRejection::TableFull { max_players: 2 });
}

#[test]
fn test_repeated_hello_ignored() {
    let server = server(4);
    let (context, alice) = join(&server, "alice");
    on_layer(&server, move |_| alice.receive(hello("mallory", "secret"))).unwrap();
    assert_eq!(context.kinds(), vec!["Welcome", "TableState"]);
    assert_eq!(bound_names(&server), vec!["alice".to_string()]);
}

#[test]
fn test_players_lists_host_first() {
    let server = server(4);
    let _bob = join(&server, "bob");
    let _alice = join(&server, "alice");
    let players = on_layer(&server, |server| server.players()).unwrap();
    let names: Vec<_> = players.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["host", "alice", "bob"]);
    assert!(players[0].is_host);
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

fn move_pile() -> (ComponentPath, Increment) {
    let increment = ComponentIncrement::new().with_location(Point::new(4, 5));
    (ComponentPath::new(vec![0]), increment.into())
}

fn pile_location(server: &ServerNode) -> Point {
    let lock = server.table().lock();
    let root = lock.tabletop();
    root.resolve(&ComponentPath::new(vec![0]))
        .map(TableObject::location)
        .unwrap()
}

#[test]
fn test_client_increment_applied_and_forwarded_to_others() {
    let server = server_with_table(4, testing::table_with_pile(3));
    let events = server.events();
    let (alice_context, alice) = join(&server, "alice");
    let (bob_context, _bob) = join(&server, "bob");

    let (path, increment) = move_pile();
    on_layer(&server, move |_| {
        alice.receive(NodeMessage::IncrementComponentState { path, increment })
    })
    .unwrap();
    // The forwards were queued by the job above and run before this one.
    on_layer(&server, |_| ());

    assert_eq!(pile_location(&server), Point::new(4, 5));
    assert_eq!(
        bob_context.kinds().last(),
        Some(&"IncrementComponentState")
    );
    assert!(!alice_context.kinds().contains(&"IncrementComponentState"));
    wait_for(&events, |e| *e == NodeEvent::TableUpdated);
}

#[test]
fn test_increment_before_join_ignored() {
    let server = server_with_table(4, testing::table_with_pile(1));
    let remote = accepted(&server);
    let (path, increment) = move_pile();
    on_layer(&server, move |_| {
        remote.receive(NodeMessage::IncrementComponentState { path, increment })
    })
    .unwrap();
    assert_eq!(pile_location(&server), Point::new(0, 0));
}

#[test]
fn test_publish_reaches_every_player() {
    let server = server_with_table(4, testing::table_with_pile(2));
    let (alice_context, _alice) = join(&server, "alice");
    let (bob_context, _bob) = join(&server, "bob");

    let (path, increment) = move_pile();
    let report = server.publish_increment(path, increment).unwrap();
    assert!(report.is_clean());
    on_layer(&server, |_| ());

    assert_eq!(pile_location(&server), Point::new(4, 5));
    for context in [alice_context, bob_context] {
        assert_eq!(context.kinds().last(), Some(&"IncrementComponentState"));
    }
}

#[test]
fn test_publish_unresolved_path_not_sent() {
    let server = server(4);
    let (context, _alice) = join(&server, "alice");
    let report = server
        .publish_increment(
            ComponentPath::new(vec![7]),
            ComponentIncrement::new().with_location(Point::new(1, 1)).into(),
        )
        .unwrap();
    on_layer(&server, |_| ());
    assert!(!report.resolved);
    assert_eq!(context.kinds(), vec!["Welcome", "TableState"]);
}

/// Blocks the server layer until the returned sender is dropped or used.
fn hold_layer(server: &Arc<ServerNode>) -> crossbeam_channel::Sender<()> {
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    server
        .layer()
        .async_exec(move || {
            let _ = release_rx.recv();
        })
        .unwrap();
    release_tx
}

fn remove_top_of_pile() -> Increment {
    ContainerIncrement::new().with_removal(0, 1).into()
}

fn flip_first_card() -> Increment {
    ComponentIncrement::new()
        .with_orientation(Orientation::from("face"))
        .into()
}

/// Rebuilds a player's view from the initial table and the increments it
/// was sent.
fn replay(context: &RecordingContext, initial: Arc<Table>) -> Arc<Table> {
    let applier = PatchApplier::new(testing::registries());
    for message in context.sent() {
        if let NodeMessage::IncrementComponentState { path, increment } = message {
            applier.increment_component_state(&initial, &path, &increment);
        }
    }
    initial
}

#[test]
fn test_host_and_relayed_edits_reach_players_in_apply_order() {
    let server = server_with_table(4, testing::table_with_pile(3));
    let (_alice_context, alice) = join(&server, "alice");
    let (bob_context, _bob) = join(&server, "bob");

    let release = hold_layer(&server);
    server
        .layer()
        .async_exec(move || {
            alice.receive(NodeMessage::IncrementComponentState {
                path: ComponentPath::new(vec![0]),
                increment: remove_top_of_pile(),
            })
        })
        .unwrap();
    let host = Arc::clone(&server);
    let publisher = std::thread::spawn(move || {
        host.publish_increment(ComponentPath::new(vec![0, 0]), flip_first_card())
    });
    std::thread::sleep(std::time::Duration::from_millis(50));
    release.send(()).unwrap();
    assert!(publisher.join().unwrap().unwrap().is_clean());
    on_layer(&server, |_| ());

    let bob_view = replay(&bob_context, testing::table_with_pile(3));
    assert_eq!(bob_view.create_memento(), server.table().create_memento());
}

#[test]
fn test_publish_edit_diffs_after_queued_patches() {
    let server = server_with_table(4, testing::table_with_pile(3));
    let (_alice_context, alice) = join(&server, "alice");
    let (bob_context, _bob) = join(&server, "bob");

    let release = hold_layer(&server);
    server
        .layer()
        .async_exec(move || {
            alice.receive(NodeMessage::IncrementComponentState {
                path: ComponentPath::new(vec![0]),
                increment: remove_top_of_pile(),
            })
        })
        .unwrap();
    let host = Arc::clone(&server);
    let publisher = std::thread::spawn(move || {
        host.publish_edit(|tabletop| {
            let Some(pile) = tabletop.resolve_mut(&ComponentPath::new(vec![0])) else {
                return;
            };
            let Some(last) = pile.as_container().map(|p| p.component_count()) else {
                return;
            };
            if let Some(card) = tabletop.resolve_mut(&ComponentPath::new(vec![0, last - 1])) {
                let _ = card.set_orientation(Orientation::from("face"));
            }
        })
    });
    std::thread::sleep(std::time::Duration::from_millis(50));
    release.send(()).unwrap();
    let reports = publisher.join().unwrap().unwrap();
    on_layer(&server, |_| ());

    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_clean());
    let Some(NodeMessage::IncrementComponentState { path, .. }) = bob_context.sent().last().cloned()
    else {
        panic!("expected an increment");
    };
    assert_eq!(path, ComponentPath::new(vec![0, 1]));
    let bob_view = replay(&bob_context, testing::table_with_pile(3));
    assert_eq!(bob_view.create_memento(), server.table().create_memento());
}

#[test]
fn test_resync_resends_table_state() {
    let server = server_with_table(4, testing::table_with_pile(2));
    let (context, _alice) = join(&server, "alice");

    on_layer(&server, |server| server.resync("alice")).unwrap();
    assert_eq!(context.kinds(), vec!["Welcome", "TableState", "TableState"]);
    let Some(NodeMessage::TableState(memento)) = context.sent().last().cloned() else {
        panic!("expected TableState");
    };
    assert_eq!(memento, server.table().create_memento());

    let missing = on_layer(&server, |server| server.resync("nobody"));
    assert!(matches!(missing, Err(NodeError::NotBound(_))));
}

// ---------------------------------------------------------------------------
// Disposal
// ---------------------------------------------------------------------------

#[test]
fn test_dispose_says_goodbye_and_is_idempotent() {
    let server = server(4);
    let events = server.events();
    let (context, _alice) = join(&server, "alice");

    server.dispose().unwrap();
    server.dispose().unwrap();

    assert_eq!(context.kinds(), vec!["Welcome", "TableState", "Goodbye"]);
    assert!(context.is_closed());
    assert!(server.layer().is_disposed());
    wait_for(&events, |e| *e == NodeEvent::PlayerLeft("alice".into()));
    assert!(matches!(
        server.layer().sync_exec(|| ()),
        Err(ExecutionError::Rejected)
    ));
}

#[test]
fn test_publish_after_dispose_leaves_table_alone() {
    let server = server_with_table(4, testing::table_with_pile(1));
    server.dispose().unwrap();

    let (path, increment) = move_pile();
    let result = server.publish_increment(path, increment);
    assert!(matches!(
        result,
        Err(NodeError::Execution(ExecutionError::Rejected))
    ));
    assert_eq!(pile_location(&server), Point::new(0, 0));
}

#[test]
fn test_dispose_completes_past_a_failing_remote() {
    let server = server(4);
    let other = self::server(4);
    // Bound on the other node's layer, so stopping it from this one fails.
    let stray = accepted(&other);
    let named = Arc::clone(&stray);
    on_layer(&other, move |_| named.bind("adam")).unwrap();
    on_layer(&server, move |server| server.node().bind_remote_node(stray)).unwrap();
    let (context, _alice) = join(&server, "alice");

    server.dispose().unwrap();

    assert!(server.layer().is_disposed());
    assert_eq!(context.kinds().last(), Some(&"Goodbye"));
    assert!(context.is_closed());
}

#[test]
fn test_dispose_zeroes_password() {
    let server = server(4);
    let s = Arc::clone(&server);
    let password = server
        .layer()
        .sync_exec(move || {
            s.dispose()?;
            s.password()
        })
        .unwrap()
        .unwrap();
    assert!(password.is_empty());
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[test]
fn test_password_copies_are_independent() {
    let server = server(4);
    let (first, second, third) = on_layer(&server, |server| {
        let mut first = server.password()?;
        let second = server.password()?;
        first.dispose();
        Ok::<_, NodeError>((first, second, server.password()?))
    })
    .unwrap();
    assert!(first.is_empty());
    assert_eq!(second, SecurePassword::new("secret"));
    assert_eq!(third, SecurePassword::new("secret"));
}

#[test]
fn test_replaced_password_checked_on_join() {
    let server = server(4);
    on_layer(&server, |server| {
        server.node().set_password(SecurePassword::new("changed"))
    })
    .unwrap();
    let (refused, _) = join(&server, "alice");
    assert_eq!(rejection(&refused), JoinRejection::BadPassword);
    let (accepted, _) = connect_with(&server, hello("alice", "changed"));
    assert_eq!(accepted.kinds(), vec!["Welcome", "TableState"]);
}

#[test]
fn test_password_read_off_layer_rejected() {
    let server = server(4);
    assert!(matches!(
        server.password(),
        Err(NodeError::NotOnNodeLayerThread)
    ));
}

#[test]
fn test_publish_edit_sends_diffed_patches() {
    // An empty pile, so moving it changes no child locations.
    let server = server_with_table(4, testing::table_with_pile(0));
    let (context, _alice) = join(&server, "alice");

    let reports = server
        .publish_edit(|tabletop| {
            if let Some(pile) = tabletop.resolve_mut(&ComponentPath::new(vec![0])) {
                pile.set_location(Point::new(4, 5));
            }
        })
        .unwrap();
    on_layer(&server, |_| ());

    assert_eq!(reports.len(), 1);
    assert_eq!(pile_location(&server), Point::new(4, 5));
    let Some(NodeMessage::IncrementComponentState { path, .. }) = context.sent().last().cloned()
    else {
        panic!("expected an increment");
    };
    assert_eq!(path, ComponentPath::new(vec![0]));
}

#[test]
fn test_publish_edit_without_change_sends_nothing() {
    let server = server_with_table(4, testing::table_with_pile(1));
    let (context, _alice) = join(&server, "alice");
    let reports = server.publish_edit(|_| {}).unwrap();
    on_layer(&server, |_| ());
    assert!(reports.is_empty());
    assert_eq!(context.kinds(), vec!["Welcome", "TableState"]);
}
