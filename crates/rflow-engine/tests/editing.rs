//! End-to-end editing scenarios through a [`Session`].
//!
//! Each test opens a fresh project on one of the storage backends and drives
//! it the way the canvas would: build a command from the live graph, execute
//! it, undo, redo, reopen.

use rflow_core::{
    Color, EdgeKind, Group, MetaTarget, ModuleType, Node, NodeId, PaletteSlot, Point,
    ReferenceMeta, Size,
};
use rflow_engine::{
    Command, DisplayUpdate, HistoryError, ItemRef, Selection, Session, SessionConfig,
    SessionError,
};
use rflow_storage::{DirStore, InMemoryStore, ProjectStore, SqliteStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn memory_session() -> Session<InMemoryStore> {
    Session::create(InMemoryStore::new(), "Test Project", SessionConfig::default()).unwrap()
}

fn add<S: ProjectStore>(session: &mut Session<S>, module: ModuleType, x: f64) -> NodeId {
    let node = Node::step(module, Point::new(x, 0.0), module.as_str());
    let id = node.id;
    session.add_node(node, None).unwrap();
    id
}

fn add_reference<S: ProjectStore>(session: &mut Session<S>, title: &str) -> NodeId {
    let node = Node::reference(
        Point::new(0.0, 200.0),
        ReferenceMeta {
            title: title.to_string(),
            ..Default::default()
        },
    );
    let id = node.id;
    session.add_node(node, None).unwrap();
    id
}

fn hex(s: &str) -> Color {
    Color::hex(s).unwrap()
}

// ---------------------------------------------------------------------------
// History behavior
// ---------------------------------------------------------------------------

#[test]
fn new_command_after_undo_clears_redo() {
    let mut s = memory_session();
    let a = add(&mut s, ModuleType::Input, 0.0);
    let b = add(&mut s, ModuleType::Output, 300.0);
    s.undo().unwrap();
    assert!(s.history().can_redo());

    let c = add(&mut s, ModuleType::Process, 600.0);
    assert!(!s.history().can_redo());
    assert!(s.redo().unwrap().is_none());
    assert!(s.graph().node(a).is_some());
    assert!(s.graph().node(b).is_none());
    assert!(s.graph().node(c).is_some());
}

#[test]
fn history_is_bounded_at_one_hundred() {
    let mut s = Session::create(
        InMemoryStore::new(),
        "bounded",
        SessionConfig::default().with_autosave(false),
    )
    .unwrap();
    let a = add(&mut s, ModuleType::Input, 0.0);
    for _ in 0..150 {
        s.move_selection(&Selection::nodes([a]), 1.0, 0.0).unwrap();
    }
    assert_eq!(s.history().undo_len(), 100);

    let mut undone = 0;
    while s.undo().unwrap().is_some() {
        undone += 1;
    }
    assert_eq!(undone, 100);
    // 150 moves, the creation and the first 50 moves were evicted.
    assert_eq!(s.graph().node(a).unwrap().position, Point::new(50.0, 0.0));
}

#[test]
fn configured_limit_is_capped() {
    let config = SessionConfig::default().with_history_limit(1_000);
    assert_eq!(config.history_limit, 100);
}

// ---------------------------------------------------------------------------
// Groups and drags
// ---------------------------------------------------------------------------

#[test]
fn deleting_a_group_unbinds_members_and_undo_restores_order() {
    let mut s = memory_session();
    let ids: Vec<NodeId> = (0..3)
        .map(|i| add(&mut s, ModuleType::Process, i as f64 * 200.0))
        .collect();
    s.group_nodes("stage", Point::new(-20.0, -20.0), &[ids[2], ids[0], ids[1]])
        .unwrap();
    let group = s.graph().groups().next().unwrap().id;

    let cmd = Command::delete_group(s.graph(), group).unwrap();
    s.execute(cmd).unwrap();
    assert!(s.graph().group(group).is_none());
    for id in &ids {
        let node = s.graph().node(*id).unwrap();
        assert_eq!(node.group, None);
    }

    s.undo().unwrap();
    let restored = s.graph().group(group).unwrap();
    assert_eq!(restored.members, vec![ids[2], ids[0], ids[1]]);
    for id in &ids {
        assert_eq!(s.graph().node(*id).unwrap().group, Some(group));
    }
}

#[test]
fn group_drag_with_members_is_a_single_entry() {
    let mut s = memory_session();
    let ids: Vec<NodeId> = (0..3)
        .map(|i| add(&mut s, ModuleType::Process, i as f64 * 200.0))
        .collect();
    s.group_nodes("stage", Point::new(-20.0, -20.0), &ids).unwrap();
    let group = s.graph().groups().next().unwrap().id;
    let before = s.graph().clone();
    let depth = s.history().undo_len();

    s.begin_drag(Selection::group_with_members(group)).unwrap();
    s.drag_by(25.0, 0.0).unwrap();
    s.drag_by(25.0, 10.0).unwrap();
    s.commit_drag().unwrap().unwrap();

    assert_eq!(s.history().undo_len(), depth + 1);
    assert_eq!(s.graph().group(group).unwrap().position, Point::new(30.0, -10.0));
    for (i, id) in ids.iter().enumerate() {
        let expected = Point::new(i as f64 * 200.0 + 50.0, 10.0);
        assert_eq!(s.graph().node(*id).unwrap().position, expected);
    }

    s.undo().unwrap();
    assert_eq!(*s.graph(), before);
}

#[test]
fn locked_group_blocks_member_drag() {
    let mut s = memory_session();
    let a = add(&mut s, ModuleType::Process, 0.0);
    s.group_nodes("frozen", Point::default(), &[a]).unwrap();
    let group = s.graph().groups().next().unwrap().id;
    let lock = Command::set_lock(s.graph(), ItemRef::Group(group), true).unwrap();
    s.execute(lock).unwrap();

    assert!(s.display().nodes[&a].locked);
    assert!(!s.graph().node(a).unwrap().flags.locked);
    assert!(matches!(
        s.begin_drag(Selection::nodes([a])),
        Err(SessionError::Rejected(_))
    ));
    assert!(!s.is_dragging());
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[test]
fn pipeline_edge_into_reference_is_rejected_without_history() {
    let mut s = memory_session();
    let step = add(&mut s, ModuleType::Process, 0.0);
    let paper = add_reference(&mut s, "ResNet");
    let depth = s.history().undo_len();

    let result = s.connect(EdgeKind::Pipeline, step, paper);
    assert!(matches!(result, Err(SessionError::Rejected(_))));
    assert_eq!(s.history().undo_len(), depth);
    assert_eq!(s.graph().edge_count(), 0);

    // A hand-built command is rejected by apply just the same.
    let forged = Command::CreateEdge {
        edge: rflow_core::Edge::new(EdgeKind::Pipeline, step, paper),
    };
    assert!(matches!(s.execute(forged), Err(SessionError::Rejected(_))));
    assert_eq!(s.history().undo_len(), depth);

    s.connect(EdgeKind::Reference, paper, step).unwrap();
    assert_eq!(s.graph().edge_count(), 1);
}

#[test]
fn deleting_a_node_takes_its_edges_and_undo_brings_them_back() {
    let mut s = memory_session();
    let a = add(&mut s, ModuleType::Input, 0.0);
    let b = add(&mut s, ModuleType::Process, 200.0);
    let c = add(&mut s, ModuleType::Output, 400.0);
    s.connect(EdgeKind::Pipeline, a, b).unwrap();
    s.connect(EdgeKind::Pipeline, b, c).unwrap();
    let before = s.graph().clone();

    s.delete_selection(&[b], &[]).unwrap();
    assert_eq!(s.graph().edge_count(), 0);
    s.undo().unwrap();
    assert_eq!(*s.graph(), before);
    assert_eq!(s.graph().pipeline_order().unwrap(), vec![a, b, c]);
}

// ---------------------------------------------------------------------------
// Tags and palette
// ---------------------------------------------------------------------------

#[test]
fn renaming_a_tag_updates_all_five_holders_in_one_step() {
    let mut s = memory_session();
    let ids: Vec<NodeId> = (0..5)
        .map(|i| add(&mut s, ModuleType::Process, i as f64 * 200.0))
        .collect();
    let create = Command::create_tag(s.graph(), "baseline", Some(hex("#FF5722"))).unwrap();
    s.execute(create).unwrap();
    let tag = s.graph().tags().find_by_name("baseline").unwrap().id;
    for id in &ids {
        let assign = Command::assign_tag(s.graph(), *id, tag).unwrap();
        s.execute(assign).unwrap();
    }
    let depth = s.history().undo_len();

    let outcome = s.rename_tag(tag, "control").unwrap();
    assert_eq!(s.history().undo_len(), depth + 1);
    for id in &ids {
        assert!(outcome.updates.contains(&DisplayUpdate::Node(*id)));
        assert_eq!(s.display().nodes[id].tags[0].name, "control");
    }

    s.undo().unwrap();
    for id in &ids {
        assert_eq!(s.display().nodes[id].tags[0].name, "baseline");
    }
}

#[test]
fn tag_delete_cascade_undoes_in_one_step() {
    let mut s = memory_session();
    let a = add(&mut s, ModuleType::Input, 0.0);
    let b = add(&mut s, ModuleType::Output, 200.0);
    let create = Command::create_tag(s.graph(), "wip", None).unwrap();
    s.execute(create).unwrap();
    let tag = s.graph().tags().find_by_name("wip").unwrap().id;
    for id in [a, b] {
        let assign = Command::assign_tag(s.graph(), id, tag).unwrap();
        s.execute(assign).unwrap();
    }

    let delete = Command::delete_tag(s.graph(), tag).unwrap();
    s.execute(delete).unwrap();
    assert!(s.graph().tag(tag).is_none());
    assert!(s.display().nodes[&a].tags.is_empty());

    s.undo().unwrap();
    assert_eq!(s.graph().tag_holders(tag), {
        let mut holders = vec![a, b];
        holders.sort();
        holders
    });
    assert_eq!(s.display().nodes[&b].tags[0].name, "wip");
}

#[test]
fn palette_change_respects_overrides_and_undoes() {
    let mut s = memory_session();
    let plain = add(&mut s, ModuleType::Input, 0.0);
    let custom = add(&mut s, ModuleType::Input, 200.0);
    let set = Command::set_color(s.graph(), ItemRef::Node(custom), Some(hex("#111111"))).unwrap();
    s.execute(set).unwrap();
    let default = PaletteSlot::Input.default_color();

    s.set_palette_color(PaletteSlot::Input, hex("#222222")).unwrap();
    assert_eq!(s.display().nodes[&plain].color, hex("#222222"));
    assert_eq!(s.display().nodes[&custom].color, hex("#111111"));

    s.undo().unwrap();
    assert_eq!(s.display().nodes[&plain].color, default);
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[test]
fn sidebar_edits_are_undoable() {
    let mut s = memory_session();
    let a = add(&mut s, ModuleType::Process, 0.0);
    for target in [MetaTarget::Project, MetaTarget::Node(a)] {
        let cmd = Command::edit_description(s.graph(), target, "notes".into()).unwrap();
        s.execute(cmd).unwrap();
        let cmd = Command::add_todo(s.graph(), target, "rerun").unwrap();
        s.execute(cmd).unwrap();
        assert_eq!(s.graph().metadata(target).unwrap().todos.len(), 1);
        s.undo().unwrap();
        s.undo().unwrap();
        assert_eq!(s.graph().metadata(target).unwrap().description, "");
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Runs one edit script in a memory-backed session and a session over
/// `store`, reopens the latter and checks that undo behaves identically.
fn reload_then_undo<S: ProjectStore>(store: S) {
    let mut live = memory_session();
    let mut persisted = Session::create(store, "reload", SessionConfig::default()).unwrap();

    // Commands are plain values: build each against the live graph and run
    // the same value in both sessions.
    let mut run = |build: &dyn Fn(&rflow_core::SceneGraph) -> Command| {
        let command = build(live.graph());
        live.execute(command.clone()).unwrap();
        persisted.execute(command).unwrap();
    };
    let a = Node::step(ModuleType::Input, Point::new(0.0, 0.0), "load");
    let b = Node::step(ModuleType::Output, Point::new(300.0, 0.0), "report");
    let (ia, ib) = (a.id, b.id);
    run(&|g| Command::create_node(g, a.clone(), None).unwrap());
    run(&|g| Command::create_node(g, b.clone(), None).unwrap());
    run(&|g| Command::create_edge(g, EdgeKind::Pipeline, ia, ib).unwrap());
    run(&|g| Command::move_items(g, &Selection::nodes([ia, ib]), 12.5, -3.25).unwrap());
    let group = Group::new("stage", Point::default(), Size::GROUP).with_members([ia]);
    run(&|_| Command::CreateGroup {
        group: group.clone(),
    });
    run(&|g| Command::palette_color(g, PaletteSlot::Input, hex("#0A0B0C")));
    live.undo().unwrap();
    persisted.undo().unwrap();

    let id = persisted.id().clone();
    let store = persisted.into_store();
    let mut reopened = Session::open(store, id, SessionConfig::default()).unwrap();
    assert!(reopened.load_report().history_restored);
    assert_eq!(reopened.graph(), live.graph());
    assert_eq!(reopened.history().entries().len(), live.history().entries().len());

    reopened.redo().unwrap();
    live.redo().unwrap();
    assert_eq!(reopened.graph(), live.graph());
    loop {
        let x = live.undo().unwrap();
        let y = reopened.undo().unwrap();
        assert_eq!(x.is_some(), y.is_some());
        if x.is_none() {
            break;
        }
        assert_eq!(reopened.graph(), live.graph());
    }
    assert_eq!(reopened.graph().node_count(), 0);
}

#[test]
fn reload_then_undo_matches_in_memory_dir_store() {
    let dir = tempfile::tempdir().unwrap();
    reload_then_undo(DirStore::new(dir.path()).unwrap());
}

#[test]
fn reload_then_undo_matches_in_memory_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("projects.db");
    reload_then_undo(SqliteStore::new(path.to_str().unwrap()).unwrap());
}

#[test]
fn corrupt_history_degrades_to_empty() {
    let mut s = memory_session();
    add(&mut s, ModuleType::Input, 0.0);
    let id = s.id().clone();
    let mut store = s.into_store();
    store.save_history(&id, "{\"format\":1,\"limit\":100").unwrap();

    let reopened = Session::open(store, id, SessionConfig::default()).unwrap();
    assert_eq!(reopened.graph().node_count(), 1);
    assert!(!reopened.history().can_undo());
    assert!(reopened.load_report().history_warning.is_some());
}

#[test]
fn inversion_failure_names_the_step_and_can_be_discarded() {
    let mut s = memory_session();
    let a = add(&mut s, ModuleType::Input, 0.0);
    let create = Command::create_tag(s.graph(), "wip", None).unwrap();
    let tag_seq = s.execute(create).unwrap().seq;
    let tag = s.graph().tags().find_by_name("wip").unwrap().id;
    let assign = Command::assign_tag(s.graph(), a, tag).unwrap();
    let assign_seq = s.execute(assign).unwrap().seq;

    // Losing the assignment step leaves the tag in use when its creation
    // is undone.
    assert!(s.history_mut().discard(assign_seq));
    let before = s.graph().clone();
    match s.undo() {
        Err(SessionError::History(HistoryError::InversionFailed { seq, kind, .. })) => {
            assert_eq!(seq, tag_seq);
            assert_eq!(kind, "TagCreate");
        }
        other => panic!("expected inversion failure, got {:?}", other),
    }
    assert_eq!(*s.graph(), before);
    assert_eq!(s.history().undo_len(), 2);

    assert!(s.history_mut().discard(tag_seq));
    s.undo().unwrap().unwrap();
    assert!(s.graph().node(a).is_none());
    assert!(s.graph().tag(tag).is_some());
}
