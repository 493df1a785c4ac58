//! Integration tests for the editor crate
//!
//! Drives the public `Editor` API end to end:
//! - Updates, commits and the published state
//! - Reconciliation against a recording view
//! - Transforms, queued updates, commands and listeners
//! - External view mutations and recovery from view failures

use folio_editor::commands::{DELETE_CHARACTER, INSERT_PARAGRAPH, INSERT_TEXT};
use folio_editor::{
    normalize_point, Affinity, CommandPriority, Editor, EditorConfig, EditorError, EditorResult,
    ExternalMutation, NativePoint, NativeRange, NodeKey, NodeMutation, Point, PointKind,
    RecordingView, Selection, TextFormatType, Transaction, UpdateOptions, ViewDelta, ViewOp,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn editor_with_view() -> (Editor, RecordingView) {
    let mut editor = Editor::default();
    let view = RecordingView::new();
    editor.attach_view(Box::new(view.clone())).unwrap();
    (editor, view)
}

/// One paragraph per entry, caret at the end of the last one
fn seed(editor: &mut Editor, texts: &[&str]) -> Vec<(NodeKey, NodeKey)> {
    let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let mut blocks = Vec::new();
    editor
        .update_with(UpdateOptions::discrete().with_tag("seed"), |txn| {
            for text in texts {
                let p = txn.create_paragraph()?;
                let t = txn.create_text(text)?;
                txn.append(&p, &[t.clone()])?;
                txn.append(&NodeKey::root(), &[p.clone()])?;
                blocks.push((p, t));
            }
            if let Some((_, t)) = blocks.last() {
                txn.select_end(t)?;
            }
            Ok(())
        })
        .unwrap();
    blocks
}

fn text_of(editor: &mut Editor) -> String {
    editor.read(|state| state.text_content()).unwrap()
}

#[test]
fn test_typing_reaches_state_and_view() {
    let (mut editor, view) = editor_with_view();
    seed(&mut editor, &["Hello"]);

    assert!(editor.dispatch_command(INSERT_TEXT, json!(", world")).unwrap());
    assert_eq!(text_of(&mut editor), "Hello, world");
    assert_eq!(view.render_text(), "Hello, world");
}

#[test]
fn test_enter_splits_paragraph() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["Hello"]);
    let (_, t) = blocks[0].clone();

    editor
        .update(|txn| {
            txn.select_text(&t, 2, 2)?;
            Ok(())
        })
        .unwrap();
    assert!(editor.dispatch_command(INSERT_PARAGRAPH, Value::Null).unwrap());

    let text = text_of(&mut editor);
    assert_eq!(text, "He\n\nllo");
    assert_eq!(view.render_text(), text);
    editor.editor_state().check_invariants().unwrap();
}

#[test]
fn test_backspace_joins_blocks() {
    let mut editor = Editor::default();
    let blocks = seed(&mut editor, &["ab", "cd"]);
    let (_, second) = blocks[1].clone();

    editor
        .update(|txn| {
            txn.select_start(&second)?;
            txn.delete_character(true)
        })
        .unwrap();

    let state = editor.read(|state| state.clone()).unwrap();
    assert_eq!(state.text_content(), "abcd");
    assert_eq!(state.children_size(&NodeKey::root()), 1);
    state.check_invariants().unwrap();
}

#[test]
fn test_delete_character_command() {
    let mut editor = Editor::default();
    seed(&mut editor, &["abc"]);
    assert!(editor.dispatch_command(DELETE_CHARACTER, Value::Null).unwrap());
    assert_eq!(text_of(&mut editor), "ab");
}

#[test]
fn test_commands_ignored_when_not_editable() {
    let mut editor = Editor::default();
    seed(&mut editor, &["abc"]);
    editor.set_editable(false);
    assert!(!editor.dispatch_command(INSERT_TEXT, json!("x")).unwrap());
    assert_eq!(text_of(&mut editor), "abc");
}

#[test]
fn test_clean_siblings_are_not_touched() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["1", "2", "3"]);
    let (p1, t1) = blocks[0].clone();
    let (_, t2) = blocks[1].clone();
    let (p3, t3) = blocks[2].clone();
    let untouched: Vec<_> = [&p1, &t1, &p3, &t3]
        .iter()
        .map(|key| view.handle_of(key).unwrap())
        .collect();
    let t2_handle = view.handle_of(&t2).unwrap();
    view.clear_ops();

    editor
        .update_with(UpdateOptions::discrete(), |txn| txn.set_text_content(&t2, "22"))
        .unwrap();

    let ops = view.ops();
    assert!(!ops
        .iter()
        .any(|op| matches!(op, ViewOp::Create { .. } | ViewOp::Destroy { .. })));
    assert!(ops.iter().any(|op| matches!(
        op,
        ViewOp::Patch { handle, deltas }
            if *handle == t2_handle
                && deltas.contains(&ViewDelta::SetText { text: "22".to_string() })
    )));
    for op in &ops {
        if let ViewOp::Patch { handle, .. } = op {
            assert!(!untouched.contains(handle), "unexpected patch of {handle}");
        }
    }
    assert_eq!(view.render_text(), "1\n\n22\n\n3");
}

#[test]
fn test_published_states_share_unchanged_nodes() {
    let mut editor = Editor::default();
    let blocks = seed(&mut editor, &["one", "two"]);
    let (p1, _) = blocks[0].clone();
    let (_, t2) = blocks[1].clone();
    let before = editor.editor_state();

    editor
        .update_with(UpdateOptions::discrete(), |txn| txn.set_text_content(&t2, "2"))
        .unwrap();
    let after = editor.editor_state();

    assert!(before.is_read_only());
    assert!(after.is_read_only());
    assert!(std::ptr::eq(
        before.node(&p1).unwrap(),
        after.node(&p1).unwrap()
    ));
    assert!(!std::ptr::eq(
        before.node(&t2).unwrap(),
        after.node(&t2).unwrap()
    ));
    assert_eq!(before.text_content(), "one\n\ntwo");
}

#[test]
fn test_transform_runs_to_fixed_point() {
    let mut editor = Editor::default();
    editor
        .register_node_transform("text", |txn, key| {
            let text = txn.text(key)?.text().to_string();
            let upper = text.to_uppercase();
            if upper != text {
                txn.set_text_content(key, &upper)?;
            }
            Ok(())
        })
        .unwrap();

    seed(&mut editor, &["shout"]);
    assert_eq!(text_of(&mut editor), "SHOUT");

    assert!(editor.dispatch_command(INSERT_TEXT, json!("ing")).unwrap());
    assert_eq!(text_of(&mut editor), "SHOUTING");
}

#[test]
fn test_runaway_transform_is_reported() {
    let config = EditorConfig {
        max_transform_iterations: 5,
        ..EditorConfig::default()
    };
    let mut editor = Editor::new(config);
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    editor.set_error_handler(move |e| sink.lock().unwrap().push(e.to_string()));
    editor
        .register_node_transform("text", |txn, key| {
            let text = txn.text(key)?.text().to_string();
            txn.set_text_content(key, &format!("{text}x"))
        })
        .unwrap();

    let result = editor.update_with(UpdateOptions::discrete(), |txn| {
        let p = txn.create_paragraph()?;
        let t = txn.create_text("a")?;
        txn.append(&p, &[t])?;
        txn.append(&NodeKey::root(), &[p])
    });

    assert!(matches!(result, Err(EditorError::InfiniteTransformLoop(5))));
    assert_eq!(reported.lock().unwrap().len(), 1);
    assert!(editor.editor_state().is_empty());
    assert!(!editor.has_pending_update());
}

#[test]
fn test_queued_updates_run_in_fifo_order() {
    let mut editor = Editor::default();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (log.clone(), log.clone());

    editor
        .update_with(UpdateOptions::discrete(), move |txn| {
            txn.enqueue_update(move |txn| {
                first.lock().unwrap().push("first");
                let nested = first.clone();
                txn.enqueue_update(move |txn| {
                    nested.lock().unwrap().push("nested");
                    let p = txn.create_paragraph()?;
                    txn.append(&NodeKey::root(), &[p])
                });
                Ok(())
            });
            txn.enqueue_update(move |_| {
                second.lock().unwrap().push("second");
                Ok(())
            });
            Ok(())
        })
        .unwrap();

    assert_eq!(*log.lock().unwrap(), ["first", "second", "nested"]);
    assert_eq!(editor.editor_state().children_size(&NodeKey::root()), 1);
}

#[test]
fn test_failed_queued_update_discards_everything() {
    let mut editor = Editor::default();
    let result = editor.update_with(UpdateOptions::discrete(), |txn| {
        let p = txn.create_paragraph()?;
        txn.append(&NodeKey::root(), &[p])?;
        txn.enqueue_update(|_| Err(EditorError::callback("queued failure")));
        Ok(())
    });
    assert!(matches!(result, Err(EditorError::Callback(_))));
    assert!(editor.editor_state().is_empty());
}

#[test]
fn test_on_update_runs_after_commit() {
    let mut editor = Editor::default();
    let ran = Arc::new(Mutex::new(false));
    let flag = ran.clone();
    editor
        .update_with(
            UpdateOptions::default().on_update(move || *flag.lock().unwrap() = true),
            |txn| {
                let p = txn.create_paragraph()?;
                txn.append(&NodeKey::root(), &[p])
            },
        )
        .unwrap();
    assert!(!*ran.lock().unwrap());
    editor.flush().unwrap();
    assert!(*ran.lock().unwrap());
}

#[test]
fn test_command_priority_beats_chain_depth() {
    let mut parent = Editor::default();
    let mut child = Editor::default();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sink = log.clone();
    parent.register_command("save", CommandPriority::Low, move |_, _| {
        sink.lock().unwrap().push("parent-low");
        Ok(true)
    });
    let sink = log.clone();
    child.register_command("save", CommandPriority::Editor, move |_, _| {
        sink.lock().unwrap().push("child-editor");
        Ok(true)
    });
    child.set_parent(&parent);

    assert!(child.dispatch_command("save", Value::Null).unwrap());
    assert_eq!(*log.lock().unwrap(), ["parent-low"]);

    let sink = log.clone();
    let id = child.register_command("save", CommandPriority::Low, move |_, _| {
        sink.lock().unwrap().push("child-low");
        Ok(true)
    });
    assert!(child.dispatch_command("save", Value::Null).unwrap());
    assert_eq!(log.lock().unwrap().last(), Some(&"child-low"));

    assert!(child.unregister(id));
    assert!(!child.unregister(id));
    assert!(!child.dispatch_command("missing", Value::Null).unwrap());
}

#[test]
fn test_unhandled_listener_falls_through() {
    let mut editor = Editor::default();
    seed(&mut editor, &["a"]);
    let seen = Arc::new(Mutex::new(0));
    let counter = seen.clone();
    editor.register_command(INSERT_TEXT, CommandPriority::High, move |_, _| {
        *counter.lock().unwrap() += 1;
        Ok(false)
    });

    assert!(editor.dispatch_command(INSERT_TEXT, json!("b")).unwrap());
    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(text_of(&mut editor), "ab");
}

#[test]
fn test_nested_dispatch_from_listener() {
    let mut editor = Editor::default();
    seed(&mut editor, &["hi"]);
    editor.register_command("exclaim", CommandPriority::Normal, |txn, _| {
        txn.dispatch_command(INSERT_TEXT, &json!("!"))
    });

    assert!(editor.dispatch_command("exclaim", Value::Null).unwrap());
    assert_eq!(text_of(&mut editor), "hi!");
}

#[test]
fn test_listeners_fire_after_commit() {
    let (mut editor, _view) = editor_with_view();
    let tags = Arc::new(Mutex::new(Vec::new()));
    let texts = Arc::new(Mutex::new(Vec::new()));
    let created = Arc::new(Mutex::new(Vec::new()));

    let sink = tags.clone();
    editor.register_update_listener(move |payload| {
        sink.lock().unwrap().push(payload.has_tag("seed"));
    });
    let sink = texts.clone();
    editor.register_text_content_listener(move |text| sink.lock().unwrap().push(text.to_string()));
    let sink = created.clone();
    editor.register_mutation_listener("paragraph", move |changes, _| {
        for (key, mutation) in changes {
            if *mutation == NodeMutation::Created {
                sink.lock().unwrap().push(key.clone());
            }
        }
    });

    let blocks = seed(&mut editor, &["a"]);
    let (p, t) = blocks[0].clone();
    assert_eq!(*tags.lock().unwrap(), [true]);
    assert_eq!(*texts.lock().unwrap(), ["a"]);
    assert_eq!(*created.lock().unwrap(), [p]);

    // Selection-only change: no text content notification
    editor
        .update_with(UpdateOptions::discrete(), |txn| txn.select_text(&t, 0, 1))
        .unwrap();
    assert_eq!(tags.lock().unwrap().len(), 2);
    assert_eq!(texts.lock().unwrap().len(), 1);
}

#[test]
fn test_native_selection_round_trip() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["hello"]);
    let (_, t) = blocks[0].clone();
    let handle = editor.reconciler().handle_for(&t).unwrap();

    let range = NativeRange {
        anchor: NativePoint { handle, offset: 1 },
        focus: NativePoint { handle, offset: 3 },
    };
    editor.apply_native_selection(Some(range)).unwrap();

    let state = editor.editor_state();
    let Some(Selection::Range(selection)) = state.selection() else {
        panic!("expected a range selection");
    };
    assert_eq!(selection.anchor().key, t);
    assert_eq!(selection.anchor().offset, 1);
    assert_eq!(selection.focus().offset, 3);
    assert_eq!(editor.selection_to_native(), Some(range));
    assert_eq!(view.selection(), Some(range));
}

#[test]
fn test_external_text_edit_is_imported() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["hello"]);
    let (_, t) = blocks[0].clone();
    let handle = editor.reconciler().handle_for(&t).unwrap();

    view.set_text_externally(handle, "help").unwrap();
    editor
        .handle_external_mutations(vec![ExternalMutation::CharacterData {
            handle,
            text: "help".to_string(),
        }])
        .unwrap();

    assert_eq!(editor.editor_state().text_content(), "help");
    assert_eq!(view.render_text(), "help");
}

#[test]
fn test_foreign_child_is_removed() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["keep"]);
    let (p, _) = blocks[0].clone();
    let parent = editor.reconciler().handle_for(&p).unwrap();

    let foreign = view.insert_foreign(parent, "junk").unwrap();
    assert_eq!(view.render_text(), "keepjunk");
    editor
        .handle_external_mutations(vec![ExternalMutation::ChildInserted {
            parent,
            child: foreign,
        }])
        .unwrap();

    assert!(!view.children(parent).contains(&foreign));
    assert_eq!(view.render_text(), "keep");
    assert_eq!(editor.editor_state().text_content(), "keep");
}

#[test]
fn test_removed_child_is_restored() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["one", "two"]);
    let (p2, _) = blocks[1].clone();
    let root = editor.reconciler().handle_for(&NodeKey::root()).unwrap();
    let child = editor.reconciler().handle_for(&p2).unwrap();

    view.remove_externally(root, child).unwrap();
    assert_eq!(view.render_text(), "one");
    editor
        .handle_external_mutations(vec![ExternalMutation::ChildRemoved { parent: root, child }])
        .unwrap();

    assert_eq!(view.children(root).last(), Some(&child));
    assert_eq!(view.render_text(), "one\n\ntwo");
}

#[test]
fn test_view_recovers_after_fatal_failure() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["1"]);
    let (p, _) = blocks[0].clone();

    view.fail_next(2);
    let result = editor.update_with(UpdateOptions::discrete(), |txn| {
        let t = txn.create_text("2")?;
        txn.append(&p, &[t])
    });
    assert!(matches!(result, Err(EditorError::View(_))));

    editor
        .update_with(UpdateOptions::discrete(), |txn| {
            let t = txn.create_text("3")?;
            txn.append(&p, &[t])
        })
        .unwrap();
    assert_eq!(editor.editor_state().text_content(), "13");
    assert_eq!(view.render_text(), "13");
}

#[test]
fn test_state_moves_between_editors_as_json() {
    let mut source = Editor::default();
    seed(&mut source, &["Hello", "World"]);
    let json = source.editor_state().to_json().unwrap();

    let (mut target, view) = editor_with_view();
    let state = target.parse_editor_state(&json).unwrap();
    target.set_editor_state(state).unwrap();

    assert_eq!(target.editor_state().text_content(), "Hello\n\nWorld");
    assert_eq!(view.render_text(), "Hello\n\nWorld");
    target.editor_state().check_invariants().unwrap();
}

#[test]
fn test_rejects_inline_node_under_root() {
    let mut editor = Editor::default();
    let result = editor.update_with(UpdateOptions::discrete(), |txn| {
        let t = txn.create_text("loose")?;
        txn.append(&NodeKey::root(), &[t])
    });
    assert!(matches!(result, Err(EditorError::InvalidRootChild { .. })));
    assert!(editor.editor_state().is_empty());
}

// ---------------------------------------------------------------
// Document properties
// ---------------------------------------------------------------

/// One paragraph holding bold "ab", plain "cd" and italic "ef"
fn mixed_paragraph(editor: &mut Editor) -> (NodeKey, [NodeKey; 3]) {
    let mut keys = None;
    editor
        .update_with(UpdateOptions::discrete(), |txn| {
            let p = txn.create_paragraph()?;
            let bold = txn.create_text("ab")?;
            let plain = txn.create_text("cd")?;
            let italic = txn.create_text("ef")?;
            txn.toggle_text_format(&bold, TextFormatType::Bold)?;
            txn.toggle_text_format(&italic, TextFormatType::Italic)?;
            txn.append(&p, &[bold.clone(), plain.clone(), italic.clone()])?;
            txn.append(&NodeKey::root(), &[p.clone()])?;
            keys = Some((p, [bold, plain, italic]));
            Ok(())
        })
        .unwrap();
    keys.unwrap()
}

#[test]
fn test_insert_text_in_the_middle() {
    let mut editor = Editor::default();
    let blocks = seed(&mut editor, &["ab"]);
    let (_, t) = blocks[0].clone();

    editor
        .update(|txn| {
            txn.select_text(&t, 1, 1)?;
            txn.insert_text("X")
        })
        .unwrap();

    let state = editor.read(|state| state.clone()).unwrap();
    assert_eq!(state.text(&t).unwrap().text(), "aXb");
    let Some(Selection::Range(range)) = state.selection() else {
        panic!("expected a range selection");
    };
    assert!(range.is_collapsed());
    assert_eq!(range.anchor(), &Point::text(t, 2));
}

#[test]
fn test_split_keeps_first_key() {
    let mut editor = Editor::default();
    let blocks = seed(&mut editor, &["hello"]);
    let (p, t) = blocks[0].clone();

    editor
        .update(|txn| {
            let parts = txn.split_text(&t, &[2])?;
            assert_eq!(parts.len(), 2);
            assert_eq!(parts[0], t);
            assert_eq!(txn.child_keys(&p), parts);
            assert_eq!(txn.text(&parts[0])?.text(), "he");
            assert_eq!(txn.text(&parts[1])?.text(), "llo");
            Ok(())
        })
        .unwrap();

    // Equal neighbours are merged again before commit
    assert_eq!(text_of(&mut editor), "hello");
    assert_eq!(editor.editor_state().children_size(&p), 1);
}

#[test]
fn test_normalization_is_idempotent() {
    let mut editor = Editor::default();
    let (p, [bold, plain, italic]) = mixed_paragraph(&mut editor);
    let state = editor.editor_state();

    let points = [
        Point::element(p.clone(), 0),
        Point::element(p.clone(), 1),
        Point::element(p.clone(), 3),
        Point::text(bold, 2),
        Point::text(plain.clone(), 0),
        Point::text(plain, 2),
        Point::text(italic, 0),
    ];
    for point in &points {
        for affinity in [Affinity::Backward, Affinity::Forward] {
            let once = normalize_point(point, &state, affinity);
            let twice = normalize_point(&once, &state, affinity);
            assert_eq!(once, twice, "{point:?} {affinity:?}");
            assert_eq!(once.kind, PointKind::Text);
        }
    }
}

#[test]
fn test_removing_selected_node_relocates_selection() {
    let mut editor = Editor::default();
    let (_, [bold, plain, _]) = mixed_paragraph(&mut editor);

    editor
        .update_with(UpdateOptions::discrete(), |txn| {
            txn.select_text(&plain, 1, 1)?;
            txn.remove(&plain)
        })
        .unwrap();

    let state = editor.editor_state();
    assert!(!state.contains(&plain));
    let Some(Selection::Range(range)) = state.selection() else {
        panic!("expected a range selection");
    };
    assert_eq!(range.anchor(), &Point::text(bold.clone(), 2));
    assert_eq!(range.focus(), &Point::text(bold, 2));
    state.check_invariants().unwrap();
}

#[test]
fn test_keyed_diff_through_editor() {
    let (mut editor, view) = editor_with_view();
    let blocks = seed(&mut editor, &["1", "2", "3"]);
    let (a, _) = blocks[0].clone();
    let root = view.handle_of(&NodeKey::root()).unwrap();
    let a_handle = view.handle_of(&a).unwrap();
    view.clear_ops();

    editor
        .update_with(UpdateOptions::discrete(), |txn| {
            let d = txn.create_paragraph()?;
            let text = txn.create_text("4")?;
            txn.append(&d, &[text.clone()])?;
            txn.append(&NodeKey::root(), &[d])?;
            txn.select_end(&text)?;
            txn.remove(&a)
        })
        .unwrap();

    let root_deltas: Vec<ViewDelta> = view
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            ViewOp::Patch { handle, deltas } if handle == root => Some(deltas),
            _ => None,
        })
        .flatten()
        .collect();
    let removes: Vec<_> = root_deltas
        .iter()
        .filter(|d| matches!(d, ViewDelta::RemoveChild { .. }))
        .collect();
    let inserts: Vec<_> = root_deltas
        .iter()
        .filter(|d| matches!(d, ViewDelta::InsertChild { .. }))
        .collect();

    assert_eq!(removes, [&ViewDelta::RemoveChild { child: a_handle }]);
    assert_eq!(inserts.len(), 1);
    assert!(matches!(inserts[0], ViewDelta::InsertChild { before: None, .. }));
    assert!(!view.ops().iter().any(|op| matches!(
        op,
        ViewOp::Patch { deltas, .. } if deltas.iter().any(|d| matches!(d, ViewDelta::MoveChild { .. }))
    )));
    assert_eq!(view.render_text(), "2\n\n3\n\n4");
}

#[test]
fn test_round_trip_preserves_content() {
    let mut source = Editor::default();
    mixed_paragraph(&mut source);
    seed(&mut source, &["second"]);
    let exported = source.editor_state().to_json_value().unwrap();

    let mut target = Editor::default();
    let state = target
        .parse_editor_state(&exported.to_string())
        .unwrap();
    target.set_editor_state(state).unwrap();

    assert_eq!(target.editor_state().to_json_value().unwrap(), exported);
}

#[test]
fn test_moving_child_between_paragraphs_keeps_element_selection() {
    let (mut editor, view) = editor_with_view();
    let mut keys = None;
    editor
        .update_with(UpdateOptions::discrete(), |txn| {
            let first = txn.create_paragraph()?;
            let a = txn.create_text("a")?;
            let br = txn.create_line_break()?;
            txn.append(&first, &[a, br.clone()])?;
            let second = txn.create_paragraph()?;
            let b = txn.create_text("b")?;
            txn.append(&second, &[b])?;
            txn.append(&NodeKey::root(), &[first.clone(), second.clone()])?;
            keys = Some((first, second, br));
            Ok(())
        })
        .unwrap();
    let (first, second, br) = keys.unwrap();

    editor
        .update_with(UpdateOptions::discrete(), |txn| {
            txn.select_range(Point::element(first.clone(), 2), Point::element(first.clone(), 2))?;
            txn.append(&second, &[br.clone()])
        })
        .unwrap();

    let state = editor.editor_state();
    state.check_invariants().unwrap();
    assert_eq!(state.children_size(&first), 1);
    assert_eq!(state.parent_of(&br), Some(&second));
    let Some(Selection::Range(selection)) = state.selection() else {
        panic!("expected a range selection");
    };
    assert_eq!(selection.anchor().key, first);
    assert_eq!(selection.anchor().offset, 1);
    assert_eq!(selection.anchor().kind, PointKind::Element);
    assert_eq!(selection.focus(), selection.anchor());
    assert_eq!(view.render_text(), state.text_content());
}

fn append_paragraph(txn: &mut Transaction<'_>, text: &str) -> EditorResult<()> {
    let p = txn.create_paragraph()?;
    let t = txn.create_text(text)?;
    txn.append(&p, &[t])?;
    txn.append(&NodeKey::root(), &[p])
}

#[test]
fn test_coalesced_updates_with_mixed_options() {
    let (mut editor, view) = editor_with_view();
    editor
        .register_node_transform("text", |txn, key| {
            let text = txn.text(key)?.text().to_string();
            let upper = text.to_uppercase();
            if upper != text {
                txn.set_text_content(key, &upper)?;
            }
            Ok(())
        })
        .unwrap();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    editor.register_update_listener(move |payload| {
        sink.lock()
            .unwrap()
            .push((payload.has_tag("quiet"), payload.has_tag("typed")));
    });
    let ran = Arc::new(Mutex::new(0));
    let counter = ran.clone();

    editor
        .update_with(
            UpdateOptions::default().skip_transforms().with_tag("quiet"),
            |txn| append_paragraph(txn, "a"),
        )
        .unwrap();
    editor
        .update_with(
            UpdateOptions::default()
                .with_tag("typed")
                .on_update(move || *counter.lock().unwrap() += 1),
            |txn| append_paragraph(txn, "b"),
        )
        .unwrap();
    assert!(editor.has_pending_update());
    assert_eq!(*ran.lock().unwrap(), 0);
    assert!(payloads.lock().unwrap().is_empty());

    editor
        .update_with(UpdateOptions::discrete(), |txn| append_paragraph(txn, "c"))
        .unwrap();

    assert!(!editor.has_pending_update());
    assert_eq!(editor.editor_state().text_content(), "A\n\nB\n\nC");
    assert_eq!(view.render_text(), "A\n\nB\n\nC");
    assert_eq!(*ran.lock().unwrap(), 1);
    assert_eq!(*payloads.lock().unwrap(), [(true, true)]);
}
