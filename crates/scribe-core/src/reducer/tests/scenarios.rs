use super::*;
use pretty_assertions::assert_eq;

#[test]
fn initial_snapshot_populates_files_without_active_file() {
    let mut state = state();
    assert!(state.files().is_empty());

    receive(
        &mut state,
        r#"{"status":"success","action":"initial_state","files":["agent.based"]}"#,
    );

    assert_eq!(state.files(), files(&["agent.based"]).as_slice());
    assert_eq!(state.active_file(), None);
}

#[test]
fn initial_snapshot_ignores_suggested_active_file() {
    let mut state = state();
    receive(
        &mut state,
        r#"{"status":"success","action":"initial_state","files":["a.based","b.based"],"activeFile":"b.based"}"#,
    );

    assert_eq!(state.active_file(), None);
    assert!(diagnostics(&state)
        .iter()
        .any(|message| message.contains("suggested active file b.based")));
}

#[test]
fn generated_diff_is_stored_and_locks_the_session() {
    let mut state = editing("a.based", "x");
    run_user(
        &mut state,
        UserAction::SubmitPrompt {
            text: "make it y".to_string(),
            context: None,
        },
    );
    assert!(state.is_busy());

    receive(
        &mut state,
        r#"{"status":"success","action":"diff_generated","filename":"a.based","diff":"...","old_code":"x","new_code":"y"}"#,
    );

    assert_eq!(
        state.diff("a.based"),
        Some(&DiffRecord::new("...", "x", "y"))
    );
    assert!(!state.is_busy());
    assert!(is_locked(&state));
}

#[test]
fn accepted_diff_is_applied_on_confirmation() {
    let mut state = editing("a.based", "x");
    propose_diff(&mut state, "a.based", "x", "y");

    let effects = run_user(
        &mut state,
        UserAction::AcceptDiff {
            filename: "a.based".to_string(),
        },
    );
    assert_eq!(
        sends(&effects),
        vec![ClientRequest::ApplyDiff {
            filename: "a.based".to_string(),
            diff: "...".to_string(),
        }]
    );
    assert!(state.is_busy());

    receive(
        &mut state,
        r#"{"status":"success","action":"diff_applied","filename":"a.based","new_code":"y"}"#,
    );

    assert_eq!(state.diff("a.based"), None);
    assert_eq!(state.buffer("a.based"), Some(&FileBuffer::loaded("y")));
    assert!(!state.is_busy());
    assert!(!is_locked(&state));
}

#[test]
fn failed_apply_voids_diff_and_keeps_buffer() {
    let mut state = editing("a.based", "x");
    propose_diff(&mut state, "a.based", "x", "y");
    run_user(
        &mut state,
        UserAction::AcceptDiff {
            filename: "a.based".to_string(),
        },
    );

    let effects = receive(
        &mut state,
        r#"{"status":"error","action":"apply_diff_error","filename":"a.based","error":"conflict"}"#,
    );

    assert_eq!(state.diff("a.based"), None);
    assert_eq!(state.buffer("a.based"), Some(&FileBuffer::loaded("x")));
    assert_eq!(state.last_error(), Some("conflict"));
    assert!(!state.is_busy());
    assert_eq!(
        notices(&effects),
        vec![Notice::new(
            NoticeLevel::Error,
            "apply_diff_error failed: conflict"
        )]
    );
}

#[test]
fn saved_text_comes_back_on_reopen() {
    let mut state = connected();
    start_session(&mut state, &["a.based", "b.based"]);
    open(&mut state, "a.based", "one");

    run_user(
        &mut state,
        UserAction::Edit {
            filename: "a.based".to_string(),
            text: "two".to_string(),
        },
    );
    let saved = sends(&run_user(&mut state, UserAction::Save));
    assert_eq!(
        saved,
        vec![ClientRequest::UploadFile {
            filename: "a.based".to_string(),
            content: "two".to_string(),
        }]
    );

    open(&mut state, "b.based", "other");
    let effects = run_user(&mut state, UserAction::SelectFile("a.based".to_string()));
    assert_eq!(
        sends(&effects),
        vec![ClientRequest::ReadFile {
            filename: "a.based".to_string(),
        }]
    );

    // A faithful peer echoes what was uploaded.
    receive(
        &mut state,
        r#"{"status":"success","action":"file_content","filename":"a.based","content":"two"}"#,
    );
    assert_eq!(state.display_text("a.based"), Some("two"));
}

#[test]
fn created_file_becomes_active_and_logged() {
    let mut state = connected();
    start_session(&mut state, &[]);
    run_user(
        &mut state,
        UserAction::SubmitPrompt {
            text: "Create a test agent".to_string(),
            context: None,
        },
    );

    let effects = receive(
        &mut state,
        r#"{"status":"success","action":"file_created","filename":"test.based","content":"say(1)","code":"say(1)","files":["test.based"]}"#,
    );

    assert_eq!(state.files(), files(&["test.based"]).as_slice());
    assert_eq!(state.active_file(), Some("test.based"));
    assert_eq!(state.buffer("test.based"), Some(&FileBuffer::loaded("say(1)")));
    assert!(!state.is_busy());
    let roles: Vec<ChatRole> = state.log().iter().map(|entry| entry.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::System]);
    assert_eq!(
        notices(&effects),
        vec![Notice::new(NoticeLevel::Success, "created test.based")]
    );
}

#[test]
fn file_list_update_clears_missing_active_file() {
    let mut state = editing("a.based", "x");
    receive(
        &mut state,
        r#"{"status":"success","action":"file_list","files":["b.based"]}"#,
    );

    assert_eq!(state.files(), files(&["b.based"]).as_slice());
    assert_eq!(state.active_file(), None);
}

#[test]
fn unsaved_edit_survives_a_shrinking_file_list() {
    let mut state = editing("a.based", "x");
    run_user(
        &mut state,
        UserAction::Edit {
            filename: "a.based".to_string(),
            text: "unsaved local edits".to_string(),
        },
    );

    receive(
        &mut state,
        r#"{"status":"success","action":"file_list","files":["b.based"]}"#,
    );
    receive(
        &mut state,
        r#"{"status":"success","action":"file_list","files":["a.based","b.based"]}"#,
    );

    assert_eq!(
        state.buffer("a.based"),
        Some(&FileBuffer {
            text: "unsaved local edits".to_string(),
            loaded: true,
            dirty: true,
        })
    );
}

#[test]
fn upload_ack_replaces_files_without_touching_content() {
    let mut state = editing("a.based", "x");
    let effects = receive(
        &mut state,
        r#"{"status":"success","action":"file_uploaded","filename":"a.based","files":["a.based","b.based"]}"#,
    );

    assert!(effects.is_empty());
    assert_eq!(state.files(), files(&["a.based", "b.based"]).as_slice());
    assert_eq!(state.buffer("a.based"), Some(&FileBuffer::loaded("x")));
}

#[test]
fn initial_snapshot_resets_the_session() {
    let mut state = editing("a.based", "x");
    run_user(
        &mut state,
        UserAction::SubmitPrompt {
            text: "hello".to_string(),
            context: None,
        },
    );
    propose_diff(&mut state, "a.based", "x", "y");

    receive(
        &mut state,
        r#"{"status":"success","action":"initial_state","files":["a.based"]}"#,
    );

    assert_eq!(state.active_file(), None);
    assert_eq!(state.buffer("a.based"), None);
    assert_eq!(state.diff("a.based"), None);
    assert!(state.log().is_empty());
    assert!(!state.is_busy());
}

#[test]
fn chat_ids_are_not_reused_after_reset() {
    let mut state = editing("a.based", "x");
    run_user(
        &mut state,
        UserAction::SubmitPrompt {
            text: "first".to_string(),
            context: None,
        },
    );
    let first = state.log()[0].id;

    start_session(&mut state, &["a.based"]);
    open(&mut state, "a.based", "x");
    run_user(
        &mut state,
        UserAction::SubmitPrompt {
            text: "second".to_string(),
            context: None,
        },
    );

    assert_eq!(state.log().len(), 1);
    assert!(state.log()[0].id > first);
}
