use std::fmt::Write;

use scribe_core::ChatEntry;
use scribe_core::ChatRole;
use scribe_core::LockView;
use scribe_core::SessionState;

pub fn render_files(state: &SessionState) -> String {
    if state.files().is_empty() {
        return "(no files)".to_string();
    }
    let mut out = String::new();
    for file in state.files() {
        let marker = if state.active_file() == Some(file.as_str()) {
            '*'
        } else {
            ' '
        };
        let pending = if state.diff(file).is_some() {
            " (diff pending)"
        } else {
            ""
        };
        let _ = writeln!(out, "{marker} {file}{pending}");
    }
    out.trim_end().to_string()
}

pub fn render_status(state: &SessionState) -> String {
    let lock = LockView::of(state);
    let mut parts = vec![state.connection().label().to_string()];
    if let Some(active) = state.active_file() {
        parts.push(active.to_string());
    }
    if let Some(pending) = state.pending() {
        parts.push(format!("waiting on {}", pending.kind.label()));
    } else if lock.can_resolve_diff {
        parts.push("review diff: /accept or /reject".to_string());
    }
    if let Some(error) = state.last_error() {
        parts.push(format!("last error: {error}"));
    }
    format!("[{}]", parts.join(" | "))
}

pub fn render_active(state: &SessionState) -> String {
    let Some(active) = state.active_file() else {
        return "(no file open; use /open NAME)".to_string();
    };

    let mut out = format!("== {active} ==\n");
    if let Some(diff) = state.diff(active) {
        out.push_str(diff.display_text());
        let _ = write!(
            out,
            "\n-- proposed changes ({}) --\n{}",
            diff.summary(),
            diff.patch
        );
        return out;
    }

    match state.buffer(active) {
        Some(buffer) if buffer.loaded => {
            out.push_str(&buffer.text);
            if buffer.dirty {
                out.push_str("\n(unsaved)");
            }
        }
        _ => out.push_str("(loading...)"),
    }
    out
}

pub fn render_entry(entry: &ChatEntry) -> String {
    match entry.role {
        ChatRole::User => format!("you> {}", entry.text),
        ChatRole::Agent => format!("agent> {}", entry.text),
        ChatRole::System => format!("-- {}", entry.text),
    }
}

pub fn render_log(state: &SessionState) -> String {
    if state.log().is_empty() {
        return "(no messages)".to_string();
    }
    state
        .log()
        .iter()
        .map(render_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_diagnostics(state: &SessionState) -> String {
    state
        .diagnostics()
        .iter()
        .map(|entry| {
            format!(
                "#{} {} {}: {}",
                entry.seq,
                entry.level.label(),
                entry.source.label(),
                entry.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use scribe_core::protocol::decode_message;
    use scribe_core::ConnectionState;
    use scribe_core::RuntimeAction;
    use scribe_core::SessionAction;
    use scribe_core::SessionStore;
    use scribe_core::UserAction;

    use super::*;

    fn receive(store: &mut SessionStore, text: &str) {
        let message = decode_message(text).expect("fixture decodes");
        store.dispatch(SessionAction::Runtime(RuntimeAction::MessageReceived(
            message,
        )));
    }

    fn session() -> SessionStore {
        let mut store = SessionStore::default();
        store.dispatch(SessionAction::Runtime(RuntimeAction::ConnectionChanged(
            ConnectionState::Connected,
        )));
        receive(
            &mut store,
            r#"{"status":"success","action":"initial_state","files":["a.based","b.based"]}"#,
        );
        store.dispatch(SessionAction::User(UserAction::SelectFile(
            "a.based".to_string(),
        )));
        store
    }

    #[test]
    fn files_mark_active_and_pending() {
        let mut store = session();
        receive(
            &mut store,
            r#"{"status":"success","action":"diff_generated","filename":"b.based","diff":"+y","old_code":"","new_code":"y"}"#,
        );

        assert_eq!(
            render_files(store.state()),
            "* a.based\n  b.based (diff pending)"
        );
    }

    #[test]
    fn active_file_shows_loading_then_text() {
        let mut store = session();
        assert_eq!(render_active(store.state()), "== a.based ==\n(loading...)");

        receive(
            &mut store,
            r#"{"status":"success","action":"file_content","filename":"a.based","content":"say(1)"}"#,
        );
        assert_eq!(render_active(store.state()), "== a.based ==\nsay(1)");
    }

    #[test]
    fn pending_diff_shows_before_text_and_patch() {
        let mut store = session();
        receive(
            &mut store,
            r#"{"status":"success","action":"diff_generated","filename":"a.based","diff":"-x\n+y","old_code":"x","new_code":"y"}"#,
        );

        assert_eq!(
            render_active(store.state()),
            "== a.based ==\nx\n-- proposed changes (+1 -1) --\n-x\n+y"
        );
        assert_eq!(
            render_status(store.state()),
            "[connected | a.based | review diff: /accept or /reject]"
        );
    }

    #[test]
    fn log_renders_roles() {
        let mut store = session();
        receive(
            &mut store,
            r#"{"status":"success","action":"file_content","filename":"a.based","content":"x"}"#,
        );
        store.dispatch(SessionAction::User(UserAction::SubmitPrompt {
            text: "make it y".to_string(),
            context: None,
        }));

        assert_eq!(render_log(store.state()), "you> make it y");
        assert_eq!(
            render_status(store.state()),
            "[connected | a.based | waiting on prompt]"
        );
    }
}
