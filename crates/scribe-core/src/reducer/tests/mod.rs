pub(super) use super::reduce;
pub(super) use super::Effect;
pub(super) use super::Notice;
pub(super) use super::NoticeLevel;
pub(super) use super::REQUEST_TIMED_OUT;
pub(super) use crate::actions::RuntimeAction;
pub(super) use crate::actions::SessionAction;
pub(super) use crate::actions::UserAction;
pub(super) use crate::config::EditPolicy;
pub(super) use crate::config::SessionConfig;
pub(super) use crate::diff::phase;
pub(super) use crate::diff::DiffPhase;
pub(super) use crate::diff::DiffRecord;
pub(super) use crate::lock::is_locked;
pub(super) use crate::lock::LockView;
pub(super) use crate::protocol::decode_message;
pub(super) use crate::protocol::ClientRequest;
pub(super) use crate::state::ChatRole;
pub(super) use crate::state::ConnectionState;
pub(super) use crate::state::FileBuffer;
pub(super) use crate::state::LogBuffer;
pub(super) use crate::state::LogLevel;
pub(super) use crate::state::LogSource;
pub(super) use crate::state::PendingKind;
pub(super) use crate::state::SessionState;
pub(super) use crate::state::SessionStore;
pub(super) use std::time::Duration;

mod scenarios;

fn state() -> SessionState {
    SessionState::default()
}

fn connected() -> SessionState {
    let mut state = state();
    run_runtime(
        &mut state,
        RuntimeAction::ConnectionChanged(ConnectionState::Connected),
    );
    state
}

fn run_user(state: &mut SessionState, action: UserAction) -> Vec<Effect> {
    reduce(state, SessionAction::User(action))
}

fn run_runtime(state: &mut SessionState, action: RuntimeAction) -> Vec<Effect> {
    reduce(state, SessionAction::Runtime(action))
}

/// Feeds raw wire text through the codec the way the event loop does.
fn receive(state: &mut SessionState, text: &str) -> Vec<Effect> {
    let action = match decode_message(text) {
        Ok(message) => RuntimeAction::MessageReceived(message),
        Err(err) => RuntimeAction::MalformedMessage {
            reason: err.to_string(),
        },
    };
    run_runtime(state, action)
}

fn sends(effects: &[Effect]) -> Vec<ClientRequest> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Send(request) => Some(request.clone()),
            _ => None,
        })
        .collect()
}

fn notices(effects: &[Effect]) -> Vec<Notice> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Notify(notice) => Some(notice.clone()),
            _ => None,
        })
        .collect()
}

fn files(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn start_session(state: &mut SessionState, names: &[&str]) {
    let payload = serde_json::json!({
        "status": "success",
        "action": "initial_state",
        "files": names,
    });
    receive(state, &payload.to_string());
}

/// A connected session with `name` listed, active and loaded with `content`.
fn editing(name: &str, content: &str) -> SessionState {
    let mut state = connected();
    start_session(&mut state, &[name]);
    open(&mut state, name, content);
    state
}

fn open(state: &mut SessionState, name: &str, content: &str) {
    run_user(state, UserAction::SelectFile(name.to_string()));
    let payload = serde_json::json!({
        "status": "success",
        "action": "file_content",
        "filename": name,
        "content": content,
    });
    receive(state, &payload.to_string());
}

fn propose_diff(state: &mut SessionState, name: &str, old_code: &str, new_code: &str) {
    let payload = serde_json::json!({
        "status": "success",
        "action": "diff_generated",
        "filename": name,
        "diff": "...",
        "old_code": old_code,
        "new_code": new_code,
    });
    receive(state, &payload.to_string());
}

fn diagnostics(state: &SessionState) -> Vec<String> {
    state
        .diagnostics()
        .iter()
        .map(|entry| entry.message.clone())
        .collect()
}
