use std::time::Duration;

use super::actions::RuntimeAction;
use super::actions::SessionAction;
use super::actions::UserAction;
use super::config::EditPolicy;
use super::diff;
use super::diff::DiffRecord;
use super::lock::is_locked;
use super::protocol::ClientRequest;
use super::protocol::ServerEvent;
use super::protocol::ServerFailure;
use super::protocol::ServerMessage;
use super::state::ChatRole;
use super::state::ConnectionState;
use super::state::FileBuffer;
use super::state::LogLevel;
use super::state::LogSource;
use super::state::PendingKind;
use super::state::SessionState;

pub const REQUEST_TIMED_OUT: &str = "request timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(ClientRequest),
    Notify(Notice),
    ArmRequestTimeout { generation: u64, after: Duration },
}

fn notify(level: NoticeLevel, message: impl Into<String>) -> Effect {
    Effect::Notify(Notice::new(level, message))
}

pub fn reduce(state: &mut SessionState, action: SessionAction) -> Vec<Effect> {
    match action {
        SessionAction::User(user) => reduce_user(state, user),
        SessionAction::Runtime(runtime) => reduce_runtime(state, runtime),
    }
}

fn refuse(state: &mut SessionState, action: &str, reason: &str) -> Vec<Effect> {
    state.record(
        LogLevel::Debug,
        LogSource::Handler,
        format!("{action} refused: {reason}"),
    );
    Vec::new()
}

/// Sends a request that holds the busy token, arming the client-side timeout
/// for it when one is configured.
fn send_blocking(state: &SessionState, request: ClientRequest) -> Vec<Effect> {
    let mut effects = vec![Effect::Send(request)];
    if let (Some(pending), Some(after)) = (state.pending(), state.config.request_timeout()) {
        effects.push(Effect::ArmRequestTimeout {
            generation: pending.generation,
            after,
        });
    }
    effects
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn reduce_user(state: &mut SessionState, action: UserAction) -> Vec<Effect> {
    let label = action.label();
    match action {
        UserAction::SelectFile(filename) => {
            if state.active_file() == Some(filename.as_str()) {
                return Vec::new();
            }
            if is_locked(state) {
                return refuse(state, label, "session is locked");
            }
            if !state.is_listed(&filename) {
                return refuse(state, label, "file is not listed");
            }

            let mut effects = Vec::new();
            if let Some(previous) = state.active_file.clone() {
                if let Some(buffer) = state.buffers.get_mut(&previous) {
                    if buffer.loaded && buffer.dirty {
                        buffer.dirty = false;
                        effects.push(Effect::Send(ClientRequest::UploadFile {
                            filename: previous.clone(),
                            content: buffer.text.clone(),
                        }));
                        effects.push(notify(
                            NoticeLevel::Info,
                            format!("auto-saved {previous}"),
                        ));
                    }
                }
            }

            state.active_file = Some(filename.clone());
            state
                .buffers
                .entry(filename.clone())
                .or_insert_with(FileBuffer::placeholder);
            effects.push(Effect::Send(ClientRequest::ReadFile { filename }));
            effects
        }
        UserAction::Edit { filename, text } => {
            if is_locked(state) {
                return refuse(state, label, "session is locked");
            }
            if !state.is_listed(&filename) {
                return refuse(state, label, "file is not listed");
            }

            let mut effects = Vec::new();
            if state.config.edit_policy == EditPolicy::DiscardDiff
                && diff::discard(state, &filename).is_some()
            {
                effects.push(notify(
                    NoticeLevel::Info,
                    format!("discarded pending changes to {filename}"),
                ));
            }
            state.buffers.insert(
                filename,
                FileBuffer {
                    text,
                    loaded: true,
                    dirty: true,
                },
            );
            effects
        }
        UserAction::Save => {
            let Some(filename) = state.active_file.clone() else {
                return refuse(state, label, "no active file");
            };
            if is_locked(state) {
                return refuse(state, label, "session is locked");
            }
            let content = match state.buffers.get_mut(&filename) {
                Some(buffer) if buffer.loaded => {
                    buffer.dirty = false;
                    buffer.text.clone()
                }
                _ => return refuse(state, label, "no loaded content"),
            };
            vec![
                Effect::Send(ClientRequest::UploadFile {
                    filename: filename.clone(),
                    content,
                }),
                notify(NoticeLevel::Success, format!("saved {filename}")),
            ]
        }
        UserAction::SubmitPrompt { text, context } => {
            if text.trim().is_empty() {
                return refuse(state, label, "empty prompt");
            }
            if is_locked(state) {
                return refuse(state, label, "session is locked");
            }
            if state.connection != ConnectionState::Connected {
                return refuse(state, label, "not connected");
            }

            let context = non_empty(context);
            state.push_chat(ChatRole::User, text.clone());
            if let Some(context) = &context {
                state.push_chat(ChatRole::System, format!("context: {context}"));
            }
            state.begin_busy(PendingKind::Prompt);
            let request = ClientRequest::Prompt {
                prompt: text,
                active_file: state.active_file.clone(),
                context,
            };
            send_blocking(state, request)
        }
        UserAction::RequestDiff { prompt, context } => {
            if prompt.trim().is_empty() {
                return refuse(state, label, "empty prompt");
            }
            let Some(filename) = state.active_file.clone() else {
                return refuse(state, label, "no active file");
            };
            if is_locked(state) {
                return refuse(state, label, "session is locked");
            }
            if state.connection != ConnectionState::Connected {
                return refuse(state, label, "not connected");
            }
            let current_code = state
                .buffer(&filename)
                .filter(|buffer| buffer.loaded)
                .map(|buffer| buffer.text.clone());
            let Some(current_code) = current_code else {
                return refuse(state, label, "no loaded content");
            };

            let context = non_empty(context);
            state.push_chat(ChatRole::User, prompt.clone());
            state.begin_busy(PendingKind::GenerateDiff {
                filename: filename.clone(),
            });
            let request = ClientRequest::GenerateDiff {
                prompt,
                filename,
                current_code,
                context,
            };
            send_blocking(state, request)
        }
        UserAction::AcceptDiff { filename } => {
            if state.is_busy() {
                return refuse(state, label, "a request is outstanding");
            }
            if state.diff(&filename).is_none() {
                return refuse(state, label, "no pending diff");
            }
            if state.connection != ConnectionState::Connected {
                return refuse(state, label, "not connected");
            }
            match diff::begin_apply(state, &filename) {
                Some(request) => send_blocking(state, request),
                None => refuse(state, label, "diff is not pending"),
            }
        }
        UserAction::RejectDiff { filename } => {
            if state.is_busy() {
                return refuse(state, label, "a request is outstanding");
            }
            match diff::discard(state, &filename) {
                Some(_) => {
                    state.record(
                        LogLevel::Info,
                        LogSource::Handler,
                        format!("discarded diff for {filename}"),
                    );
                    vec![notify(
                        NoticeLevel::Info,
                        format!("discarded proposed changes to {filename}"),
                    )]
                }
                None => refuse(state, label, "no pending diff"),
            }
        }
        UserAction::RefreshFiles => vec![Effect::Send(ClientRequest::ListFiles)],
        UserAction::UpdateContext { context } => {
            if is_locked(state) {
                return refuse(state, label, "session is locked");
            }
            vec![
                Effect::Send(ClientRequest::UpdateContext { context }),
                notify(NoticeLevel::Info, "context updated"),
            ]
        }
    }
}

fn reduce_runtime(state: &mut SessionState, action: RuntimeAction) -> Vec<Effect> {
    match action {
        RuntimeAction::MessageReceived(ServerMessage::Success(event)) => apply_event(state, event),
        RuntimeAction::MessageReceived(ServerMessage::Failure(failure)) => {
            apply_failure(state, failure)
        }
        RuntimeAction::MalformedMessage { reason } => {
            state.clear_busy();
            state.record(
                LogLevel::Warn,
                LogSource::Peer,
                format!("discarded malformed message: {reason}"),
            );
            vec![notify(
                NoticeLevel::Error,
                "received an unreadable message from the agent",
            )]
        }
        RuntimeAction::ConnectionChanged(next) => {
            let previous = state.connection;
            if previous == next {
                return Vec::new();
            }
            state.connection = next;
            state.record(
                LogLevel::Info,
                LogSource::Connection,
                format!("{} -> {}", previous.label(), next.label()),
            );

            match (previous, next) {
                (ConnectionState::Connected, ConnectionState::Disconnected) => {
                    state.connection_lost = true;
                    vec![notify(NoticeLevel::Warning, "connection lost; reconnecting")]
                }
                (_, ConnectionState::Connected) if state.connection_lost => {
                    state.connection_lost = false;
                    vec![notify(NoticeLevel::Success, "reconnected")]
                }
                _ => Vec::new(),
            }
        }
        RuntimeAction::RequestTimedOut { generation } => {
            let outstanding = state
                .pending()
                .is_some_and(|pending| pending.generation == generation);
            if !outstanding {
                state.record(
                    LogLevel::Debug,
                    LogSource::Handler,
                    format!("ignored stale timeout for request #{generation}"),
                );
                return Vec::new();
            }

            let label = state
                .clear_busy()
                .map(|pending| pending.kind.label())
                .unwrap_or("request");
            state.last_error = Some(REQUEST_TIMED_OUT.to_string());
            state.record(
                LogLevel::Warn,
                LogSource::Handler,
                format!("{label} request #{generation} timed out"),
            );
            vec![notify(
                NoticeLevel::Error,
                format!("{label} request timed out"),
            )]
        }
    }
}

fn apply_event(state: &mut SessionState, event: ServerEvent) -> Vec<Effect> {
    state.record(
        LogLevel::Info,
        LogSource::Peer,
        format!("received {}", event.action()),
    );

    match event {
        ServerEvent::InitialState { files, active_file } => {
            if let Some(active) = active_file {
                state.record(
                    LogLevel::Debug,
                    LogSource::Peer,
                    format!("snapshot suggested active file {active}"),
                );
            }
            state.buffers.clear();
            state.diffs.clear();
            state.log.clear();
            state.active_file = None;
            state.replace_files(files);
            state.clear_busy();
            Vec::new()
        }
        ServerEvent::FileList { files } => {
            state.replace_files(files);
            Vec::new()
        }
        ServerEvent::FileContent { filename, content } => {
            if state.active_file() != Some(filename.as_str()) {
                state.record(
                    LogLevel::Debug,
                    LogSource::Peer,
                    format!("ignored stale read reply for {filename}"),
                );
                return Vec::new();
            }
            diff::void(state, &filename);
            state
                .buffers
                .insert(filename, FileBuffer::loaded(content));
            Vec::new()
        }
        ServerEvent::FileCreated {
            filename,
            content,
            files,
        } => {
            if let Some(files) = files {
                state.replace_files(files);
            }
            state.ensure_listed(&filename);
            state.active_file = Some(filename.clone());
            state
                .buffers
                .insert(filename.clone(), FileBuffer::loaded(content));
            state.push_chat(ChatRole::System, format!("Created {filename}"));
            state.clear_busy();
            vec![notify(NoticeLevel::Success, format!("created {filename}"))]
        }
        ServerEvent::DiffGenerated {
            filename,
            diff: patch,
            old_code,
            new_code,
        } => {
            state.clear_busy();
            let (Some(filename), Some(patch)) = (filename, patch.filter(|patch| !patch.is_empty()))
            else {
                state.push_chat(ChatRole::Agent, "No changes proposed");
                return vec![notify(NoticeLevel::Info, "agent proposed no changes")];
            };

            let record = DiffRecord::new(patch, old_code, new_code);
            let summary = record.summary();
            if diff::begin_review(state, &filename, record) {
                state.record(
                    LogLevel::Debug,
                    LogSource::Peer,
                    format!("replaced earlier diff for {filename}"),
                );
            }
            state.push_chat(
                ChatRole::Agent,
                format!("Proposed changes to {filename} ({summary})"),
            );
            vec![notify(
                NoticeLevel::Info,
                format!("review proposed changes to {filename}"),
            )]
        }
        ServerEvent::DiffApplied { filename, new_code } => {
            diff::finish_apply(state, &filename, new_code);
            state.push_chat(ChatRole::System, format!("Applied changes to {filename}"));
            state.clear_busy();
            vec![notify(
                NoticeLevel::Success,
                format!("applied changes to {filename}"),
            )]
        }
        ServerEvent::FileUploaded { filename, files } => {
            if let Some(filename) = filename {
                state.record(
                    LogLevel::Debug,
                    LogSource::Peer,
                    format!("peer stored {filename}"),
                );
            }
            if let Some(files) = files {
                state.replace_files(files);
            }
            Vec::new()
        }
        ServerEvent::Unrecognized { action } => {
            state.clear_busy();
            state.record(
                LogLevel::Warn,
                LogSource::Peer,
                format!(
                    "unrecognized action {}",
                    action.as_deref().unwrap_or("<none>")
                ),
            );
            Vec::new()
        }
    }
}

fn apply_failure(state: &mut SessionState, failure: ServerFailure) -> Vec<Effect> {
    let action = failure.action.as_deref().unwrap_or("request");
    state.record(
        LogLevel::Error,
        LogSource::Peer,
        format!("{action} failed: {}", failure.error),
    );

    let applying = match state.pending().map(|pending| &pending.kind) {
        Some(PendingKind::ApplyDiff { filename }) => Some(filename.clone()),
        _ => None,
    };
    // Only an apply error names the file whose diff it rejects.
    let voided = if failure.is_apply_failure() {
        failure.filename.clone().or(applying)
    } else {
        applying
    };
    if let Some(filename) = voided {
        diff::void(state, &filename);
    }

    let message = format!("{action} failed: {}", failure.error);
    state.last_error = Some(failure.error);
    state.clear_busy();
    vec![notify(NoticeLevel::Error, message)]
}

#[cfg(test)]
mod tests;
