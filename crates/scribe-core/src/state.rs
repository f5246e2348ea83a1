use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::actions::SessionAction;
use crate::config::SessionConfig;
use crate::diff::DiffRecord;
use crate::reducer::reduce;
use crate::reducer::Effect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChatEntryId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Agent,
    System,
}

impl ChatRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub id: ChatEntryId,
    pub role: ChatRole,
    pub text: String,
}

/// Client-side copy of one file's text.
///
/// `loaded` is false for the placeholder seeded on selection until the read
/// reply lands. `dirty` means edited since the text last came from the peer
/// or was saved to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBuffer {
    pub text: String,
    pub loaded: bool,
    pub dirty: bool,
}

impl FileBuffer {
    pub fn placeholder() -> Self {
        Self {
            text: String::new(),
            loaded: false,
            dirty: false,
        }
    }

    pub fn loaded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            loaded: true,
            dirty: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    Prompt,
    GenerateDiff { filename: String },
    ApplyDiff { filename: String },
}

impl PendingKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::GenerateDiff { .. } => "diff",
            Self::ApplyDiff { .. } => "apply",
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Prompt => None,
            Self::GenerateDiff { filename } | Self::ApplyDiff { filename } => Some(filename),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub kind: PendingKind,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Peer,
    Handler,
    Connection,
}

impl LogSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Handler => "handler",
            Self::Connection => "connection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LogBuffer {
    cap: usize,
    next_seq: u64,
    buf: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            next_seq: 1,
            buf: VecDeque::with_capacity(cap),
        }
    }

    pub fn append(&mut self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        let entry = LogEntry {
            seq: self.next_seq,
            level,
            source,
            message: message.into(),
        };
        self.next_seq += 1;

        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.next_seq = 1;
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.buf.iter()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) files: Vec<String>,
    pub(crate) active_file: Option<String>,
    pub(crate) buffers: BTreeMap<String, FileBuffer>,
    pub(crate) diffs: BTreeMap<String, DiffRecord>,
    pub(crate) log: Vec<ChatEntry>,
    pub(crate) next_entry_id: u64,
    pub(crate) busy: bool,
    pub(crate) pending: Option<PendingRequest>,
    pub(crate) next_generation: u64,
    pub(crate) last_error: Option<String>,
    pub(crate) connection: ConnectionState,
    pub(crate) connection_lost: bool,
    pub(crate) diagnostics: LogBuffer,
    pub(crate) config: SessionConfig,
}

impl SessionState {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            files: Vec::new(),
            active_file: None,
            buffers: BTreeMap::new(),
            diffs: BTreeMap::new(),
            log: Vec::new(),
            next_entry_id: 1,
            busy: false,
            pending: None,
            next_generation: 1,
            last_error: None,
            connection: ConnectionState::Disconnected,
            connection_lost: false,
            diagnostics: LogBuffer::new(config.diagnostics_capacity),
            config,
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn is_listed(&self, filename: &str) -> bool {
        self.files.iter().any(|file| file == filename)
    }

    pub fn active_file(&self) -> Option<&str> {
        self.active_file.as_deref()
    }

    pub fn buffer(&self, filename: &str) -> Option<&FileBuffer> {
        self.buffers.get(filename)
    }

    pub fn active_buffer(&self) -> Option<&FileBuffer> {
        self.active_file().and_then(|file| self.buffer(file))
    }

    pub fn diff(&self, filename: &str) -> Option<&DiffRecord> {
        self.diffs.get(filename)
    }

    pub fn active_diff(&self) -> Option<&DiffRecord> {
        self.active_file().and_then(|file| self.diff(file))
    }

    pub fn diffs(&self) -> impl Iterator<Item = (&str, &DiffRecord)> {
        self.diffs.iter().map(|(file, diff)| (file.as_str(), diff))
    }

    /// Text a view should show for `filename`: the pre-diff text while a
    /// diff is pending, otherwise the buffer.
    pub fn display_text(&self, filename: &str) -> Option<&str> {
        match self.diff(filename) {
            Some(diff) => Some(diff.display_text()),
            None => self.buffer(filename).map(|buffer| buffer.text.as_str()),
        }
    }

    pub fn log(&self) -> &[ChatEntry] {
        &self.log
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn diagnostics(&self) -> &LogBuffer {
        &self.diagnostics
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn push_chat(&mut self, role: ChatRole, text: impl Into<String>) -> ChatEntryId {
        let id = ChatEntryId(self.next_entry_id);
        self.next_entry_id += 1;
        self.log.push(ChatEntry {
            id,
            role,
            text: text.into(),
        });
        id
    }

    pub(crate) fn record(&mut self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        self.diagnostics.append(level, source, message);
    }

    /// Replaces the file list, deduplicating in order. Diffs for files that
    /// are no longer listed are dropped, and so is the active file. Buffers
    /// survive so unsaved edits outlive a transient listing.
    pub(crate) fn replace_files(&mut self, files: Vec<String>) {
        let mut listed: Vec<String> = Vec::with_capacity(files.len());
        for file in files {
            if !listed.contains(&file) {
                listed.push(file);
            }
        }
        self.files = listed;

        let files = &self.files;
        self.diffs.retain(|file, _| files.contains(file));

        let active_missing = self
            .active_file
            .as_ref()
            .is_some_and(|active| !self.files.contains(active));
        if active_missing {
            self.active_file = None;
        }
    }

    pub(crate) fn ensure_listed(&mut self, filename: &str) {
        if !self.is_listed(filename) {
            self.files.push(filename.to_string());
        }
    }

    pub(crate) fn begin_busy(&mut self, kind: PendingKind) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.busy = true;
        self.pending = Some(PendingRequest { kind, generation });
        generation
    }

    pub(crate) fn clear_busy(&mut self) -> Option<PendingRequest> {
        self.busy = false;
        self.pending.take()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Owner of the current session snapshot.
///
/// Presentation code holds `Arc` snapshots; dispatch copies on write when a
/// snapshot is still shared.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    state: Arc<SessionState>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: Arc::new(SessionState::new(config)),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    pub fn dispatch(&mut self, action: SessionAction) -> Vec<Effect> {
        reduce(Arc::make_mut(&mut self.state), action)
    }
}
