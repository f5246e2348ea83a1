//! Per-file diff lifecycle.
//!
//! A file moves `None -> Pending` when the peer proposes a patch, `Pending ->
//! Applying` when the user accepts, and back to `None` when the peer confirms
//! or rejects the apply, when the user discards, or when the file is re-read.
//! The phase is derived from the session rather than stored, so it cannot
//! drift from the diff record and the outstanding request.

use std::fmt;

use crate::protocol::ClientRequest;
use crate::state::FileBuffer;
use crate::state::PendingKind;
use crate::state::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub patch: String,
    pub before_text: String,
    pub after_text: String,
}

impl DiffRecord {
    pub fn new(
        patch: impl Into<String>,
        before_text: impl Into<String>,
        after_text: impl Into<String>,
    ) -> Self {
        Self {
            patch: patch.into(),
            before_text: before_text.into(),
            after_text: after_text.into(),
        }
    }

    pub fn display_text(&self) -> &str {
        &self.before_text
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for line in self.patch.lines() {
            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            }
            if line.starts_with('+') {
                summary.added += 1;
            } else if line.starts_with('-') {
                summary.removed += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{} -{}", self.added, self.removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffPhase {
    None,
    Pending,
    Applying,
}

impl DiffPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Applying => "applying",
        }
    }
}

pub fn phase(state: &SessionState, filename: &str) -> DiffPhase {
    if state.diff(filename).is_none() {
        return DiffPhase::None;
    }
    match state.pending().map(|pending| &pending.kind) {
        Some(PendingKind::ApplyDiff { filename: applying }) if applying == filename => {
            DiffPhase::Applying
        }
        _ => DiffPhase::Pending,
    }
}

/// Stores a proposed diff, replacing any earlier one for the same file.
/// Returns true when a previous record was replaced.
pub(crate) fn begin_review(state: &mut SessionState, filename: &str, record: DiffRecord) -> bool {
    state.ensure_listed(filename);
    state.diffs.insert(filename.to_string(), record).is_some()
}

/// Marks the file's diff as being applied and builds the apply request.
/// Returns `None` unless the diff is pending and nothing else is outstanding.
pub(crate) fn begin_apply(state: &mut SessionState, filename: &str) -> Option<ClientRequest> {
    if state.busy || phase(state, filename) != DiffPhase::Pending {
        return None;
    }
    let patch = state.diff(filename)?.patch.clone();
    state.begin_busy(PendingKind::ApplyDiff {
        filename: filename.to_string(),
    });
    Some(ClientRequest::ApplyDiff {
        filename: filename.to_string(),
        diff: patch,
    })
}

pub(crate) fn finish_apply(state: &mut SessionState, filename: &str, new_code: String) {
    state.diffs.remove(filename);
    state.ensure_listed(filename);
    state
        .buffers
        .insert(filename.to_string(), FileBuffer::loaded(new_code));
}

/// Drops the record after a failed apply; the buffer keeps its pre-diff text.
pub(crate) fn void(state: &mut SessionState, filename: &str) -> Option<DiffRecord> {
    state.diffs.remove(filename)
}

pub(crate) fn discard(state: &mut SessionState, filename: &str) -> Option<DiffRecord> {
    if phase(state, filename) != DiffPhase::Pending {
        return None;
    }
    state.diffs.remove(filename)
}
