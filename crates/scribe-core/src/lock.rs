use crate::state::SessionState;

pub fn is_locked(state: &SessionState) -> bool {
    state.is_busy() || state.active_diff().is_some()
}

/// What the presentation layer may offer right now.
///
/// Diff resolution stays available while locked by a pending diff, since it
/// is the only way out of that lock, but not while a request is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockView {
    pub locked: bool,
    pub can_switch_file: bool,
    pub can_edit: bool,
    pub can_save: bool,
    pub can_submit: bool,
    pub can_resolve_diff: bool,
}

impl LockView {
    pub fn of(state: &SessionState) -> Self {
        let locked = is_locked(state);
        let has_loaded_buffer = state.active_buffer().is_some_and(|buffer| buffer.loaded);
        Self {
            locked,
            can_switch_file: !locked,
            can_edit: !locked && state.active_file().is_some(),
            can_save: !locked && has_loaded_buffer,
            can_submit: !locked,
            can_resolve_diff: !state.is_busy() && state.active_diff().is_some(),
        }
    }
}
