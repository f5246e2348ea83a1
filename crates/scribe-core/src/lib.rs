pub mod actions;
pub mod config;
pub mod diff;
pub mod lock;
pub mod protocol;
pub mod reducer;
pub mod state;

pub use actions::*;
pub use reducer::*;
pub use state::*;
pub use diff::DiffPhase;
pub use diff::DiffRecord;
pub use lock::is_locked;
pub use lock::LockView;
