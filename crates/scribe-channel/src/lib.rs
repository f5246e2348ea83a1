//! WebSocket channel to the agent peer.

pub mod channel;
pub mod error;

pub use channel::Channel;
pub use channel::ChannelConfig;
pub use channel::Frame;
pub use error::ChannelError;
pub use error::Result;
pub use scribe_core::ConnectionState;
