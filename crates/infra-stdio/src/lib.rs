// Plugin Runtime Infrastructure - Stdio Adapter
// Implements: StdioBroker, StdioSession

pub mod channel_broker;
pub mod frame;

pub use channel_broker::{ChannelSession, ChannelStdioBroker};
pub use frame::StdioFrame;

/// Read size of a single relay step
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
