// Stdio frame - one chunk of plugin output on the daemon transport

use plugin_runtime_core::port::StdioStream;
use serde::{Deserialize, Serialize};

/// Raw output bytes read from one plugin stream
///
/// Bytes are forwarded as read: no line splitting, no decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioFrame {
    pub session_id: String,
    pub identity: String,
    pub stream: StdioStream,
    pub bytes: Vec<u8>,
}

impl StdioFrame {
    /// Lossy UTF-8 view of the bytes, for logging
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}
