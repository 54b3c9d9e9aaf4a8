//! ChainPack decode error types.

use thiserror::Error;

/// Errors raised while unpacking ChainPack bytes.
///
/// `Incomplete` is recoverable: the caller keeps its buffered bytes and
/// retries once more input arrives. `Malformed` is fatal to the packet;
/// stream framing can no longer be trusted past it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackError {
    /// Stream ends mid-value (need more data)
    #[error("incomplete value")]
    Incomplete,

    /// Structurally invalid bytes
    #[error("malformed value: {0}")]
    Malformed(&'static str),
}

impl UnpackError {
    /// True when more input could let the decode succeed
    pub fn is_incomplete(&self) -> bool {
        matches!(self, UnpackError::Incomplete)
    }
}
