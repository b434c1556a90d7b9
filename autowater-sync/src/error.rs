//! Error types for the sync layer.

use autowater_types::{CommandId, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Transport-level failures. Transient; recovered by reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The controller could not be reached.
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The controller did not answer in time.
    #[error("link operation timed out")]
    Timeout,

    /// The link is not connected.
    #[error("link disconnected")]
    Disconnected,
}

/// An inbound frame that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Bad framing or a body that does not match its declared type.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A well-formed frame of a type this side does not know.
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    /// Declared body length over the frame limit.
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
}

/// Why a command ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No acknowledgement after the configured number of sends.
    RetriesExhausted { attempts: u32 },
    /// The link was down, or went down while the command was live.
    Disconnected,
    /// A caller cancelled the command.
    Cancelled,
    /// The transport rejected the write for a reason other than disconnect.
    SendFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetriesExhausted { attempts } => {
                write!(f, "no acknowledgement after {attempts} attempts")
            }
            Self::Disconnected => f.write_str("link disconnected"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::SendFailed => f.write_str("send failed"),
        }
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport error.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Undecodable frame.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Rejected proposal.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A command reached the `Failed` state.
    #[error("command {command_id} failed: {reason}")]
    CommandFailed {
        command_id: CommandId,
        reason: FailureReason,
    },

    /// No live or recorded command with this id.
    #[error("unknown command: {0}")]
    UnknownCommand(CommandId),

    /// Engine background tasks are gone.
    #[error("channel closed")]
    ChannelClosed,
}
