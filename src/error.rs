use thiserror::Error;

use crate::message::Role;

/// Failure to turn a range specification into a window of messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid range {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },

    #[error("thread has no messages")]
    Empty,

    #[error("position {position} is outside 1..={len}")]
    OutOfBounds { position: i64, len: usize },

    #[error("range start {lo} is after its end {hi}")]
    Reversed { lo: usize, hi: usize },
}

impl RangeError {
    #[must_use]
    pub fn malformed(input: impl Into<String>, reason: &'static str) -> Self {
        Self::Malformed {
            input: input.into(),
            reason,
        }
    }
}

/// Failure reported by the generation gateway. No thread state is changed
/// when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Provider(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("provider returned an empty reply")]
    EmptyReply,

    #[error("provider ended run {run_id} without a terminal event")]
    Incomplete { run_id: u64 },

    #[error("{provider} cannot send attachments of unknown type {kind:?}")]
    UnsupportedAttachment { provider: String, kind: String },

    #[error("{provider} does not support streamed replies")]
    StreamingUnsupported { provider: String },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{model} is not a model offered by {provider}")]
    UnknownModel { provider: String, model: String },

    #[error("model selection failed: {0}")]
    ModelSelection(String),
}

/// Failure of a thread or session operation. Every operation that returns
/// one of these leaves the session exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("message {position} is sticky; unsticky it first")]
    StickyViolation { position: usize },

    #[error("thread has no messages")]
    EmptySequence,

    #[error("nothing to retry")]
    NothingToRetry,

    #[error("no thread named {name:?}")]
    NoSuchThread { name: String },

    #[error("{thread} is busy with a generation in flight")]
    ThreadBusy { thread: String },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("refusing to add an empty {role} message")]
    EmptyContent { role: Role },

    #[error("{key} is not set on message {position}")]
    MissingMetadata { position: usize, key: String },
}

impl ThreadError {
    #[must_use]
    pub fn no_such_thread(name: impl Into<String>) -> Self {
        Self::NoSuchThread { name: name.into() }
    }

    /// Returns true when the failure came from a cancelled generation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Generation(GenerationError::Cancelled))
    }
}
