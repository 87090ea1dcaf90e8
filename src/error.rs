//! Error types for the snooze engine.

/// Top-level error type for snoozing, scheduling and reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum SnoozeError {
    /// Requested firing time is not strictly in the future.
    #[error("requested time is not in the future")]
    InvalidTime,

    /// Malformed recurrence selection (no weekday, day out of range, bad time).
    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),

    /// A persisted record is missing required fields or cannot be decoded.
    #[error("corrupt record {id}: {reason}")]
    RecordCorrupt {
        /// Store key of the offending record.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A persistence operation failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The occurrence was already consumed by another path.
    #[error("occurrence {0} was already claimed")]
    AlreadyClaimed(String),

    /// The URL points at a page that cannot be reopened later.
    #[error("cannot snooze {0}")]
    UnsnoozableUrl(String),

    /// The id carries neither the occurrence nor the schedule prefix.
    #[error("not a snooze id: {0}")]
    UnknownId(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SnoozeError {
    /// Convenience constructor for [`SnoozeError::RecordCorrupt`].
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RecordCorrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SnoozeError>;
