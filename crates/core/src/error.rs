//! Error taxonomy shared by every layer of the sync core.

use serde::{Deserialize, Serialize};

/// Errors raised by the sync core. None of them is fatal to the process:
/// transport errors are recovered by reconnecting, parse errors drop a single
/// event, and the rest are surfaced to the view as alerts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum SyncError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("not_found: {0}")]
    NotFound(String),
    /// The API refused the request (forbidden, conflict, invalid, ...).
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("log limit of {limit} bytes reached")]
    LimitExceeded { limit: u64 },
    #[error("fetch already in flight: {0}")]
    FetchInFlight(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Transport failures are retried with backoff; everything else is not.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    /// Errors a view shows to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, SyncError::NotFound(_) | SyncError::Rejected(_) | SyncError::LimitExceeded { .. })
    }
}
