use thiserror::Error;

/// Classified outcome of one API call.
///
/// `Unauthorized` is the only variant the session coordinator recovers from;
/// everything else is surfaced to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// HTTP 401. Recoverable through credential renewal; callers normally
    /// never observe this because the coordinator retries behind it.
    #[error("unauthorized")]
    Unauthorized,
    /// Credential renewal itself failed. Terminal for the current session.
    #[error("session_expired:{reason}")]
    SessionExpired { reason: String },
    /// HTTP 403. A permission failure, never a renewal trigger.
    #[error("forbidden")]
    Forbidden,
    /// Any other non-success HTTP status, e.g. a stock constraint.
    #[error("rejected_{status}:{message}")]
    Rejected { status: u16, message: String },
    /// Connectivity failure before a status line was received.
    #[error("network_failed:{0}")]
    Network(String),
    /// The response body could not be read or parsed.
    #[error("decode_failed:{0}")]
    Decode(String),
    /// The call resolved after the session it was issued under ended; the
    /// result was discarded instead of applied.
    #[error("stale_response")]
    Stale,
}

impl ApiError {
    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            _ => Self::Rejected { status, message },
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
