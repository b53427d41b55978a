use std::time::Duration;

use thiserror::Error;

/// Closed taxonomy of engine failures.
///
/// Every fallible operation in the update core maps its failures onto one of
/// these kinds; retry policy is a function of the kind, never of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient network failure; retry with exponential backoff.
    NetworkTransient,
    /// Metadata signature did not verify. Never retried against the same
    /// source for the same artifact.
    Signature,
    /// Content digest mismatch on a fetched blob.
    Integrity,
    /// The requested package, source, or blob does not exist.
    NotFound,
    /// The artifact already exists or another writer owns it.
    Conflict,
    /// Local filesystem failure.
    Io,
    /// Deadline expired; the caller may retry.
    Timeout,
    /// The operation was cancelled; not logged at error level.
    Cancelled,
    /// A source config failed validation.
    InvalidConfig,
    /// A source with this id already exists.
    DuplicateId,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTransient | ErrorKind::Io | ErrorKind::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkTransient => "network_transient",
            ErrorKind::Signature => "signature",
            ErrorKind::Integrity => "integrity",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Io => "io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::DuplicateId => "duplicate_id",
        }
    }
}

/// An engine error: a kind tag plus a human-readable message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AmberError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AmberError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkTransient, message)
    }

    pub fn signature(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Signature, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn duplicate_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateId, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<std::io::Error> for AmberError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AlreadyExists => {
                Self::conflict(err.to_string())
            }
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AmberError>;

/// Exponential backoff schedule shared by metadata bootstrap and the poll
/// loop: starts at 1 s, doubles with a 30 s step cap, and never exceeds the
/// 5 min terminal cap.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current: Duration,
}

pub const BACKOFF_START: Duration = Duration::from_secs(1);
pub const BACKOFF_STEP_CAP: Duration = Duration::from_secs(30);
pub const BACKOFF_TERMINAL_CAP: Duration = Duration::from_secs(300);

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: BACKOFF_START,
        }
    }

    /// Current delay, then advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let step = self.current.min(BACKOFF_STEP_CAP);
        self.current = (self.current + step).min(BACKOFF_TERMINAL_CAP);
        delay
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_START;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_caps() {
        let mut backoff = Backoff::new();
        let mut delays = Vec::new();
        for _ in 0..20 {
            delays.push(backoff.next_delay().as_secs());
        }
        assert_eq!(&delays[..6], &[1, 2, 4, 8, 16, 32]);
        // Step is capped at 30s once the delay passes it.
        assert_eq!(delays[6], 62);
        assert!(delays.iter().all(|&d| d <= 300));
        // The terminal cap holds once reached.
        assert_eq!(*delays.last().unwrap(), 300);
        assert_eq!(delays[delays.len() - 2], 300);
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::NetworkTransient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Signature.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn io_error_mapping() {
        let exists = std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "already exists",
        );
        assert_eq!(AmberError::from(exists).kind, ErrorKind::Conflict);
        let missing =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(AmberError::from(missing).kind, ErrorKind::NotFound);
    }
}
