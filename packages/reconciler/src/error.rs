//! Typed errors for the reconciliation engine.
//!
//! The retryable taxonomy (`AttemptError`) is deliberately small: the
//! source adapter reduces every fetch to "present", "not present" or
//! "transient". The engine never inspects response bodies itself.

use thiserror::Error;

/// A single failed attempt against the source.
///
/// Both variants count toward the same retry budget; neither causes a
/// deactivation on its own.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Network timeouts, connection failures, 5xx, 429. Retried; never
    /// directly causes deactivation.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// The source answered but explicitly signalled absence.
    #[error("not present at source")]
    NotPresent,
}

impl AttemptError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::NotPresent)
    }
}

/// Failures that abort a whole reconciliation pass.
///
/// Per-item failures are recorded as outcomes and never surface here.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The upstream owner list could not be obtained at all.
    #[error("owner list unavailable: {0}")]
    OwnerListUnavailable(String),

    /// A storage failure outside the per-item path (session creation,
    /// seeding, sweeping).
    #[error("storage failure while {phase}: {message}")]
    Storage {
        phase: &'static str,
        message: String,
    },
}

impl SessionError {
    pub fn storage(phase: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            phase,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_error_display() {
        let err = AttemptError::transient("connection reset");
        assert_eq!(err.to_string(), "transient source failure: connection reset");
        assert!(!err.is_not_present());
        assert!(AttemptError::NotPresent.is_not_present());
    }
}
