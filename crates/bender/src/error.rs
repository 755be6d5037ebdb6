//! Error types for ray construction and optimization.

use thiserror::Error;

/// Severity of a [`BenderError`].
///
/// `NonFatal` errors invalidate one candidate (a bottoming level, a branch
/// alternative, or the ray itself) while `Fatal` errors abort the ray.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    NonFatal,
}

/// Errors raised while building or optimizing a ray.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BenderError {
    /// Iteration caps, NaN misfits, unexpected level collisions.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Locally invalid construction; the candidate is dropped.
    #[error("nonfatal: {0}")]
    NonFatal(String),

    /// Wall-clock budget exhausted; the ray is flagged invalid.
    #[error("maximum calculation time exceeded ({elapsed_s:.2} s of {budget_s:.2} s)")]
    WallClock {
        /// Seconds spent on the ray so far.
        elapsed_s: f64,
        /// Configured budget in seconds.
        budget_s: f64,
    },
}

impl BenderError {
    pub(crate) fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub(crate) fn nonfatal(msg: impl Into<String>) -> Self {
        Self::NonFatal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::NonFatal(_) | Self::WallClock { .. } => ErrorKind::NonFatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type Result<T> = std::result::Result<T, BenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_nonfatal() {
        let e = BenderError::WallClock {
            elapsed_s: 2.5,
            budget_s: 2.0,
        };
        assert_eq!(e.kind(), ErrorKind::NonFatal);
        assert!(!e.is_fatal());
        assert!(e.to_string().contains("2.50"));
    }

    #[test]
    fn display_carries_message() {
        let e = BenderError::fatal("too many iterations in inner loop");
        assert!(e.is_fatal());
        assert_eq!(e.to_string(), "fatal: too many iterations in inner loop");
        let n = BenderError::nonfatal("receiver above model");
        assert_eq!(n.kind(), ErrorKind::NonFatal);
    }
}
