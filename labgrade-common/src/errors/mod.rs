//! Error taxonomy for the grading engine.
//!
//! Errors fall into two classes:
//!
//! | Class    | Variants                                                   | Effect                          |
//! |----------|------------------------------------------------------------|---------------------------------|
//! | Per-test | `PatternMismatch`, `AssertionFailure`, `SessionTimeout`    | Encoded as a test outcome       |
//! | Fatal    | `DuplicateTest`, `UnknownParent`, `ParentOrder`,           | Abort the run, non-zero exit    |
//! |          | `ExternalToolFailure`, `Config`, `Io`                      |                                 |
//!
//! `InvalidPattern` is per-test: a bad template only breaks the test using it.

use std::time::Duration;

/// Error type for grading operations
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("missing '{pattern}'\n{excerpt}")]
    PatternMismatch { pattern: String, excerpt: String },

    #[error("session timed out after {timeout:?} waiting for '{waiting_for}'\n{excerpt}")]
    SessionTimeout {
        timeout: Duration,
        waiting_for: String,
        excerpt: String,
    },

    #[error("assertion failed: {0}")]
    AssertionFailure(String),

    #[error("duplicate test id: {0}")]
    DuplicateTest(String),

    #[error("test '{test}' names unknown parent '{parent}'")]
    UnknownParent { test: String, parent: String },

    #[error("test '{test}' is registered before its parent '{parent}'")]
    ParentOrder { test: String, parent: String },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("{tool} failed: {message}")]
    ExternalToolFailure { tool: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for grading operations
pub type GradeResult<T> = Result<T, GradeError>;

impl GradeError {
    /// Shorthand for an assertion failure with a formatted message.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailure(message.into())
    }

    pub fn external(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True for errors recorded as `TimedOut` rather than `Failed`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SessionTimeout { .. })
    }

    /// True for errors that mean the harness itself is broken.
    ///
    /// A fatal error raised inside a test body aborts the whole run instead
    /// of being recorded against that test.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTest(_)
                | Self::UnknownParent { .. }
                | Self::ParentOrder { .. }
                | Self::ExternalToolFailure { .. }
                | Self::Config(_)
                | Self::Io(_)
        )
    }
}

/// Assert that two values are equal, reporting both on failure.
pub fn assert_equal<T>(got: T, expected: T) -> GradeResult<()>
where
    T: PartialEq + std::fmt::Debug,
{
    if got == expected {
        Ok(())
    } else {
        Err(GradeError::assertion(format!(
            "got:\n  {got:?}\nexpected:\n  {expected:?}"
        )))
    }
}
