// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Error type shared by every steady-state segmentation crate.
///
/// Degenerate input (an empty series, no stable stretch found) is never an
/// error; these variants only cover caller precondition violations and
/// internal contract failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SsdError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("numerical issue: {0}")]
    NumericalIssue(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("cancelled")]
    Cancelled,
}

impl SsdError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn numerical_issue(msg: impl Into<String>) -> Self {
        Self::NumericalIssue(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Stable machine-readable code for structured error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NumericalIssue(_) => "numerical_issue",
            Self::NotSupported(_) => "not_supported",
            Self::Cancelled => "cancelled",
        }
    }
}
