//! Error types.
//!
//! - `LoopError`: failures of the correction engine, with enough context
//!   (branch, step, parameter) for a user to fix the input and retry.
//! - `AppError`: what the binary reports, carrying a process exit code.
//!
//! Fit non-convergence is *not* an error: it is reported as
//! `FitResult::converged = false` and the caller decides what to do.

use thiserror::Error;

use crate::domain::{Branch, Slot};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoopError {
    #[error("No samples of the {branch} branch fall in [{lo}, {hi}].")]
    EmptyRegion { branch: Branch, lo: f64, hi: f64 },

    #[error("{branch} branch: {found} samples in range, the model needs at least {required}.")]
    InsufficientSamples {
        branch: Branch,
        found: usize,
        required: usize,
    },

    #[error("{branch} branch: fit did not converge: {reason}")]
    FitNotConverged { branch: Branch, reason: String },

    #[error("{operation} requires a polynomial fit, got {model}.")]
    UnsupportedModel { operation: String, model: String },

    #[error("Conflicting grid mapping: {0}")]
    ConflictingMapping(String),

    #[error("Destination slot {0} has no column bound to it.")]
    UnboundDestination(Slot),

    #[error("{branch} branch: X has {x_len} samples but Y has {y_len}.")]
    LengthMismatch {
        branch: Branch,
        x_len: usize,
        y_len: usize,
    },

    #[error("Invalid {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("{branch} branch: {reason}")]
    Degenerate { branch: Branch, reason: String },

    #[error("Step {step} ('{label}'): {source}")]
    InStep {
        step: usize,
        label: String,
        source: Box<LoopError>,
    },
}

impl LoopError {
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        LoopError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Attach the index and label of the correction step that raised this error.
    pub fn at_step(self, index: usize, label: &str) -> Self {
        match self {
            LoopError::InStep { source, .. } => LoopError::InStep {
                step: index,
                label: label.to_string(),
                source,
            },
            other => LoopError::InStep {
                step: index,
                label: label.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, without step context.
    pub fn root(&self) -> &LoopError {
        match self {
            LoopError::InStep { source, .. } => source.root(),
            other => other,
        }
    }

    /// Exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoopError::InStep { source, .. } => source.exit_code(),
            LoopError::EmptyRegion { .. }
            | LoopError::InsufficientSamples { .. }
            | LoopError::FitNotConverged { .. }
            | LoopError::Degenerate { .. } => 3,
            LoopError::LengthMismatch { .. } => 2,
            LoopError::UnsupportedModel { .. }
            | LoopError::ConflictingMapping(_)
            | LoopError::UnboundDestination(_)
            | LoopError::InvalidParameter { .. } => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<LoopError> for AppError {
    fn from(err: LoopError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_errors_map_to_exit_codes() {
        let err = LoopError::EmptyRegion {
            branch: Branch::Up,
            lo: 1.0,
            hi: 2.0,
        };
        let app: AppError = err.clone().into();
        assert_eq!(app.exit_code(), 3);
        assert_eq!(app.to_string(), err.to_string());

        let err = LoopError::ConflictingMapping("up-x written twice".to_string());
        assert_eq!(AppError::from(err).exit_code(), 4);
    }

    #[test]
    fn step_context_wraps_any_error() {
        let err = LoopError::FitNotConverged {
            branch: Branch::Up,
            reason: "rank-deficient".to_string(),
        }
        .at_step(4, "tails");
        assert!(err.to_string().starts_with("Step 4 ('tails')"), "{err}");
        assert_eq!(err.exit_code(), 3);

        let empty = LoopError::EmptyRegion {
            branch: Branch::Down,
            lo: 5.0,
            hi: 6.0,
        };
        let err = empty.clone().at_step(2, "drift").at_step(3, "drift");
        assert_eq!(err.to_string(), format!("Step 3 ('drift'): {empty}"));
        assert_eq!(err.root(), &empty);

        let invalid = LoopError::invalid("scale", "must be non-zero").at_step(1, "cli");
        assert_eq!(invalid.exit_code(), 4);
    }

    #[test]
    fn messages_carry_context() {
        let err = LoopError::InsufficientSamples {
            branch: Branch::Down,
            found: 1,
            required: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("Down"), "{msg}");
        assert!(msg.contains('3'), "{msg}");
    }
}
