use std::path::PathBuf;

use thiserror::Error;

use crate::training::StepState;

/// Result alias for `embed-gmm`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by loading, clustering, and training.
///
/// Input and configuration errors are raised before any training happens.
/// Mixture and numerical errors raised inside a training step are wrapped
/// in [`Error::Training`] so the epoch, batch, and state machine position
/// travel with them.
#[derive(Debug, Error)]
pub enum Error {
    /// An embedding or label file row could not be parsed.
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput {
        /// 1-based line number in the source file.
        line: usize,
        /// What was wrong with the row.
        reason: String,
    },

    /// The mixture fit could not produce usable components.
    #[error("ill-conditioned mixture: {reason}")]
    IllConditionedMixture {
        /// Which component or precondition failed.
        reason: String,
    },

    /// NaN or Inf detected in a matrix operation.
    #[error("numerical instability in {stage}: {detail}")]
    NumericalInstability {
        /// Operation that produced the bad value.
        stage: &'static str,
        /// Location of the bad value.
        detail: String,
    },

    /// A hyperparameter is out of range.
    #[error("invalid configuration '{name}': {message}")]
    Configuration {
        /// Field name.
        name: &'static str,
        /// Why the value is rejected.
        message: String,
    },

    /// A node in the vector file has no ground-truth label.
    #[error("no ground-truth label for node {node}")]
    MissingLabel {
        /// Node id without a label.
        node: u64,
    },

    /// Vector dimension mismatch.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Matrix shape mismatch.
    #[error("shape mismatch: expected {expected}, actual {actual}")]
    ShapeMismatch {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        actual: String,
    },

    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// `predict_proba` called before `fit`.
    #[error("mixture model has not been fitted")]
    NotFitted,

    /// File could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A step failed mid-training.
    #[error("epoch {epoch}, batch {batch} (after {state:?}): {source}")]
    Training {
        /// 0-based epoch.
        epoch: usize,
        /// 0-based batch index within the epoch.
        batch: usize,
        /// Last state the step reached before failing.
        state: StepState,
        /// The failure.
        source: Box<Error>,
    },
}

impl Error {
    /// Create a `MalformedInput` error.
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            line,
            reason: reason.into(),
        }
    }

    /// Create an `IllConditionedMixture` error.
    pub fn ill_conditioned(reason: impl Into<String>) -> Self {
        Self::IllConditionedMixture {
            reason: reason.into(),
        }
    }

    /// Create a `NumericalInstability` error.
    pub fn unstable(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::NumericalInstability {
            stage,
            detail: detail.into(),
        }
    }

    /// Create a `Configuration` error.
    pub fn config(name: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            name,
            message: message.into(),
        }
    }

    /// Innermost error, looking through [`Error::Training`] context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Training { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let errors: Vec<Error> = vec![
            Error::malformed(3, "expected 401 fields, found 12"),
            Error::ill_conditioned("component 2 has zero variance"),
            Error::unstable("loss", "NaN at row 4"),
            Error::config("batch_size", "must be >= 1"),
        ];
        let expected = ["line 3", "component 2", "loss", "batch_size"];

        for (err, needle) in errors.iter().zip(expected) {
            let display = err.to_string();
            assert!(display.contains(needle), "{display} should contain {needle}");
        }
    }

    #[test]
    fn test_root_unwraps_training_context() {
        let err = Error::Training {
            epoch: 2,
            batch: 5,
            state: StepState::MixtureRefit,
            source: Box::new(Error::unstable("loss", "inf")),
        };
        let display = err.to_string();
        assert!(display.contains("epoch 2"));
        assert!(display.contains("batch 5"));
        assert!(matches!(err.root(), Error::NumericalInstability { stage: "loss", .. }));
    }
}
