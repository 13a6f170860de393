//! Error types for the stencil optimizer.
//!
//! Each subsystem reports its own error type; [`StencilOptError`] wraps
//! them for callers that drive the whole pipeline.

use crate::autotuning::AutotuneError;
use crate::dse::RewriteError;
use crate::symbolics::EvalError;
use thiserror::Error;

/// Top-level error type for the optimizer.
#[derive(Error, Debug)]
pub enum StencilOptError {
    /// Unknown rewrite pass or pipeline
    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    /// Rejected autotuning request
    #[error("Autotuning error: {0}")]
    Autotune(#[from] AutotuneError),

    /// Expression could not be evaluated
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),
}

/// Result type using [`StencilOptError`].
pub type StencilResult<T> = Result<T, StencilOptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_errors_keep_their_message() {
        let err: StencilOptError = RewriteError::UnknownMode("fast".to_string()).into();
        assert!(err.to_string().starts_with("Rewrite error: "));
        assert!(err.to_string().contains("fast"));

        let err: StencilOptError = EvalError::Unbound("h_x".to_string()).into();
        assert!(matches!(err, StencilOptError::Eval(_)));
    }
}
