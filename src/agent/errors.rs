//! Agent error types.

use thiserror::Error;

use crate::inference::errors::InferenceError;

/// Errors that end a turn. Tool failures never do; they become text the
/// model can read.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model endpoint failed.
    #[error("model request failed: {0}")]
    Model(#[from] InferenceError),

    /// The model kept asking for tools past the round limit.
    #[error("tool loop exceeded {max_rounds} rounds without a final answer")]
    TooManyToolRounds { max_rounds: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_wraps_inference_error() {
        let err: AgentError = InferenceError::HttpError {
            status: 401,
            body: "invalid x-api-key".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "model request failed: HTTP 401: invalid x-api-key"
        );
    }
}
