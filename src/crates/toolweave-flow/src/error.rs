//! Construction errors for combinators

use thiserror::Error;
use toolweave_core::AgentError;

/// A combinator was configured in a way it can never run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// No steps, branches or arms
    #[error("'{0}' needs at least one unit")]
    Empty(String),

    /// The completion strategy asks for more than can ever finish
    #[error("'{name}' requires {required} completions but has {available} branches")]
    Unsatisfiable {
        name: String,
        required: usize,
        available: usize,
    },

    /// `N(0)` completion
    #[error("'{0}' requires at least one completion")]
    ZeroCompletions(String),
}

impl From<FlowError> for AgentError {
    fn from(err: FlowError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_becomes_configuration_error() {
        let err: AgentError = FlowError::Unsatisfiable {
            name: "vote".to_string(),
            required: 4,
            available: 3,
        }
        .into();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("requires 4 completions"));
    }
}
