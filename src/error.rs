//! Error types for the pendulum harness.

use std::path::PathBuf;

use thiserror::Error;

use crate::arena::AgentId;

#[derive(Debug, Error)]
pub enum ArenaError {
    /// Never added, already removed, or sensed after retirement.
    #[error("agent {agent} is not registered with the arena")]
    InvalidAgent { agent: AgentLabel },

    #[error("agent {agent} is already registered")]
    AlreadyRegistered { agent: AgentId },

    #[error("agent {agent} is retired; build a fresh agent for the next round")]
    Retired { agent: AgentId },

    #[error("rigid body for agent {agent} is missing from the arena")]
    MissingBody { agent: AgentId },
}

impl ArenaError {
    #[must_use]
    pub fn invalid(agent: Option<AgentId>) -> Self {
        Self::InvalidAgent {
            agent: AgentLabel(agent),
        }
    }
}

/// Display helper for agents that may not have been tagged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLabel(pub Option<AgentId>);

impl std::fmt::Display for AgentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "<untagged>"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller produced no outputs")]
    EmptyOutput,

    /// Only the first output is checked, since it is the only one consumed.
    #[error("controller produced a non-finite output: {0}")]
    NonFiniteOutput(f32),

    #[error("weight count mismatch: expected {expected}, got {actual}")]
    WeightCount { expected: usize, actual: usize },

    #[error("controller failed: {0}")]
    Failed(String),
}

/// Errors that abort a fitness round.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// `index` is the controller's position in the population.
    #[error("controller {index} failed at step {step}")]
    Controller {
        index: usize,
        step: usize,
        #[source]
        source: ControllerError,
    },

    #[error("invalid timing: step {step_duration}s, total {total_duration}s")]
    InvalidTiming {
        step_duration: f32,
        total_duration: f32,
    },

    #[error("could not breed offspring")]
    Breeding(#[source] ControllerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while saving or loading a trained controller.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("controller artifact I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Also covers weights that do not fit the declared topology.
    #[error("controller artifact is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_agent_message_names_the_tag() {
        let err = ArenaError::invalid(Some(AgentId(7)));
        assert_eq!(err.to_string(), "agent #7 is not registered with the arena");

        let err = ArenaError::invalid(None);
        assert!(err.to_string().contains("<untagged>"));
    }

    #[test]
    fn controller_error_keeps_its_source() {
        let err = EvaluationError::Controller {
            index: 3,
            step: 12,
            source: ControllerError::EmptyOutput,
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("controller produced no outputs"));
    }
}
