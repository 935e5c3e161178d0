//! Typed error hierarchy for questforge.
//!
//! - `GenerationError`: one call (or continuation run) against the text service
//! - `StageError`: a pipeline stage that stopped the run
//! - `SessionError`: session lookup and registration failures
//! - `RenderError`: writing the markdown layout or the archive
//! - `PersistError`: saving or loading the session history file
//! - `ConfigError`: reading the TOML configuration

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Errors from the text-generation service.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("empty response from generation service")]
    EmptyResponse,

    #[error("malformed response from generation service: {0}")]
    Malformed(String),

    #[error("response still asked to continue after {iterations} iterations")]
    ContinuationLimit { iterations: usize },
}

impl GenerationError {
    /// Transport failures and server-side statuses are worth another attempt;
    /// client errors and empty or malformed successes are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Transport(_) => true,
            GenerationError::Remote { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            GenerationError::EmptyResponse
            | GenerationError::Malformed(_)
            | GenerationError::ContinuationLimit { .. } => false,
        }
    }
}

/// Why a stage stopped.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("failed to checkpoint adventure: {0}")]
    Checkpoint(#[from] RenderError),

    #[error("generation deadline passed")]
    DeadlineExceeded,
}

/// A stage failure, tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: StageFailure,
}

impl StageError {
    pub fn new(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Errors from the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid session id '{0}'")]
    InvalidId(String),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {0} is already active")]
    AlreadyActive(String),
}

/// Errors writing rendered output.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize adventure: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to archive {path}: {message}")]
    Archive { path: PathBuf, message: String },
}

impl RenderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors saving or loading persisted session history.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history file {path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_server_errors_are_retryable() {
        assert!(GenerationError::Transport("reset".into()).is_retryable());
        assert!(
            GenerationError::Remote {
                status: 529,
                message: "overloaded".into()
            }
            .is_retryable()
        );
        assert!(
            GenerationError::Remote {
                status: 429,
                message: "slow down".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn client_errors_and_empty_responses_are_not_retryable() {
        assert!(
            !GenerationError::Remote {
                status: 401,
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(!GenerationError::EmptyResponse.is_retryable());
        assert!(!GenerationError::Malformed("not json".into()).is_retryable());
        assert!(!GenerationError::ContinuationLimit { iterations: 3 }.is_retryable());
    }

    #[test]
    fn stage_error_names_the_stage() {
        let err = StageError::new(Stage::DungeonLayout, GenerationError::EmptyResponse);
        let text = err.to_string();
        assert!(text.contains("Designing dungeons"), "{text}");
        assert!(text.contains("empty response"));
        assert!(matches!(
            err.source,
            StageFailure::Generation(GenerationError::EmptyResponse)
        ));
    }

    #[test]
    fn render_error_carries_path() {
        let err = RenderError::io(
            "/out/01_Episode/Episode.md",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/out/01_Episode/Episode.md"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GenerationError::EmptyResponse);
        assert_std_error(&StageError::new(Stage::Outline, StageFailure::DeadlineExceeded));
        assert_std_error(&SessionError::NotFound("x".into()));
        assert_std_error(&PersistError::Io {
            path: "session_history.json".into(),
            source: std::io::Error::other("disk full"),
        });
    }
}
