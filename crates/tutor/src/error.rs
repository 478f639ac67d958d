use duet_audio::PortError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Phase;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluatorError {
    #[error("unknown attempt handle {0}")]
    UnknownAttempt(u64),
    #[error("evaluation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("invalid lesson: {0}")]
    InvalidLesson(String),
    #[error("segment {index} out of range (segment count {count})")]
    OutOfRange { index: isize, count: usize },
    #[error("attempts exhausted for segment {segment} ({max_attempts} allowed)")]
    AttemptsExhausted { segment: usize, max_attempts: u32 },
    #[error("manual navigation is disabled while auto-advance is on")]
    ManualNavigationDisabled,
    #[error("{operation} is not allowed in phase {phase:?}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },
    #[error("port failure: {0}")]
    Port(#[from] PortError),
    #[error("evaluator failure: {0}")]
    Evaluator(#[from] EvaluatorError),
    #[error("session controller has shut down")]
    Closed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad segment index, bounds or lesson data.
    Validation,
    /// Request refused by session policy or the current phase.
    Policy,
    /// Playback or record engine failure; the session is in `Error`.
    Port,
    /// Scoring failed for one attempt.
    Evaluator,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidConfig(_)
            | SessionError::InvalidLesson(_)
            | SessionError::OutOfRange { .. } => ErrorKind::Validation,
            SessionError::AttemptsExhausted { .. }
            | SessionError::ManualNavigationDisabled
            | SessionError::InvalidTransition { .. }
            | SessionError::Closed => ErrorKind::Policy,
            SessionError::Port(_) => ErrorKind::Port,
            SessionError::Evaluator(_) => ErrorKind::Evaluator,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Port
    }
}

/// Error as carried inside a published snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReportedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SessionError> for ReportedError {
    fn from(error: &SessionError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
