//! Error types for the orchestration subsystem

use std::fmt;

use crate::RollbackLevel;

/// Result type alias for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while monitoring, backing up, or rolling back
#[derive(Debug)]
pub enum OrchestratorError {
    /// A remediation level ran but did not restore health
    RemediationFailure {
        level: RollbackLevel,
        reason: String,
    },

    /// A backup archive is corrupt or its manifest is missing
    BackupIntegrity(String),

    /// A rollback is already in progress
    ConcurrencyConflict,

    /// Every remediation level failed; manual intervention is required
    ExhaustedEscalation,

    /// The external service controller (container engine) failed
    ControllerFailure(String),

    /// A git operation failed
    GitFailure(String),

    /// I/O error (file access, archive write, etc.)
    Io(std::io::Error),

    /// Manifest or snapshot (de)serialization error
    Serialization(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::RemediationFailure { level, reason } => {
                write!(f, "remediation at level '{}' failed: {}", level, reason)
            }
            OrchestratorError::BackupIntegrity(msg) => {
                write!(f, "backup integrity check failed: {}", msg)
            }
            OrchestratorError::ConcurrencyConflict => {
                write!(f, "rollback already in progress")
            }
            OrchestratorError::ExhaustedEscalation => {
                write!(f, "all rollback levels exhausted, manual intervention required")
            }
            OrchestratorError::ControllerFailure(msg) => {
                write!(f, "service controller error: {}", msg)
            }
            OrchestratorError::GitFailure(msg) => write!(f, "git operation failed: {}", msg),
            OrchestratorError::Io(err) => write!(f, "I/O error: {}", err),
            OrchestratorError::Serialization(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrchestratorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Io(err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for OrchestratorError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io_err) => OrchestratorError::Io(io_err),
            other => OrchestratorError::BackupIntegrity(other.to_string()),
        }
    }
}
