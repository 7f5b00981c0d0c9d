//! Error types for nhcwatch-core operations.
//! Exit codes live here so both binaries map failures the same way.

use std::path::PathBuf;

/// Runtime failure, including an insecure state directory.
pub const EXIT_FAILURE: i32 = 1;
/// Malformed configuration or arguments.
pub const EXIT_CONFIG: i32 = 2;
/// `NHC_RM` (or `--rm`) names a resource manager we have no adapter for.
pub const EXIT_UNSUPPORTED_RM: i32 = 3;

/// All errors that can occur in nhcwatch-core operations.
#[derive(Debug, thiserror::Error)]
pub enum NhcError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unsupported resource manager: {0}")]
    UnsupportedResourceManager(String),

    #[error("No resource manager detected (looked for sinfo, pbsnodes, bhosts, qhost in PATH)")]
    ResourceManagerNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start {program}: {source}")]
    SubjectSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Resource-safety Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("State directory {path} is not safe to use: {reason}")]
    InsecureStateDir { path: PathBuf, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O and Command Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },
}

impl NhcError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NhcError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn insecure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        NhcError::InsecureStateDir {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status a binary should use when this error ends the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            NhcError::UnsupportedResourceManager(_) => EXIT_UNSUPPORTED_RM,
            NhcError::ResourceManagerNotFound
            | NhcError::ConfigMalformed { .. }
            | NhcError::InvalidArgument(_)
            | NhcError::SubjectSpawn { .. } => EXIT_CONFIG,
            NhcError::InsecureStateDir { .. }
            | NhcError::Io { .. }
            | NhcError::CommandFailed { .. } => EXIT_FAILURE,
        }
    }
}

/// Convenience type alias for Results using NhcError.
pub type Result<T> = std::result::Result<T, NhcError>;

/// Errors raised by a notification transport. Never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to launch notification sender {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Notification sender {program} exited with status {status}")]
    SenderFailed { program: String, status: i32 },

    #[error("Failed to write notification: {0}")]
    Write(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_rm_has_its_own_exit_code() {
        let err = NhcError::UnsupportedResourceManager("moab".to_string());
        assert_eq!(err.exit_code(), EXIT_UNSUPPORTED_RM);
        assert_ne!(EXIT_UNSUPPORTED_RM, EXIT_CONFIG);
    }

    #[test]
    fn insecure_state_dir_is_a_runtime_failure() {
        let err = NhcError::insecure("/tmp/x", "owned by uid 0");
        assert_eq!(err.exit_code(), EXIT_FAILURE);
        assert!(err.to_string().contains("/tmp/x"));
    }
}
