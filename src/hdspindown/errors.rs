use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpindownError {
    #[error("device {device} not available in {}: {reason}", counter_source.display())]
    CounterUnavailable {
        device: String,
        counter_source: PathBuf,
        reason: String,
    },

    #[error("state file {}: {reason}", path.display())]
    StateIo {
        path: PathBuf,
        reason: String,
    },

    #[error("unable to run {program}: {reason}")]
    ToolInvocation {
        program: String,
        reason: String,
    },
}

impl SpindownError {
    pub fn counter_unavailable(device: &str, counter_source: &Path, reason: String) -> SpindownError {
        SpindownError::CounterUnavailable {
            device: device.to_string(),
            counter_source: counter_source.to_path_buf(),
            reason,
        }
    }

    pub fn state_io(path: &Path, reason: String) -> SpindownError {
        SpindownError::StateIo {
            path: path.to_path_buf(),
            reason,
        }
    }

    pub fn tool_invocation(program: &str, reason: String) -> SpindownError {
        SpindownError::ToolInvocation {
            program: program.to_string(),
            reason,
        }
    }

    /// Process exit status for this failure; a missing device is reported distinctly.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpindownError::CounterUnavailable { .. } => 1,
            _ => 2,
        }
    }
}
