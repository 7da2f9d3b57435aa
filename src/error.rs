use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RIPTError {
  #[error("{0}")]
  Io(#[from] io::Error),
  #[error("{}: {message}", .path.display())]
  Config { path: PathBuf, message: String },
  #[error("Command '{}' failed with exit status {status}: {}", .command.join(" "), .stderr.trim())]
  Command {
    command: Vec<String>,
    status: i32,
    stderr: String,
  },
  #[error("{0}")]
  Invalid(String),
  #[error("{0}")]
  Other(&'static str),
}

/// Defines the Result type of riptables-panel crate
pub type RIPTResult<T> = Result<T, RIPTError>;

impl From<&'static str> for RIPTError {
  fn from(err: &'static str) -> Self {
    RIPTError::Other(err)
  }
}

impl RIPTError {
  /// Errors caused by what the caller sent rather than by the device or the setup.
  pub fn is_caller_fault(&self) -> bool {
    matches!(self, RIPTError::Invalid(_) | RIPTError::Command { .. })
  }
}
