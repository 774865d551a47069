use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Problems with the set of package managers or their definition file patterns.
///
/// These surface when the registry is built and only disable the manager concerned.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid definition file pattern '{pattern}' for {manager}: {details}")]
    InvalidPattern {
        manager: String,
        pattern: String,
        details: String,
    },

    #[error("Package manager {manager} has no definition file patterns")]
    NoPatterns { manager: String },

    #[error("Unknown package manager: {name}\n\n💡 Hint: run `pran list` to see the known package managers")]
    UnknownManager { name: String },

    #[error("Failed to load configuration file: {path}\nDetails: {details}")]
    InvalidConfigFile { path: PathBuf, details: String },
}

/// Problems met while walking a project tree. Recorded as warnings; the walk goes on.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("Project path is not accessible: {path}\nDetails: {details}")]
    RootUnavailable { path: PathBuf, details: String },

    #[error("Skipped unreadable path: {path}\nDetails: {details}")]
    Unreadable { path: PathBuf, details: String },

    #[error("Scan did not complete, no definition file was resolved\nDetails: {details}")]
    Interrupted { details: String },
}

impl ScanError {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ScanError::RootUnavailable { path, .. } | ScanError::Unreadable { path, .. } => Some(path),
            ScanError::Interrupted { .. } => None,
        }
    }

    /// Whether the scan stopped early instead of skipping a single path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Interrupted { .. })
    }
}

/// Failure to turn one definition file into a dependency tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("External tool failed with exit code {}{}", exit_code_text(.exit_code), format_stderr(.stderr))]
    ExternalToolFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Malformed tool output: {details}")]
    MalformedOutput { details: String },

    #[error("Unsupported definition file: {path}\nReason: {reason}")]
    UnsupportedFile { path: PathBuf, reason: String },

    #[error("External tool timed out after {timeout:?} and was terminated")]
    Timeout { timeout: Duration },

    #[error("External tool '{program}' could not be started: {details}\n\n💡 Hint: make sure it is installed and on PATH, or configure it under [tools] in .pran.toml")]
    ToolUnavailable { program: String, details: String },

    #[error("Failed to read definition file: {path}\nDetails: {details}")]
    InvalidDefinitionFile { path: PathBuf, details: String },

    #[error("Resolution task failed: {details}")]
    TaskFailed { details: String },
}

fn exit_code_text(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

fn format_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nstderr: {}", stderr)
    }
}

impl ResolutionError {
    pub fn malformed(details: impl Into<String>) -> Self {
        ResolutionError::MalformedOutput {
            details: details.into(),
        }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ResolutionError::UnsupportedFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_file(path: impl Into<PathBuf>, details: impl ToString) -> Self {
        ResolutionError::InvalidDefinitionFile {
            path: path.into(),
            details: details.to_string(),
        }
    }
}
