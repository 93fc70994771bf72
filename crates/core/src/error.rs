// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or advancing the per-project extraction cursor.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Invalid cursor timestamp (expected YYYY-MM-DDTHH:MM:SS.mmmZ): {value}")]
    InvalidTimestamp { value: String },

    #[error("Permission denied accessing cursor file: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error on cursor file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when launching an extraction subprocess.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Extraction agent not found: {program}")]
    AgentNotFound { program: String },

    #[error("Failed to create inbox file {path}: {source}")]
    Inbox {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from loading `nous.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

/// Errors decoding the JSON payload a hook receives on stdin.
#[derive(Debug, Error)]
pub enum HookInputError {
    #[error("Empty hook payload")]
    Empty,

    #[error("Malformed hook payload: {message}")]
    Malformed { message: String },
}

impl CursorError {
    pub fn invalid(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

impl LaunchError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        let program = program.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::AgentNotFound { program },
            _ => Self::SpawnFailed { program, source },
        }
    }
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for HookInputError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_error_display() {
        let err = CursorError::invalid("not-a-timestamp");
        assert!(err.to_string().contains("not-a-timestamp"));
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_cursor_error_io_classification() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = CursorError::io("/test/cursor.json", io_err);
        assert!(matches!(err, CursorError::PermissionDenied { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        let err = CursorError::io("/test/cursor.json", io_err);
        assert!(matches!(err, CursorError::Io { .. }));
    }

    #[test]
    fn test_launch_error_spawn_classification() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = LaunchError::spawn("timeout", io_err);
        assert!(matches!(err, LaunchError::AgentNotFound { ref program } if program == "timeout"));

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = LaunchError::spawn("claude", io_err);
        assert!(matches!(err, LaunchError::SpawnFailed { .. }));
    }

    #[test]
    fn test_hook_input_error_from_serde() {
        let err: HookInputError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Malformed hook payload"));
    }
}
