use std::{io, path::PathBuf};
use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Failures that end a sync pass. None of these are retried.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid target folder {path:?}: {reason}")]
    InvalidTarget { path: PathBuf, reason: String },

    #[error("no mods folder found in the downloaded bundle ({path:?})")]
    MissingSourceBundle { path: PathBuf },

    #[error("manifest {path:?} is unreadable: {source}")]
    ManifestUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt bundle archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("download of {url} failed: {reason}")]
    TransferFailed { url: String, reason: String },

    #[error("{action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_target(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::InvalidTarget {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            SyncError::InvalidTarget { .. } => "invalid_target",
            SyncError::MissingSourceBundle { .. } => "missing_source_bundle",
            SyncError::ManifestUnreadable { .. } => "manifest_unreadable",
            SyncError::CorruptArchive { .. } => "corrupt_archive",
            SyncError::TransferFailed { .. } => "transfer_failed",
            SyncError::Io { .. } => "io",
        }
    }
}

/// Attaches an action and path to a raw `io::Result`.
pub trait IoContext<T> {
    fn io_context(self, action: &'static str, path: &std::path::Path) -> SyncResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, action: &'static str, path: &std::path::Path) -> SyncResult<T> {
        self.map_err(|err| SyncError::io(action, path, err))
    }
}

/// Shortens an error chain to the part a user can act on.
pub fn summarize_error(error: &str) -> String {
    let first_line = error.lines().next().unwrap_or(error).trim();
    let last = first_line.rsplit(": ").next().unwrap_or(first_line).trim();
    let lower = last.to_lowercase();

    if lower.contains("device or resource busy") || lower.contains("text file busy") {
        return format!("{first_line} (file in use)");
    }
    if lower.contains("permission denied") || lower.contains("access is denied") {
        return format!("{first_line} (permission denied)");
    }
    if lower.contains("no space left") {
        return format!("{first_line} (disk full)");
    }

    first_line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        let err = SyncError::TransferFailed {
            url: "https://example.com/mods.zip".to_string(),
            reason: "status 404".to_string(),
        };
        assert_eq!(err.kind_label(), "transfer_failed");
        assert!(err.to_string().contains("status 404"));
    }

    #[test]
    fn summarize_flags_permission_errors() {
        let summary = summarize_error("remove mod \"/x/a.jar\": Permission denied (os error 13)");
        assert!(summary.ends_with("(permission denied)"));
        assert_eq!(summarize_error("line one\nline two"), "line one");
    }
}
