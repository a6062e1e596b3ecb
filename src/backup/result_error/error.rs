use crate::backup::result_error::WithMsg;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("archive error on {path:?}: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn archive<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    /// Innermost error, skipping any attached messages
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } => error.root(),
            e => e,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.root(), Error::Storage(_))
    }

    /// Malformed settings, the run never begins
    pub fn is_config(&self) -> bool {
        matches!(
            self.root(),
            Error::Config(_) | Error::ValidationError(_) | Error::SerdeYml(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_with_msg() {
        let error = Error::Config("bad size".into()).with_msg("Loading config failed");

        match &error {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Loading config failed"),
            _ => panic!("Expected WithMsg error"),
        }
        assert!(error.is_config());
        assert!(!error.is_storage());
    }

    #[test]
    fn test_error_with_msg_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error).with_msg("Operation failed");
        let error_str = error.to_string();

        assert!(error_str.contains("Operation failed"));
        assert!(error_str.contains("  file not found"));
    }

    #[test]
    fn test_storage_error_classification() {
        let error = Error::from(rusqlite::Error::InvalidQuery).with_msg("a").with_msg("b");
        assert!(error.is_storage());
        assert!(matches!(error.root(), Error::Storage(_)));
    }

    #[test]
    fn test_archive_error_display() {
        let error = Error::archive(
            "/data/file.txt",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        let error_str = error.to_string();
        assert!(error_str.contains("/data/file.txt"));
        assert!(error_str.contains("disk full"));
    }
}
