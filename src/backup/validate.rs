//! Validation functions for configuration values.

use validator::ValidationError;

use std::path::{Component, Path};

pub fn validate_stop_marker<S: AsRef<str>>(flag: S) -> Result<(), ValidationError> {
    let flag = flag.as_ref();
    let mut components = Path::new(flag).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ValidationError::new("InvalidStopMarker")
            .with_message(format!("{flag:?} must be a plain file name").into())),
    }
}

pub fn validate_parent_dir_exist<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    if parent.is_dir() {
        Ok(())
    } else {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("directory of {:?} not found", path).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stop_marker_must_be_file_name() {
        assert!(validate_stop_marker(".bkstop").is_ok());
        assert!(validate_stop_marker("").is_err());
        assert!(validate_stop_marker("a/b").is_err());
        assert!(validate_stop_marker("/abs").is_err());
        assert!(validate_stop_marker("..").is_err());
    }

    #[test]
    fn test_parent_dir_exist() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_parent_dir_exist(temp_dir.path().join("x.tar")).is_ok());
        assert!(validate_parent_dir_exist(temp_dir.path().join("no/x.tar")).is_err());
        assert!(validate_parent_dir_exist("relative.db").is_ok());
    }
}
