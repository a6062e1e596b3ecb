//! Read-only questions about a tree: what the exclusion rules drop, and when
//! each file was last backed up.

use crate::backup::policy::{ExcludePattern, Policy};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::store::{BackupStatus, Store};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every file and directory under `dir` matched by an exclusion pattern
pub fn excluded_entries<'p>(
    policy: &'p Policy,
    dir: &Path,
) -> impl Iterator<Item = (PathBuf, &'p ExcludePattern)> + 'p {
    WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|res| match res {
            Ok(de) => Some(de),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter_map(move |de| {
            let is_dir = de.file_type().is_dir();
            let pattern = policy.excluded_by(de.path(), is_dir)?;
            Some((de.into_path(), pattern))
        })
}

/// Backup status of every file under `dir`
pub fn tree_status<'s>(
    store: &'s Store,
    dir: &Path,
) -> impl Iterator<Item = Result<(PathBuf, Option<BackupStatus>)>> + 's {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|res| match res {
            Ok(de) if de.file_type().is_file() => Some(Ok(de.into_path())),
            Ok(_) => None,
            Err(e) => Some(Err(Error::from(e))),
        })
        .map(move |path| {
            let path: PathBuf = path?;
            let status = store.backup_status(&path)?;
            Ok((path, status))
        })
}

/// One line of the status report
pub fn format_status(path: &Path, status: Option<&BackupStatus>) -> String {
    match status {
        Some(status) => format!("{} <- {}", path.display(), status.date),
        None => format!("{} - not backed up", path.display()),
    }
}
