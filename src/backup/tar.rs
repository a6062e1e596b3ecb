use crate::backup::classify::RunBudget;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::store::{RunHandle, Store};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Component, Path, PathBuf};

/// Appends accepted entries to the run's TAR archive and records them
///
/// Entries are added one at a time and never recursively: a directory becomes
/// a bare directory header, its children are separate candidates.
pub struct Packer<W: Write + Seek> {
    writer: tar::Builder<W>,
    entry_count: u64,
}

impl Packer<File> {
    /// Creates (truncating) the archive file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::archive(path, e))?;
        Ok(Self::new(file))
    }
}

/// Name of `path` inside the archive, without the leading root
fn archive_name(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

impl<W: Write + Seek> Packer<W> {
    pub fn new(writer: W) -> Self {
        let mut writer = tar::Builder::new(writer);
        writer.follow_symlinks(false);
        Self {
            writer,
            entry_count: 0,
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Physical size of the archive written so far
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.writer.get_mut().stream_position()?)
    }

    /// Adds `path` to the archive, then records it under the run's volume
    ///
    /// The budget is moved to the archive's real size whether or not the append
    /// or the store write succeeded, since either may leave bytes behind.
    pub fn try_archive(
        &mut self,
        store: &Store,
        run: &RunHandle,
        budget: &mut RunBudget,
        path: &Path,
        mtime: i64,
    ) -> Result<()> {
        let archived = self
            .writer
            .append_path_with_name(path, archive_name(path))
            .map_err(|e| Error::archive(path, e))
            .and_then(|_| {
                self.entry_count += 1;
                store.upsert_file(run, path, mtime)
            });
        budget.observe(self.position()?);
        tracing::trace!("archived {:?} ({} bytes so far)", path, budget.accumulated());
        archived
    }

    /// Writes the end-of-archive marker and hands back the writer
    pub fn finish(self) -> Result<W> {
        tracing::info!("Processed {} archive entries", self.entry_count);
        Ok(self.writer.into_inner()?)
    }
}
