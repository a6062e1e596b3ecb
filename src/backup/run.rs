//! One backup run: an incremental pass over the configured roots, then a
//! cyclic pass re-packing the oldest recorded files, both sharing one budget.

use crate::backup::backup_config::BackupConfig;
use crate::backup::classify::{classify, ClassifyContext, Outcome, Pass, RunBudget, RunCounts};
use crate::backup::policy::{BlockedSet, Policy};
use crate::backup::result_error::result::Result;
use crate::backup::store::{RunHandle, Store};
use crate::backup::tar::Packer;
use chrono::Local;
use itertools::Itertools;
use std::io::{Seek, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Format of the volume date column, shared with the status reporter
pub static VOLUME_DATE_FORMAT: &str = "%y-%m-%d_%H-%M-%S";

pub struct BackupRun<'a, W: Write + Seek> {
    store: &'a Store,
    roots: Vec<(PathBuf, u64)>,
    policy: Policy,
    run: RunHandle,
    packer: Packer<W>,
    budget: RunBudget,
    blocked: BlockedSet,
    counts: RunCounts,
    stale_before: i64,
    own_files: Vec<PathBuf>,
}

impl<'a, W: Write + Seek> BackupRun<'a, W> {
    /// `now` is the run's start time in unix seconds
    pub fn new(
        config: &BackupConfig,
        store: &'a Store,
        run: RunHandle,
        packer: Packer<W>,
        now: i64,
    ) -> Self {
        let roots = config
            .backup()
            .iter()
            .filter_map(|root| match std::fs::metadata(root) {
                Ok(md) => Some((root.clone(), md.dev())),
                Err(e) => {
                    error!("backup entry {:?} not found: {}", root, e);
                    None
                }
            })
            .collect();
        let min_age = i64::try_from(*config.min_age()).unwrap_or(i64::MAX);

        Self {
            store,
            roots,
            policy: config.policy(),
            run,
            packer,
            budget: RunBudget::new(config.size().bytes()),
            blocked: BlockedSet::default(),
            counts: RunCounts::default(),
            stale_before: now.saturating_sub(min_age),
            own_files: vec![config.db().clone(), config.target().clone()],
        }
    }

    pub fn counts(&self) -> &RunCounts {
        &self.counts
    }

    pub fn volume(&self) -> i64 {
        self.run.volume()
    }

    /// Classifies one candidate and archives it when accepted
    fn consider(&mut self, path: &Path, device: u64, pass: Pass) -> Outcome {
        let mut ctx = ClassifyContext {
            policy: &self.policy,
            store: self.store,
            blocked: &mut self.blocked,
            device,
            stale_before: self.stale_before,
            pass,
            budget: &self.budget,
            own_files: &self.own_files,
        };
        let outcome = classify(path, &mut ctx);
        self.counts.record(&outcome, pass);

        if let Outcome::Accepted(accepted) = outcome {
            debug!("{}: {:?}", pass, path);
            if let Err(e) = self.packer.try_archive(
                self.store,
                &self.run,
                &mut self.budget,
                path,
                accepted.mtime,
            ) {
                error!("tar archive {:?} failed: {}", path, e);
                self.counts.failed += 1;
            }
        }
        outcome
    }

    /// Walks every root depth first, archiving new and changed entries
    pub fn incremental(&mut self) {
        info!(
            "Incremental pass over {}",
            self.roots.iter().map(|(r, _)| r.display()).join(", ")
        );
        for (root, device) in self.roots.clone() {
            if !self.walk_root(&root, device) {
                info!("Budget reached during incremental pass in {:?}", root);
                return;
            }
        }
    }

    /// Returns false once the budget is exhausted
    fn walk_root(&mut self, root: &Path, device: u64) -> bool {
        if self.policy.holds_marker(root) {
            info!("Skipping root {:?}, it holds the stop marker", root);
            self.blocked.insert(root);
            return true;
        }

        let mut walk = WalkDir::new(root)
            .min_depth(1)
            .same_file_system(true)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walk.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("walking {:?}: {}", root, e);
                    continue;
                }
            };
            let path = entry.path();
            let is_dir = entry.file_type().is_dir();

            if !is_dir && path.file_name() == Some(self.policy.stop_marker()) {
                continue;
            }
            if is_dir && self.policy.holds_marker(path) {
                debug!("stop marker in {:?}, skipping subtree", path);
                self.blocked.insert(path);
                self.counts.blocked += 1;
                walk.skip_current_dir();
                continue;
            }

            let outcome = self.consider(path, device, Pass::Incremental);
            if is_dir && outcome == Outcome::Blocked {
                walk.skip_current_dir();
            }
            if self.budget.exhausted() {
                return false;
            }
        }
        true
    }

    /// Device a recorded path is expected on: that of its innermost root
    fn device_for(&self, path: &Path) -> u64 {
        self.roots
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(_, device)| *device)
            .or_else(|| path.symlink_metadata().ok().map(|md| md.dev()))
            .unwrap_or_default()
    }

    /// Re-packs files recorded in older volumes, oldest volume first
    pub fn cyclic(&mut self) {
        if self.budget.exhausted() {
            return;
        }
        info!("Cyclic pass below volume {}", self.run.volume());
        let store = self.store;
        for row in store.files_below(self.run.volume()) {
            let path = match row {
                Ok((path, _)) => path,
                Err(e) => {
                    error!("reading recorded files failed, ending cyclic pass: {}", e);
                    return;
                }
            };
            let device = self.device_for(&path);
            self.consider(&path, device, Pass::Cyclic);
            if self.budget.exhausted() {
                info!("Budget reached during cyclic pass");
                return;
            }
        }
    }

    /// Closes the archive and returns the tallies
    pub fn finish(self) -> Result<RunCounts> {
        let mut writer = self.packer.finish()?;
        let size = writer.stream_position()?;
        info!(
            "Volume {} written: {} bytes of {} targeted",
            self.run.volume(),
            size,
            self.budget.target()
        );
        Ok(self.counts)
    }
}

/// Runs both passes against the configured store and archive
pub fn run_backup(config: &BackupConfig) -> Result<RunCounts> {
    let store = Store::open_or_init(config.db())?;
    let now = Local::now();
    let num = store.next_volume()?;
    let run = store.begin_volume(num, &now.format(VOLUME_DATE_FORMAT).to_string())?;
    info!(
        "Volume {}: target size {}, archive {:?}",
        num,
        config.size(),
        config.target()
    );

    let packer = Packer::create(config.target())?;
    let mut backup = BackupRun::new(config, &store, run, packer, now.timestamp());
    backup.incremental();
    backup.cyclic();
    backup.finish()
}
