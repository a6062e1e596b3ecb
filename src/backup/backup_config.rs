use crate::backup::policy::{ExcludePattern, Policy};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::target_size::TargetSize;
use crate::backup::validate::{validate_parent_dir_exist, validate_stop_marker};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Settings of one backup run, loaded from YAML
///
/// ```yaml
/// backup: [/home, /etc]
/// exclude: ['/\.cache/', '\.o$']
/// flag: .bkstop
/// min_age: 300
/// size: 4G
/// target: /mnt/tape/backup.tar
/// db: /var/lib/backup/cycbackup.db
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    /// Roots walked by the incremental pass, in order
    #[serde(default)]
    #[validate(length(min = 1, message = "at least one backup root is required"))]
    #[builder(into)]
    backup: Vec<PathBuf>,
    #[serde(default)]
    #[builder(default, into)]
    exclude: Vec<ExcludePattern>,
    /// Stop-marker file name
    #[serde(default = "default_flag")]
    #[validate(custom(function = validate_stop_marker))]
    #[builder(default = default_flag(), into)]
    flag: String,
    /// Seconds a file must sit unmodified before it is archived
    #[serde(default = "default_min_age")]
    #[builder(default = default_min_age())]
    min_age: u64,
    #[serde(default)]
    #[builder(default)]
    size: TargetSize,
    /// Archive written by the run, truncated first
    #[serde(default = "default_target")]
    #[validate(custom(function = validate_parent_dir_exist))]
    #[builder(default = default_target(), into)]
    target: PathBuf,
    /// Tracking store
    #[serde(default = "default_db")]
    #[validate(custom(function = validate_parent_dir_exist))]
    #[builder(default = default_db(), into)]
    db: PathBuf,
}

fn default_flag() -> String {
    ".bkstop".to_string()
}

fn default_min_age() -> u64 {
    300
}

fn default_target() -> PathBuf {
    PathBuf::from("/tmp/backup.tar")
}

fn default_db() -> PathBuf {
    PathBuf::from("cycbackup.db")
}

impl BackupConfig {
    /// Loads, validates and absolutizes the config at `path`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::load(path).and_then(|bc| {
            bc.validate()
                .map_err(Error::from)
                .map(|_| bc)
                .with_msg(format!("Config validation failed: {path:?}"))
        })
    }

    /// Parses and absolutizes without validating, for read-only reporting
    /// where no backup roots are needed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {path:?}: {e}")))
            .and_then(|f| {
                serde_yml::from_reader::<_, BackupConfig>(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {path:?}"))
            })
            .and_then(|bc| bc.absolutize())
    }

    /// Resolves the store, archive and root paths against the working directory
    pub fn absolutize(mut self) -> Result<Self> {
        self.db = std::path::absolute(&self.db)?;
        self.target = std::path::absolute(&self.target)?;
        self.backup = self
            .backup
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<_>>()?;
        Ok(self)
    }

    pub fn set_size(&mut self, size: TargetSize) {
        self.size = size;
    }

    pub fn set_target<P: Into<PathBuf>>(&mut self, target: P) -> Result<()> {
        self.target = std::path::absolute(target.into())?;
        Ok(())
    }

    pub fn policy(&self) -> Policy {
        Policy::new(self.exclude.iter().cloned(), self.flag.as_str())
    }
}
