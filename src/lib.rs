//! # cyc-backup
//!
//! Space-bounded rotating backups into one TAR archive per run.
//!
//! ## How a run works
//!
//! - **Incremental pass**: the configured roots are walked and every entry that
//!   is old enough and changed since it was last recorded goes into the archive.
//! - **Cyclic pass**: whatever budget is left re-packs files recorded in older
//!   volumes, oldest first, so over many runs the whole tree keeps being
//!   refreshed.
//! - **Budget**: selection stops as soon as the archive approaches the target
//!   size, so each run's archive fits its medium.
//! - **Tracking store**: a SQLite database remembers which file went into which
//!   volume; `bkstatus` reads it to answer "is this file backed up".
//!
//! Directories holding a stop-marker file (`.bkstop` by default) are skipped
//! with everything beneath them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cyc_backup::backup::backup_config::BackupConfig;
//! use cyc_backup::backup::run::run_backup;
//!
//! let config = BackupConfig::from_file("cycbackup.yml")?;
//! let counts = run_backup(&config)?;
//! println!("{counts}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
