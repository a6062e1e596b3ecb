//! Tracking store: which file went into which volume, and when each volume ran.
//!
//! The schema is shared with the status reporter and older databases, so table
//! and index definitions must not change.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

static SCHEMA_VERSION: i64 = 1;

static SCHEMA: &[&str] = &[
    "CREATE TABLE files (name TEXT NOT NULL, mtime REAL NOT NULL,volume INTEGER)",
    "CREATE UNIQUE INDEX \"prime\" on files (name ASC)",
    "CREATE INDEX vols on files (volume ASC)",
    "CREATE TABLE backup (num INTEGER NOT NULL, date TEXT NOT NULL)",
    "CREATE INDEX bknum on backup (num ASC)",
    "CREATE TABLE dbv(version INTEGER NOT NULL)",
];

/// Rows fetched per round trip by [`FilesBelow`]
static PAGE_SIZE: i64 = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub mtime: i64,
    pub volume: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub num: i64,
    pub date: String,
}

/// Answer to "when was this file last backed up"
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupStatus {
    pub path: PathBuf,
    pub mtime: i64,
    pub volume: i64,
    pub date: String,
}

/// Proof that the volume row of the current run exists
///
/// Only [`Store::begin_volume`] hands these out, and every file write needs
/// one, so no file record can point at a volume that was never recorded.
#[derive(Debug)]
pub struct RunHandle {
    volume: i64,
}

impl RunHandle {
    pub fn volume(&self) -> i64 {
        self.volume
    }
}

pub struct Store {
    conn: Connection,
}

/// Text stored in the `name` column; non-UTF-8 names are stored lossily
fn path_text(path: &Path) -> String {
    match path.to_str() {
        Some(text) => text.to_owned(),
        None => {
            let lossy = path.to_string_lossy().into_owned();
            tracing::warn!("{:?} is not valid UTF-8, recorded as {:?}", path, lossy);
            lossy
        }
    }
}

impl Store {
    /// Opens the database for a backup run, creating the schema on first use
    pub fn open_or_init<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(Error::from)
            .with_msg(format!("Opening tracking store {path:?} failed"))?;
        let mut store = Self { conn };
        store
            .prepare_schema()
            .with_msg(format!("Preparing tracking store {path:?} failed"))?;
        Ok(store)
    }

    /// Opens an existing database without write access
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .with_msg(format!("Opening tracking store {path:?} read-only failed"))?;
        Ok(Self { conn })
    }

    fn schema_version(&self) -> Result<i64> {
        let has_dbv: bool = self.conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'dbv'",
            [],
            |row| row.get(0),
        )?;
        if !has_dbv {
            return Ok(0);
        }
        let version: Option<i64> =
            self.conn
                .query_row("SELECT max(version) FROM dbv", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    fn prepare_schema(&mut self) -> Result<()> {
        let version = self.schema_version()?;
        if version == 0 {
            tracing::info!("Creating tracking store schema from scratch");
            let tx = self.conn.transaction()?;
            for stmt in SCHEMA {
                tx.execute(stmt, [])?;
            }
            tx.execute("INSERT INTO dbv VALUES(?1)", [SCHEMA_VERSION])?;
            tx.commit()?;
        } else {
            tracing::debug!("Tracking store schema version {}", version);
        }
        Ok(())
    }

    /// Number for the next run, one above anything recorded so far
    pub fn next_volume(&self) -> Result<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT max(v) FROM (SELECT max(volume) AS v FROM files \
             UNION ALL SELECT max(num) AS v FROM backup)",
            [],
            |row| row.get(0),
        )?;
        Ok(max.map_or(0, |v| v + 1))
    }

    /// Records the volume row; must happen before any file of the run is written
    pub fn begin_volume(&self, num: i64, timestamp: &str) -> Result<RunHandle> {
        self.conn.execute(
            "INSERT INTO backup(num, date) VALUES(?1, ?2)",
            params![num, timestamp],
        )?;
        tracing::debug!("Started volume {} at {}", num, timestamp);
        Ok(RunHandle { volume: num })
    }

    /// Replaces the record for `path`, committed immediately
    pub fn upsert_file(&self, run: &RunHandle, path: &Path, mtime: i64) -> Result<()> {
        self.conn.execute(
            "REPLACE INTO files(name, mtime, volume) VALUES(?1, ?2, ?3)",
            params![path_text(path), mtime, run.volume],
        )?;
        Ok(())
    }

    pub fn lookup_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT mtime, volume FROM files WHERE name = ?1",
                [path_text(path)],
                |row| {
                    Ok(FileRecord {
                        path: path.to_path_buf(),
                        mtime: row.get::<_, f64>(0)? as i64,
                        volume: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Files recorded in volumes older than `volume`, oldest volume first
    ///
    /// Rows are paged in lazily, so the store may be written while iterating.
    pub fn files_below(&self, volume: i64) -> FilesBelow<'_> {
        FilesBelow {
            store: self,
            below: volume,
            last: (i64::MIN, i64::MIN),
            page: VecDeque::new(),
            done: false,
        }
    }

    /// Latest volume that holds `path`, with that volume's date
    pub fn backup_status(&self, path: &Path) -> Result<Option<BackupStatus>> {
        let status = self
            .conn
            .query_row(
                "SELECT f.mtime, f.volume, b.date FROM files AS f \
                 JOIN backup AS b ON f.volume = b.num \
                 WHERE f.name = ?1 ORDER BY b.rowid DESC LIMIT 1",
                [path_text(path)],
                |row| {
                    Ok(BackupStatus {
                        path: path.to_path_buf(),
                        mtime: row.get::<_, f64>(0)? as i64,
                        volume: row.get(1)?,
                        date: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    pub fn volumes(&self) -> Result<Vec<Volume>> {
        let mut stmt = self
            .conn
            .prepare("SELECT num, date FROM backup ORDER BY num ASC, rowid ASC")?;
        let volumes = stmt
            .query_map([], |row| {
                Ok(Volume {
                    num: row.get(0)?,
                    date: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(volumes)
    }

    fn files_page(&self, below: i64, after: (i64, i64)) -> Result<Vec<(i64, i64, PathBuf)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT volume, rowid, name FROM files \
             WHERE volume < ?1 AND (volume > ?2 OR (volume = ?2 AND rowid > ?3)) \
             ORDER BY volume ASC, rowid ASC LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![below, after.0, after.1, PAGE_SIZE], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    PathBuf::from(row.get::<_, String>(2)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Lazy `(path, volume)` sequence returned by [`Store::files_below`]
pub struct FilesBelow<'a> {
    store: &'a Store,
    below: i64,
    last: (i64, i64),
    page: VecDeque<(i64, i64, PathBuf)>,
    done: bool,
}

impl Iterator for FilesBelow<'_> {
    type Item = Result<(PathBuf, i64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            match self.store.files_page(self.below, self.last) {
                Ok(rows) => {
                    self.done = (rows.len() as i64) < PAGE_SIZE;
                    self.page.extend(rows);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        let (volume, rowid, path) = self.page.pop_front()?;
        self.last = (volume, rowid);
        Some(Ok((path, volume)))
    }
}
