//! Decides, for one filesystem entry, whether it goes into this run's archive.

use crate::backup::policy::{BlockedSet, Policy};
use crate::backup::store::Store;
use derive_more::Display;
use nix::unistd::{access, AccessFlags};
use std::fmt::Formatter;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Estimated archive bytes added per entry on top of its content
pub static ENTRY_OVERHEAD: u64 = 1536;
/// Headroom below the target at which a pass gives up
pub static SAFETY_MARGIN: u64 = 8096;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Pass {
    #[display("incremental")]
    Incremental,
    #[display("cyclic")]
    Cyclic,
}

/// What was learned about an accepted entry when it was classified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub mtime: i64,
    pub size: u64,
    pub is_dir: bool,
}

/// Result of [`classify`], in the order the checks run
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Outcome {
    #[display("blocked")]
    Blocked,
    #[display("stat error")]
    StatError,
    #[display("excluded")]
    Excluded,
    #[display("own file")]
    SelfSkip,
    #[display("other device")]
    DeviceSkip,
    #[display("socket")]
    SocketSkip,
    #[display("too recent")]
    TooRecent,
    #[display("same old")]
    SameOld,
    #[display("permission denied")]
    PermissionDenied,
    #[display("too big")]
    TooBig,
    #[display("accepted")]
    Accepted(Accepted),
}

/// Size budget of one run
#[derive(Clone, Debug)]
pub struct RunBudget {
    target: u64,
    accumulated: u64,
    overhead: u64,
}

impl RunBudget {
    pub fn new(target: u64) -> Self {
        Self {
            target,
            accumulated: 0,
            overhead: ENTRY_OVERHEAD,
        }
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Takes the archive's physical size; never moves backwards
    pub fn observe(&mut self, archive_size: u64) {
        self.accumulated = self.accumulated.max(archive_size);
    }

    pub fn would_exceed(&self, entry_size: u64) -> bool {
        self.accumulated
            .saturating_add(self.overhead)
            .saturating_add(entry_size)
            >= self.target
    }

    /// Whether the run is close enough to the target to stop selecting
    pub fn exhausted(&self) -> bool {
        self.accumulated.saturating_add(SAFETY_MARGIN) > self.target
    }
}

/// Per-outcome tallies of one run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub backed_up: u64,
    pub incremental: u64,
    pub cyclic: u64,
    pub blocked: u64,
    pub stat_error: u64,
    pub excluded: u64,
    pub self_skip: u64,
    pub device: u64,
    pub socket: u64,
    pub too_recent: u64,
    pub same_old: u64,
    pub permissions: u64,
    pub too_big: u64,
    pub failed: u64,
}

impl RunCounts {
    pub fn record(&mut self, outcome: &Outcome, pass: Pass) {
        let counter = match outcome {
            Outcome::Blocked => &mut self.blocked,
            Outcome::StatError => &mut self.stat_error,
            Outcome::Excluded => &mut self.excluded,
            Outcome::SelfSkip => &mut self.self_skip,
            Outcome::DeviceSkip => &mut self.device,
            Outcome::SocketSkip => &mut self.socket,
            Outcome::TooRecent => &mut self.too_recent,
            Outcome::SameOld => &mut self.same_old,
            Outcome::PermissionDenied => &mut self.permissions,
            Outcome::TooBig => &mut self.too_big,
            Outcome::Accepted(_) => {
                self.backed_up += 1;
                match pass {
                    Pass::Incremental => &mut self.incremental,
                    Pass::Cyclic => &mut self.cyclic,
                }
            }
        };
        *counter += 1;
    }
}

impl std::fmt::Display for RunCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rows = [
            ("backed up files", self.backed_up),
            ("incremental", self.incremental),
            ("cyclic", self.cyclic),
            ("skipped 2 recent", self.too_recent),
            ("skipped as same", self.same_old),
            ("skipped flag", self.blocked),
            ("excluded", self.excluded),
            ("other device", self.device),
            ("sockets", self.socket),
            ("skipped perm.", self.permissions),
            ("stat errors", self.stat_error),
            ("too big", self.too_big),
            ("write failed", self.failed),
        ];
        writeln!(f, "The counts are:")?;
        writeln!(f)?;
        for (label, count) in rows {
            writeln!(f, "{label:>16}:{count:>7}")?;
        }
        Ok(())
    }
}

/// Everything [`classify`] consults besides the entry itself
pub struct ClassifyContext<'a> {
    pub policy: &'a Policy,
    pub store: &'a Store,
    pub blocked: &'a mut BlockedSet,
    /// Device of the root being backed up
    pub device: u64,
    /// Entries modified after this (unix seconds) are left for a later run
    pub stale_before: i64,
    pub pass: Pass,
    pub budget: &'a RunBudget,
    /// Store and archive of the run itself
    pub own_files: &'a [PathBuf],
}

fn is_readable(path: &Path) -> bool {
    access(path, AccessFlags::R_OK).is_ok()
}

pub fn classify(path: &Path, ctx: &mut ClassifyContext<'_>) -> Outcome {
    if ctx.policy.is_blocked(path, ctx.blocked) {
        tracing::trace!("blocked: {:?}", path);
        return Outcome::Blocked;
    }

    let md = match path.symlink_metadata() {
        Ok(md) => md,
        Err(e) => {
            tracing::error!("lstat({:?}): {}", path, e);
            return Outcome::StatError;
        }
    };
    let is_dir = md.is_dir();

    if ctx.policy.is_excluded(path, is_dir) {
        tracing::trace!("excluded: {:?}", path);
        return Outcome::Excluded;
    }
    if ctx.own_files.iter().any(|own| own == path) {
        tracing::debug!("own file: {:?}", path);
        return Outcome::SelfSkip;
    }
    if md.dev() != ctx.device {
        tracing::debug!("device: {:?}", path);
        return Outcome::DeviceSkip;
    }
    if md.file_type().is_socket() {
        tracing::debug!("socket: {:?}", path);
        return Outcome::SocketSkip;
    }

    let mtime = md.mtime();
    if mtime > ctx.stale_before {
        tracing::debug!("too recent: {:?}", path);
        return Outcome::TooRecent;
    }

    if ctx.pass == Pass::Incremental {
        match ctx.store.lookup_file(path) {
            Ok(Some(record)) if record.mtime == mtime => {
                tracing::trace!("same old: {:?}", path);
                return Outcome::SameOld;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("lookup of {:?} failed, treating as new: {}", path, e),
        }
    }

    if !is_readable(path) {
        tracing::warn!("missing permissions: {:?}", path);
        return Outcome::PermissionDenied;
    }

    let size = if md.is_file() { md.len() } else { 0 };
    if ctx.budget.would_exceed(size) {
        tracing::trace!("too big: {:?}", path);
        return Outcome::TooBig;
    }

    Outcome::Accepted(Accepted {
        mtime,
        size,
        is_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::policy::ExcludePattern;
    use filetime::FileTime;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    const OLD: i64 = 1_600_000_000;

    struct Fixture {
        dir: TempDir,
        store: Store,
        policy: Policy,
        blocked: BlockedSet,
        budget: RunBudget,
        own_files: Vec<PathBuf>,
        device: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("track.db");
            let store = Store::open_or_init(&db).unwrap();
            let exclude: ExcludePattern = serde_json::from_str("\"\\\\.o$\"").unwrap();
            let device = dir.path().metadata().unwrap().dev();
            Self {
                store,
                policy: Policy::new([exclude], ".bkstop"),
                blocked: BlockedSet::default(),
                budget: RunBudget::new(1024 * 1024),
                own_files: vec![db],
                device,
                dir,
            }
        }

        fn old_file(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            filetime::set_file_mtime(&path, FileTime::from_unix_time(OLD, 0)).unwrap();
            path
        }

        fn classify(&mut self, path: &Path, pass: Pass) -> Outcome {
            let mut ctx = ClassifyContext {
                policy: &self.policy,
                store: &self.store,
                blocked: &mut self.blocked,
                device: self.device,
                stale_before: OLD + 10,
                pass,
                budget: &self.budget,
                own_files: &self.own_files,
            };
            classify(path, &mut ctx)
        }
    }

    #[test]
    fn test_accepts_old_plain_file() {
        let mut fx = Fixture::new();
        let path = fx.old_file("a.txt", b"hello");
        assert_eq!(
            fx.classify(&path, Pass::Incremental),
            Outcome::Accepted(Accepted {
                mtime: OLD,
                size: 5,
                is_dir: false
            })
        );
    }

    #[test]
    fn test_blocked_beats_everything() {
        let mut fx = Fixture::new();
        let path = fx.old_file("stop/x/y/z.o", b"");
        std::fs::write(fx.dir.path().join("stop/.bkstop"), "").unwrap();
        assert_eq!(fx.classify(&path, Pass::Incremental), Outcome::Blocked);
        let gone = fx.dir.path().join("stop/x/gone");
        assert_eq!(fx.classify(&gone, Pass::Cyclic), Outcome::Blocked);
    }

    #[test]
    fn test_readability_check() {
        let fx = Fixture::new();
        let path = fx.old_file("r.txt", b"r");
        assert!(is_readable(&path));
        assert!(is_readable(fx.dir.path()));
        assert!(!is_readable(&fx.dir.path().join("missing")));
    }

    #[test]
    fn test_missing_file_is_stat_error() {
        let mut fx = Fixture::new();
        let path = fx.dir.path().join("missing");
        assert_eq!(fx.classify(&path, Pass::Cyclic), Outcome::StatError);
    }

    #[test]
    fn test_excluded_and_own_files() {
        let mut fx = Fixture::new();
        let path = fx.old_file("main.o", b"");
        assert_eq!(fx.classify(&path, Pass::Incremental), Outcome::Excluded);

        let db = fx.own_files[0].clone();
        assert_eq!(fx.classify(&db, Pass::Incremental), Outcome::SelfSkip);
    }

    #[test]
    fn test_other_device_skipped() {
        let mut fx = Fixture::new();
        let path = fx.old_file("a.txt", b"");
        fx.device = fx.device.wrapping_add(1);
        assert_eq!(fx.classify(&path, Pass::Incremental), Outcome::DeviceSkip);
    }

    #[test]
    fn test_socket_skipped() {
        let mut fx = Fixture::new();
        let path = fx.dir.path().join("sock");
        let _listener = UnixListener::bind(&path).unwrap();
        assert_eq!(fx.classify(&path, Pass::Incremental), Outcome::SocketSkip);
        assert_eq!(fx.classify(&path, Pass::Cyclic), Outcome::SocketSkip);
    }

    #[test]
    fn test_fresh_file_too_recent() {
        let mut fx = Fixture::new();
        let path = fx.old_file("a.txt", b"");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(OLD + 11, 0)).unwrap();
        assert_eq!(fx.classify(&path, Pass::Incremental), Outcome::TooRecent);
    }

    #[test]
    fn test_same_old_only_on_incremental() {
        let mut fx = Fixture::new();
        let path = fx.old_file("a.txt", b"abc");
        let run = fx.store.begin_volume(0, "d0").unwrap();
        fx.store.upsert_file(&run, &path, OLD).unwrap();

        assert_eq!(fx.classify(&path, Pass::Incremental), Outcome::SameOld);
        assert!(matches!(
            fx.classify(&path, Pass::Cyclic),
            Outcome::Accepted(_)
        ));

        fx.store.upsert_file(&run, &path, OLD - 1).unwrap();
        assert!(matches!(
            fx.classify(&path, Pass::Incremental),
            Outcome::Accepted(_)
        ));
    }

    #[test]
    fn test_too_big_against_budget() {
        let mut fx = Fixture::new();
        fx.budget = RunBudget::new(ENTRY_OVERHEAD + 100);
        let fits = fx.old_file("small", &[0u8; 99]);
        let exact = fx.old_file("exact", &[0u8; 100]);
        assert!(matches!(
            fx.classify(&fits, Pass::Incremental),
            Outcome::Accepted(_)
        ));
        assert_eq!(fx.classify(&exact, Pass::Incremental), Outcome::TooBig);
    }

    #[test]
    fn test_directory_has_no_content_size() {
        let mut fx = Fixture::new();
        let path = fx.dir.path().join("sub");
        std::fs::create_dir(&path).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(OLD, 0)).unwrap();
        assert_eq!(
            fx.classify(&path, Pass::Incremental),
            Outcome::Accepted(Accepted {
                mtime: OLD,
                size: 0,
                is_dir: true
            })
        );
    }

    #[test]
    fn test_budget_exhaustion() {
        let mut budget = RunBudget::new(10_000);
        assert!(!budget.exhausted());
        budget.observe(1_905);
        assert!(budget.exhausted());
        budget.observe(10);
        assert_eq!(budget.accumulated(), 1_905);
    }

    #[test]
    fn test_counts_split_accepted_by_pass() {
        let mut counts = RunCounts::default();
        let accepted = Outcome::Accepted(Accepted {
            mtime: 0,
            size: 0,
            is_dir: false,
        });
        counts.record(&accepted, Pass::Incremental);
        counts.record(&accepted, Pass::Cyclic);
        counts.record(&Outcome::TooBig, Pass::Cyclic);
        assert_eq!(
            (counts.backed_up, counts.incremental, counts.cyclic, counts.too_big),
            (2, 1, 1, 1)
        );
        let summary = counts.to_string();
        assert!(summary.contains(" backed up files:      2"));
    }
}
