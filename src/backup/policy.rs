//! Exclusion patterns and stop-marker blocking.
//!
//! Exclusion is a static list of regular expressions searched against the full
//! path (directories carry a trailing separator, so `/cache/$` only matches the
//! directory itself). Blocking is dynamic: a directory holding the stop-marker
//! file is excluded together with everything beneath it, and every directory
//! found that way is remembered in a [`BlockedSet`] for the rest of the run.

use derive_more::{Display, From};
use regex::Regex;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fmt::Formatter;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::result;

/// A compiled exclusion regex that (de)serializes as its pattern text
#[derive(Clone, Debug, From, Display)]
pub struct ExcludePattern {
    regex: Regex,
}

impl ExcludePattern {
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

impl Serialize for ExcludePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct ExcludePatternVisitor;

impl Visitor<'_> for ExcludePatternVisitor {
    type Value = ExcludePattern;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a regular expression")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Regex::new(v)
            .map(ExcludePattern::from)
            .map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ExcludePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(ExcludePatternVisitor)
    }
}

/// Directories found to hold (or sit beneath) a stop marker during this run
#[derive(Debug, Default)]
pub struct BlockedSet {
    dirs: HashSet<PathBuf>,
}

impl BlockedSet {
    pub fn insert<P: Into<PathBuf>>(&mut self, dir: P) -> bool {
        self.dirs.insert(dir.into())
    }

    /// True when `path` or one of its ancestors was blocked
    pub fn covers(&self, path: &Path) -> bool {
        path.ancestors().any(|a| self.dirs.contains(a))
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Policy {
    exclude: Vec<ExcludePattern>,
    stop_marker: OsString,
}

impl Policy {
    pub fn new<I: IntoIterator<Item = ExcludePattern>, S: Into<OsString>>(
        exclude: I,
        stop_marker: S,
    ) -> Self {
        Self {
            exclude: exclude.into_iter().collect(),
            stop_marker: stop_marker.into(),
        }
    }

    pub fn stop_marker(&self) -> &OsStr {
        &self.stop_marker
    }

    /// First pattern, in configured order, that matches the path
    pub fn excluded_by(&self, path: &Path, is_dir: bool) -> Option<&ExcludePattern> {
        let mut name = path.to_string_lossy().into_owned();
        if is_dir && !name.ends_with(MAIN_SEPARATOR) {
            name.push(MAIN_SEPARATOR);
        }
        self.exclude.iter().find(|pt| pt.is_match(&name))
    }

    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        self.excluded_by(path, is_dir).is_some()
    }

    /// Whether `dir` directly contains the stop marker
    pub fn holds_marker(&self, dir: &Path) -> bool {
        dir.join(&self.stop_marker).symlink_metadata().is_ok()
    }

    /// Nearest ancestor of `path` holding the stop marker
    ///
    /// The filesystem root is never considered.
    pub fn find_stop_marker(&self, path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .skip(1)
            .take_while(|a| a.parent().is_some())
            .filter(|a| !a.as_os_str().is_empty())
            .find(|a| self.holds_marker(a))
            .map(Path::to_path_buf)
    }

    /// Whether `path` lies in a blocked subtree, recording newly found ones
    pub fn is_blocked(&self, path: &Path, blocked: &mut BlockedSet) -> bool {
        if blocked.covers(path) {
            return true;
        }
        match self.find_stop_marker(path) {
            Some(dir) => {
                tracing::debug!("Found stop marker in {:?}", dir);
                blocked.insert(dir);
                true
            }
            None => false,
        }
    }
}
