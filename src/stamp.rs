// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Entry stamps.
//!
//! A __stamp__ fingerprints a tree entry by its metadata so that a later push
//! can tell whether the entry changed without reading its content.
//!
//! # Stamp Layout
//!
//! - Directories always use the sentinel `dir`.
//! - Files use `<sec>.<micros>-<size>-<ino>-<mode>-<uid>-<gid>` where the
//!   modification time is truncated to microseconds, and mode is the raw Unix
//!   mode in decimal, i.e., file type bits included.
//! - Symlinks use the file layout of the link itself followed by `+` and the
//!   stamp of whatever the link points to, or `+0` if the target cannot be
//!   read.
//!
//! # Pitfalls
//!
//! No content hash is taken. A file rewritten within the same microsecond with
//! the same size and ownership, or restored with its old metadata, keeps its
//! old stamp and will not be pushed again.

use crate::tree::{EntryInfo, EntryKind, Tree};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    time::UNIX_EPOCH,
};

/// Stamp of every directory.
pub const DIR_STAMP: &str = "dir";

/// Mapping of slash-separated relative path to stamp.
pub type StampTable = BTreeMap<String, Stamp>;

/// Metadata fingerprint of a tree entry.
///
/// The empty stamp stands for an entry that has never been seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Stamp(String);

impl Stamp {
    /// Wrap a previously recorded stamp.
    pub fn new(stamp: impl Into<String>) -> Self {
        Self(stamp.into())
    }

    /// Stamp entry from its own metadata alone.
    pub fn of(info: &EntryInfo) -> Self {
        if info.kind == EntryKind::Directory {
            return Self(DIR_STAMP.into());
        }

        let (secs, micros) = match info.mtime.duration_since(UNIX_EPOCH) {
            Ok(since) => (since.as_secs() as i64, since.subsec_micros()),
            Err(before) => {
                // INVARIANT: Keep micros positive for times before the epoch.
                let before = before.duration();
                let total = -(before.as_micros() as i128);
                (total.div_euclid(1_000_000) as i64, total.rem_euclid(1_000_000) as u32)
            }
        };

        Self(format!(
            "{secs}.{micros:06}-{}-{}-{}-{}-{}",
            info.size, info.ino, info.mode, info.uid, info.gid
        ))
    }

    /// Stamp entry at path of tree.
    ///
    /// Symlink stamps also cover the stamp of their target.
    pub fn read<T>(tree: &T, path: &str, info: &EntryInfo) -> Self
    where
        T: Tree + ?Sized,
    {
        let Self(mut stamp) = Self::of(info);
        if info.kind != EntryKind::Symlink {
            return Self(stamp);
        }

        match tree.metadata(path) {
            Ok(target) => {
                stamp.push('+');
                stamp.push_str(Self::of(&target).as_str());
            }
            Err(_) => stamp.push_str("+0"),
        }

        Self(stamp)
    }

    /// Check if stamp was never recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if stamp belongs to a directory.
    pub fn is_dir(&self) -> bool {
        self.0 == DIR_STAMP
    }

    /// Kind of entry that the stamp was taken from.
    ///
    /// Returns `None` for the empty stamp and for stamps that cannot be parsed.
    pub fn kind(&self) -> Option<EntryKind> {
        if self.is_dir() {
            return Some(EntryKind::Directory);
        }

        // INVARIANT: Stamps taken before the epoch lead with a minus sign.
        let fields = self.0.strip_prefix('-').unwrap_or(&self.0);
        fields
            .split('-')
            .nth(3)
            .and_then(|mode| mode.parse::<u32>().ok())
            .map(EntryKind::from_mode)
    }

    /// Treat stamp as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Stamp {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl From<&str> for Stamp {
    fn from(stamp: &str) -> Self {
        Self::new(stamp)
    }
}
