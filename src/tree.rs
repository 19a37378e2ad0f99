// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Readable file hierarchies.
//!
//! The bundler never touches the file system directly. Instead, it walks a
//! [`Tree`]: an abstract, read-only hierarchy addressed by slash-separated
//! relative paths where `"."` names the root. [`DirTree`] backs a tree with an
//! on-disk directory, and [`MemoryTree`] holds everything in memory.

use std::{
    collections::BTreeMap,
    fs::{self, File, FileType, Metadata},
    io::{self, ErrorKind, Read},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::warn;

/// Bit mask of the file type bits of a Unix mode.
pub const S_IFMT: u32 = 0o170000;

/// File type bits of a directory.
pub const S_IFDIR: u32 = 0o040000;

/// File type bits of a regular file.
pub const S_IFREG: u32 = 0o100000;

/// File type bits of a symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Kind of entry in a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,

    /// Devices, sockets, named pipes, and the like.
    Other,
}

impl EntryKind {
    /// Determine entry kind from the file type bits of a Unix mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::File,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }

    fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// Metadata of a tree entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub kind: EntryKind,

    /// Raw Unix mode, i.e., file type bits and permission bits.
    pub mode: u32,

    pub size: u64,
    pub mtime: SystemTime,

    /// Inode number, or 0 if the platform does not expose one.
    pub ino: u64,

    pub uid: u32,
    pub gid: u32,
}

impl EntryInfo {
    /// Permission bits of mode, including setuid, setgid, and sticky bits.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

impl From<&Metadata> for EntryInfo {
    #[cfg(unix)]
    fn from(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            kind: EntryKind::from_file_type(metadata.file_type()),
            mode: metadata.mode(),
            size: metadata.size(),
            mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
            ino: metadata.ino(),
            uid: metadata.uid(),
            gid: metadata.gid(),
        }
    }

    #[cfg(not(unix))]
    fn from(metadata: &Metadata) -> Self {
        let kind = EntryKind::from_file_type(metadata.file_type());
        let mode = match kind {
            EntryKind::Directory => S_IFDIR | 0o755,
            EntryKind::Symlink => S_IFLNK | 0o777,
            _ if metadata.permissions().readonly() => S_IFREG | 0o444,
            _ => S_IFREG | 0o644,
        };

        Self {
            kind,
            mode,
            size: metadata.len(),
            mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
            ino: 0,
            uid: 0,
            gid: 0,
        }
    }
}

/// Entry listed by [`Tree::read_dir`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Base name of entry.
    pub name: String,

    /// Kind of entry without following symlinks.
    pub kind: EntryKind,
}

/// Read-only file hierarchy.
///
/// All paths are slash-separated and relative to the root of the tree, where
/// `"."` names the root itself.
pub trait Tree {
    /// List entries of a directory sorted by name.
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Metadata of entry without following symlinks.
    fn symlink_metadata(&self, path: &str) -> io::Result<EntryInfo>;

    /// Metadata of entry, following symlinks.
    fn metadata(&self, path: &str) -> io::Result<EntryInfo>;

    /// Open regular file for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>>;

    /// Read entire contents of a regular file.
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(path)?.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Tree backed by a directory on the OS file system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    /// Construct new directory tree rooted at path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory backing the tree.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path == "." {
            return self.root.clone();
        }

        path.split('/').fold(self.root.clone(), |full, elem| full.join(elem))
    }
}

impl Tree for DirTree {
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                warn!("skipping non-UTF-8 file name {:?} in {path}", entry.file_name());
                continue;
            };

            let kind = match entry.file_type() {
                Ok(file_type) => EntryKind::from_file_type(file_type),
                Err(error) => {
                    warn!("could not determine file type of {name:?} in {path}: {error}");
                    continue;
                }
            };

            entries.push(DirEntry { name, kind });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn symlink_metadata(&self, path: &str) -> io::Result<EntryInfo> {
        fs::symlink_metadata(self.resolve(path)).map(|metadata| EntryInfo::from(&metadata))
    }

    fn metadata(&self, path: &str) -> io::Result<EntryInfo> {
        fs::metadata(self.resolve(path)).map(|metadata| EntryInfo::from(&metadata))
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self.resolve(path))?))
    }
}

/// File or directory stored in a [`MemoryTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryFile {
    pub data: Vec<u8>,
    pub mode: u32,
    pub mtime: SystemTime,
}

impl MemoryFile {
    /// Construct regular file with permission bits.
    pub fn file(data: impl Into<Vec<u8>>, permissions: u32) -> Self {
        Self {
            data: data.into(),
            mode: S_IFREG | (permissions & 0o7777),
            mtime: UNIX_EPOCH,
        }
    }

    /// Construct empty directory with permission bits.
    pub fn dir(permissions: u32) -> Self {
        Self {
            data: Vec::new(),
            mode: S_IFDIR | (permissions & 0o7777),
            mtime: UNIX_EPOCH,
        }
    }

    /// Set modification time.
    pub fn modified(mut self, mtime: SystemTime) -> Self {
        self.mtime = mtime;
        self
    }

    fn info(&self) -> EntryInfo {
        let kind = EntryKind::from_mode(self.mode);
        EntryInfo {
            kind,
            mode: self.mode,
            size: if kind == EntryKind::Directory { 0 } else { self.data.len() as u64 },
            mtime: self.mtime,
            ino: 0,
            uid: 0,
            gid: 0,
        }
    }
}

/// Tree held entirely in memory.
///
/// Parent directories of inserted entries exist implicitly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryTree {
    entries: BTreeMap<String, MemoryFile>,
}

impl MemoryTree {
    /// Construct new empty memory tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entry at slash-separated path, replacing any existing entry.
    pub fn insert(&mut self, path: impl Into<String>, file: MemoryFile) -> &mut Self {
        self.entries.insert(path.into(), file);
        self
    }

    /// Remove entry at path.
    pub fn remove(&mut self, path: &str) -> Option<MemoryFile> {
        self.entries.remove(path)
    }

    fn lookup(&self, path: &str) -> io::Result<EntryInfo> {
        if let Some(file) = self.entries.get(path) {
            return Ok(file.info());
        }

        if path == "." || self.children(path).next().is_some() {
            return Ok(MemoryFile::dir(0o755).info());
        }

        Err(io::Error::new(ErrorKind::NotFound, format!("{path}: no such file or directory")))
    }

    fn children<'a>(&'a self, dir: &str) -> impl Iterator<Item = (&'a str, &'a MemoryFile)> + 'a {
        let prefix = if dir == "." { String::new() } else { format!("{dir}/") };
        self.entries
            .iter()
            .filter_map(move |(path, file)| {
                path.strip_prefix(prefix.as_str())
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest, file))
            })
    }
}

impl Tree for MemoryTree {
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let info = self.lookup(path)?;
        if info.kind != EntryKind::Directory {
            return Err(io::Error::other(format!("{path}: not a directory")));
        }

        let mut listing = BTreeMap::new();
        for (rest, file) in self.children(path) {
            match rest.split_once('/') {
                Some((name, _)) => listing.insert(name.to_string(), EntryKind::Directory),
                None => listing.insert(rest.to_string(), EntryKind::from_mode(file.mode)),
            };
        }

        Ok(listing
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    fn symlink_metadata(&self, path: &str) -> io::Result<EntryInfo> {
        self.lookup(path)
    }

    fn metadata(&self, path: &str) -> io::Result<EntryInfo> {
        self.lookup(path)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        match self.entries.get(path) {
            Some(file) if EntryKind::from_mode(file.mode) == EntryKind::File => {
                Ok(Box::new(file.data.as_slice()))
            }
            Some(_) => Err(io::Error::other(format!("{path}: not a regular file"))),
            None => Err(io::Error::new(ErrorKind::NotFound, format!("{path}: no such file"))),
        }
    }
}
