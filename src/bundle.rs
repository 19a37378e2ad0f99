// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Incremental bundle synchronizer.
//!
//! A __bundle__ is a zip archive holding every entry of a tree that changed
//! since the previous bundle, plus a __removal list__ of paths that must be
//! deleted from the destination before the archive is unpacked.
//!
//! # Bundle Procedure
//!
//! 1. Collect ignore rules: global rules first, then the rules of the
//!    [`IGNORE_FILE_NAME`] file at the root of the tree.
//! 2. Walk the tree depth-first in name order, pruning ignored directories.
//! 3. Stamp each entry and compare with its previous stamp. Directories are
//!    always archived so that their children have somewhere to land, while
//!    files and symlinks are only archived when their stamp changed.
//! 4. Mark paths whose type changed, and every replaced symlink, for removal.
//! 5. Mark paths that vanished since the previous bundle for removal.
//!
//! # Symlinks
//!
//! Symlinks are archived with their target rewritten relative to the link's
//! own directory. Links that resolve outside of the link root abort the
//! bundle, as does any symlink when no link root is given.
//!
//! # See Also
//!
//! - [`crate::pattern`]
//! - [`crate::stamp`]

use crate::{
    pattern::{last_match, parse_lines, Pattern},
    pipe::CancelToken,
    stamp::{Stamp, StampTable},
    tree::{EntryInfo, EntryKind, Tree},
};

use std::{
    borrow::Cow,
    cell::Cell,
    fs::{self, File},
    io::{self, BufWriter, ErrorKind, Read, Write},
    path::{Component, Path, PathBuf},
    rc::Rc,
};
use tracing::{debug, instrument, warn};
use zip::{
    result::ZipError,
    write::{SimpleFileOptions, StreamWriter},
    CompressionMethod, ZipWriter,
};

/// Name of ignore file at the root of a bundled tree.
pub const IGNORE_FILE_NAME: &str = ".biomeignore";

const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Inputs of [`bundle`].
#[derive(Clone, Debug, Default)]
pub struct BundleOptions {
    /// Rules applied before those of the tree's own ignore file.
    pub global_ignore: Vec<Pattern>,

    /// Stamps returned by the previous bundle, empty on the first one.
    pub prev_stamps: StampTable,

    /// On-disk directory backing the tree, needed to read symlinks.
    pub link_root: Option<PathBuf>,

    /// Checked before every entry and between chunks of file content.
    pub cancel: CancelToken,
}

/// Outputs of a successful [`bundle`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bundle {
    /// Stamps of every entry that was not ignored.
    pub stamps: StampTable,

    /// Paths to remove recursively before unpacking the archive.
    pub to_remove: Vec<String>,
}

/// Write archive of entries of tree that changed since the previous bundle.
///
/// The tree is only read. On error, the archive written so far is unusable,
/// and the previous stamps remain authoritative.
///
/// # Errors
///
/// - Return [`BundleError::LocalIgnore`] if the ignore file exists but cannot
///   be read.
/// - Return [`BundleError::NoLinkRoot`] or [`BundleError::SymlinkEscape`] for
///   symlinks that cannot be archived safely.
/// - Return [`BundleError::Unsupported`] for devices, sockets, and pipes.
/// - Return [`BundleError::Io`] or [`BundleError::Archive`] if file content
///   cannot be copied into the archive.
/// - Return [`BundleError::Cancelled`] if cancelled during the walk.
#[instrument(skip(out, tree, opts), level = "debug")]
pub fn bundle<W, T>(out: W, tree: &T, opts: &BundleOptions) -> Result<Bundle>
where
    W: Write,
    T: Tree + ?Sized,
{
    let mut patterns = opts.global_ignore.clone();
    match tree.read(IGNORE_FILE_NAME) {
        Ok(data) => patterns.extend(parse_lines(&data)),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => return Err(BundleError::LocalIgnore { source: error }),
    }

    let aborted = Rc::new(Cell::new(false));
    let mut walker = Walker {
        tree,
        opts,
        patterns,
        archive: ZipWriter::new_stream(Abortable {
            inner: out,
            aborted: aborted.clone(),
        }),
        stamps: StampTable::new(),
        to_remove: Vec::new(),
    };

    if let Err(error) = walker.walk(".") {
        // INVARIANT: The archive of a failed walk is never finalized.
        aborted.set(true);
        return Err(error);
    }

    let Walker {
        archive,
        stamps,
        mut to_remove,
        ..
    } = walker;
    archive
        .finish()
        .map_err(|source| BundleError::Finish { source })?;

    for path in opts.prev_stamps.keys() {
        if !stamps.contains_key(path) {
            debug!("{path} was removed");
            to_remove.push(path.clone());
        }
    }

    Ok(Bundle { stamps, to_remove })
}

/// Write archive of tree to a file at `output`, see [`bundle`].
///
/// The file is deleted again if the bundle fails, so that no unusable archive
/// is left behind.
///
/// # Errors
///
/// - Return [`BundleError::Output`] if the file cannot be created or written.
/// - Return any error of [`bundle`].
#[instrument(skip(tree, opts), level = "debug")]
pub fn bundle_to_file<T>(output: &Path, tree: &T, opts: &BundleOptions) -> Result<Bundle>
where
    T: Tree + ?Sized,
{
    let output_error = |source| BundleError::Output {
        source,
        path: output.into(),
    };
    let mut writer = BufWriter::new(File::create(output).map_err(output_error)?);
    let result = bundle(&mut writer, tree, opts)
        .and_then(|result| writer.flush().map(|()| result).map_err(output_error));
    drop(writer);

    if result.is_err() {
        if let Err(error) = fs::remove_file(output) {
            warn!("failed to delete {:?}: {error}", output.display());
        }
    }

    result
}

struct Walker<'a, T: ?Sized, W: Write> {
    tree: &'a T,
    opts: &'a BundleOptions,
    patterns: Vec<Pattern>,
    archive: ZipWriter<StreamWriter<Abortable<W>>>,
    stamps: StampTable,
    to_remove: Vec<String>,
}

impl<T, W> Walker<'_, T, W>
where
    T: Tree + ?Sized,
    W: Write,
{
    fn walk(&mut self, dir: &str) -> Result<()> {
        let entries = match self.tree.read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!("could not list {dir}: {error}");
                return Ok(());
            }
        };

        for entry in entries {
            self.check_cancel()?;

            let path = if dir == "." {
                entry.name
            } else {
                format!("{dir}/{}", entry.name)
            };

            if path == IGNORE_FILE_NAME {
                continue;
            }

            if let Some(rule) = last_match(&self.patterns, &path, entry.kind) {
                if !rule.is_negated() {
                    debug!("ignored {path} due to rule {:?}", rule.as_str());
                    continue;
                }
            }

            let info = match self.tree.symlink_metadata(&path) {
                Ok(info) => info,
                Err(error) => {
                    warn!("could not stat {path}: {error}");
                    continue;
                }
            };

            self.visit(&path, &info)?;
            if info.kind == EntryKind::Directory {
                self.walk(&path)?;
            }
        }

        Ok(())
    }

    fn visit(&mut self, path: &str, info: &EntryInfo) -> Result<()> {
        let old = self.opts.prev_stamps.get(path).cloned().unwrap_or_default();
        let new = Stamp::read(self.tree, path, info);
        self.stamps.insert(path.into(), new.clone());

        if old == new && info.kind != EntryKind::Directory {
            debug!("{path} has not changed");
            return Ok(());
        }
        debug!("{path} stamp {old:?} -> {new:?}");

        let options = SimpleFileOptions::default().unix_permissions(info.permissions());
        match info.kind {
            EntryKind::Directory => {
                // INVARIANT: Extraction cannot turn a file or symlink into a directory.
                if !old.is_empty() && !old.is_dir() {
                    self.to_remove.push(path.into());
                }

                self.archive
                    .add_directory(format!("{path}/"), options)
                    .map_err(archive_error(path))?;
            }
            EntryKind::Symlink => {
                let target = self.link_target(path)?;

                // INVARIANT: Extraction cannot overwrite a symlink in place.
                if !old.is_empty() {
                    self.to_remove.push(path.into());
                }

                self.archive
                    .add_symlink(path, target, options)
                    .map_err(archive_error(path))?;
            }
            EntryKind::File => {
                if old.kind().is_some_and(|kind| kind != EntryKind::File) {
                    self.to_remove.push(path.into());
                }

                let tree = self.tree;
                let mut reader = tree.open(path).map_err(io_error(path))?;
                let options = options
                    .compression_method(CompressionMethod::Deflated)
                    .large_file(info.size >= u64::from(u32::MAX));
                self.archive
                    .start_file(path, options)
                    .map_err(archive_error(path))?;
                self.copy_content(path, &mut reader)?;
            }
            EntryKind::Other => {
                return Err(BundleError::Unsupported { path: path.into() });
            }
        }

        Ok(())
    }

    fn copy_content(&mut self, path: &str, reader: &mut dyn Read) -> Result<()> {
        let mut chunk = vec![0; COPY_CHUNK_SIZE];
        loop {
            self.check_cancel()?;
            let count = match reader.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(count) => count,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(io_error(path)(error)),
            };
            self.archive
                .write_all(&chunk[..count])
                .map_err(io_error(path))?;
        }
    }

    /// Target of symlink relative to its own directory, with forward slashes.
    fn link_target(&self, path: &str) -> Result<String> {
        let root = self
            .opts
            .link_root
            .as_deref()
            .ok_or_else(|| BundleError::NoLinkRoot { path: path.into() })?;
        let root = normalize(&std::path::absolute(root).map_err(io_error(path))?);

        let link_path = path.split('/').fold(root.clone(), |full, elem| full.join(elem));
        let raw_target = fs::read_link(&link_path).map_err(io_error(path))?;
        let link_dir = link_path.parent().unwrap_or(&root).to_path_buf();
        let abs_target = normalize(&link_dir.join(&raw_target));

        if !abs_target.starts_with(&root) {
            return Err(BundleError::SymlinkEscape {
                path: path.into(),
                target: raw_target,
                root,
            });
        }

        Ok(relative_slash_path(&link_dir, &abs_target))
    }

    fn check_cancel(&self) -> Result<()> {
        if self.opts.cancel.is_cancelled() {
            return Err(BundleError::Cancelled);
        }

        Ok(())
    }
}

/// Writer that silently discards everything once aborted.
///
/// [`ZipWriter`] finalizes the archive when dropped, which must not reach the
/// output after a failed walk.
struct Abortable<W> {
    inner: W,
    aborted: Rc<Cell<bool>>,
}

impl<W: Write> Write for Abortable<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.aborted.get() {
            return Ok(data.len());
        }

        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.aborted.get() {
            return Ok(());
        }

        self.inner.flush()
    }
}

fn io_error(path: &str) -> impl FnOnce(io::Error) -> BundleError + '_ {
    move |source| BundleError::Io {
        path: path.into(),
        source,
    }
}

fn archive_error(path: &str) -> impl FnOnce(ZipError) -> BundleError + '_ {
    move |source| BundleError::Archive {
        path: path.into(),
        source,
    }
}

/// Lexically resolve `.` and `..` elements of an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }

    out
}

/// Path of `target` relative to `base`, joined with forward slashes.
///
/// Both paths must be absolute and normalized.
fn relative_slash_path(base: &Path, target: &Path) -> String {
    let base = base.components().collect::<Vec<_>>();
    let target = target.components().collect::<Vec<_>>();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let elems = std::iter::repeat(Cow::Borrowed(".."))
        .take(base.len() - common)
        .chain(
            target[common..]
                .iter()
                .map(|component| component.as_os_str().to_string_lossy()),
        )
        .collect::<Vec<_>>();

    if elems.is_empty() {
        return ".".into();
    }

    elems.join("/")
}

/// Bundle error types.
///
/// Errors concerning a single entry are qualified by its path.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Ignore file of tree exists but cannot be read.
    #[error("failed to read .biomeignore")]
    LocalIgnore {
        #[source]
        source: io::Error,
    },

    /// Symlink found without knowing which directory backs the tree.
    #[error("{path}: found symlink on unsupported file system")]
    NoLinkRoot { path: String },

    /// Symlink resolves outside of the link root.
    #[error("{path}: symlink refers to {} which is outside {}", target.display(), root.display())]
    SymlinkEscape {
        path: String,
        target: PathBuf,
        root: PathBuf,
    },

    /// Entry is a device, socket, pipe, or similar.
    #[error("{path}: not a file, directory, or symlink")]
    Unsupported { path: String },

    /// Entry cannot be read.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Entry cannot be written to archive.
    #[error("{path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: ZipError,
    },

    /// Archive cannot be finalized.
    #[error("failed to finish archive")]
    Finish {
        #[source]
        source: ZipError,
    },

    /// Archive file cannot be written.
    #[error("failed to write {:?}", path.display())]
    Output {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Walk was cancelled.
    #[error("bundle cancelled")]
    Cancelled,
}

/// Friendly result alias :3
pub type Result<T, E = BundleError> = std::result::Result<T, E>;
