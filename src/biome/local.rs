// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host-local biome backend.
//!
//! Runs programs directly on the host inside a __support directory__ holding
//! two subdirectories: `work`, which mirrors the host directory tree, and
//! `home`, which programs see as `$HOME`.
//!
//! # Pitfalls
//!
//! There is no sandboxing of any kind. A program run in a local biome can
//! touch anything that the invoking user can.
//!
//! Archives keep the mode bits of the host, so a biome may contain
//! directories without write permission. [`LocalBiome::destroy`] grants write
//! permission to such directories before emptying them.

use crate::{
    biome::{Biome, BiomeError, Descriptor, Dirs, Invocation, Os, Result, Support},
    path,
    pipe::{CancelToken, CANCELLED},
};

use std::{
    fs::{self, File},
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};
use tracing::{debug, instrument};

/// Biome that runs programs on the host.
#[derive(Clone, Debug)]
pub struct LocalBiome {
    root: PathBuf,
    desc: Descriptor,
    dirs: Dirs,
}

impl LocalBiome {
    /// Open local biome at support directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// - Return [`BiomeError::Io`] if support directories cannot be created.
    /// - Return [`BiomeError::NonUtf8Path`] if root is not valid UTF-8.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let work = root.join("work");
        let home = root.join("home");
        for dir in [&work, &home] {
            fs::create_dir_all(dir).map_err(|error| BiomeError::Io {
                source: error,
                path: dir.display().to_string(),
            })?;
        }

        let dirs = Dirs {
            work: utf8(&work)?,
            home: utf8(&home)?,
        };

        Ok(Self {
            root,
            desc: Descriptor { os: Os::host() },
            dirs,
        })
    }

    /// Path to support directory.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Delete support directory along with everything in it.
    ///
    /// # Errors
    ///
    /// - Return [`BiomeError::Io`] if any entry cannot be deleted, or if
    ///   cancelled midway.
    #[instrument(skip(self, cancel), fields(root = ?self.root.display()), level = "debug")]
    pub fn destroy(self, cancel: &CancelToken) -> Result<()> {
        remove_all(&self.root, cancel).map_err(|source| BiomeError::Io {
            source,
            path: self.root.display().to_string(),
        })
    }

    fn resolve(&self, path: &str) -> String {
        path::abs_path(&self.desc, &self.dirs.work, path)
    }
}

impl Biome for LocalBiome {
    fn describe(&self) -> &Descriptor {
        &self.desc
    }

    fn dirs(&self) -> &Dirs {
        &self.dirs
    }

    #[instrument(skip(self, invocation), fields(argv = ?invocation.argv), level = "debug")]
    fn run(&self, invocation: Invocation<'_>) -> Result<()> {
        let Invocation {
            argv,
            dir,
            stdin,
            stdout,
            stderr,
            interactive,
        } = invocation;

        let (program, args) = argv.split_first().ok_or(BiomeError::EmptyArgv)?;
        let cwd = self.resolve(dir.as_deref().unwrap_or_default());
        debug!("run {program:?} in {cwd:?}");

        let unset = || {
            if interactive {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&cwd)
            .env("HOME", &self.dirs.home)
            .stdin(if stdin.is_some() { Stdio::piped() } else { unset() })
            .stdout(if stdout.is_some() { Stdio::piped() } else { unset() })
            .stderr(if stderr.is_some() { Stdio::piped() } else { unset() })
            .spawn()
            .map_err(|error| BiomeError::Spawn {
                source: error,
                program: program.clone(),
            })?;

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let streamed = thread::scope(|scope| {
            let feed = scope.spawn(move || match (stdin, child_stdin) {
                (Some(src), Some(mut dst)) => match io::copy(src, &mut dst) {
                    // INVARIANT: Program may exit without reading all of its input.
                    Err(error) if error.kind() == ErrorKind::BrokenPipe => Ok(()),
                    result => result.map(drop),
                },
                _ => Ok(()),
            });
            let out = scope.spawn(move || drain(child_stdout, stdout));
            let err = drain(child_stderr, stderr);

            let results = [
                feed.join().unwrap_or_else(|_| Err(io::Error::other("stdin pump panicked"))),
                out.join().unwrap_or_else(|_| Err(io::Error::other("stdout pump panicked"))),
                err,
            ];
            results.into_iter().collect::<io::Result<()>>()
        });

        let status = child.wait().map_err(|error| BiomeError::Wait {
            source: error,
            program: program.clone(),
        })?;

        if !status.success() {
            return Err(BiomeError::Exit {
                program: program.clone(),
                status: status.to_string(),
            });
        }

        streamed.map_err(|error| BiomeError::Stream {
            source: error,
            program: program.clone(),
        })
    }

    #[instrument(skip(self, src), level = "debug")]
    fn write_file(&self, path: &str, src: &mut (dyn Read + Send)) -> Support<Result<()>> {
        let path = self.resolve(path);
        let result = File::create(&path)
            .and_then(|mut file| {
                io::copy(src, &mut file)?;
                file.flush()
            })
            .map_err(|error| BiomeError::Io { source: error, path });

        Support::Supported(result)
    }
}

fn drain(src: Option<impl Read>, dst: Option<&mut (dyn Write + Send)>) -> io::Result<()> {
    match (src, dst) {
        (Some(mut src), Some(dst)) => io::copy(&mut src, dst).map(drop),
        _ => Ok(()),
    }
}

/// Remove path recursively, granting write permission to directories that
/// lack it. The first error met is returned after every other entry was tried.
fn remove_all(path: &Path, cancel: &CancelToken) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };

    if !meta.is_dir() {
        return ignore_not_found(fs::remove_file(path));
    }

    if cancel.is_cancelled() {
        return Err(io::Error::other(CANCELLED));
    }

    make_writable(path, &meta);
    let mut first_error = None;
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };
    for entry in entries {
        let result = entry.and_then(|entry| remove_all(&entry.path(), cancel));
        if let Err(error) = result {
            first_error.get_or_insert(error);
        }
    }

    match (ignore_not_found(fs::remove_dir(path)), first_error) {
        (_, Some(error)) | (Err(error), None) => Err(error),
        (Ok(()), None) => Ok(()),
    }
}

#[cfg(unix)]
fn make_writable(path: &Path, meta: &fs::Metadata) {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode();
    if mode & 0o222 != 0 {
        return;
    }

    let writable = fs::Permissions::from_mode(mode | 0o200);
    if let Err(error) = fs::set_permissions(path, writable) {
        debug!("chmod {:o} {:?}: {error}", mode | 0o200, path.display());
    }
}

#[cfg(not(unix))]
fn make_writable(path: &Path, meta: &fs::Metadata) {
    let mut perms = meta.permissions();
    if !perms.readonly() {
        return;
    }

    perms.set_readonly(false);
    if let Err(error) = fs::set_permissions(path, perms) {
        debug!("clear readonly {:?}: {error}", path.display());
    }
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

fn utf8(path: &Path) -> Result<String> {
    path.to_str()
        .map(Into::into)
        .ok_or_else(|| BiomeError::NonUtf8Path { path: path.into() })
}
