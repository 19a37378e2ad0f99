// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Biome execution backends.
//!
//! A __biome__ is an isolated working copy of a host directory tree in which
//! programs run. How programs actually run is up to the backend behind the
//! [`Biome`] trait. The sync machinery only needs a backend to describe
//! itself, name its directories, and run argument vectors.
//!
//! # Optional Capabilities
//!
//! Some backends can do certain jobs faster than running a program would.
//! These optional capabilities are trait methods that report
//! [`Support::Unsupported`] by default, which is distinct from failing. The
//! free functions of this module probe the capability first and fall back to
//! a generic program invocation.

pub mod local;

pub use local::LocalBiome;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::{self, Read, Write},
};
use tracing::debug;

/// Operating system of a biome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    #[default]
    Linux,
    MacOs,
    Windows,
}

impl Os {
    /// Operating system that this program was built for.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

impl Display for Os {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Linux => fmt.write_str("linux"),
            Self::MacOs => fmt.write_str("macos"),
            Self::Windows => fmt.write_str("windows"),
        }
    }
}

/// Description of the environment inside a biome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub os: Os,
}

/// Well-known directories inside a biome, in the biome's path dialect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dirs {
    /// Directory that mirrors the host directory tree.
    pub work: String,

    /// Home directory of programs run in the biome.
    pub home: String,
}

/// Request to run a program inside a biome.
///
/// Unset stdio streams are discarded, unless the invocation is interactive, in
/// which case they are inherited from this process.
#[derive(Default)]
pub struct Invocation<'a> {
    /// Program followed by its arguments.
    pub argv: Vec<String>,

    /// Working directory, relative to the biome's work directory if relative.
    pub dir: Option<String>,

    pub stdin: Option<&'a mut (dyn Read + Send)>,
    pub stdout: Option<&'a mut (dyn Write + Send)>,
    pub stderr: Option<&'a mut (dyn Write + Send)>,

    /// Program is attached to a terminal.
    pub interactive: bool,
}

impl<'a> Invocation<'a> {
    /// Construct invocation of an argument vector.
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set standard input.
    pub fn stdin(mut self, stdin: &'a mut (dyn Read + Send)) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Set standard output.
    pub fn stdout(mut self, stdout: &'a mut (dyn Write + Send)) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Set standard error.
    pub fn stderr(mut self, stderr: &'a mut (dyn Write + Send)) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Name of program to run.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// Outcome of probing an optional capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Support<T> {
    /// Backend performed the operation with this result.
    Supported(T),

    /// Backend does not offer the capability, nothing was done.
    Unsupported,
}

/// Environment that programs can run in.
pub trait Biome: Send + Sync {
    /// Describe environment of biome.
    fn describe(&self) -> &Descriptor;

    /// Well-known directories of biome.
    fn dirs(&self) -> &Dirs;

    /// Run program to completion.
    ///
    /// # Errors
    ///
    /// - Return [`BiomeError::Exit`] if the program exits unsuccessfully.
    fn run(&self, invocation: Invocation<'_>) -> Result<()>;

    /// Write contents of src to file at path, replacing any existing file.
    ///
    /// Relative paths are resolved against the work directory.
    fn write_file(&self, _path: &str, _src: &mut (dyn Read + Send)) -> Support<Result<()>> {
        Support::Unsupported
    }
}

/// Write contents of src to file at path inside biome.
///
/// Uses the backend's own file writing when it offers one, and otherwise pipes
/// src into `tee`.
///
/// # Errors
///
/// - Return [`BiomeError::WriteFile`] if `tee` fails, carrying whatever it
///   printed to standard error.
pub fn write_file<B>(bio: &B, path: &str, src: &mut (dyn Read + Send)) -> Result<()>
where
    B: Biome + ?Sized,
{
    if let Support::Supported(result) = bio.write_file(path, src) {
        return result;
    }

    debug!("biome cannot write files directly, falling back to tee");
    let mut stderr = Vec::new();
    let mut sink = io::sink();
    let invocation = Invocation::new(["tee", path])
        .stdin(src)
        .stdout(&mut sink)
        .stderr(&mut stderr);

    bio.run(invocation).map_err(|error| {
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        BiomeError::WriteFile {
            path: path.into(),
            reason: if stderr.is_empty() {
                error.to_string()
            } else {
                stderr
            },
            source: Box::new(error),
        }
    })
}

/// Biome error types.
#[derive(Debug, thiserror::Error)]
pub enum BiomeError {
    /// Invocation has no program to run.
    #[error("empty argument list")]
    EmptyArgv,

    /// Program cannot be started.
    #[error("failed to start {program:?}")]
    Spawn {
        #[source]
        source: io::Error,
        program: String,
    },

    /// Program cannot be waited on.
    #[error("failed to wait on {program:?}")]
    Wait {
        #[source]
        source: io::Error,
        program: String,
    },

    /// Standard streams of program cannot be pumped.
    #[error("failed to stream stdio of {program:?}")]
    Stream {
        #[source]
        source: io::Error,
        program: String,
    },

    /// Program ran but exited unsuccessfully.
    #[error("{program:?} exited with {status}")]
    Exit { program: String, status: String },

    /// File inside biome cannot be written.
    #[error("write {path}: {reason}")]
    WriteFile {
        #[source]
        source: Box<BiomeError>,
        path: String,
        reason: String,
    },

    /// File system of biome cannot be accessed.
    #[error("failed to access {path:?}")]
    Io {
        #[source]
        source: io::Error,
        path: String,
    },

    /// Path cannot be represented in the biome's dialect.
    #[error("path {path:?} is not valid UTF-8")]
    NonUtf8Path { path: std::path::PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = BiomeError> = std::result::Result<T, E>;
