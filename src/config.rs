// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the user's configuration file to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! # General Layout
//!
//! ```toml
//! [ignore]
//! files = ["$HOME/.config/biome/extra-ignore"]
//! patterns = ["target/", "*.o"]
//!
//! [push]
//! pipe_capacity = 65536
//! ```
//!
//! Every section and field is optional.

use crate::pattern::{parse_files, parse_lines, Pattern, PatternError};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Default number of archive bytes in flight during a push.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// User settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Extra ignore rules applied to every biome.
    #[serde(default)]
    pub ignore: IgnoreSettings,

    /// Tuning of pushes.
    #[serde(default)]
    pub push: PushSettings,
}

impl Settings {
    /// Gather global ignore rules.
    ///
    /// Rules of `files` come first, in the order they are listed, followed by
    /// the rules of `patterns`. Missing files are skipped.
    ///
    /// # Errors
    ///
    /// - Return [`PatternError`] if a listed file exists but cannot be read.
    pub fn ignore_patterns(&self) -> Result<Vec<Pattern>, PatternError> {
        let mut patterns = parse_files(&self.ignore.files)?;
        patterns.extend(parse_lines(self.ignore.patterns.join("\n").as_bytes()));
        Ok(patterns)
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on ignore file paths.
        settings.ignore.files = settings
            .ignore
            .files
            .iter()
            .map(|path| {
                shellexpand::full(path.to_string_lossy().as_ref())
                    .map(|path| PathBuf::from(path.into_owned()))
                    .map_err(ConfigError::ShellExpansion)
            })
            .collect::<Result<_>>()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Ignore rules applied before those of a tree's own ignore file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct IgnoreSettings {
    /// Additional ignore files, shell expanded.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Inline ignore rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Push tuning.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PushSettings {
    /// Number of archive bytes buffered between bundler and upload.
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

fn default_pipe_capacity() -> usize {
    DEFAULT_PIPE_CAPACITY
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
