// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where biome keeps its configuration, its registry, and the
//! support directories of local biomes on the host.
//!
//! # See Also
//!
//! - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)

use std::{
    env,
    path::{Path, PathBuf},
};

const APP_DIR: &str = "biome";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Configuration directories in increasing order of precedence.
///
/// System directories come from `$XDG_CONFIG_DIRS`, defaulting to `/etc/xdg`,
/// and are listed with the most important one last. The user's configuration
/// directory always comes at the very end.
pub fn config_dirs() -> Vec<PathBuf> {
    let system = env::var_os("XDG_CONFIG_DIRS")
        .filter(|dirs| !dirs.is_empty())
        .unwrap_or_else(|| "/etc/xdg".into());

    let mut result = env::split_paths(&system)
        .filter(|dir| dir.is_absolute())
        .collect::<Vec<_>>();
    result.reverse();

    if let Some(user) = user_config_dir() {
        result.push(user);
    }

    result
}

/// Global ignore files in the order their rules apply.
///
/// Later files take precedence over earlier ones, so the user's file comes
/// last. Files are not checked for existence.
pub fn global_ignore_files() -> Vec<PathBuf> {
    config_dirs()
        .into_iter()
        .map(|dir| dir.join(APP_DIR).join("ignore"))
        .collect()
}

/// Determine absolute path to user's configuration file.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
pub fn config_file() -> Result<PathBuf> {
    user_config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to state directory holding the registry.
///
/// Uses `$XDG_DATA_HOME/biome`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_state_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join(APP_DIR))
        .ok_or(NoWayHome)
}

/// Determine absolute path to support directory of a local biome.
///
/// Uses `$XDG_CACHE_HOME/biome/biomes/<id[..2]>/<id[2..]>` so that no single
/// directory collects every biome.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn support_dir(id: &str) -> Result<PathBuf> {
    let cache = dirs::cache_dir().ok_or(NoWayHome)?;
    Ok(shard(&cache.join(APP_DIR).join("biomes"), id))
}

fn shard(base: &Path, id: &str) -> PathBuf {
    match (id.get(..2), id.get(2..)) {
        (Some(head), Some(tail)) if !tail.is_empty() => base.join(head).join(tail),
        _ => base.join(id),
    }
}

fn user_config_dir() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|dir| dir.is_absolute())
        .or_else(dirs::config_dir)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
