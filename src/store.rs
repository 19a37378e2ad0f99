// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Biome registry and stamp persistence.
//!
//! Biome keeps track of every biome the user created in a single __registry__
//! file. The registry records where each biome's host directory tree lives,
//! and the stamp table of the last successful push into that biome.
//!
//! # Registry Layout
//!
//! The registry lives at `<state dir>/biomes.toml`, where the state directory
//! defaults to `$XDG_DATA_HOME/biome`:
//!
//! ```toml
//! [[biome]]
//! id = "0f1e2d3c4b5a69788796a5b4c3d2e1f0"
//! root_host_dir = "/home/blah/project"
//!
//! [stamps.0f1e2d3c4b5a69788796a5b4c3d2e1f0]
//! "src" = "dir"
//! "src/main.rs" = "1700000000.000000-42-1234-33188-1000-1000"
//! ```
//!
//! # Pitfalls
//!
//! The registry is rewritten as a whole on every change. Every change first
//! goes to a sibling temporary file that is then renamed over the registry,
//! so a crash never leaves a torn registry behind. Changes are serialized
//! across processes through an exclusive lock on `<state dir>/biomes.lock`,
//! and each change is applied to a fresh read of the registry taken while
//! holding that lock.

use crate::{config::ConfigError, stamp::StampTable};

use fd_lock::RwLock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// Name of registry file in state directory.
pub const REGISTRY_FILE_NAME: &str = "biomes.toml";

/// Name of lock file guarding registry changes in state directory.
pub const LOCK_FILE_NAME: &str = "biomes.lock";

/// Persistence of stamp tables keyed by biome identifier.
pub trait StampStore: Send + Sync {
    /// Load stamp table of last successful push into biome.
    ///
    /// Biomes that were never pushed to have an empty table.
    fn load_stamps(&self, id: &str) -> Result<StampTable>;

    /// Replace stamp table of biome as a whole.
    fn replace_stamps(&self, id: &str, table: StampTable) -> Result<()>;
}

/// Registry entry of a biome.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BiomeRecord {
    /// Unique identifier of biome.
    pub id: String,

    /// Host directory tree that biome mirrors.
    pub root_host_dir: PathBuf,
}

/// Registry file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Registry {
    /// Every known biome.
    #[serde(rename = "biome", default)]
    pub biomes: Vec<BiomeRecord>,

    /// Stamp table of last successful push, per biome identifier.
    #[serde(default)]
    pub stamps: BTreeMap<String, StampTable>,
}

impl FromStr for Registry {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Registry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// File-backed registry of biomes.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    lock_path: PathBuf,
    registry: Mutex<Registry>,
}

impl Store {
    /// Open registry in state directory, creating the directory if needed.
    ///
    /// A missing registry file is treated as an empty registry.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Io`] if state directory or registry file cannot
    ///   be accessed.
    /// - Return [`StoreError::Registry`] if registry file is malformed.
    #[instrument(skip(state_dir), level = "debug")]
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir).map_err(|source| StoreError::Io {
            source,
            path: state_dir.into(),
        })?;

        let path = state_dir.join(REGISTRY_FILE_NAME);
        let registry = load(&path)?;

        Ok(Self {
            path,
            lock_path: state_dir.join(LOCK_FILE_NAME),
            registry: Mutex::new(registry),
        })
    }

    /// Path to registry file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Register new biome mirroring a host directory.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::RelativeHostDir`] if host directory is not
    ///   absolute.
    /// - Return [`StoreError::Io`] if registry cannot be saved.
    pub fn create_biome(&self, root_host_dir: impl Into<PathBuf>) -> Result<BiomeRecord> {
        let root_host_dir = root_host_dir.into();
        if !root_host_dir.is_absolute() {
            return Err(StoreError::RelativeHostDir {
                path: root_host_dir,
            });
        }

        let record = BiomeRecord {
            id: new_id(),
            root_host_dir,
        };

        self.update(|registry| registry.biomes.push(record.clone()))?;
        info!("created biome {} for {:?}", record.id, record.root_host_dir.display());

        Ok(record)
    }

    /// Find biome by identifier.
    pub fn find(&self, id: &str) -> Option<BiomeRecord> {
        self.registry
            .lock()
            .biomes
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Find the unique biome whose host directory contains `dir`.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NoBiome`] if no biome contains `dir`.
    /// - Return [`StoreError::AmbiguousBiome`] if more than one does.
    pub fn find_by_dir(&self, dir: impl AsRef<Path>) -> Result<BiomeRecord> {
        let dir = dir.as_ref();
        let registry = self.registry.lock();
        let mut found = registry
            .biomes
            .iter()
            .filter(|record| dir.starts_with(&record.root_host_dir));

        match (found.next(), found.next()) {
            (Some(record), None) => Ok(record.clone()),
            (None, _) => Err(StoreError::NoBiome { dir: dir.into() }),
            (Some(first), Some(second)) => {
                let mut ids = vec![first.id.clone(), second.id.clone()];
                ids.extend(found.map(|record| record.id.clone()));
                Err(StoreError::AmbiguousBiome {
                    dir: dir.into(),
                    ids,
                })
            }
        }
    }

    /// List every biome in order of creation.
    pub fn list(&self) -> Vec<BiomeRecord> {
        self.registry.lock().biomes.clone()
    }

    /// Forget biome along with its stamps.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownBiome`] if no biome has identifier.
    /// - Return [`StoreError::Io`] if registry cannot be saved.
    pub fn destroy(&self, id: &str) -> Result<BiomeRecord> {
        self.refresh()?;
        let record = self
            .find(id)
            .ok_or_else(|| StoreError::UnknownBiome { id: id.into() })?;

        self.update(|registry| {
            registry.biomes.retain(|record| record.id != id);
            registry.stamps.remove(id);
        })?;
        info!("destroyed biome {id}");

        Ok(record)
    }

    /// Apply change to the latest registry on disk, and keep it only once
    /// saved.
    ///
    /// Blocks while another process is changing the registry.
    fn update(&self, change: impl FnOnce(&mut Registry)) -> Result<()> {
        let lock_error = |source| StoreError::Io {
            source,
            path: self.lock_path.clone(),
        };
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(lock_error)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.write().map_err(lock_error)?;

        // INVARIANT: Changes of other processes are never overwritten.
        let mut registry = self.registry.lock();
        let mut updated = load(&self.path)?;
        change(&mut updated);
        self.save(&updated)?;
        *registry = updated;

        Ok(())
    }

    /// Pick up changes other processes made to the registry.
    fn refresh(&self) -> Result<()> {
        let latest = load(&self.path)?;
        *self.registry.lock() = latest;
        Ok(())
    }

    fn save(&self, registry: &Registry) -> Result<()> {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, registry.to_string()).map_err(|source| StoreError::Io {
            source,
            path: temp.clone(),
        })?;

        fs::rename(&temp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&temp);
            StoreError::Io {
                source,
                path: self.path.clone(),
            }
        })?;
        debug!("saved registry to {:?}", self.path.display());

        Ok(())
    }
}

impl StampStore for Store {
    fn load_stamps(&self, id: &str) -> Result<StampTable> {
        self.refresh()?;
        Ok(self
            .registry
            .lock()
            .stamps
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_stamps(&self, id: &str, table: StampTable) -> Result<()> {
        self.update(|registry| {
            registry.stamps.insert(id.into(), table);
        })
    }
}

/// In-memory stamp persistence.
#[derive(Debug, Default)]
pub struct MemoryStampStore {
    tables: Mutex<HashMap<String, StampTable>>,
}

impl MemoryStampStore {
    /// Construct empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StampStore for MemoryStampStore {
    fn load_stamps(&self, id: &str) -> Result<StampTable> {
        Ok(self.tables.lock().get(id).cloned().unwrap_or_default())
    }

    fn replace_stamps(&self, id: &str, table: StampTable) -> Result<()> {
        self.tables.lock().insert(id.into(), table);
        Ok(())
    }
}

/// Read registry file, treating a missing file as an empty registry.
fn load(path: &Path) -> Result<Registry> {
    match fs::read_to_string(path) {
        Ok(data) => data.parse::<Registry>().map_err(|source| StoreError::Registry {
            source,
            path: path.into(),
        }),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!("no registry at {:?}, starting empty", path.display());
            Ok(Registry::default())
        }
        Err(source) => Err(StoreError::Io {
            source,
            path: path.into(),
        }),
    }
}

/// Random 128-bit identifier in lowercase hex.
fn new_id() -> String {
    rand::random::<[u8; 16]>()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// All possible error types for registry interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Registry or state directory cannot be accessed.
    #[error("failed to access registry at {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Registry file is malformed.
    #[error("malformed registry at {:?}", path.display())]
    Registry {
        #[source]
        source: ConfigError,
        path: PathBuf,
    },

    /// Host directory of new biome is relative.
    #[error("host directory {:?} is not absolute", path.display())]
    RelativeHostDir { path: PathBuf },

    /// No biome has identifier.
    #[error("no biome with id {id:?}")]
    UnknownBiome { id: String },

    /// No biome mirrors directory.
    #[error("no biome found for {:?}", dir.display())]
    NoBiome { dir: PathBuf },

    /// More than one biome mirrors directory.
    #[error("multiple biomes found for {:?}: {}", dir.display(), ids.join(", "))]
    AmbiguousBiome { dir: PathBuf, ids: Vec<String> },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
