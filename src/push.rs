// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Push host directory trees into biomes.
//!
//! A __push__ brings the work directory of a biome up to date with the host
//! directory tree it mirrors, by shipping an incremental bundle.
//!
//! # Push Procedure
//!
//! 1. Load the stamps recorded by the last successful push.
//! 2. Stream the bundle of the host tree through a bounded pipe straight into
//!    a randomly named archive in the biome's home directory. The bundler and
//!    the upload run side by side on blocking tasks.
//! 3. Remove every path of the removal list from the work directory.
//! 4. Unpack the archive over the work directory.
//! 5. Record the new stamps.
//!
//! The uploaded archive is removed once the push finishes, whether it
//! succeeded or not.
//!
//! # Pitfalls
//!
//! Stamps are only recorded after the archive is unpacked. A push that fails
//! half way leaves the previous stamps in place, so the next push resends
//! everything that changed since the last successful one.

use crate::{
    biome::{self, Biome, BiomeError, Invocation},
    bundle::{bundle, Bundle, BundleError, BundleOptions},
    config::PushSettings,
    path,
    pattern::Pattern,
    pipe::{pipe, CancelToken},
    store::{BiomeRecord, StampStore, StoreError},
    tree::DirTree,
};

use futures::future;
use std::{io, path::PathBuf, sync::Arc};
use tokio::task::{self, JoinError};
use tracing::{debug, info, instrument, warn};

/// Synchronize host directory tree of record into its biome.
///
/// Returns the bundle that was applied.
///
/// # Errors
///
/// - Return [`PushError`] wrapping whichever step failed first. When both the
///   bundler and the upload fail, the bundler's error wins.
#[instrument(skip_all, fields(id = %record.id), level = "debug")]
pub async fn push_work_dir<B, S>(
    bio: Arc<B>,
    store: Arc<S>,
    record: &BiomeRecord,
    global_ignore: Vec<Pattern>,
    settings: &PushSettings,
    cancel: &CancelToken,
) -> Result<Bundle>
where
    B: Biome + ?Sized + 'static,
    S: StampStore + ?Sized + 'static,
{
    let wrap = |source: PushFailure| PushError {
        host_dir: record.root_host_dir.clone(),
        id: record.id.clone(),
        source,
    };

    let prev_stamps = store.load_stamps(&record.id).map_err(|error| wrap(error.into()))?;
    let zip_name = format!("{:08x}.zip", rand::random::<u32>());
    let zip_path = path::join(bio.describe(), &[bio.dirs().home.as_str(), zip_name.as_str()]);

    let opts = BundleOptions {
        global_ignore,
        prev_stamps,
        link_root: Some(record.root_host_dir.clone()),
        cancel: cancel.clone(),
    };
    let result = sync(&bio, &store, record, &zip_path, opts, settings.pipe_capacity).await;

    let cleanup = run(&bio, vec!["rm".into(), "-f".into(), zip_path.clone()]).await;
    if let Err(error) = cleanup {
        warn!("failed to clean up {zip_path} in biome: {error}");
    }

    result.map_err(wrap)
}

async fn sync<B, S>(
    bio: &Arc<B>,
    store: &Arc<S>,
    record: &BiomeRecord,
    zip_path: &str,
    opts: BundleOptions,
    capacity: usize,
) -> Result<Bundle, PushFailure>
where
    B: Biome + ?Sized + 'static,
    S: StampStore + ?Sized + 'static,
{
    let cancel = opts.cancel.clone();
    let (writer, reader) = pipe(capacity, &cancel);

    let root = record.root_host_dir.clone();
    let producer = task::spawn_blocking(move || {
        let tree = DirTree::new(root);
        let mut writer = writer;
        let result = bundle(&mut writer, &tree, &opts);
        if let Err(error) = &result {
            writer.close_with_error(io::Error::other(error.to_string()));
        }
        result
    });

    let upload_bio = Arc::clone(bio);
    let upload_path = zip_path.to_string();
    let consumer = task::spawn_blocking(move || {
        let mut reader = reader;
        let result = biome::write_file(&*upload_bio, &upload_path, &mut reader);
        if let Err(error) = &result {
            reader.close_with_error(io::Error::other(error.to_string()));
        }
        result
    });

    let (produced, consumed) = future::join(producer, consumer).await;
    let bundle = produced??;
    consumed?.map_err(|source| PushFailure::Upload {
        source,
        path: zip_path.into(),
    })?;
    debug!("uploaded {zip_path}");

    if cancel.is_cancelled() {
        return Err(PushFailure::Cancelled);
    }

    if !bundle.to_remove.is_empty() {
        let desc = bio.describe();
        let mut argv = vec!["rm".to_string(), "-r".into(), "-f".into()];
        argv.extend(bundle.to_remove.iter().map(|path| path::from_slash(desc, path)));
        run(bio, argv).await.map_err(PushFailure::Remove)?;
    }

    if cancel.is_cancelled() {
        return Err(PushFailure::Cancelled);
    }

    run(bio, vec!["unzip".into(), "-o".into(), "-q".into(), zip_path.into()])
        .await
        .map_err(PushFailure::Unpack)?;

    let stamp_store = Arc::clone(store);
    let id = record.id.clone();
    let stamps = bundle.stamps.clone();
    task::spawn_blocking(move || stamp_store.replace_stamps(&id, stamps)).await??;

    info!(
        "pushed {} entries, removed {} paths",
        bundle.stamps.len(),
        bundle.to_remove.len()
    );

    Ok(bundle)
}

/// Run argument vector in the biome's work directory on a blocking task.
///
/// Output of the program goes to standard error.
async fn run<B>(bio: &Arc<B>, argv: Vec<String>) -> Result<(), BiomeError>
where
    B: Biome + ?Sized + 'static,
{
    let bio = Arc::clone(bio);
    let program = argv.first().cloned().unwrap_or_default();
    task::spawn_blocking(move || {
        let mut stdout = io::stderr();
        let mut stderr = io::stderr();
        bio.run(Invocation::new(argv).stdout(&mut stdout).stderr(&mut stderr))
    })
    .await
    .map_err(|error| BiomeError::Wait {
        source: io::Error::other(error),
        program,
    })?
}

/// Failed push of a host directory tree.
#[derive(Debug, thiserror::Error)]
#[error("failed to push {:?} to biome {id}", host_dir.display())]
pub struct PushError {
    #[source]
    pub source: PushFailure,
    pub host_dir: PathBuf,
    pub id: String,
}

/// Step of a push that failed.
#[derive(Debug, thiserror::Error)]
pub enum PushFailure {
    /// Stamps cannot be loaded or recorded.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Host tree cannot be bundled.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Archive cannot be written into biome.
    #[error("failed to upload archive to {path}")]
    Upload {
        #[source]
        source: BiomeError,
        path: String,
    },

    /// Stale paths cannot be removed from biome.
    #[error("failed to remove stale paths")]
    Remove(#[source] BiomeError),

    /// Archive cannot be unpacked in biome.
    #[error("failed to unpack archive")]
    Unpack(#[source] BiomeError),

    /// Blocking task of push panicked or was aborted.
    #[error(transparent)]
    Task(#[from] JoinError),

    /// Push was cancelled before changing the biome.
    #[error("push cancelled")]
    Cancelled,
}

/// Friendly result alias :3
pub type Result<T, E = PushError> = std::result::Result<T, E>;
