// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::TreeFixture;

use anyhow::Result;
use biome::{
    biome::{Biome, BiomeError, Descriptor, Dirs, Invocation, Os, Support},
    bundle::BundleError,
    config::PushSettings,
    pipe::CancelToken,
    push::{push_work_dir, PushFailure},
    store::{BiomeRecord, MemoryStampStore, StampStore},
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;
use zip::ZipArchive;

/// Biome that emulates the handful of programs a push runs on a local
/// directory.
struct FakeBiome {
    _root: TempDir,
    desc: Descriptor,
    dirs: Dirs,
    native_write: bool,
    fail_unzip: bool,
    cancel_on_remove: Option<CancelToken>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeBiome {
    fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let work = root.path().join("work");
        let home = root.path().join("home");
        fs::create_dir(&work)?;
        fs::create_dir(&home)?;

        Ok(Self {
            dirs: Dirs {
                work: work.display().to_string(),
                home: home.display().to_string(),
            },
            _root: root,
            desc: Descriptor { os: Os::Linux },
            native_write: false,
            fail_unzip: false,
            cancel_on_remove: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn work(&self) -> &Path {
        Path::new(&self.dirs.work)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.work().join(path)
    }

    fn programs(&self) -> Vec<String> {
        self.calls.lock().iter().map(|argv| argv[0].clone()).collect()
    }

    fn unzip(&self, zip_path: &str) -> io::Result<()> {
        let mut archive = ZipArchive::new(File::open(self.resolve(zip_path))?).map_err(io::Error::other)?;
        archive.extract(self.work()).map_err(io::Error::other)
    }
}

fn fake_io(program: &str) -> impl FnOnce(io::Error) -> BiomeError + '_ {
    move |source| BiomeError::Io {
        source,
        path: program.into(),
    }
}

impl Biome for FakeBiome {
    fn describe(&self) -> &Descriptor {
        &self.desc
    }

    fn dirs(&self) -> &Dirs {
        &self.dirs
    }

    fn run(&self, invocation: Invocation<'_>) -> Result<(), BiomeError> {
        let argv = invocation.argv.clone();
        self.calls.lock().push(argv.clone());

        match argv.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["tee", path] => {
                let mut data = Vec::new();
                if let Some(stdin) = invocation.stdin {
                    stdin.read_to_end(&mut data).map_err(fake_io("tee"))?;
                }
                fs::write(self.resolve(path), data).map_err(fake_io("tee"))
            }
            ["rm", args @ ..] => {
                if let (Some(cancel), Some(&"-r")) = (&self.cancel_on_remove, args.first()) {
                    cancel.cancel();
                }

                for path in args.iter().filter(|arg| !arg.starts_with('-')) {
                    let full = self.resolve(path);
                    let _ = fs::remove_dir_all(&full).or_else(|_| fs::remove_file(&full));
                }
                Ok(())
            }
            ["unzip", "-o", "-q", zip_path] => {
                if self.fail_unzip {
                    return Err(BiomeError::Exit {
                        program: "unzip".into(),
                        status: "exit status: 9".into(),
                    });
                }
                self.unzip(zip_path).map_err(fake_io("unzip"))
            }
            _ => Err(BiomeError::Exit {
                program: argv[0].clone(),
                status: "exit status: 127".into(),
            }),
        }
    }

    fn write_file(&self, path: &str, src: &mut (dyn Read + Send)) -> Support<Result<(), BiomeError>> {
        if !self.native_write {
            return Support::Unsupported;
        }

        let mut data = Vec::new();
        let result = src
            .read_to_end(&mut data)
            .and_then(|_| fs::write(self.resolve(path), data))
            .map_err(fake_io("write_file"));
        Support::Supported(result)
    }
}

fn record(fixture: &TreeFixture) -> BiomeRecord {
    BiomeRecord {
        id: "0123456789abcdef0123456789abcdef".into(),
        root_host_dir: fixture.path().into(),
    }
}

async fn push(
    bio: &Arc<FakeBiome>,
    store: &Arc<MemoryStampStore>,
    record: &BiomeRecord,
    cancel: &CancelToken,
) -> Result<(), PushFailure> {
    push_work_dir(
        Arc::clone(bio),
        Arc::clone(store),
        record,
        Vec::new(),
        &PushSettings { pipe_capacity: 512 },
        cancel,
    )
    .await
    .map(drop)
    .map_err(|error| error.source)
}

#[tokio::test]
async fn push_syncs_work_dir() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "alpha")?;
    fixture.write("sub/b.txt", &"beta".repeat(1024))?;
    let record = record(&fixture);

    let bio = Arc::new(FakeBiome::new()?);
    let store = Arc::new(MemoryStampStore::new());
    push(&bio, &store, &record, &CancelToken::new()).await?;

    assert_eq!(fs::read_to_string(bio.work().join("a.txt"))?, "alpha");
    assert_eq!(fs::read_to_string(bio.work().join("sub/b.txt"))?, "beta".repeat(1024));
    assert_eq!(bio.programs(), vec!["tee", "unzip", "rm"]);

    let stamps = store.load_stamps(&record.id)?;
    assert_eq!(stamps.keys().collect::<Vec<_>>(), vec!["a.txt", "sub", "sub/b.txt"]);
    assert_eq!(fs::read_dir(&bio.dirs.home)?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn push_uses_native_write_file() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "alpha")?;
    let record = record(&fixture);

    let mut fake = FakeBiome::new()?;
    fake.native_write = true;
    let bio = Arc::new(fake);
    let store = Arc::new(MemoryStampStore::new());
    push(&bio, &store, &record, &CancelToken::new()).await?;

    assert_eq!(fs::read_to_string(bio.work().join("a.txt"))?, "alpha");
    assert_eq!(bio.programs(), vec!["unzip", "rm"]);
    Ok(())
}

#[tokio::test]
async fn push_removes_stale_paths() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "alpha")?;
    fixture.write("sub/b.txt", "beta")?;
    let record = record(&fixture);

    let bio = Arc::new(FakeBiome::new()?);
    let store = Arc::new(MemoryStampStore::new());
    push(&bio, &store, &record, &CancelToken::new()).await?;

    fixture.remove("sub")?;
    push(&bio, &store, &record, &CancelToken::new()).await?;

    assert!(bio.work().join("a.txt").exists());
    assert!(!bio.work().join("sub").exists());
    let calls = bio.calls.lock().clone();
    assert!(calls.contains(&vec![
        "rm".to_string(),
        "-r".into(),
        "-f".into(),
        "sub".into(),
        "sub/b.txt".into(),
    ]));

    let stamps = store.load_stamps(&record.id)?;
    assert_eq!(stamps.keys().collect::<Vec<_>>(), vec!["a.txt"]);
    Ok(())
}

#[tokio::test]
async fn push_failure_keeps_previous_stamps() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "alpha")?;
    let record = record(&fixture);

    let mut fake = FakeBiome::new()?;
    fake.fail_unzip = true;
    let bio = Arc::new(fake);
    let store = Arc::new(MemoryStampStore::new());
    let result = push(&bio, &store, &record, &CancelToken::new()).await;

    assert!(matches!(result, Err(PushFailure::Unpack(_))));
    assert!(store.load_stamps(&record.id)?.is_empty());
    assert_eq!(bio.programs().last().map(String::as_str), Some("rm"));
    Ok(())
}

#[tokio::test]
async fn push_cancelled_before_start() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "alpha")?;
    let record = record(&fixture);

    let bio = Arc::new(FakeBiome::new()?);
    let store = Arc::new(MemoryStampStore::new());
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = push(&bio, &store, &record, &cancel).await;

    assert!(matches!(
        result,
        Err(PushFailure::Bundle(BundleError::Cancelled))
    ));
    assert!(store.load_stamps(&record.id)?.is_empty());
    assert!(!bio.programs().contains(&"unzip".to_string()));
    Ok(())
}

#[tokio::test]
async fn push_cancelled_after_removal() -> Result<()> {
    let fixture = TreeFixture::new()?;
    fixture.write("a.txt", "alpha")?;
    fixture.write("old.txt", "stale")?;
    let record = record(&fixture);

    let cancel = CancelToken::new();
    let mut fake = FakeBiome::new()?;
    fake.cancel_on_remove = Some(cancel.clone());
    let bio = Arc::new(fake);
    let store = Arc::new(MemoryStampStore::new());
    push(&bio, &store, &record, &cancel).await?;
    let before = store.load_stamps(&record.id)?;

    fixture.remove("old.txt")?;
    fixture.write("b.txt", "beta")?;
    bio.calls.lock().clear();
    let result = push(&bio, &store, &record, &cancel).await;

    assert!(matches!(result, Err(PushFailure::Cancelled)));
    assert_eq!(bio.programs(), vec!["tee", "rm", "rm"]);
    assert!(!bio.work().join("b.txt").exists());
    assert_eq!(store.load_stamps(&record.id)?, before);
    Ok(())
}
