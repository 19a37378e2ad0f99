// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use biome::{
    biome::{Biome, Invocation, LocalBiome},
    bundle::{bundle_to_file, BundleOptions},
    config::Settings,
    path,
    pattern::{parse_files, Pattern},
    pipe::CancelToken,
    push::push_work_dir,
    stamp::StampTable,
    store::{BiomeRecord, Store},
    tree::DirTree,
    xdg::{config_file, default_state_dir, global_ignore_files, support_dir},
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::{
    env,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::exit,
    sync::Arc,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "biome [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Show debug logs.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Create(opts) => run_create(opts),
            Command::List => run_list(),
            Command::Push(opts) => run_push(opts).await,
            Command::Run(opts) => run_run(opts).await,
            Command::Destroy(opts) => run_destroy(opts).await,
            Command::Bundle(opts) => run_bundle(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create new biome mirroring a host directory.
    #[command(override_usage = "biome create [options] <host_dir>")]
    Create(CreateOptions),

    /// List biomes and the host directories they mirror.
    #[command(override_usage = "biome list [options]")]
    List,

    /// Synchronize host directory into its biome.
    #[command(override_usage = "biome push [options]")]
    Push(SelectOptions),

    /// Push, then run program inside biome.
    #[command(override_usage = "biome run [options] -- <argv>...")]
    Run(RunOptions),

    /// Forget biome and delete its files.
    #[command(override_usage = "biome destroy [options]")]
    Destroy(SelectOptions),

    /// Write incremental archive of a directory.
    #[command(override_usage = "biome bundle [options] <dir> -o <zip>")]
    Bundle(BundleCommandOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CreateOptions {
    /// Host directory for biome to mirror.
    #[arg(value_name = "host_dir")]
    pub host_dir: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SelectOptions {
    /// Biome to use instead of the one mirroring the current directory.
    #[arg(short, long, value_name = "id")]
    pub biome: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Biome to use instead of the one mirroring the current directory.
    #[arg(short, long, value_name = "id")]
    pub biome: Option<String>,

    /// Program to run followed by its arguments.
    #[arg(required = true, last = true, value_name = "argv")]
    pub argv: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BundleCommandOptions {
    /// Directory to bundle.
    #[arg(value_name = "dir")]
    pub dir: PathBuf,

    /// Path to write archive to.
    #[arg(short, long, value_name = "zip")]
    pub output: PathBuf,

    /// Stamp file to compare against and update.
    #[arg(short, long, value_name = "toml")]
    pub stamps: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_create(opts: CreateOptions) -> Result<()> {
    let host_dir = fs::canonicalize(&opts.host_dir)
        .with_context(|| format!("failed to resolve {:?}", opts.host_dir.display()))?;
    if !host_dir.is_dir() {
        return Err(anyhow!("{:?} is not a directory", host_dir.display()));
    }

    let store = Store::open(default_state_dir()?)?;
    let record = store.create_biome(host_dir)?;
    LocalBiome::open(support_dir(&record.id)?)?;
    println!("{}", record.id);

    Ok(())
}

fn run_list() -> Result<()> {
    let store = Store::open(default_state_dir()?)?;
    for record in store.list() {
        println!("{}\t{}", record.id, record.root_host_dir.display());
    }

    Ok(())
}

async fn run_push(opts: SelectOptions) -> Result<()> {
    let store = Arc::new(Store::open(default_state_dir()?)?);
    let record = select(&store, opts.biome)?;
    let bio = Arc::new(LocalBiome::open(support_dir(&record.id)?)?);
    push(bio, store, &record).await
}

async fn run_run(opts: RunOptions) -> Result<()> {
    let store = Arc::new(Store::open(default_state_dir()?)?);
    let record = select(&store, opts.biome)?;
    let bio = Arc::new(LocalBiome::open(support_dir(&record.id)?)?);
    push(bio.clone(), store, &record).await?;

    let dir = work_subdir(bio.as_ref(), &record, &env::current_dir()?);
    tokio::task::spawn_blocking(move || {
        let mut invocation = Invocation::new(opts.argv);
        invocation.dir = dir;
        invocation.interactive = true;
        bio.run(invocation)
    })
    .await??;

    Ok(())
}

async fn run_destroy(opts: SelectOptions) -> Result<()> {
    let store = Store::open(default_state_dir()?)?;
    let record = select(&store, opts.biome)?;

    // INVARIANT: The record outlives its support directory, so a failed
    // cleanup can be retried.
    let support = support_dir(&record.id)?;
    if support.exists() {
        let bio = LocalBiome::open(&support)?;
        let cancel = cancel_on_interrupt("destroy");
        tokio::task::spawn_blocking(move || bio.destroy(&cancel))
            .await?
            .with_context(|| format!("failed to delete {:?}", support.display()))?;
        info!("deleted {:?}", support.display());
    }

    store.destroy(&record.id)?;

    Ok(())
}

fn run_bundle(opts: BundleCommandOptions) -> Result<()> {
    let prev_stamps = match &opts.stamps {
        Some(path) => read_stamps(path)?,
        None => StampTable::new(),
    };

    let tree = DirTree::new(&opts.dir);
    let bundle_opts = BundleOptions {
        global_ignore: global_ignore(&load_settings()?)?,
        prev_stamps,
        link_root: Some(opts.dir.clone()),
        ..Default::default()
    };
    let result = bundle_to_file(&opts.output, &tree, &bundle_opts)?;

    let mut stdout = std::io::stdout().lock();
    for path in &result.to_remove {
        writeln!(stdout, "{path}")?;
    }

    if let Some(path) = &opts.stamps {
        fs::write(path, toml::ser::to_string_pretty(&result.stamps)?)
            .with_context(|| format!("failed to write {:?}", path.display()))?;
    }

    Ok(())
}

async fn push(bio: Arc<LocalBiome>, store: Arc<Store>, record: &BiomeRecord) -> Result<()> {
    let settings = load_settings()?;
    let ignore = global_ignore(&settings)?;

    let cancel = cancel_on_interrupt("push");
    push_work_dir(bio, store, record, ignore, &settings.push, &cancel).await?;

    Ok(())
}

/// Token cancelled once the user hits Ctrl-C.
fn cancel_on_interrupt(operation: &'static str) -> CancelToken {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling {operation}");
            on_interrupt.cancel();
        }
    });

    cancel
}

fn select(store: &Store, id: Option<String>) -> Result<BiomeRecord> {
    match id {
        Some(id) => store
            .find(&id)
            .ok_or_else(|| anyhow!("no biome with id {id:?}")),
        None => Ok(store.find_by_dir(env::current_dir()?)?),
    }
}

/// Directory in biome that corresponds to `cwd` on the host.
fn work_subdir(bio: &impl Biome, record: &BiomeRecord, cwd: &Path) -> Option<String> {
    let rel = cwd.strip_prefix(&record.root_host_dir).ok()?;
    let rel = rel
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    (!rel.is_empty()).then(|| path::from_slash(bio.describe(), &rel))
}

fn load_settings() -> Result<Settings> {
    let path = config_file()?;
    match fs::read_to_string(&path) {
        Ok(data) => Ok(data.parse()?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(Settings::default()),
        Err(error) => Err(error).with_context(|| format!("failed to read {:?}", path.display())),
    }
}

fn global_ignore(settings: &Settings) -> Result<Vec<Pattern>> {
    let mut patterns = parse_files(global_ignore_files())?;
    patterns.extend(settings.ignore_patterns()?);
    Ok(patterns)
}

fn read_stamps(path: &Path) -> Result<StampTable> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(toml::de::from_str(&data)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(StampTable::new()),
        Err(error) => Err(error).with_context(|| format!("failed to read {:?}", path.display())),
    }
}
