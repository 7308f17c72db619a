//! Console driver for the post list cache.
//!
//! # Responsibility
//! - Wire fetch client, storage backend and presenter from CLI flags.
//! - Print the published posts after every update cycle.

use clap::{Parser, ValueEnum};
use log::info;
use postcache_core::{
    default_log_level, init_logging, EntityStorage, FileNamespace, FlatStore, KeyValueNamespace,
    MemoryNamespace, PostListPresenter, PostListView, PostStorage, PresenterError, StoreConfig,
    StoreCoordinator, StoreKind, StubApi, DEFAULT_MODEL,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Storage engine entities.
    Entity,
    /// One JSON blob in a preferences namespace.
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreArg {
    Sqlite,
    Memory,
    Binary,
}

impl From<StoreArg> for StoreKind {
    fn from(value: StoreArg) -> Self {
        match value {
            StoreArg::Sqlite => StoreKind::Sqlite,
            StoreArg::Memory => StoreKind::InMemory,
            StoreArg::Binary => StoreKind::Binary,
        }
    }
}

/// Fetches posts from the stub API, caches them and prints the cached list.
#[derive(Debug, Parser)]
#[command(name = "postcache")]
#[command(version)]
struct Cli {
    /// Persistence path used by the presenter.
    #[arg(long, value_enum, default_value_t = Backend::Entity)]
    backend: Backend,

    /// Store kind for the entity backend.
    #[arg(long, value_enum, default_value_t = StoreArg::Sqlite)]
    store: StoreArg,

    /// Model name; the store file is `<model>.<ext>`.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Data directory; defaults to the per-user application-support directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Simulated fetch latency in milliseconds.
    #[arg(long, default_value_t = 2000)]
    delay_ms: u64,

    /// Make every fetch fail.
    #[arg(long)]
    offline: bool,

    /// Clean stored posts before each save instead of appending.
    #[arg(long)]
    replace: bool,

    /// Number of update cycles to run.
    #[arg(long, default_value_t = 1)]
    cycles: u32,

    /// Directory for rolling log files; logging is off when absent.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, default_value = default_log_level())]
    log_level: String,
}

struct ConsoleView;

impl PostListView for ConsoleView {
    fn show_error(&self, error: &PresenterError) {
        eprintln!("update failed: {error}");
    }

    fn update_view(&self) {
        println!("posts updated");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = &cli.log_dir {
        let log_dir = std::env::current_dir()?.join(log_dir);
        init_logging(&cli.log_level, &log_dir)?;
    }

    let kind = StoreKind::from(cli.store);
    let config = match (&cli.data_dir, kind) {
        (_, StoreKind::InMemory) => StoreConfig::in_memory(cli.model.as_str())?,
        (Some(dir), kind) => StoreConfig::new(cli.model.as_str(), kind, dir)?,
        (None, kind) => StoreConfig::application_support(cli.model.as_str(), kind)?,
    };

    let storage: Arc<dyn PostStorage> = match cli.backend {
        Backend::Entity => {
            let coordinator = StoreCoordinator::open(config)?;
            Arc::new(EntityStorage::new(coordinator).replacing(cli.replace))
        }
        Backend::Flat => {
            let namespace: Arc<dyn KeyValueNamespace> = match config.preferences_dir() {
                Some(dir) => Arc::new(FileNamespace::open(dir)?),
                None => Arc::new(MemoryNamespace::new()),
            };
            Arc::new(FlatStore::new(namespace))
        }
    };

    let mut api = StubApi::new().with_delay(Duration::from_millis(cli.delay_ms));
    if cli.offline {
        api = api.failing("offline mode");
    }
    info!(
        "event=cli_start module=cli status=ok backend={:?} store={} cycles={}",
        cli.backend, kind, cli.cycles
    );

    let mut presenter =
        PostListPresenter::new(Arc::new(api), storage).with_view(Arc::new(ConsoleView));
    let mut failures = 0;
    for cycle in 1..=cli.cycles {
        if presenter.update().await.is_err() {
            failures += 1;
            continue;
        }
        println!("cycle {cycle}: {} post(s)", presenter.posts().len());
        for post in presenter.posts() {
            println!("  #{} {}", post.id(), post.title());
        }
    }
    presenter.teardown();

    if failures > 0 {
        return Err(format!("{failures} of {} cycle(s) failed", cli.cycles).into());
    }
    Ok(())
}
