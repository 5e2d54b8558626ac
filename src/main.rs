use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use trawler::config::TrawlerConfig;
use trawler::crawler::Crawler;
use trawler::db::manager::{DbManager, DbPaths};
use trawler::indexer::{Indexer, ServiceStore};
use trawler::live::{spawn_matcher, LiveStore};
use trawler::module::{ExtractorMap, FsExtractor, MetadataExtractor};
use trawler::ontology::Ontology;
use trawler::text::WordParseConfig;
use trawler::AppState;

/// Desktop content indexing and metadata daemon.
#[derive(Debug, Parser)]
#[command(name = "trawlerd", version)]
struct Args {
    /// Force a full re-index on this start.
    #[arg(long)]
    reindex: bool,

    /// Log level: 0 errors, 1 info, 2 debug, 3 trace.
    #[arg(long, default_value_t = 1)]
    verbosity: u8,

    /// Extra root to crawl (repeatable).
    #[arg(long = "crawl-dir")]
    crawl_dirs: Vec<PathBuf>,

    /// Extra root to include (repeatable).
    #[arg(long = "include-dir")]
    include_dirs: Vec<PathBuf>,

    /// Directory never descended into (repeatable).
    #[arg(long = "exclude-dir")]
    exclude_dirs: Vec<PathBuf>,

    /// Disk throttle in [0..99].
    #[arg(long)]
    throttle: Option<u32>,

    /// Seconds to wait before the first crawl.
    #[arg(long = "initial-sleep")]
    initial_sleep: Option<u64>,

    /// Config file path; defaults to $TRAWLER_CONFIG or
    /// ~/.config/trawler/trawler.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "trawler=error",
        1 => "trawler=info",
        2 => "trawler=debug",
        _ => "trawler=trace",
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn config_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.config {
        return path.clone();
    }
    if let Some(path) = std::env::var_os("TRAWLER_CONFIG") {
        return PathBuf::from(path);
    }
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".config"));
    base.join("trawler").join("trawler.toml")
}

fn db_paths() -> DbPaths {
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".cache"));
    let data = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local/share"));
    DbPaths {
        data_dir: cache.join("trawler"),
        user_data_dir: data.join("trawler/data"),
        sys_tmp_dir: std::env::temp_dir().join("trawler"),
    }
}

fn ontology_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("TRAWLER_ONTOLOGY_DIR") {
        return PathBuf::from(dir);
    }
    let data = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local/share"));
    data.join("trawler/services")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter(args.verbosity))),
        )
        .init();

    let mut config = TrawlerConfig::load(config_path(&args))?;
    config.crawling.crawl_dirs.extend(args.crawl_dirs);
    config.crawling.include_dirs.extend(args.include_dirs);
    config.crawling.exclude_dirs.extend(args.exclude_dirs);
    if let Some(throttle) = args.throttle {
        config.indexing.throttle = throttle.min(99);
    }
    if let Some(initial_sleep) = args.initial_sleep {
        config.indexing.initial_sleep = initial_sleep;
    }

    let paths = db_paths();
    if args.reindex {
        tracing::info!("reindex requested, removing index databases");
        DbManager::remove_index_files(&paths)?;
    }

    let ontology = Arc::new(Ontology::load(&ontology_dir()));
    let db = Arc::new(DbManager::open(&paths, config.low_memory, &ontology, None).await?);
    tracing::info!("databases opened under {}", paths.data_dir.display());

    let state = AppState {
        config: Arc::new(config),
        ontology: Arc::clone(&ontology),
        db: Arc::clone(&db),
    };
    let parse_cfg: WordParseConfig = state.word_parse_config();

    // the event log only exists to feed the live-search matcher, so both
    // sides hang off the same switch
    let xesam_enabled = state.config.indexing.enable_xesam;
    let store = Arc::new(ServiceStore::new(
        Arc::clone(&ontology),
        Arc::clone(&db),
        parse_cfg,
        state.config.indexing.throttle,
        xesam_enabled,
    ));

    let crawler = Arc::new(Crawler::new(&state.config.crawling));
    let mut extractors: ExtractorMap = ExtractorMap::new();
    let fs_extractor: Arc<dyn MetadataExtractor> = Arc::new(FsExtractor::new(
        Arc::clone(&ontology),
        state.config.file_roots(),
    ));
    extractors.insert("files".to_string(), fs_extractor);

    let indexer = Indexer::new(
        Arc::clone(&store),
        crawler,
        extractors,
        state.config.indexing.modules.clone(),
        Duration::from_secs(state.config.indexing.initial_sleep),
    );
    let resumed = indexer.load_pending().await?;
    if resumed > 0 {
        tracing::info!("resuming {resumed} pending files from the previous run");
    }
    let indexer_task = indexer.spawn();

    let matcher_task = if xesam_enabled {
        let live = LiveStore::new(Arc::clone(&ontology), Arc::clone(&db));
        Some(spawn_matcher(live, store.event_wakeup()))
    } else {
        tracing::info!("xesam live search disabled");
        None
    };

    // one-shot shutdown on SIGTERM/SIGINT
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }

    indexer.request_shutdown();
    if let Err(e) = indexer.flush_pending().await {
        tracing::warn!("could not persist pending files: {e}");
    }
    if let Some(matcher_task) = matcher_task {
        matcher_task.abort();
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), indexer_task).await;

    tracing::info!("shutdown complete");
    Ok(())
}
