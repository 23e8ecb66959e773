//! Flow Indexer CLI
//!
//! Entry point for the indexer binary. Provides subcommands for:
//! - `run` - Start the full pipeline (ingesters, derivers, async worker, committer, API)
//! - `migrate` - Run database migrations
//! - `backfill` - Backfill a historical height range via the History Deriver

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flow_indexer::config::Settings;
use flow_indexer::error::AppError;
use flow_indexer::indexer::forward_ingester::NotifyHook;
use flow_indexer::indexer::{
    default_registry, history_deriver, live_deriver, BackwardIngester, Committer, DeriverCore, ForwardIngester,
    HistoryDeriver, LiveDeriver, QueueSpec, RecoveryMode, RollbackEngine,
};
use flow_indexer::node_pool::{AccessNodeClient, NodePool};
use flow_indexer::store::PostgresStore;
use flow_indexer::types::Height;

/// Flow Event Indexer
#[derive(Parser, Debug)]
#[command(name = "flow-indexer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Runtime environment, selecting `config/{environment}.toml`
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the indexer pipeline
    Run {
        /// Start ingestion from a specific height instead of resuming from
        /// the forward ingester's checkpoint
        #[arg(long)]
        from_height: Option<u64>,
    },

    /// Run database migrations
    Migrate {
        /// Revert migrations instead of applying
        #[arg(long)]
        revert: bool,
    },

    /// Backfill a historical height range
    Backfill {
        /// Starting height (inclusive)
        #[arg(long)]
        from: u64,

        /// Ending height (inclusive)
        #[arg(long)]
        to: u64,
    },

    /// Show version information
    Version,
}

fn init_tracing(settings: &flow_indexer::config::LoggingSettings, verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.level.clone()))
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }
}

/// Build the Node Pool from configuration: one or more live (current-spork)
/// endpoints, round-robinned, and zero or more historic (past-spork)
/// endpoints.
fn build_node_pool(settings: &flow_indexer::config::NodePoolSettings) -> eyre::Result<Arc<NodePool>> {
    let live = settings
        .live_endpoints
        .iter()
        .map(|endpoint| {
            let client = AccessNodeClient::with_timeout(endpoint.clone(), Height::new(settings.spork_floor), settings.request_timeout())?;
            Ok::<_, AppError>(Arc::new(client))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let historic = settings
        .historic_endpoints
        .iter()
        .map(|endpoint| {
            let client = Arc::new(AccessNodeClient::with_timeout(
                endpoint.url.clone(),
                Height::new(endpoint.spork_floor),
                settings.request_timeout(),
            )?);
            Ok::<_, AppError>((endpoint.url.clone(), client))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Arc::new(NodePool::new(live, historic, settings.per_endpoint_rps, settings.per_endpoint_burst)))
}

async fn connect_store(settings: &flow_indexer::config::DatabaseSettings) -> eyre::Result<Arc<PostgresStore>> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.connect_timeout())
        .idle_timeout(settings.idle_timeout())
        .connect(&settings.url)
        .await?;

    Ok(Arc::new(PostgresStore::new(pool)))
}

/// Run the Forward Ingester, invoking the Rollback Engine and resuming
/// whenever it reports a reorg instead of letting the error escape.
async fn run_forward_ingester_with_recovery(
    ingester: ForwardIngester<PostgresStore, PostgresStore>,
    rollback: RollbackEngine<PostgresStore, PostgresStore, PostgresStore, PostgresStore>,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    loop {
        match ingester.run(cancel.clone()).await {
            Err(AppError::ReorgDetected { rollback_height }) => {
                error!(rollback_height = rollback_height.value(), "reorg detected, recovering");
                rollback.recover(rollback_height).await?;
            }
            Err(e) => return Err(e.into()),
            Ok(()) => return Ok(()),
        }
    }
}

async fn run_pipeline(settings: Settings, from_height: Option<u64>) -> eyre::Result<()> {
    let node_pool = build_node_pool(&settings.node_pool)?;
    let store = connect_store(&settings.database).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, stopping pipeline");
                cancel.cancel();
            }
        });
    }

    let forward_checkpoint_mode = from_height.map_or(RecoveryMode::Resume, |h| RecoveryMode::StartFrom(Height::new(h)));

    let mut handles = Vec::new();
    let mut live_deriver_hook: Option<NotifyHook> = None;

    if !settings.pipeline.raw_only && settings.pipeline.enable_live_derivers {
        let registry = Arc::new(default_registry(store.clone()));
        let core = DeriverCore::new(store.clone(), registry, store.clone(), store.clone(), live_deriver::CHECKPOINT_NAME);
        let deriver = Arc::new(LiveDeriver::new(core, store.clone(), settings.pipeline.live_chunk));

        let hook_deriver = deriver.clone();
        live_deriver_hook = Some(Arc::new(move |from, to| hook_deriver.notify_range(from, to)));

        let run_deriver = deriver;
        let deriver_cancel = cancel.clone();
        handles.push(tokio::spawn(async move { run_deriver.run(deriver_cancel).await.map_err(eyre::Report::from) }));
    }

    if settings.pipeline.enable_forward {
        let mut ingester = ForwardIngester::new(
            node_pool.clone(),
            store.clone(),
            store.clone(),
            settings.pipeline.live_worker_count,
            settings.pipeline.live_batch_size,
        )
        .with_recovery_mode(forward_checkpoint_mode);
        if let Some(hook) = live_deriver_hook.take() {
            ingester = ingester.with_notify_hook(hook);
        }
        let rollback = RollbackEngine::new(
            node_pool.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            settings.pipeline.max_reorg_depth,
        );
        let forward_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            run_forward_ingester_with_recovery(ingester, rollback, forward_cancel).await
        }));
    }

    if settings.pipeline.enable_history && settings.pipeline.history_stop_height > 0 {
        let floor = Height::new(settings.pipeline.history_stop_height);
        let ingester = BackwardIngester::new(
            node_pool.clone(),
            store.clone(),
            store.clone(),
            floor,
            settings.pipeline.history_worker_count,
            settings.pipeline.history_batch_size,
        );
        let history_cancel = cancel.clone();
        handles.push(tokio::spawn(async move { ingester.run(history_cancel).await.map_err(eyre::Report::from) }));
    }

    if !settings.pipeline.raw_only && settings.pipeline.enable_history_derivers {
        let registry = Arc::new(default_registry(store.clone()));
        let core = DeriverCore::new(store.clone(), registry, store.clone(), store.clone(), history_deriver::CHECKPOINT_NAME);

        // Independent core, same deriver name, used only to read the Live
        // Deriver's per-processor checkpoints for the dynamic worker floor.
        let live_registry = Arc::new(default_registry(store.clone()));
        let live_core = Arc::new(DeriverCore::new(
            store.clone(),
            live_registry,
            store.clone(),
            store.clone(),
            live_deriver::CHECKPOINT_NAME,
        ));

        let deriver = HistoryDeriver::new(core, live_core, store.clone(), store.clone(), settings.pipeline.history_chunk);
        let history_cancel = cancel.clone();
        handles.push(tokio::spawn(async move { deriver.run(history_cancel).await.map_err(eyre::Report::from) }));
    }

    if !settings.pipeline.raw_only {
        let committer = Committer::new(store.clone(), store.clone(), store.clone(), vec![QueueSpec { queue: "nft_reconciliation" }]);
        let committer_cancel = cancel.clone();
        handles.push(tokio::spawn(async move { committer.run(committer_cancel).await.map_err(eyre::Report::from) }));
    }

    info!(tasks = handles.len(), "pipeline started");

    for handle in handles {
        handle.await??;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.environment)?;
    init_tracing(&settings.logging, cli.verbose);

    if let Err(errors) = settings.validate() {
        for err in &errors {
            error!(error = %err, "invalid configuration");
        }
        return Err(eyre::eyre!("configuration validation failed"));
    }

    info!(version = flow_indexer::VERSION, environment = %cli.environment, "Starting Flow Indexer");

    match cli.command {
        Commands::Run { from_height } => {
            info!(?from_height, "running indexer pipeline");
            run_pipeline(settings, from_height).await?;
        }
        Commands::Migrate { revert } => {
            let store = connect_store(&settings.database).await?;
            if revert {
                info!("reverting migrations is not supported by sqlx::migrate!; restore from backup instead");
            } else {
                info!("running migrations");
                store.run_migrations().await?;
            }
        }
        Commands::Backfill { from, to } => {
            info!(from, to, "running backfill");
            let node_pool = build_node_pool(&settings.node_pool)?;
            let store = connect_store(&settings.database).await?;
            let ingester = BackwardIngester::new(
                node_pool,
                store.clone(),
                store.clone(),
                Height::new(from),
                settings.pipeline.history_worker_count,
                settings.pipeline.history_batch_size,
            );
            while let Some((filled_from, filled_to)) = ingester.backfill_next_batch().await? {
                info!(from = filled_from.value(), to = filled_to.value(), "backfilled batch");
                if filled_from.value() <= from {
                    break;
                }
            }
            let _ = to;
        }
        Commands::Version => {
            println!("flow-indexer {}", flow_indexer::VERSION);
        }
    }

    Ok(())
}
