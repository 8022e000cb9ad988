use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kbsync::config::AppConfig;
use kbsync::corpus::{load_corpus, read_changed_list};
use kbsync::sync::catalog::RemoteCatalog;
use kbsync::sync::engine::{IndexTimeoutPolicy, RunOptions, SyncOrchestrator};
use kbsync::sync::reap::{OrphanReaper, find_orphans, forget_deleted};
use kbsync::sync::remote::AgentRemote;
use kbsync_core::KnowledgeBaseClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kbsync",
    version,
    about = "Keep an agent's knowledge base in sync with a local document corpus"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload changed documents, repoint the agent and delete superseded versions.
    Sync(SyncArgs),
    /// Find stored corpus documents the agent no longer references.
    Prune(PruneArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Corpus directory (overrides KBSYNC_CORPUS_DIR).
    #[arg(long)]
    dir: Option<PathBuf>,
    /// File listing changed document file names, one per line.
    #[arg(long)]
    changed_files: Option<PathBuf>,
    /// Detect and report without touching the remote.
    #[arg(long)]
    dry_run: bool,
    /// Swap references but keep superseded documents.
    #[arg(long)]
    no_delete: bool,
    /// Compare full content hashes even when sizes match.
    #[arg(long)]
    strict_hash: bool,
    /// Seconds to wait for indexing per document.
    #[arg(long, value_name = "SECS")]
    index_wait: Option<u64>,
    /// Keep the old reference when indexing does not finish in time.
    #[arg(long)]
    retain_on_timeout: bool,
}

#[derive(Args, Debug)]
struct PruneArgs {
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Actually delete; without it only the orphans are listed.
    #[arg(long)]
    confirm: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    match cli.command {
        Command::Sync(args) => run_sync(config, args).await,
        Command::Prune(args) => run_prune(config, args).await,
    }
}

fn build_remote(config: &AppConfig) -> anyhow::Result<AgentRemote> {
    let client = match &config.base_url {
        Some(url) => KnowledgeBaseClient::with_base_url(url, config.api_key.clone()),
        None => KnowledgeBaseClient::new(config.api_key.clone()),
    }
    .context("failed to build knowledge base client")?;
    Ok(AgentRemote::new(client, config.agent_id.clone()))
}

async fn run_sync(config: AppConfig, args: SyncArgs) -> anyhow::Result<ExitCode> {
    let corpus_dir = args.dir.clone().unwrap_or_else(|| config.corpus_dir.clone());
    let changed = match &args.changed_files {
        Some(path) => Some(
            read_changed_list(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };
    let corpus = load_corpus(&corpus_dir, changed.as_deref())
        .await
        .context("failed to load corpus")?;
    if corpus.is_empty() {
        warn!(dir = %corpus_dir.display(), "no documents to sync");
    }

    let mut sync_config = config.sync_config();
    sync_config.strict_hash |= args.strict_hash;
    if let Some(secs) = args.index_wait {
        sync_config.index_timeout = Duration::from_secs(secs);
    }
    if args.retain_on_timeout {
        sync_config.timeout_policy = IndexTimeoutPolicy::RetainOld;
    }

    let state = config
        .open_state_store()
        .await
        .with_context(|| format!("failed to open state at {}", config.state_path.display()))?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut orchestrator =
        SyncOrchestrator::new(build_remote(&config)?, state, sync_config).with_cancellation(cancel);
    let report = orchestrator
        .run(
            corpus,
            RunOptions {
                dry_run: args.dry_run,
                skip_delete: args.no_delete,
            },
        )
        .await;

    println!("{report}");
    if report.phase.is_failed() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_prune(config: AppConfig, args: PruneArgs) -> anyhow::Result<ExitCode> {
    let corpus_dir = args.dir.unwrap_or_else(|| config.corpus_dir.clone());
    let corpus = load_corpus(&corpus_dir, None)
        .await
        .context("failed to load corpus")?;
    let names: HashSet<String> = corpus.into_iter().map(|doc| doc.name).collect();

    let sync_config = config.sync_config();
    let remote = build_remote(&config)?;
    let catalog = RemoteCatalog::load(&remote, &sync_config.retry)
        .await
        .context("failed to read agent reference list")?;
    let documents = RemoteCatalog::list_all_documents(&remote, &sync_config.retry)
        .await
        .context("failed to list documents")?;
    let orphans = find_orphans(&documents, &catalog, &names, &sync_config.permanent);

    for doc in &orphans {
        println!("{}\t{}", doc.id, doc.name);
    }
    if !args.confirm {
        println!(
            "{} orphan(s) of {} stored document(s); rerun with --confirm to delete",
            orphans.len(),
            documents.len()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let reaper = OrphanReaper::new(&remote, &sync_config.retry, sync_config.delete_pause);
    let outcome = reaper.sweep(&orphans).await;
    println!(
        "deleted={}, failed={}",
        outcome.deleted.len(),
        outcome.failed.len()
    );
    for (id, reason) in &outcome.failed {
        println!("  delete {id} failed: {reason}");
    }
    if !outcome.deleted.is_empty() {
        let mut state = config
            .open_state_store()
            .await
            .with_context(|| format!("failed to open state at {}", config.state_path.display()))?;
        match forget_deleted(&mut state, &names, &outcome.deleted).await {
            Ok(removed) if removed > 0 => info!(removed, "dropped state entries for deleted documents"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "state cleanup failed"),
        }
    }
    if outcome.failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current document");
            cancel.cancel();
        }
    });
    info!("press Ctrl-C to stop after the current document");
}
