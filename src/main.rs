use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use filing_reader::cli::{Cli, Command};
use filing_reader::config::ReaderConfig;
use filing_reader::escalation::EscalationController;
use filing_reader::ledger::{CheckpointStore, ConsoleOperator, ProblemLedger, WorkItem};
use filing_reader::oracle::{ChatClient, OracleClient, RateLimiter};
use filing_reader::orchestrator::{BatchOrchestrator, RunContext, Termination};
use filing_reader::pipeline::{FsArtifacts, VOCABULARY, filing_pipeline};
use filing_reader::ui::{self, BatchProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ReaderConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Init { items } => init(&config, items.as_deref()),
        Command::Run(args) => {
            args.apply(&mut config.batch, &mut config.stages);
            run(config, args.yes).await
        }
        Command::Status => status(&config),
    }
}

fn open_ledger(config: &ReaderConfig) -> Result<CheckpointStore> {
    let store = CheckpointStore::open(&config.database)
        .with_context(|| format!("opening ledger {}", config.database.display()))?;
    store.ensure_stage_columns(&filing_pipeline().names())?;
    Ok(store)
}

fn init(config: &ReaderConfig, items: Option<&Path>) -> Result<()> {
    let mut store = open_ledger(config)?;
    let added = ProblemLedger::register(&mut store, VOCABULARY)?;
    println!("Ledger ready at {} ({added} new problem name(s))", config.database.display());

    if let Some(path) = items {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let items: Vec<WorkItem> = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let inserted = store.insert_items(&items)?;
        println!("Imported {inserted} of {} work item(s)", items.len());
    }
    Ok(())
}

async fn run(config: ReaderConfig, assume_yes: bool) -> Result<()> {
    config.validate()?;
    if config.api_key.is_empty() {
        bail!("no API key: set OPENAI_API_KEY or api_key in the config file");
    }

    let pipeline = filing_pipeline();
    let stages = pipeline.select(&config.stages)?;
    let mut store = open_ledger(&config)?;
    let problems = ProblemLedger::load(&store)?;
    if problems.is_empty() {
        bail!("problem vocabulary is empty; run `filing-reader init` first");
    }

    let oracle = ChatClient::with_base_url(config.api_key.clone(), config.base_url.clone())?;
    let client = OracleClient::new(oracle, RateLimiter::new(config.pace()), config.retry_policy());
    let controller = EscalationController::new(config.tiers.clone(), config.supervisor_policy);
    let mut orchestrator = BatchOrchestrator::new(client, controller, config.supervisor.tier());

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current stage");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    info!(stages = ?stages.names(), database = %config.database.display(), "starting run");
    let artifacts = FsArtifacts::new(&config.artifacts_dir);
    let mut operator = ConsoleOperator::new(assume_yes);
    let mut progress = BatchProgress::start(&config.database);
    let ctx = RunContext {
        store: &mut store,
        problems: &problems,
        artifacts: &artifacts,
        operator: &mut operator,
        observer: &mut progress,
    };
    let summary = orchestrator.run(ctx, &stages, &config.batch).await;
    progress.finish();

    ui::print_summary(&summary);
    if let Termination::Fatal(err) = summary.termination {
        return Err(err.into());
    }
    Ok(())
}

fn status(config: &ReaderConfig) -> Result<()> {
    let store = open_ledger(config)?;
    let items = store.item_ids()?.len();
    let mut counts = Vec::new();
    for stage in filing_pipeline().names() {
        counts.push((stage, store.stage_counts(stage)?));
    }
    ui::print_status(items, &counts, store.items_with_problems()?);
    Ok(())
}
