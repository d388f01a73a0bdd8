//! fednestd - federated aggregation control plane
//!
//! CLI entry point for the Tier 1 coordinator, edge clients and operator
//! commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::{ColoredString, Colorize};
use eyre::{Context, Result, eyre};
use fs2::FileExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fednest::aggregation::encode_f32;
use fednest::cli::{Cli, Command, MessagingCommand, OutputFormat, Tier1Command, Tier2Command, TierArg};
use fednest::config::Config;
use fednest::coordinator::{Coordinator, CoordinatorConfig};
use fednest::domain::{AggregationPolicy, Eligibility, RoundStatus, SystemClock, Tier, now_ms};
use fednest::messaging::{
    CONTROL_ROUNDS, FederationMessage, LocalBus, MessageBus, UPDATES_EXPERTS, bootstrap_topics, topic_specs,
};
use fednest::session::{BusLink, EdgeConfig, EdgeSession};
use fednest::state::StateManager;
use fednest::training::{SyntheticTrainer, trainer_for};
use modelstore::ModelStore;

const LOCK_FILE: &str = "fednestd.lock";

fn setup_logging(level: tracing::Level) -> Result<()> {
    // Create log directory
    let log_path = fednest::cli::get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

/// CLI flag, then config file, then INFO
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> Result<tracing::Level> {
    match cli_level.or(config.log_level.as_deref()) {
        Some(level) => level
            .parse::<tracing::Level>()
            .map_err(|_| eyre!("Invalid log level: {}", level)),
        None => Ok(tracing::Level::INFO),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // init-config must work before any config exists
    if let Command::InitConfig { tier, output, force } = &cli.command {
        return cmd_init_config(*tier, output.as_deref(), *force);
    }

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    let level = resolve_log_level(cli.log_level.as_deref(), &config)?;
    setup_logging(level).context("Failed to setup logging")?;

    // Dispatch command
    match cli.command {
        Command::Tier1 { command } => match command {
            Tier1Command::RunFedServer { local_clients } => cmd_run_fed_server(&config, local_clients).await,
            Tier1Command::PublishGenesis { file, dim } => cmd_publish_genesis(&config, file, dim).await,
            Tier1Command::StartRound {
                participants,
                base_version,
                min_contributors,
                timeout_secs,
                all_or_nothing,
            } => {
                let mut policy = config.round.policy();
                if let Some(min) = min_contributors {
                    policy.min_contributors = min;
                }
                if let Some(secs) = timeout_secs {
                    policy.timeout_secs = secs;
                }
                policy.all_or_nothing |= all_or_nothing;
                cmd_start_round(&config, participants, base_version, policy).await
            }
            Tier1Command::CancelRound { round_id, reason } => cmd_cancel_round(&config, round_id, &reason).await,
            Tier1Command::Status { round, format } => cmd_status(&config, round, format).await,
            Tier1Command::AggregateExperts { round } => cmd_aggregate_experts(&config, round).await,
            Tier1Command::Versions { format } => cmd_versions(&config, format).await,
            Tier1Command::Participants => cmd_participants(&config).await,
            Tier1Command::Suspend { participant_id } => {
                cmd_set_eligibility(&config, &participant_id, Eligibility::Suspended).await
            }
            Tier1Command::Reinstate { participant_id } => {
                cmd_set_eligibility(&config, &participant_id, Eligibility::Active).await
            }
        },
        Command::Tier2 { command } => match command {
            Tier2Command::RunClient { participant_id } => cmd_run_client(&config, participant_id).await,
        },
        Command::Messaging { command } => match command {
            MessagingCommand::BootstrapTopics { dry_run } => cmd_bootstrap_topics(&config, dry_run).await,
        },
        Command::Simulate {
            clients,
            rounds,
            dim,
            min_contributors,
            timeout_secs,
            stragglers,
            dir,
        } => {
            let policy = AggregationPolicy {
                min_contributors,
                timeout_secs,
                all_or_nothing: false,
            };
            cmd_simulate(&config, clients, rounds, dim, policy, stragglers, dir).await
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

// === Helpers ===

fn status_colored(status: RoundStatus) -> ColoredString {
    match status {
        RoundStatus::Aggregated => status.as_str().green(),
        RoundStatus::Failed => status.as_str().red(),
        RoundStatus::Expired => status.as_str().yellow(),
        RoundStatus::Closing => status.as_str().magenta(),
        RoundStatus::Announced | RoundStatus::Collecting => status.as_str().cyan(),
    }
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn open_state(config: &Config) -> Result<StateManager> {
    StateManager::spawn(config.storage.state_path()).context("Failed to open round state store")
}

fn open_models(config: &Config) -> Result<ModelStore> {
    ModelStore::open(config.storage.model_path()).context("Failed to open model store")
}

/// Coordinator for one-shot operator commands (in-process bus)
fn operator_coordinator(config: &Config) -> Result<Coordinator> {
    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::with_default_topics());
    Ok(Coordinator::with_defaults(
        open_state(config)?,
        open_models(config)?,
        bus,
        config.coordinator.clone(),
    ))
}

/// Hold an exclusive lock on the state directory for the process lifetime
fn lock_state_dir(state_dir: &Path) -> Result<fs::File> {
    fs::create_dir_all(state_dir).context("Failed to create state directory")?;
    let path = state_dir.join(LOCK_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .context(format!("Failed to open {}", path.display()))?;
    file.try_lock_exclusive()
        .map_err(|_| eyre!("Another fednestd coordinator is using {}", state_dir.display()))?;
    Ok(file)
}

/// Resolve when SIGINT or SIGTERM arrives
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

fn spawn_alert_printer(coordinator: &Coordinator) -> tokio::task::JoinHandle<()> {
    let mut alerts = coordinator.subscribe_alerts();
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(alert) => {
                    let round = alert.round_id.map(|id| format!(" round {}", id)).unwrap_or_default();
                    eprintln!("{} {:?}{}: {}", "ALERT".red().bold(), alert.kind, round, alert.message);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Alert printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_edge_session(
    edge: EdgeConfig,
    bus: Arc<dyn MessageBus>,
    models: ModelStore,
    trainer: Arc<dyn fednest::training::LocalTrainer>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let link = Arc::new(BusLink::new(Arc::clone(&bus)));
    let participant_id = edge.participant_id.clone();
    let session = EdgeSession::new(edge, bus, models, link, trainer, Arc::new(SystemClock));
    tokio::spawn(async move {
        if let Err(e) = session.run(shutdown).await {
            warn!(%participant_id, error = %e, "Edge session ended with error");
        }
    })
}

// === Tier 1 ===

async fn cmd_run_fed_server(config: &Config, local_clients: Vec<String>) -> Result<()> {
    let state_dir = config.storage.state_path();
    let _lock = lock_state_dir(&state_dir)?;

    let bus = LocalBus::with_default_topics();
    bootstrap_topics(&bus, &config.messaging).await?;
    let bus: Arc<dyn MessageBus> = Arc::new(bus);

    let models = open_models(config)?;
    let coordinator = Coordinator::with_defaults(
        open_state(config)?,
        models.clone(),
        Arc::clone(&bus),
        config.coordinator.clone(),
    );
    let alert_printer = spawn_alert_printer(&coordinator);

    match coordinator.state().latest_version().await? {
        Some(v) => println!("Latest model version: {} ({})", v.version, v.payload_ref),
        None => println!(
            "{} no genesis model yet; run `fednestd tier1 publish-genesis`",
            "warning:".yellow()
        ),
    }

    let stats = coordinator.recover().await?;
    if !stats.is_empty() {
        println!("Recovered incomplete rounds ({})", stats);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(coordinator.clone().run(shutdown_rx.clone()));

    let mut sessions = Vec::new();
    for participant_id in local_clients {
        let mut edge = config.edge.clone();
        edge.participant_id = participant_id;
        let trainer = trainer_for(&edge);
        sessions.push(spawn_edge_session(
            edge,
            Arc::clone(&bus),
            models.clone(),
            trainer,
            shutdown_rx.clone(),
        ));
    }

    println!(
        "{} coordinator running (state: {}, sweep every {}s); Ctrl+C to stop",
        "✓".green(),
        state_dir.display(),
        config.coordinator.sweep_interval_secs
    );
    info!(local_clients = sessions.len(), "Fed server started");

    wait_for_shutdown_signal().await?;
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Coordinator stopped with error"),
        Err(e) => warn!(error = %e, "Coordinator task panicked"),
    }
    futures::future::join_all(sessions).await;
    coordinator.state().shutdown().await?;
    alert_printer.abort();

    println!("Coordinator stopped");
    Ok(())
}

async fn cmd_publish_genesis(config: &Config, file: Option<PathBuf>, dim: Option<usize>) -> Result<()> {
    let bytes = match (file, dim) {
        (Some(path), _) => fs::read(&path).context(format!("Failed to read {}", path.display()))?,
        (None, Some(dim)) => encode_f32(&vec![0.0; dim]),
        (None, None) => return Err(eyre!("Pass --file <path> or --dim <n>")),
    };

    let coordinator = operator_coordinator(config)?;
    let version = coordinator.publish_genesis(bytes).await?;
    println!(
        "{} Genesis model version {}: {}",
        "✓".green(),
        version.version,
        version.payload_ref.cyan()
    );
    coordinator.state().shutdown().await?;
    Ok(())
}

async fn cmd_start_round(
    config: &Config,
    participants: Vec<String>,
    base_version: Option<u64>,
    policy: AggregationPolicy,
) -> Result<()> {
    let coordinator = operator_coordinator(config)?;

    let base_version = match base_version {
        Some(v) => v,
        None => {
            coordinator
                .state()
                .latest_version()
                .await?
                .ok_or_else(|| eyre!("No model versions yet; run `fednestd tier1 publish-genesis` first"))?
                .version
        }
    };

    let round_id = coordinator.create_round(base_version, participants, policy).await?;
    println!(
        "{} Created round {} on base version {} (min {}, timeout {}s{})",
        "✓".green(),
        round_id.to_string().cyan(),
        base_version,
        policy.min_contributors,
        policy.timeout_secs,
        if policy.all_or_nothing { ", all-or-nothing" } else { "" }
    );
    println!("  The running coordinator announces it on its next sweep.");
    coordinator.state().shutdown().await?;
    Ok(())
}

async fn cmd_cancel_round(config: &Config, round_id: u64, reason: &str) -> Result<()> {
    let coordinator = operator_coordinator(config)?;
    if coordinator.cancel_round(round_id, reason).await? {
        println!("{} Round {} cancelled", "✓".green(), round_id);
    } else {
        let round = coordinator.state().get_round_required(round_id).await?;
        println!(
            "Round {} already finished as {}",
            round_id,
            status_colored(round.status)
        );
    }
    coordinator.state().shutdown().await?;
    Ok(())
}

async fn cmd_status(config: &Config, round_id: Option<u64>, format: OutputFormat) -> Result<()> {
    let state = open_state(config)?;

    if let Some(round_id) = round_id {
        let round = state.get_round_required(round_id).await?;
        let contributions = state.list_contributions(round_id).await?;
        match format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "round": round, "contributions": contributions });
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            OutputFormat::Text => {
                println!("Round {}", round.id.to_string().bold());
                println!("  Status:        {}", status_colored(round.status));
                println!("  Base version:  {}", round.base_version);
                println!(
                    "  Policy:        min {}, timeout {}s, all-or-nothing {}",
                    round.policy.min_contributors, round.policy.timeout_secs, round.policy.all_or_nothing
                );
                println!("  Created:       {}", format_ms(round.created_at));
                println!("  Deadline:      {}", format_ms(round.deadline));
                match round.announced_at {
                    Some(at) => println!("  Announced:     {}", format_ms(at)),
                    None => println!("  Announced:     {}", "pending".yellow()),
                }
                if let Some(version) = round.result_version {
                    println!("  Result:        version {}", version);
                }
                if let Some(reason) = &round.failure_reason {
                    println!("  Reason:        {}", reason);
                }
                println!(
                    "  Contributions: {}/{}",
                    round.contribution_count(),
                    round.expected.len()
                );
                for c in &contributions {
                    println!(
                        "    {} {} weight {} at {}",
                        "✓".green(),
                        c.participant_id,
                        c.weight,
                        format_ms(c.received_at)
                    );
                }
                for missing in round.expected.iter().filter(|p| !round.contributed.contains(*p)) {
                    println!("    {} {}", "·".dimmed(), missing.dimmed());
                }
            }
        }
    } else {
        let rounds = state.list_rounds(None).await?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rounds)?),
            OutputFormat::Text => {
                if rounds.is_empty() {
                    println!("No rounds.");
                }
                for round in &rounds {
                    println!(
                        "{:>6}  {:<11} base v{:<4} {}/{} contributed  deadline {}",
                        round.id,
                        status_colored(round.status),
                        round.base_version,
                        round.contribution_count(),
                        round.expected.len(),
                        format_ms(round.deadline)
                    );
                }
            }
        }
    }

    state.shutdown().await?;
    Ok(())
}

async fn cmd_aggregate_experts(config: &Config, round_id: Option<u64>) -> Result<()> {
    let coordinator = operator_coordinator(config)?;

    let ids: Vec<u64> = match round_id {
        Some(id) => vec![id],
        None => {
            let mut ids: Vec<u64> = coordinator
                .state()
                .list_rounds(Some(RoundStatus::Closing))
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect();
            ids.extend(coordinator.state().list_open_rounds().await?.into_iter().map(|r| r.id));
            ids
        }
    };

    if ids.is_empty() {
        println!("No rounds due.");
    }
    for id in ids {
        match coordinator.evaluate_round(id).await {
            Ok(RoundStatus::Aggregated) => {
                let version = coordinator.aggregate(id).await?;
                println!(
                    "Round {}: {} -> version {} ({})",
                    id,
                    status_colored(RoundStatus::Aggregated),
                    version.version,
                    version.payload_ref
                );
            }
            Ok(status) => println!("Round {}: {}", id, status_colored(status)),
            Err(e) => println!("Round {}: {} {}", id, "error".red(), e),
        }
    }

    coordinator.state().shutdown().await?;
    Ok(())
}

async fn cmd_versions(config: &Config, format: OutputFormat) -> Result<()> {
    let state = open_state(config)?;
    let versions = state.list_versions().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&versions)?),
        OutputFormat::Text => {
            if versions.is_empty() {
                println!("No model versions.");
            }
            for v in &versions {
                let origin = match (v.parent, v.round_id) {
                    (None, _) => "genesis".to_string(),
                    (Some(parent), Some(round)) => format!("v{} + round {}", parent, round),
                    (Some(parent), None) => format!("v{}", parent),
                };
                println!(
                    "v{:<5} {}  {:<22} {} contributor(s)  {}",
                    v.version,
                    v.payload_ref.cyan(),
                    origin,
                    v.contributors.len(),
                    format_ms(v.created_at)
                );
            }
        }
    }

    state.shutdown().await?;
    Ok(())
}

async fn cmd_participants(config: &Config) -> Result<()> {
    let state = open_state(config)?;
    let participants = state.list_participants().await?;

    if participants.is_empty() {
        println!("No participants seen yet.");
    }
    for p in &participants {
        let eligibility = match p.eligibility {
            Eligibility::Active => p.eligibility.as_str().green(),
            Eligibility::Stale => p.eligibility.as_str().yellow(),
            Eligibility::Suspended => p.eligibility.as_str().red(),
        };
        println!(
            "{:<24} {:<10} {:<6} last seen {}",
            p.id,
            eligibility,
            p.tier.as_deref().unwrap_or("-"),
            format_ms(p.last_seen)
        );
    }

    state.shutdown().await?;
    Ok(())
}

async fn cmd_set_eligibility(config: &Config, participant_id: &str, eligibility: Eligibility) -> Result<()> {
    let state = open_state(config)?;
    state.set_eligibility(participant_id, eligibility, now_ms()).await?;
    println!("{} {} is now {}", "✓".green(), participant_id, eligibility);
    state.shutdown().await?;
    Ok(())
}

// === Tier 2 ===

async fn cmd_run_client(config: &Config, participant_id: Option<String>) -> Result<()> {
    let mut edge = config.edge.clone();
    if let Some(id) = participant_id {
        edge.participant_id = id;
    }
    let participant_id = edge.participant_id.clone();
    let trainer = trainer_for(&edge);
    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::with_default_topics());

    warn!(
        bootstrap_servers = %config.messaging.bootstrap_servers,
        "No broker transport built in; the client only sees rounds published on the in-process bus"
    );
    println!(
        "{} edge client {} ({}) running; Ctrl+C to stop",
        "✓".green(),
        participant_id.cyan(),
        edge.tier
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = spawn_edge_session(edge, bus, open_models(config)?, trainer, shutdown_rx);

    wait_for_shutdown_signal().await?;
    let _ = shutdown_tx.send(true);
    let _ = session.await;
    println!("Edge client {} stopped", participant_id);
    Ok(())
}

// === Messaging ===

async fn cmd_bootstrap_topics(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        for spec in topic_specs(&config.messaging) {
            println!(
                "{:<28} partitions {:<3} replication {:<2} retention {}ms",
                spec.name, spec.num_partitions, spec.replication_factor, spec.retention_ms
            );
        }
        return Ok(());
    }

    let admin = LocalBus::new(fednest::messaging::DEFAULT_CHANNEL_CAPACITY);
    let report = bootstrap_topics(&admin, &config.messaging).await?;
    for name in &report.created {
        let spec = admin
            .topic_spec(name)
            .ok_or_else(|| eyre!("Topic {} missing after creation", name))?;
        println!(
            "{} created {} (partitions {}, replication {})",
            "✓".green(),
            name,
            spec.num_partitions,
            spec.replication_factor
        );
    }
    for name in &report.existing {
        println!("  {} already exists", name);
    }
    println!(
        "Topics ready on {} ({} created, {} existing)",
        config.messaging.bootstrap_servers,
        report.created.len(),
        report.existing.len()
    );
    Ok(())
}

// === Setup ===

fn cmd_init_config(tier: TierArg, output: Option<&Path>, force: bool) -> Result<()> {
    let yaml = Config::template(Tier::from(tier)).to_yaml()?;

    match output {
        None => print!("{}", yaml),
        Some(path) => {
            if path.exists() && !force {
                return Err(eyre!("{} already exists (use --force to overwrite)", path.display()));
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            fs::write(path, yaml).context(format!("Failed to write {}", path.display()))?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
    }
    Ok(())
}

// === Simulation ===

async fn wait_for_subscribers(bus: &LocalBus, topic: &str, count: usize) -> Result<()> {
    for _ in 0..500 {
        if bus.subscriber_count(topic) >= count {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(eyre!("Timed out waiting for {} subscribers on {}", count, topic))
}

async fn cmd_simulate(
    config: &Config,
    clients: usize,
    rounds: u32,
    dim: usize,
    policy: AggregationPolicy,
    stragglers: usize,
    dir: Option<PathBuf>,
) -> Result<()> {
    if clients == 0 {
        return Err(eyre!("--clients must be at least 1"));
    }
    if stragglers > clients {
        return Err(eyre!("--stragglers cannot exceed --clients"));
    }

    let temporary = dir.is_none();
    let dir = dir.unwrap_or_else(|| std::env::temp_dir().join(format!("fednest-sim-{}", uuid::Uuid::now_v7())));
    debug!(dir = %dir.display(), clients, rounds, stragglers, "cmd_simulate: called");

    let state = StateManager::spawn(dir.join("state")).context("Failed to open simulation state store")?;
    let models = ModelStore::open(dir.join("models")).context("Failed to open simulation model store")?;
    let local_bus = LocalBus::with_default_topics();
    let bus: Arc<dyn MessageBus> = Arc::new(local_bus.clone());

    let coordinator_config = CoordinatorConfig {
        sweep_interval_secs: 1,
        ..config.coordinator.clone()
    };
    let coordinator = Coordinator::with_defaults(state, models.clone(), Arc::clone(&bus), coordinator_config);
    let alert_printer = spawn_alert_printer(&coordinator);
    let genesis = coordinator.publish_genesis(encode_f32(&vec![0.0; dim])).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(coordinator.clone().run(shutdown_rx.clone()));

    let participants: Vec<String> = (1..=clients).map(|i| format!("sim-edge-{:02}", i)).collect();
    let mut sessions = Vec::new();
    for (i, participant_id) in participants.iter().enumerate() {
        let mut trainer = SyntheticTrainer::for_participant(participant_id, Tier::Tier2);
        if i >= clients - stragglers {
            trainer = trainer.with_delay(Duration::from_secs(policy.timeout_secs + 1));
        }
        let edge = EdgeConfig {
            submit_backoff_ms: 50,
            cooldown_secs: 0,
            ..EdgeConfig::for_participant(participant_id.clone())
        };
        sessions.push(spawn_edge_session(
            edge,
            Arc::clone(&bus),
            models.clone(),
            Arc::new(trainer),
            shutdown_rx.clone(),
        ));
    }

    wait_for_subscribers(&local_bus, CONTROL_ROUNDS, clients).await?;
    wait_for_subscribers(&local_bus, UPDATES_EXPERTS, 1).await?;
    let mut control = bus.subscribe(CONTROL_ROUNDS).await?;

    println!(
        "Simulating {} round(s) with {} client(s) ({} straggler(s)), genesis {}",
        rounds,
        clients,
        stragglers,
        genesis.payload_ref.cyan()
    );

    let mut failures = 0;
    for _ in 0..rounds {
        let base = coordinator
            .state()
            .latest_version()
            .await?
            .ok_or_else(|| eyre!("No model version to train against"))?;
        let round_id = coordinator
            .start_round(base.version, participants.clone(), policy)
            .await?;

        let wait = async {
            while let Some(message) = control.recv().await {
                if let FederationMessage::RoundEnded {
                    round_id: id,
                    status,
                    version,
                    ..
                } = message
                    && id == round_id
                {
                    return Some((status, version));
                }
            }
            None
        };
        let limit = Duration::from_secs(policy.timeout_secs + 10);
        match tokio::time::timeout(limit, wait).await {
            Ok(Some((status, version))) => {
                let round = coordinator.state().get_round_required(round_id).await?;
                let version = version.map(|v| format!(" -> version {}", v)).unwrap_or_default();
                println!(
                    "Round {}: {} with {}/{} contributions{}",
                    round_id,
                    status_colored(status),
                    round.contribution_count(),
                    round.expected.len(),
                    version
                );
                if status != RoundStatus::Aggregated {
                    failures += 1;
                }
            }
            Ok(None) => return Err(eyre!("Control topic closed during round {}", round_id)),
            Err(_) => {
                println!("Round {}: {}", round_id, "no outcome before timeout".red());
                failures += 1;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = server.await;
    futures::future::join_all(sessions).await;

    let versions = coordinator.state().list_versions().await?;
    if let Some(latest) = versions.last() {
        println!(
            "{} {} model version(s); latest v{} {}",
            if failures == 0 { "✓".green() } else { "!".yellow() },
            versions.len(),
            latest.version,
            latest.payload_ref
        );
    }
    coordinator.state().shutdown().await?;
    alert_printer.abort();

    if temporary && let Err(e) = fs::remove_dir_all(&dir) {
        warn!(dir = %dir.display(), error = %e, "Failed to remove simulation directory");
    }
    Ok(())
}
