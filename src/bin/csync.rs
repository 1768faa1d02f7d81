/// csync - inspect how gossip events reconcile into cluster membership
///
/// Usage:
///   csync replay <events.jsonl> [--config node.json] [--local-id ID] [--json]
///   csync keys <key>...
///
/// Event logs hold one JSON event per line, e.g.
///   {"type": "join", "node_id": "a"}
///   {"type": "upsert_key", "node_id": "a", "key": "proxy_addr", "value": "10.0.0.2:8000"}
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cluster_sync::gossip::{self, DEFAULT_EVENT_CAPACITY};
use cluster_sync::keys;
use cluster_sync::prelude::*;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Cluster membership synchronizer tools
#[derive(Parser)]
#[command(name = "csync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a gossip event log and print the resulting membership
    ///
    /// Blank lines and lines starting with '#' are skipped.
    ///
    /// Example:
    ///   csync replay events.jsonl --local-id n0
    Replay {
        /// Path to a JSON-lines event log
        events: PathBuf,

        /// Local node config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the local node ID
        #[arg(short, long)]
        local_id: Option<String>,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode gossip keys
    ///
    /// Example:
    ///   csync keys proxy_addr endpoint:my-endpoint
    Keys {
        /// Keys to decode
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read events from a JSON-lines file.
fn load_events(path: &Path) -> Result<Vec<GossipEvent>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log {}", path.display()))?;

    let mut events = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        events.push(GossipEvent::from_json_line(line, index + 1)?);
    }
    Ok(events)
}

fn load_config(path: Option<&Path>, local_id: Option<String>) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(id) = local_id {
        config = config.node_id(id);
    }
    config.validate()?;
    Ok(config)
}

fn status_label(status: NodeStatus) -> ColoredString {
    match status {
        NodeStatus::Active => status.as_str().green(),
        NodeStatus::Unreachable => status.as_str().yellow(),
        NodeStatus::Left => status.as_str().bright_black(),
    }
}

fn print_status(status: &ClusterStatus, local_state: &LocalGossipState) {
    println!("{}", "Cluster Status".bold().cyan());
    println!();
    println!("  {} {}", "Local node:".bright_white(), status.local_id);
    println!("  {} {}", "Members:".bright_white(), status.member_count());
    println!(
        "  {} {} active, {} unreachable, {} left",
        "Status:".bright_white(),
        status.active,
        status.unreachable,
        status.left
    );
    println!("  {} {}", "Pending:".bright_white(), status.pending.len());

    if !status.nodes.is_empty() {
        println!();
        println!("{}", "Members:".bold());
        for node in &status.nodes {
            println!(
                "  {} {} [{}] proxy={} admin={} listeners={}",
                "*".cyan(),
                node.id,
                status_label(node.status),
                node.proxy_addr,
                node.admin_addr,
                node.total_listeners()
            );
            for (endpoint_id, listeners) in &node.endpoints {
                println!("      {} {}", endpoint_id.bright_black(), listeners);
            }
        }
    }

    if !status.pending.is_empty() {
        println!();
        println!("{}", "Pending:".bold());
        for node in &status.pending {
            let missing: Vec<&str> = [
                (keys::PROXY_ADDR_KEY, node.proxy_addr.is_none()),
                (keys::ADMIN_ADDR_KEY, node.admin_addr.is_none()),
            ]
            .into_iter()
            .filter_map(|(key, missing)| missing.then_some(key))
            .collect();
            println!(
                "  {} {} waiting for {}",
                "*".yellow(),
                node.id,
                missing.join(", ")
            );
        }
    }

    println!();
    println!("{}", "Local gossip state:".bold());
    for (key, value) in local_state.entries() {
        println!("  {} {} = {}", "*".cyan(), key, value);
    }
}

async fn replay(
    events: &Path,
    config: Option<&Path>,
    local_id: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config, local_id)?;
    let events = load_events(events)?;

    let state = Arc::new(ClusterState::new(&config)?);
    let syncer = Arc::new(Syncer::new(Arc::clone(&state)));
    let local_state = Arc::new(LocalGossipState::new());
    syncer.sync(local_state.clone());

    let (tx, handle) = gossip::spawn_watcher(Arc::clone(&syncer), DEFAULT_EVENT_CAPACITY);
    for event in events {
        tx.send(event)
            .await
            .context("Event consumer stopped unexpectedly")?;
    }
    drop(tx);
    let applied = handle.await.context("Event consumer panicked")?;
    tracing::info!(applied, "replayed gossip events");

    let status = ClusterStatus::collect(syncer.as_ref());
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status, &local_state);
    }
    Ok(())
}

fn decode_keys(keys: &[String]) -> Result<()> {
    for key in keys {
        let state_key: StateKey = key.parse()?;
        match state_key.endpoint_id() {
            Some(endpoint_id) => println!(
                "{} {} (endpoint {})",
                key.bold(),
                state_key.kind().cyan(),
                endpoint_id
            ),
            None => println!("{} {}", key.bold(), state_key.kind().cyan()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Replay {
            events,
            config,
            local_id,
            json,
        } => replay(&events, config.as_deref(), local_id, json).await,
        Commands::Keys { keys } => decode_keys(&keys),
    }
}
