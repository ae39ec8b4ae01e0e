//! kvdisco
//!
//! Watch, list and join a cluster membership namespace stored in etcd.

mod observability;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use kvdisco::observability::events;
use kvdisco::{Discovery, DiscoveryConfig, Entries, EtcdStore};
use observability::TracingConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kvdisco", version)]
#[command(about = "Cluster membership discovery over a shared etcd namespace")]
struct Cli {
    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text", global = true)]
    log_format: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_LISTEN", global = true)]
    metrics_listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every membership snapshot until interrupted
    Watch {
        /// Discovery uri: endpoint[,endpoint...][/path]
        uri: String,
        /// Print snapshots as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the current membership and exit
    List {
        /// Discovery uri: endpoint[,endpoint...][/path]
        uri: String,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Register this node and keep its heartbeat alive until interrupted
    Join {
        /// Discovery uri: endpoint[,endpoint...][/path]
        uri: String,
        /// Address to publish (host:port)
        #[arg(long, env = "ADVERTISE")]
        advertise: String,
        /// Seconds between heartbeats (0 = default)
        #[arg(long, default_value_t = 0)]
        heartbeat: u64,
        /// Seconds before a missed heartbeat expires the entry (0 = default)
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    observability::init_tracing(&TracingConfig {
        log_format: cli.log_format.clone(),
    })?;
    if let Some(addr) = cli.metrics_listen {
        observability::init_metrics(addr)?;
    }

    let config = DiscoveryConfig::from_env();
    let stop = CancellationToken::new();
    spawn_interrupt_handler(stop.clone());

    match cli.command {
        Commands::Watch { uri, json } => {
            let discovery = connect(&uri, config).await?;
            run_watch(&discovery, json, stop).await
        }
        Commands::List { uri, json } => {
            let discovery = connect(&uri, config).await?;
            run_list(&discovery, json, stop).await
        }
        Commands::Join {
            uri,
            advertise,
            heartbeat,
            ttl,
        } => {
            let discovery = connect(&uri, config).await?;
            run_join(
                &discovery,
                &advertise,
                Duration::from_secs(heartbeat),
                Duration::from_secs(ttl),
                stop,
            )
            .await
        }
    }
}

async fn connect(uri: &str, config: DiscoveryConfig) -> anyhow::Result<Discovery<EtcdStore>> {
    Discovery::initialize(uri, config)
        .await
        .with_context(|| format!("Failed to initialize discovery for {uri}"))
}

fn spawn_interrupt_handler(stop: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
        stop.cancel();
    });
}

fn print_snapshot(entries: &Entries, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(entries)?);
    } else {
        let members: Vec<String> = entries.iter().map(ToString::to_string).collect();
        println!("{}", members.join(","));
    }
    Ok(())
}

async fn run_watch(
    discovery: &Discovery<EtcdStore>,
    json: bool,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let path = discovery.namespace().path().to_string();
    let (mut snapshots, mut errors) = discovery.watch(stop);
    let mut current = Entries::new();

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else { break };

                let (added, removed) = current.diff(&snapshot);
                for entry in &added {
                    events::member_joined(&entry.to_string(), &path);
                }
                for entry in &removed {
                    events::member_departed(&entry.to_string(), &path);
                }

                print_snapshot(&snapshot, json)?;
                current = snapshot;
            }
            Some(err) = errors.recv() => {
                warn!(error = %err, "Discovery error");
            }
        }
    }

    Ok(())
}

async fn run_list(
    discovery: &Discovery<EtcdStore>,
    json: bool,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let (mut snapshots, mut errors) = discovery.watch(stop.clone());

    let snapshot = loop {
        tokio::select! {
            snapshot = snapshots.recv() => break snapshot,
            Some(err) = errors.recv() => warn!(error = %err, "Discovery error"),
        }
    };
    stop.cancel();

    let Some(snapshot) = snapshot else {
        bail!("Interrupted before a snapshot was received");
    };
    if json {
        print_snapshot(&snapshot, true)
    } else {
        for entry in &snapshot {
            println!("{entry}");
        }
        Ok(())
    }
}

async fn run_join(
    discovery: &Discovery<EtcdStore>,
    advertise: &str,
    heartbeat: Duration,
    ttl: Duration,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let mut errors = discovery.register(advertise, heartbeat, ttl, stop)?;
    info!(
        advertise = %advertise,
        path = %discovery.namespace().path(),
        "Joined discovery namespace"
    );

    while let Some(err) = errors.recv().await {
        warn!(error = %err, "Heartbeat failed, will retry");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_join() {
        let cli = Cli::try_parse_from([
            "kvdisco",
            "join",
            "127.0.0.1:2379/prod",
            "--advertise",
            "10.0.0.1:2375",
            "--heartbeat",
            "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Join {
                uri,
                advertise,
                heartbeat,
                ttl,
            } => {
                assert_eq!(uri, "127.0.0.1:2379/prod");
                assert_eq!(advertise, "10.0.0.1:2375");
                assert_eq!(heartbeat, 5);
                assert_eq!(ttl, 0);
            }
            _ => panic!("expected join"),
        }
    }
}
