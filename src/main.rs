use rust_ben_or::config::{NodeConfig, OrchestratorConfig};
use rust_ben_or::consensus::coin::{entropy_coin, seeded_coin};
use rust_ben_or::consensus::{ConsensusNode, ConsensusPeer};
use rust_ben_or::logger::{init_logger, init_logger_detailed};
use rust_ben_or::network::{start_server, HttpPeerClient, HttpTransport, PeerDirectory};
use rust_ben_or::orchestrator::Orchestrator;
use std::env;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const USAGE: &str = "usage: rust-ben-or [node] <id> [port] | rust-ben-or orchestrate";

async fn run_node(args: &[String]) -> Result<(), Box<dyn Error>> {
    let config = NodeConfig::load(args)?;
    init_logger_detailed(config.node_id);
    info!(
        node_id = config.node_id,
        total_nodes = config.params.total_nodes,
        max_faulty = config.params.max_faulty,
        faulty = config.faulty,
        initial_value = %config.initial_value,
        port = config.port,
        "node configuration loaded"
    );

    let coin = match config.seed {
        Some(seed) => seeded_coin(seed, config.node_id),
        None => entropy_coin(),
    };
    let node = ConsensusNode::new(config.node_id, config.params, config.faulty, coin);
    let peers = PeerDirectory::localhost(
        &config.host,
        config.base_port,
        config.params.total_nodes,
        config.request_timeout,
    )?;
    let peer = Arc::new(ConsensusPeer::new(
        node,
        config.initial_value,
        Arc::new(HttpTransport::new(peers)),
    ));

    start_server(peer, &config.host, config.port, config.http_workers).await?;
    info!(node_id = config.node_id, "server stopped");
    Ok(())
}

async fn run_orchestrator() -> Result<(), Box<dyn Error>> {
    init_logger();
    let config = OrchestratorConfig::load()?;
    let peers = PeerDirectory::localhost(
        &config.host,
        config.base_port,
        config.total_nodes,
        config.request_timeout,
    )?;
    let orchestrator =
        Orchestrator::new(Arc::new(HttpPeerClient::new(peers))).with_policy(config.policy);

    orchestrator
        .wait_until_live(config.poll_interval, config.timeout)
        .await?;
    let started = orchestrator.start_all().await;
    info!(started = ?started.started, rejected = ?started.rejected, "cluster started");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let result = orchestrator
        .wait_for_consensus(config.poll_interval, config.timeout, cancel)
        .await;
    orchestrator.stop_all().await;

    let outcome = result?;
    for observation in &outcome.observations {
        println!(
            "peer {:>3}  status={:<7} state={}",
            observation.id,
            observation.status.map(|s| s.as_str()).unwrap_or("-"),
            observation
                .state
                .and_then(|s| serde_json::to_string(&s).ok())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    match outcome.value {
        Some(value) => println!("consensus on {} after {} polls", value, outcome.polls),
        None => {
            error!(counted = ?outcome.counted, "peers decided different values");
            return Err("agreement violated".into());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("orchestrate") => run_orchestrator().await,
        Some("node") => run_node(&args[1..]).await,
        Some("-h") | Some("--help") => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => run_node(&args).await,
    }
}
