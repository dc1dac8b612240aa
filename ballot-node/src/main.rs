use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use ballot_common::{
    auth::{Authenticator, Ed25519Authenticator},
    types::{Validator, VoteTransaction, Zone},
    utils::time::current_time,
};
use ballot_node::{
    build_runtime,
    cli::{Cli, Command},
    keys, logging, NodeConfig,
};
use ballot_p2p::{tcp::TcpTransport, P2pConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Init {
            config,
            listen,
            seeds,
            key,
            zone,
            stake,
        } => {
            let auth = keys::load_or_generate(&key)?;
            let zone: Zone = zone.parse()?;

            let mut node_config = NodeConfig {
                key_path: key,
                ..NodeConfig::default()
            };
            node_config.p2p.listen_addr = listen;
            node_config.p2p.seeds = seeds;
            node_config
                .genesis
                .push(Validator::new(auth.public_key(), stake, 50, zone));
            node_config.save_to_file(&config)?;

            println!("Wrote {config}");
            println!("Validator {} ({zone}, stake {stake})", auth.public_key().to_hex());
            println!("Merge the genesis lists of all validators before starting the network.");
            Ok(())
        }
        Command::Keygen { out } => {
            let auth = Ed25519Authenticator::generate();
            keys::write_key(&out, &auth)?;
            println!("{}", auth.public_key().to_hex());
            Ok(())
        }
        Command::Status { peer } => {
            let client = TcpTransport::new(String::new(), P2pConfig::default().max_frame_bytes);
            let status = client.get_status(&peer).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Vote {
            peer,
            key,
            token,
            election,
            candidate,
        } => {
            let voter = keys::load_or_generate(&key)?;
            let tx = VoteTransaction::new_signed(&voter, &token, &election, &candidate, current_time());
            let client = TcpTransport::new(String::new(), P2pConfig::default().max_frame_bytes);
            let (hash, duplicate) = client.submit_transaction(&peer, tx).await?;
            if duplicate {
                println!("Ballot {hash} was already known");
            } else {
                println!("Ballot {hash} accepted");
            }
            Ok(())
        }
    }
}

async fn run(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::load_from_file(config_path)?;
    let _guard = logging::init_tracing(&config.node_name);

    info!("--- STARTING BALLOT NODE {} ---", config.node_name);
    info!("Config: {}", config_path);

    let auth: Arc<dyn Authenticator> = Arc::new(keys::load_or_generate(&config.key_path)?);
    let runtime = match build_runtime(config, auth).await {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start node: {}", e);
            return Err(e.into());
        }
    };
    info!("Node listening on {}. Press Ctrl+C to stop.", runtime.local_addr);

    tokio::signal::ctrl_c().await?;
    runtime.shutdown();
    Ok(())
}
