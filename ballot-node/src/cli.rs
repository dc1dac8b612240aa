use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ballot-node", version, about = "Ballot BFT validator node")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a node from a config file.
    Run {
        #[arg(long, default_value = "config.json")]
        config: String,
    },
    /// Write a default config, generating the node key if missing.
    Init {
        #[arg(long, default_value = "config.json")]
        config: String,
        #[arg(long, default_value = "127.0.0.1:50051")]
        listen: String,
        /// Seed peer address; repeatable.
        #[arg(long = "seed")]
        seeds: Vec<String>,
        #[arg(long, default_value = "keys/validator.key")]
        key: String,
        /// Zone of the local validator in the generated genesis entry.
        #[arg(long, default_value = "South-West")]
        zone: String,
        #[arg(long, default_value_t = 1_000)]
        stake: u64,
    },
    /// Generate an Ed25519 key and print its public key.
    Keygen {
        #[arg(long)]
        out: String,
    },
    /// Query a node's status.
    Status {
        #[arg(long)]
        peer: String,
    },
    /// Sign a ballot with a voter key and submit it to a node.
    Vote {
        #[arg(long)]
        peer: String,
        /// Voter key file (hex seed); generated if missing.
        #[arg(long)]
        key: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        election: String,
        #[arg(long)]
        candidate: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_collects_seeds() {
        let cli = Cli::try_parse_from([
            "ballot-node",
            "init",
            "--listen",
            "0.0.0.0:7000",
            "--seed",
            "10.0.0.1:7000",
            "--seed",
            "10.0.0.2:7000",
        ])
        .unwrap();

        match cli.command {
            Command::Init { listen, seeds, config, .. } => {
                assert_eq!(listen, "0.0.0.0:7000");
                assert_eq!(seeds, vec!["10.0.0.1:7000", "10.0.0.2:7000"]);
                assert_eq!(config, "config.json");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_keygen_requires_out() {
        assert!(Cli::try_parse_from(["ballot-node", "keygen"]).is_err());
    }
}
