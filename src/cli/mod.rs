use clap::{Parser, Subcommand};
use mirrorshard::config::{default_config_path, MirrorConfig};
use std::path::PathBuf;

pub mod check_config;
pub mod init;
pub mod logging;
pub mod mnemonic;
pub mod simulate;
pub mod version;

#[derive(Parser)]
#[command(name = "mirrorshard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for mirrorshard threshold fragment storage", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/mirrorshard/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config and generate the keyring mnemonic
    Init {
        /// Save the generated mnemonic here (mode 0600) instead of printing it
        #[arg(long)]
        mnemonic_file: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Validate the config file and keyring mnemonic
    CheckConfig {
        /// Path to file containing the keyring mnemonic
        #[arg(long)]
        mnemonic_file: Option<String>,
    },

    /// Run an in-memory cluster through protect, failure and rebalance
    Simulate {
        /// Number of mirror nodes
        #[arg(long, default_value_t = 8)]
        nodes: usize,

        /// Number of distinct regions the nodes are spread over
        #[arg(long, default_value_t = 3)]
        regions: usize,

        /// Records to protect
        #[arg(long, default_value_t = 4)]
        records: usize,

        /// Nodes to take offline after protecting
        #[arg(long, default_value_t = 1)]
        fail: usize,

        /// Fragments per record (config default if omitted)
        #[arg(short, long, requires = "k")]
        n: Option<usize>,

        /// Fragments needed to rebuild (config default if omitted)
        #[arg(short, long, requires = "n")]
        k: Option<usize>,

        /// Path to file containing the keyring mnemonic (ephemeral if omitted)
        #[arg(long)]
        mnemonic_file: Option<String>,
    },

    /// Display version information
    Version,
}

/// Logging settings from the config file, or defaults when it is absent.
fn logging_config(config: Option<&String>) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
    let path = config
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    if path.exists() {
        Ok(MirrorConfig::load(&path)?)
    } else {
        Ok(MirrorConfig::default())
    }
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !matches!(cli.command, Commands::Version | Commands::Init { .. }) {
        let config = logging_config(cli.config.as_ref())?;
        logging::init(&config.logging)?;
    }

    match cli.command {
        Commands::Init {
            mnemonic_file,
            force,
        } => init::execute(cli.config, mnemonic_file, force),
        Commands::CheckConfig { mnemonic_file } => {
            check_config::execute(cli.config, mnemonic_file)
        }
        Commands::Simulate {
            nodes,
            regions,
            records,
            fail,
            n,
            k,
            mnemonic_file,
        } => {
            simulate::execute(
                cli.config,
                mnemonic_file,
                simulate::SimulationPlan {
                    nodes,
                    regions,
                    records,
                    fail,
                    n,
                    k,
                },
            )
            .await
        }
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
