//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// fednestd - federated aggregation control plane
#[derive(Parser)]
#[command(
    name = "fednestd",
    about = "Federated learning control plane: round coordinator and edge clients",
    version,
    after_help = "Logs are written to: ~/.local/share/fednestd/logs/fednestd.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Data-center core operations
    Tier1 {
        #[command(subcommand)]
        command: Tier1Command,
    },

    /// Edge client operations
    Tier2 {
        #[command(subcommand)]
        command: Tier2Command,
    },

    /// Message bus administration
    Messaging {
        #[command(subcommand)]
        command: MessagingCommand,
    },

    /// Write a starter configuration file
    InitConfig {
        /// Node tier to generate for
        #[arg(value_enum)]
        tier: TierArg,

        /// Output path (prints to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a coordinator and several edge clients in one process
    Simulate {
        /// Number of edge clients
        #[arg(long, default_value = "3")]
        clients: usize,

        /// Rounds to run back to back
        #[arg(long, default_value = "2")]
        rounds: u32,

        /// Model dimension (f32 components)
        #[arg(long, default_value = "8")]
        dim: usize,

        /// Minimum contributors per round
        #[arg(long, default_value = "2")]
        min_contributors: u32,

        /// Round timeout in seconds
        #[arg(long, default_value = "5")]
        timeout_secs: u64,

        /// Clients that train slower than the round timeout
        #[arg(long, default_value = "0")]
        stragglers: usize,

        /// Working directory for the state and model stores (temporary when omitted)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Tier 1 (coordinator) subcommands
#[derive(Subcommand)]
pub enum Tier1Command {
    /// Run the aggregation coordinator in the foreground
    RunFedServer {
        /// Also run in-process edge clients with these participant ids
        #[arg(long = "local-client", value_name = "ID")]
        local_clients: Vec<String>,
    },

    /// Seed the genesis model (version 1)
    PublishGenesis {
        /// File holding the initial model payload
        #[arg(long, conflicts_with = "dim")]
        file: Option<PathBuf>,

        /// Generate a zero model of this many f32 components instead
        #[arg(long)]
        dim: Option<usize>,
    },

    /// Create a round; a running server announces it on its next sweep
    StartRound {
        /// Expected participants (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        participants: Vec<String>,

        /// Base model version (latest when omitted)
        #[arg(short, long)]
        base_version: Option<u64>,

        #[arg(long)]
        min_contributors: Option<u32>,

        #[arg(long)]
        timeout_secs: Option<u64>,

        #[arg(long)]
        all_or_nothing: bool,
    },

    /// Force a round to Failed
    CancelRound {
        round_id: u64,

        #[arg(short, long, default_value = "operator request")]
        reason: String,
    },

    /// Show rounds
    Status {
        /// Show one round with its contributions
        #[arg(short, long)]
        round: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Settle due rounds once: finish closing rounds and apply deadlines
    AggregateExperts {
        /// Only this round
        #[arg(short, long)]
        round: Option<u64>,
    },

    /// List model versions
    Versions {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List known participants
    Participants,

    /// Exclude a participant from rounds until reinstated
    Suspend { participant_id: String },

    /// Lift a suspension
    Reinstate { participant_id: String },
}

/// Tier 2/3 (edge) subcommands
#[derive(Subcommand)]
pub enum Tier2Command {
    /// Run the edge client session in the foreground
    RunClient {
        /// Participant id (overrides the config file)
        #[arg(long)]
        participant_id: Option<String>,
    },
}

/// Messaging subcommands
#[derive(Subcommand)]
pub enum MessagingCommand {
    /// Create the federation topics
    BootstrapTopics {
        /// Print the topic settings without creating anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TierArg {
    Tier1,
    Tier2,
    Tier3,
}

impl From<TierArg> for crate::domain::Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Tier1 => Self::Tier1,
            TierArg::Tier2 => Self::Tier2,
            TierArg::Tier3 => Self::Tier3,
        }
    }
}

/// Output format for status/listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fednestd")
        .join("logs")
        .join("fednestd.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_fed_server() {
        let cli = Cli::parse_from(["fednestd", "tier1", "run-fed-server"]);
        assert!(matches!(
            cli.command,
            Command::Tier1 {
                command: Tier1Command::RunFedServer { .. }
            }
        ));
    }

    #[test]
    fn test_cli_parse_start_round() {
        let cli = Cli::parse_from([
            "fednestd",
            "tier1",
            "start-round",
            "-p",
            "edge-a,edge-b,edge-c",
            "--min-contributors",
            "2",
        ]);
        if let Command::Tier1 {
            command:
                Tier1Command::StartRound {
                    participants,
                    base_version,
                    min_contributors,
                    all_or_nothing,
                    ..
                },
        } = cli.command
        {
            assert_eq!(participants, vec!["edge-a", "edge-b", "edge-c"]);
            assert!(base_version.is_none());
            assert_eq!(min_contributors, Some(2));
            assert!(!all_or_nothing);
        } else {
            panic!("Expected StartRound command");
        }
    }

    #[test]
    fn test_cli_start_round_requires_participants() {
        assert!(Cli::try_parse_from(["fednestd", "tier1", "start-round"]).is_err());
    }

    #[test]
    fn test_cli_parse_init_config() {
        let cli = Cli::parse_from(["fednestd", "init-config", "tier2", "-o", "node.yml"]);
        if let Command::InitConfig { tier, output, force } = cli.command {
            assert_eq!(tier, TierArg::Tier2);
            assert_eq!(output, Some(PathBuf::from("node.yml")));
            assert!(!force);
        } else {
            panic!("Expected InitConfig command");
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from([
            "fednestd",
            "messaging",
            "bootstrap-topics",
            "-c",
            "/etc/fednestd.yml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/fednestd.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_genesis_file_conflicts_with_dim() {
        assert!(
            Cli::try_parse_from([
                "fednestd",
                "tier1",
                "publish-genesis",
                "--file",
                "m.bin",
                "--dim",
                "4"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_cli_status_json() {
        let cli = Cli::parse_from(["fednestd", "tier1", "status", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Tier1 {
                command: Tier1Command::Status {
                    format: OutputFormat::Json,
                    round: None
                }
            }
        ));
    }
}
