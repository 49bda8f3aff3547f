use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "workerauth-controller")]
#[command(version, about = "Controller listener with handshake-time worker authentication", long_about = None)]
#[command(author = "Worker Auth Team")]
pub struct Cli {
    /// Config file (defaults to config/default.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller listener (default mode)
    Run,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["workerauth-controller"]);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["workerauth-controller", "check-config", "--config", "c.toml"]);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }
}
