//! Command-line interface for the `fd` launcher binary

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "fd", about = "FlowDaemon - node-graph workflow execution daemon", version)]
pub struct Cli {
    /// Path to the config file (default: ./WebRPAConfig.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a workflow file to completion and print the summary
    Run {
        /// Path to the workflow JSON document
        workflow: PathBuf,

        /// Run browsers headless
        #[arg(long)]
        headless: bool,

        /// Print telemetry events as JSON lines while running
        #[arg(long)]
        events: bool,
    },

    /// Run the daemon: control socket, telemetry fan-out, hotkey bridge
    Serve,

    /// Ask a running daemon to shut down
    Stop,

    /// Check whether a daemon is alive
    Ping,

    /// Print the effective configuration
    Config,
}

/// Log file location under the platform data-local directory.
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowdaemon")
        .join("logs")
        .join("flowdaemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from(["fd", "run", "flow.json", "--headless"]);
        match cli.command {
            Some(Command::Run {
                workflow,
                headless,
                events,
            }) => {
                assert_eq!(workflow, PathBuf::from("flow.json"));
                assert!(headless);
                assert!(!events);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_serve_with_config() {
        let cli = Cli::parse_from(["fd", "--config", "custom.json", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.config, Some(PathBuf::from("custom.json")));
    }

    #[test]
    fn test_no_command_is_allowed() {
        let cli = Cli::parse_from(["fd"]);
        assert!(cli.command.is_none());
    }
}
