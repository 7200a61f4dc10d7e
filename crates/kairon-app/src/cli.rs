//! CLI argument definitions for the kAIron action server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// kAIron action server: runs bot-configured custom actions for the
/// dialogue manager.
#[derive(Parser, Debug)]
#[command(name = "kairon", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the webhook server and the schedule runner (default).
    Serve,
    /// Import action configs, bot settings and vault secrets from a JSON file.
    Load {
        /// Seed file to import.
        file: PathBuf,
    },
    /// Print a fresh hex-encoded vault master key.
    GenerateKey,
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > KAIRON_CONFIG env var > ~/.kairon/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("KAIRON_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the server port.
    ///
    /// Priority: --port flag > KAIRON_PORT env var > config file value > 5055.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("KAIRON_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        5055
    }

    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".kairon").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let args = CliArgs::parse_from(["kairon"]);
        assert_eq!(args.command(), Command::Serve);
        assert!(args.config.is_none());
        assert!(args.resolve_data_dir().is_none());
    }

    #[test]
    fn test_load_subcommand_with_global_flags() {
        let args = CliArgs::parse_from(["kairon", "load", "seed.json", "--data-dir", "/tmp/k"]);
        assert_eq!(
            args.command(),
            Command::Load {
                file: PathBuf::from("seed.json")
            }
        );
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/tmp/k"));
    }

    #[test]
    fn test_port_flag_wins() {
        let args = CliArgs::parse_from(["kairon", "--port", "6000", "serve"]);
        assert_eq!(args.resolve_port(5055), 6000);
    }

    #[test]
    fn test_config_flag_wins() {
        let args = CliArgs::parse_from(["kairon", "-c", "/etc/kairon.toml"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/kairon.toml"));
    }
}
