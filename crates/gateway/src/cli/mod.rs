pub mod config;

use clap::{Parser, Subcommand};

/// ConvoGate: a multi-tenant conversational AI gateway.
#[derive(Debug, Parser)]
#[command(name = "convogate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration file and report any issues.
    Validate,
    /// Print the resolved configuration (with defaults) as TOML.
    Show,
    /// Encrypt a tenant provider key read from stdin, for `tenants[].credentials`.
    EncryptCredential,
}

/// Load config from the path in `CG_CONFIG` (default: `config.toml`).
///
/// A missing file yields the built-in defaults.
pub fn load_config() -> anyhow::Result<(cg_domain::config::Config, String)> {
    let config_path = std::env::var("CG_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        cg_domain::config::Config::default()
    };

    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_parses() {
        let cli = Cli::try_parse_from(["convogate"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_subcommands_parse() {
        let cli = Cli::try_parse_from(["convogate", "config", "encrypt-credential"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::EncryptCredential))
        ));
    }
}
