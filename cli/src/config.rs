//! Command-line arguments and their merge into [`HaloSettings`].
//!
//! Precedence: flag, then the flag's environment variable, then the
//! `--config` file, then built-in defaults. `GOOGLE_API_KEY` is consulted
//! only when none of those set an API key.

use clap::{Parser, Subcommand};
use halo_types::config::{
    ConfigError, ENV_API_KEY, ENV_BASE_URL, ENV_MODEL, ENV_PRIVATE_KEY, ENV_RPC_URL, HaloConfig,
    HaloSettings, LiteralOrEnv,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "halo")]
#[command(about = "Call a metered content API and pay automatically on HTTP 402")]
pub struct CliArgs {
    /// Hex private key used to sign payments. Without it, payments need oracle approval.
    #[arg(long, env = ENV_PRIVATE_KEY, hide_env_values = true, global = true)]
    pub private_key: Option<String>,

    /// API key sent as the `key` query parameter
    #[arg(long, env = ENV_API_KEY, hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Base URL of the content API
    #[arg(long = "url", env = ENV_BASE_URL, global = true)]
    pub base_url: Option<String>,

    /// Model name
    #[arg(long, env = ENV_MODEL, global = true)]
    pub model: Option<String>,

    /// Chain RPC URL
    #[arg(long, env = ENV_RPC_URL, global = true)]
    pub rpc_url: Option<String>,

    /// Path to a JSON settings file
    #[arg(long, short, env = "HALO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Fail when a paid response carries no text instead of printing an empty line
    #[arg(long, global = true)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Generate content for a prompt, paying if the API asks for it
    Generate { prompt: String },
    /// Ask the rescue oracle whether to pay `amount` for `resource`
    Consult { resource: String, amount: String },
    /// Sign the first requirement of a base64 `payment-required` header value
    Sign { header: String },
}

impl CliArgs {
    /// Settings given on the command line or through their environment variables.
    pub fn settings(&self) -> HaloSettings {
        let literal = |value: &Option<String>| value.clone().map(LiteralOrEnv::from_literal);
        HaloSettings {
            private_key: literal(&self.private_key),
            api_key: literal(&self.api_key),
            base_url: literal(&self.base_url),
            model: literal(&self.model),
            rpc_url: literal(&self.rpc_url),
        }
    }

    pub fn resolve(&self) -> Result<HaloConfig, ConfigError> {
        let settings = match &self.config {
            Some(path) => self.settings().or(HaloSettings::from_json_file(path)?),
            None => self.settings(),
        };
        HaloConfig::resolve(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let args = CliArgs::try_parse_from([
            "halo",
            "--url",
            "http://localhost:8080/",
            "--model",
            "m",
            "generate",
            "hello there",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Generate {
                prompt: "hello there".to_string()
            }
        );
        let settings = args.settings();
        assert_eq!(
            settings.base_url.as_deref().map(String::as_str),
            Some("http://localhost:8080/")
        );
        assert_eq!(settings.model.as_deref().map(String::as_str), Some("m"));
    }

    #[test]
    fn test_parse_consult_and_sign() {
        let args = CliArgs::try_parse_from(["halo", "consult", "gen", "1000"]).unwrap();
        assert_eq!(
            args.command,
            Command::Consult {
                resource: "gen".to_string(),
                amount: "1000".to_string()
            }
        );
        let args = CliArgs::try_parse_from(["halo", "sign", "e30=", "--strict"]).unwrap();
        assert!(args.strict);
        assert_eq!(
            args.command,
            Command::Sign {
                header: "e30=".to_string()
            }
        );
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(CliArgs::try_parse_from(["halo"]).is_err());
    }
}
