//! Credential and endpoint configuration.
//!
//! Every setting is resolved in the same order: an explicit value, then the
//! process environment, then a built-in default. Empty strings count as
//! absent at every step.
//!
//! | Setting       | Environment                                  | Default                   |
//! |---------------|----------------------------------------------|---------------------------|
//! | `private_key` | `HALO_WALLET_PRIVATE_KEY`                    | none                      |
//! | `api_key`     | `HALO_API_KEY`, then `GOOGLE_API_KEY`        | none                      |
//! | `base_url`    | `HALO_PROXY_URL`                             | `https://api.agihalo.com` |
//! | `model`       | `HALO_MODEL`                                 | `gemini-3-flash-preview`  |
//! | `rpc_url`     | `HALO_RPC_URL`                               | `https://mainnet.base.org`|
//!
//! Explicit values may come from a JSON file, where any string can point at
//! an environment variable instead of holding a literal:
//!
//! ```json
//! {
//!   "private_key": "$HALO_WALLET_PRIVATE_KEY",
//!   "base_url": "${HALO_PROXY_URL}",
//!   "model": "gemini-3-flash-preview"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::str::FromStr;
use url::Url;

pub const ENV_PRIVATE_KEY: &str = "HALO_WALLET_PRIVATE_KEY";
pub const ENV_API_KEY: &str = "HALO_API_KEY";
pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const ENV_BASE_URL: &str = "HALO_PROXY_URL";
pub const ENV_MODEL: &str = "HALO_MODEL";
pub const ENV_RPC_URL: &str = "HALO_RPC_URL";

pub const DEFAULT_BASE_URL: &str = "https://api.agihalo.com";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";

/// Errors raised while loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid URL for {setting}: {source}")]
    InvalidUrl {
        setting: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// A value that is either a literal or a reference to an environment variable.
///
/// - Literal: `"https://api.agihalo.com"`
/// - Simple env var: `"$HALO_PROXY_URL"`
/// - Braced env var: `"${HALO_PROXY_URL}"`
///
/// The reference is resolved during deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if `s` is written as `$VAR` or `${VAR}`.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(braced)
        } else if let Some(var_name) = s.strip_prefix('$') {
            let valid = !var_name.is_empty()
                && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
            valid.then_some(var_name)
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?
        } else {
            s
        };

        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Explicitly provided settings, before environment fallback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HaloSettings {
    #[serde(default)]
    pub private_key: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub api_key: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub base_url: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub model: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub rpc_url: Option<LiteralOrEnv<String>>,
}

impl HaloSettings {
    /// Loads settings from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn or(self, fallback: HaloSettings) -> HaloSettings {
        HaloSettings {
            private_key: self.private_key.or(fallback.private_key),
            api_key: self.api_key.or(fallback.api_key),
            base_url: self.base_url.or(fallback.base_url),
            model: self.model.or(fallback.model),
            rpc_url: self.rpc_url.or(fallback.rpc_url),
        }
    }
}

/// Fully resolved configuration.
#[derive(Clone)]
pub struct HaloConfig {
    /// Hex-encoded signing key. Its presence selects auto-approve mode.
    pub private_key: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Url,
    pub model: String,
    /// Chain RPC endpoint. Addresses are checksummed locally, so nothing dials it.
    pub rpc_url: Url,
}

impl Debug for HaloConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaloConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("rpc_url", &self.rpc_url.as_str())
            .finish()
    }
}

impl HaloConfig {
    /// Resolves `settings` against the process environment and defaults.
    pub fn resolve(settings: HaloSettings) -> Result<Self, ConfigError> {
        Self::resolve_with(settings, |key| std::env::var(key).ok())
    }

    /// Resolves `settings` against an arbitrary environment lookup.
    pub fn resolve_with<F>(settings: HaloSettings, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = |value: Option<LiteralOrEnv<String>>| {
            value.map(LiteralOrEnv::into_inner).filter(|s| !s.is_empty())
        };
        let from_env = |key: &str| env(key).filter(|s| !s.is_empty());

        let private_key = explicit(settings.private_key).or_else(|| from_env(ENV_PRIVATE_KEY));
        let api_key = explicit(settings.api_key)
            .or_else(|| from_env(ENV_API_KEY))
            .or_else(|| from_env(ENV_GOOGLE_API_KEY));
        let base_url = explicit(settings.base_url)
            .or_else(|| from_env(ENV_BASE_URL))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = explicit(settings.model)
            .or_else(|| from_env(ENV_MODEL))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let rpc_url = explicit(settings.rpc_url)
            .or_else(|| from_env(ENV_RPC_URL))
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|source| {
            ConfigError::InvalidUrl {
                setting: "base_url",
                source,
            }
        })?;
        let rpc_url = Url::parse(&rpc_url).map_err(|source| ConfigError::InvalidUrl {
            setting: "rpc_url",
            source,
        })?;

        let config = Self {
            private_key,
            api_key,
            base_url,
            model,
            rpc_url,
        };
        #[cfg(feature = "telemetry")]
        tracing::debug!(?config, "Resolved Halo configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = HaloConfig::resolve_with(HaloSettings::default(), env_of(&[])).unwrap();
        assert!(config.private_key.is_none());
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url.as_str(), "https://api.agihalo.com/");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.rpc_url.as_str(), "https://mainnet.base.org/");
    }

    #[test]
    fn test_explicit_beats_environment() {
        let settings = HaloSettings {
            api_key: Some(LiteralOrEnv::from_literal("explicit".to_string())),
            ..Default::default()
        };
        let env = env_of(&[(ENV_API_KEY, "from-env"), (ENV_GOOGLE_API_KEY, "google")]);
        let config = HaloConfig::resolve_with(settings, env).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_api_key_falls_back_to_google_key() {
        let env = env_of(&[(ENV_API_KEY, ""), (ENV_GOOGLE_API_KEY, "google")]);
        let config = HaloConfig::resolve_with(HaloSettings::default(), env).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("google"));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let env = env_of(&[(ENV_BASE_URL, "http://localhost:8080/proxy/")]);
        let config = HaloConfig::resolve_with(HaloSettings::default(), env).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8080/proxy");
    }

    #[test]
    fn test_invalid_url_is_reported() {
        let env = env_of(&[(ENV_RPC_URL, "not a url")]);
        let err = HaloConfig::resolve_with(HaloSettings::default(), env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { setting: "rpc_url", .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let env = env_of(&[(ENV_PRIVATE_KEY, "0xdeadbeef"), (ENV_API_KEY, "k")]);
        let config = HaloConfig::resolve_with(HaloSettings::default(), env).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("deadbeef"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_env_var_syntax() {
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$FOO_1"), Some("FOO_1"));
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("${FOO}"), Some("FOO"));
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$"), None);
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$FOO-BAR"), None);
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("literal"), None);
    }

    #[test]
    fn test_settings_from_json_literals() {
        let settings: HaloSettings =
            serde_json::from_str(r#"{"model": "gemini-pro", "base_url": "http://x"}"#).unwrap();
        let config = HaloConfig::resolve_with(settings, env_of(&[])).unwrap();
        assert_eq!(config.model, "gemini-pro");
        assert_eq!(config.base_url.as_str(), "http://x/");
    }

    #[test]
    fn test_settings_or_prefers_self() {
        let cli = HaloSettings {
            model: Some(LiteralOrEnv::from_literal("cli".to_string())),
            ..Default::default()
        };
        let file = HaloSettings {
            model: Some(LiteralOrEnv::from_literal("file".to_string())),
            rpc_url: Some(LiteralOrEnv::from_literal("http://rpc".to_string())),
            ..Default::default()
        };
        let merged = cli.or(file);
        assert_eq!(merged.model.as_deref().map(String::as_str), Some("cli"));
        assert_eq!(merged.rpc_url.as_deref().map(String::as_str), Some("http://rpc"));
    }
}
