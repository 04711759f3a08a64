//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the remote cart service
//! - `CART_API_TOKEN` - Bearer token for the remote cart service
//!
//! ## Optional
//! - `CART_USER` - Identity key to sign in as (default: default)
//! - `CART_SYNC_DEBOUNCE_MS` - Quiet window before reconciling (default: 1500)
//! - `CART_REQUEST_TIMEOUT_SECS` - Bound on each token + remote round-trip (default: 10)

use std::collections::HashMap;
use std::time::Duration;

use cart_sync_core::UserKey;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const DEFAULT_SYNC_DEBOUNCE_MS: u64 = 1500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.0;

/// Values copied from sample `.env` files instead of a real token. Matched
/// against the whole value, case-insensitively.
const PLACEHOLDER_TOKENS: &[&str] = &[
    "changeme",
    "change-me",
    "placeholder",
    "todo",
    "token",
    "api-token",
    "your-token",
    "your-api-token",
    "your-api-token-here",
    "insert-token-here",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Timing knobs of the engine's background processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Quiet window before a replica change is reconciled remotely.
    pub sync_debounce: Duration,
    /// Upper bound for one token + remote call round-trip.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_debounce: Duration::from_millis(DEFAULT_SYNC_DEBOUNCE_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn with_sync_debounce(mut self, debounce: Duration) -> Self {
        self.sync_debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Remote cart service configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct RemoteConfig {
    /// Base URL; always ends with `/` so endpoint paths join under it.
    pub base_url: Url,
    /// Bearer token for the service.
    pub api_token: SecretString,
    /// Identity key the token belongs to.
    pub user: UserKey,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Full configuration for a process driving the engine over HTTP.
#[derive(Debug, Clone)]
pub struct CartSyncConfig {
    pub engine: EngineConfig,
    pub remote: RemoteConfig,
}

impl CartSyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API token looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let engine = EngineConfig {
            sync_debounce: Duration::from_millis(parse_u64(
                "CART_SYNC_DEBOUNCE_MS",
                &get_env_or_default(
                    "CART_SYNC_DEBOUNCE_MS",
                    &DEFAULT_SYNC_DEBOUNCE_MS.to_string(),
                ),
            )?),
            request_timeout: Duration::from_secs(parse_u64(
                "CART_REQUEST_TIMEOUT_SECS",
                &get_env_or_default(
                    "CART_REQUEST_TIMEOUT_SECS",
                    &DEFAULT_REQUEST_TIMEOUT_SECS.to_string(),
                ),
            )?),
        };
        if engine.request_timeout.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "CART_REQUEST_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let remote = RemoteConfig {
            base_url: parse_base_url("CART_API_BASE_URL", &get_required_env("CART_API_BASE_URL")?)?,
            api_token: get_validated_secret("CART_API_TOKEN")?,
            user: UserKey::new(get_env_or_default("CART_USER", "default")),
        };

        Ok(Self { engine, remote })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse the service base URL, forcing a trailing slash.
fn parse_base_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Whether a token is a sample value: a listed placeholder, a template such
/// as `<token>` or `${CART_API_TOKEN}`, or a run of `x`s.
fn is_placeholder(token: &str) -> bool {
    let lower = token.trim().to_lowercase();
    if (lower.starts_with('<') && lower.ends_with('>')) || lower.starts_with("${") {
        return true;
    }
    if !lower.is_empty() && lower.chars().all(|c| c == 'x') {
        return true;
    }
    PLACEHOLDER_TOKENS.contains(&lower.replace('_', "-").as_str())
}

/// Reject placeholder and low-entropy tokens.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    if is_placeholder(secret) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            "appears to be a placeholder".to_string(),
        ));
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = SecretString::from(get_required_env(key)?);
    validate_secret_strength(value.expose_secret(), key)?;
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sync_debounce, Duration::from_millis(1500));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_engine_builders() {
        let config = EngineConfig::default()
            .with_sync_debounce(Duration::from_millis(50))
            .with_request_timeout(Duration::from_secs(2));
        assert_eq!(config.sync_debounce, Duration::from_millis(50));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("K", " 250 ").unwrap(), 250);
        assert!(matches!(
            parse_u64("K", "soon"),
            Err(ConfigError::InvalidEnvVar(key, _)) if key == "K"
        ));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = parse_base_url("K", "https://api.example.test/v1").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v1/");
        assert_eq!(url.join("cart").unwrap().as_str(), "https://api.example.test/v1/cart");
    }

    #[test]
    fn test_base_url_rejects_garbage() {
        assert!(parse_base_url("K", "not a url").is_err());
        assert!(parse_base_url("K", "mailto:ops@example.test").is_err());
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_placeholder_tokens() {
        assert!(is_placeholder("your-api-token-here"));
        assert!(is_placeholder("YOUR_API_TOKEN"));
        assert!(is_placeholder("<token>"));
        assert!(is_placeholder("${CART_API_TOKEN}"));
        assert!(is_placeholder("xxxxxxxx"));

        // Real tokens may contain these words.
        assert!(!is_placeholder("tk_insert9fQ2xLmP4rZ8"));
        assert!(!is_placeholder("example_Wq7vB1nW6yCtodo"));
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(matches!(
            validate_secret_strength("your-api-token-here", "CART_API_TOKEN"),
            Err(ConfigError::InsecureSecret(_, _))
        ));
        assert!(validate_secret_strength("tk_insert9fQ2xLmP4rZ8vB1n", "CART_API_TOKEN").is_ok());
        assert!(validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaa", "CART_API_TOKEN").is_err());
        assert!(validate_secret_strength("tk_9fQ2xLmP4rZ8vB1nW6yC", "CART_API_TOKEN").is_ok());
    }

    #[test]
    fn test_remote_config_debug_redacts_token() {
        let config = RemoteConfig {
            base_url: Url::parse("https://api.example.test/").unwrap(),
            api_token: SecretString::from("super_secret_bearer_token"),
            user: UserKey::new("shopper-1"),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("api.example.test"));
        assert!(debug_output.contains("shopper-1"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_bearer_token"));
    }
}
