//! Configuration management for the load tester
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::{LoadResult, LoadTestError};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Endpoint used when the options leave `url` empty
pub const DEFAULT_URL: &str = "http://localhost:8545";

/// Well-known development key. Funded on local dev chains only, never use it elsewhere.
pub const DEFAULT_PRIVATE_KEY: &str =
    "42b6e34dc21598a807dc19d7784c71b2a7a01f6480dc6f58258f78e539f1a1fa";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientOptions,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub receipts: ReceiptConfig,
    pub scenario: ScenarioConfig,
}

/// Options a client is constructed from.
///
/// Unknown fields are rejected so that typos in a test script fail loudly
/// instead of silently falling back to defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientOptions {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mnemonic: Option<String>,
    #[serde(default, alias = "privateKey")]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_backoff_ms: u64,
    /// Block numbers remembered per endpoint for deduplication
    pub retain_blocks: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub vus: usize,
    pub iterations: u64,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub wait_for_receipt: bool,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
    pub action: ScenarioAction,
}

/// What each virtual user does per iteration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioAction {
    Transfer {
        to: String,
        #[serde(default)]
        value: i64,
        #[serde(default)]
        gas: u64,
        #[serde(default)]
        gas_price: u64,
        #[serde(default)]
        gas_fee_cap: u64,
        #[serde(default)]
        gas_tip_cap: u64,
    },
    ContractTxn {
        address: String,
        abi: String,
        method: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
        #[serde(default)]
        value: u64,
        #[serde(default)]
        gas_limit: u64,
        #[serde(default)]
        gas_price: u64,
    },
}

fn default_true() -> bool {
    true
}

fn default_receipt_timeout() -> u64 {
    120
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9464,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 500,
            max_backoff_ms: 10_000,
            retain_blocks: 256,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl ReceiptConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ClientOptions {
    /// Parse options from a loosely-typed JSON object, rejecting unknown fields
    pub fn from_json(value: serde_json::Value) -> LoadResult<Self> {
        let options: ClientOptions = serde_json::from_value(value)
            .map_err(|e| LoadTestError::InvalidConfig(format!("unable to decode options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Validate key sources
    pub fn validate(&self) -> LoadResult<()> {
        if non_empty(&self.mnemonic).is_some() && non_empty(&self.private_key).is_some() {
            return Err(LoadTestError::InvalidConfig(
                "mnemonic and privateKey are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoint URL, falling back to the local default
    pub fn url(&self) -> &str {
        non_empty(&self.url).unwrap_or(DEFAULT_URL)
    }

    /// Key material to sign with
    pub fn key_source(&self) -> KeySource<'_> {
        if let Some(phrase) = non_empty(&self.mnemonic) {
            KeySource::Mnemonic(phrase)
        } else {
            KeySource::PrivateKey(non_empty(&self.private_key).unwrap_or(DEFAULT_PRIVATE_KEY))
        }
    }
}

/// Resolved signing key source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeySource<'a> {
    Mnemonic(&'a str),
    PrivateKey(&'a str),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl Settings {
    /// Load settings from the file named by `ETH_LOADTEST_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ETH_LOADTEST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_path(&config_path)
    }

    /// Load settings from a specific file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.client.validate()?;

        if self.scenario.vus == 0 {
            anyhow::bail!("scenario.vus must be at least 1");
        }
        if self.scenario.iterations == 0 && self.scenario.duration_secs.is_none() {
            anyhow::bail!("scenario needs iterations or duration_secs");
        }
        if self.poller.retain_blocks == 0 {
            anyhow::bail!("poller.retain_blocks must be at least 1");
        }
        if self.receipts.poll_interval_ms == 0 || self.poller.interval_ms == 0 {
            anyhow::bail!("polling intervals must be non-zero");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("ETH_LOADTEST_TEST_VAR", "test_value");
        let input = "url = \"https://rpc.example.com/${ETH_LOADTEST_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://rpc.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_options_reject_unknown_fields() {
        let err = ClientOptions::from_json(json!({
            "url": "http://localhost:8541",
            "chainID": 1256
        }))
        .unwrap_err();
        assert!(matches!(err, LoadTestError::InvalidConfig(_)));
    }

    #[test]
    fn test_options_accept_script_field_names() {
        let opts = ClientOptions::from_json(json!({
            "url": "http://localhost:8541",
            "privateKey": "0x1234"
        }))
        .unwrap();
        assert_eq!(opts.url(), "http://localhost:8541");
        assert_eq!(opts.key_source(), KeySource::PrivateKey("0x1234"));
    }

    #[test]
    fn test_options_defaults() {
        let opts = ClientOptions::from_json(json!({})).unwrap();
        assert_eq!(opts.url(), DEFAULT_URL);
        assert_eq!(opts.key_source(), KeySource::PrivateKey(DEFAULT_PRIVATE_KEY));
    }

    #[test]
    fn test_options_key_sources_are_exclusive() {
        let err = ClientOptions::from_json(json!({
            "mnemonic": "test test test test test test test test test test test junk",
            "privateKey": DEFAULT_PRIVATE_KEY
        }))
        .unwrap_err();
        assert!(matches!(err, LoadTestError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[client]
url = "http://127.0.0.1:8545"

[poller]
enabled = true
interval_ms = 250
max_backoff_ms = 5000
retain_blocks = 16

[scenario]
vus = 4
iterations = 100

[scenario.action]
kind = "transfer"
to = "0xDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"
value = 1000
"#
        )
        .unwrap();

        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.client.url(), "http://127.0.0.1:8545");
        assert_eq!(settings.poller.interval(), Duration::from_millis(250));
        assert_eq!(settings.receipts.poll_interval(), Duration::from_millis(100));
        assert!(settings.scenario.wait_for_receipt);
        assert!(matches!(
            settings.scenario.action,
            ScenarioAction::Transfer { value: 1000, .. }
        ));
    }

    #[test]
    fn test_partial_tables_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[metrics]
port = 9100

[poller]
interval_ms = 1000

[receipts]

[scenario]
vus = 1
iterations = 1

[scenario.action]
kind = "transfer"
to = "0xDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"
"#
        )
        .unwrap();

        let settings = Settings::from_path(file.path()).unwrap();
        assert!(settings.metrics.enabled);
        assert_eq!(settings.metrics.port, 9100);
        assert!(settings.poller.enabled);
        assert_eq!(settings.poller.interval(), Duration::from_millis(1000));
        assert_eq!(settings.poller.max_backoff(), Duration::from_millis(10_000));
        assert_eq!(settings.poller.retain_blocks, 256);
        assert_eq!(settings.receipts.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_settings_reject_unknown_client_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[client]
endpoint = "http://127.0.0.1:8545"

[scenario]
vus = 1
iterations = 1

[scenario.action]
kind = "transfer"
to = "0xDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"
"#
        )
        .unwrap();

        assert!(Settings::from_path(file.path()).is_err());
    }
}
