use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address pattern is valid"));

/// Check that a string looks like a 20-byte hex account address
pub fn is_address(s: &str) -> bool {
    ADDRESS_RE.is_match(s)
}

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Backend REST endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Local wallet bridge
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:7420".to_string()
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
        }
    }
}

/// Transaction relay for the session contract
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Target used when the chosen node has no operator address
    #[serde(default)]
    pub default_target: Option<String>,
}

fn default_relay_url() -> String {
    "http://127.0.0.1:7421".to_string()
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            default_target: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Rate used when no node is selected
    #[serde(default = "default_rate_per_second")]
    pub default_rate_per_second: f64,
    #[serde(default = "default_low_balance_secs")]
    pub low_balance_secs: u64,
}

fn default_rate_per_second() -> f64 {
    0.0001
}

fn default_low_balance_secs() -> u64 {
    crate::meter::DEFAULT_LOW_BALANCE_SECS
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_rate_per_second: default_rate_per_second(),
            low_balance_secs: default_low_balance_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// How long the "analyzing" display runs before the session starts
    #[serde(default = "default_analysis_delay_ms")]
    pub delay_ms: u64,
}

fn default_analysis_delay_ms() -> u64 {
    3_000
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_analysis_delay_ms(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.x4pn/config.local.toml) > project (.x4pn/config.toml) > user (~/.x4pn/config.toml)
    /// Files are merged key by key, so a later file only needs the keys it changes
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();

        if let Some(home) = dirs::home_dir() {
            layers.push(home.join(".x4pn").join("config.toml"));
        }
        layers.push(Path::new(".x4pn").join("config.toml"));
        layers.push(Path::new(".x4pn").join("config.local.toml"));

        let mut merged = toml::Table::new();
        for path in layers.iter().filter(|p| p.exists()) {
            merge_tables(&mut merged, read_table(path)?);
        }

        let config: Config = toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration")?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (field, url) in [
            ("api.base_url", &self.api.base_url),
            ("wallet.bridge_url", &self.wallet.bridge_url),
            ("contract.relay_url", &self.contract.relay_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("Expected an http(s) URL, got '{}'", url),
                });
            }
        }

        if let Some(target) = &self.contract.default_target {
            if !is_address(target) {
                errors.push(ValidationError {
                    field: "contract.default_target".to_string(),
                    message: format!("Invalid address '{}'", target),
                });
            }
        }

        let rate = self.billing.default_rate_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            errors.push(ValidationError {
                field: "billing.default_rate_per_second".to_string(),
                message: format!("Must be greater than 0, got {}", rate),
            });
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    content
        .parse::<toml::Table>()
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

/// Merge `other` into `base`; nested tables merge, everything else is replaced
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
