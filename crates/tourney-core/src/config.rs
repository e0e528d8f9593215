//! Validator and miner configuration.
//!
//! Configs are YAML. `${VAR}` and `${VAR:-default}` placeholders in string
//! values are resolved from the environment before deserialization, and a
//! `common_config.yaml` next to the user file is merged underneath it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tourney_api::{ApiConfig, RetryPolicy};
use tracing::{debug, info};

use crate::domain::ConfigError;

pub const COMMON_CONFIG_FILENAME: &str = "common_config.yaml";
pub const API_KEY_ENV: &str = "TOURNEY_API_KEY";
pub const EVAL_REPO_URL_ENV: &str = "EVAL_REPO_URL";

const PLACEHOLDER: &str = r"\$\{([^}:]+)(?::-([^}]*))?\}";
const NETWORKS: [&str; 3] = ["finney", "test", "local"];

/// Validator run mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Full lifecycle: setup, evaluation, reward.
    #[default]
    Gpu,
    /// Reward settlement and periodic burns only.
    Cpu,
}

impl std::str::FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(RunMode::Gpu),
            "cpu" => Ok(RunMode::Cpu),
            other => Err(ConfigError::Invalid(format!(
                "mode must be one of [gpu, cpu], got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetConfig {
    pub network: String,
    pub subnet_uid: u16,
}

impl Default for SubnetConfig {
    fn default() -> Self {
        Self {
            network: "finney".to_string(),
            subnet_uid: 49,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    pub api_url: String,
    /// Falls back to `TOURNEY_API_KEY` when empty.
    pub api_key: String,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub name: String,
    pub hotkey: String,
    pub path: PathBuf,
    /// Secret URI or mnemonic; takes precedence over the wallet files.
    pub secret: Option<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            name: "validator".to_string(),
            hotkey: "default".to_string(),
            path: PathBuf::from("~/.bittensor/wallets"),
            secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub workspace: PathBuf,
    pub eval_repo: PathBuf,
    /// Falls back to `EVAL_REPO_URL` when empty.
    pub eval_repo_url: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("./workspace"),
            eval_repo: PathBuf::from("./eval-engine"),
            eval_repo_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub network_max_attempts: u32,
    pub network_initial_delay: f64,
    pub network_max_delay: f64,
    pub network_backoff_factor: u32,
    pub evaluation_timeout_seconds: u64,
    pub weight_setting_max_attempts: u32,
    pub weight_setting_initial_delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network_max_attempts: 3,
            network_initial_delay: 1.0,
            network_max_delay: 30.0,
            network_backoff_factor: 2,
            evaluation_timeout_seconds: 3600,
            weight_setting_max_attempts: 5,
            weight_setting_initial_delay: 5.0,
        }
    }
}

impl RetryConfig {
    pub fn network_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.network_max_attempts,
            initial_delay: Duration::from_secs_f64(self.network_initial_delay),
            max_delay: Duration::from_secs_f64(self.network_max_delay),
            factor: self.network_backoff_factor,
        }
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_seconds)
    }

    pub fn weight_initial_delay(&self) -> Duration {
        Duration::from_secs_f64(self.weight_setting_initial_delay)
    }
}

/// Every sleep used by the control loops, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub no_tournament: u64,
    pub contest: u64,
    pub review: u64,
    pub completed: u64,
    pub error: u64,
    pub evaluation_poll: u64,
    pub agent_delay: u64,
    pub reward_idle: u64,
    pub burn: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            no_tournament: 300,
            contest: 60,
            review: 60,
            completed: 300,
            error: 60,
            evaluation_poll: 60,
            agent_delay: 5,
            reward_idle: 60,
            burn: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    /// Prints the current participant hotkeys as JSON.
    pub snapshot_command: Vec<String>,
    /// Receives `--netuid <uid> --weights <json>`.
    pub publish_command: Vec<String>,
    pub burn_uid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Variables that must be set and point at existing paths.
    pub required_env: Vec<String>,
}

/// Complete validator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub mode: RunMode,
    pub subnet: SubnetConfig,
    pub tournament: TournamentConfig,
    pub wallet: WalletConfig,
    pub paths: PathsConfig,
    pub python: String,
    pub retry: RetryConfig,
    pub intervals: IntervalsConfig,
    pub weights: WeightsConfig,
    pub setup: SetupConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            subnet: SubnetConfig::default(),
            tournament: TournamentConfig::default(),
            wallet: WalletConfig::default(),
            paths: PathsConfig::default(),
            python: "python3".to_string(),
            retry: RetryConfig::default(),
            intervals: IntervalsConfig::default(),
            weights: WeightsConfig::default(),
            setup: SetupConfig::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.tournament.api_url, &self.tournament.api_key)
            .with_retry(self.retry.network_policy())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_network(&self.subnet.network)?;
        if self.retry.network_max_attempts == 0 || self.retry.weight_setting_max_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must be >= 1".into()));
        }
        if self.retry.network_initial_delay < 0.0 || self.retry.weight_setting_initial_delay < 0.0
        {
            return Err(ConfigError::Invalid("retry delays must be >= 0".into()));
        }
        if self.python.trim().is_empty() {
            return Err(ConfigError::Invalid("python executable is empty".into()));
        }
        Ok(())
    }
}

/// Miner configuration for submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub tournament: TournamentConfig,
    pub wallet: WalletConfig,
}

impl MinerConfig {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.tournament.api_url, &self.tournament.api_key)
    }
}

fn validate_network(network: &str) -> Result<(), ConfigError> {
    if NETWORKS.contains(&network) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "network must be one of {NETWORKS:?}, got {network}"
        )))
    }
}

/// Load a validator config, applying env placeholders and common defaults.
pub fn load_validator_config(path: &Path) -> Result<ValidatorConfig, ConfigError> {
    let value = load_merged(path, &env_lookup)?;
    let mut config: ValidatorConfig = serde_yaml::from_value(value)?;
    apply_env_fallbacks(&mut config.tournament, &env_lookup);
    if config.paths.eval_repo_url.is_empty() {
        if let Some(url) = env_lookup(EVAL_REPO_URL_ENV) {
            config.paths.eval_repo_url = url;
        }
    }
    config.validate()?;
    info!(path = %path.display(), mode = ?config.mode, "Loaded validator configuration");
    Ok(config)
}

/// Load a miner config, applying env placeholders and common defaults.
pub fn load_miner_config(path: &Path) -> Result<MinerConfig, ConfigError> {
    let value = load_merged(path, &env_lookup)?;
    let mut config: MinerConfig = serde_yaml::from_value(value)?;
    apply_env_fallbacks(&mut config.tournament, &env_lookup);
    Ok(config)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn apply_env_fallbacks(tournament: &mut TournamentConfig, lookup: &dyn Fn(&str) -> Option<String>) {
    if tournament.api_key.is_empty() {
        if let Some(key) = lookup(API_KEY_ENV) {
            tournament.api_key = key;
        }
    }
}

fn load_merged(path: &Path, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Value, ConfigError> {
    let user = read_yaml(path)?;
    let common_path = path
        .parent()
        .map(|dir| dir.join(COMMON_CONFIG_FILENAME))
        .filter(|p| p.exists() && p != path);

    let merged = match common_path {
        Some(common_path) => {
            info!(path = %common_path.display(), "Loaded common configuration");
            deep_merge(read_yaml(&common_path)?, user)
        }
        None => user,
    };
    resolve_value(merged, lookup)
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&raw)?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Merge `over` onto `base`; nested mappings merge, everything else
/// replaces.
pub fn deep_merge(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Mapping(mut base), Value::Mapping(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, over) => over,
    }
}

fn resolve_value(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Value, ConfigError> {
    Ok(match value {
        Value::String(s) if s.contains("${") => Value::String(resolve_env_vars_with(&s, lookup)?),
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, resolve_value(v, lookup)?);
            }
            Value::Mapping(out)
        }
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|v| resolve_value(v, lookup))
                .collect::<Result<_, _>>()?,
        ),
        other => other,
    })
}

/// Resolve `${VAR}` / `${VAR:-default}` against the process environment.
pub fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
    resolve_env_vars_with(input, &env_lookup)
}

fn resolve_env_vars_with(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let re = Regex::new(PLACEHOLDER).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in re.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        let value = match (lookup(name), caps.get(2)) {
            (Some(v), _) => v,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => return Err(ConfigError::MissingVar(name.to_string())),
        };
        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Write a JSON document as YAML, creating parent directories.
pub fn save_yaml(value: &serde_json::Value, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = serde_yaml::to_string(value)?;
    std::fs::write(path, text).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Saved configuration");
    Ok(())
}
