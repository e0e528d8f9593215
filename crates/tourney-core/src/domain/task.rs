//! Evaluation task configuration downloaded from the backend.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::SetupError;

/// One environment scene the engine evaluates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvScene {
    pub env_id: String,
    #[serde(deserialize_with = "scene_as_string")]
    pub scene: String,
}

fn scene_as_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Typed view of the evaluation config. Keys the validator does not read are
/// carried in `extra` and handed to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_name: String,
    pub task_module: String,
    #[serde(default)]
    pub env_scenes: Vec<EnvScene>,
    #[serde(default = "default_seeds")]
    pub seeds: Vec<i64>,
    #[serde(default = "default_episodes")]
    pub num_episodes: u32,
    #[serde(default = "default_scoring_version")]
    pub scoring_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_episode_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_envs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub enable_logging: bool,
    #[serde(default)]
    pub render: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_seeds() -> Vec<i64> {
    vec![42]
}

fn default_episodes() -> u32 {
    10
}

fn default_scoring_version() -> String {
    "v1".to_string()
}

impl TaskConfig {
    /// Parse the downloaded evaluation config.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, SetupError> {
        let config: TaskConfig = serde_json::from_value(value.clone())
            .map_err(|e| SetupError::TaskConfig(e.to_string()))?;
        if config.task_module.trim().is_empty() {
            return Err(SetupError::TaskConfig("task_module is empty".into()));
        }
        if config.num_episodes == 0 {
            return Err(SetupError::TaskConfig("num_episodes must be >= 1".into()));
        }
        Ok(config)
    }

    pub fn env_ids(&self) -> Vec<&str> {
        self.env_scenes.iter().map(|s| s.env_id.as_str()).collect()
    }

    /// The document the engine runs against: this config plus the policy
    /// checkpoint to load.
    pub fn run_config(&self, policy_path: &Path) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let serde_json::Value::Object(map) = &mut value {
            map.insert(
                "policy_path".to_string(),
                serde_json::Value::String(policy_path.to_string_lossy().into_owned()),
            );
        }
        value
    }
}
