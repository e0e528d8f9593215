//! Weight-publishing oracle.
//!
//! The chain itself stays outside the validator. [`CommandWeightPublisher`]
//! shells out to operator-provided commands for the participant snapshot
//! and for the weight extrinsic.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::WeightError;
use crate::process::{run_command, CommandSpec};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Registered participants on the subnet. The uid is the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub hotkeys: Vec<String>,
}

impl WeightSnapshot {
    pub fn new(hotkeys: Vec<String>) -> Self {
        Self { hotkeys }
    }

    pub fn len(&self) -> usize {
        self.hotkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotkeys.is_empty()
    }

    pub fn uid_of(&self, hotkey: &str) -> Option<u16> {
        self.hotkeys
            .iter()
            .position(|h| h == hotkey)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// All uids with full weight on `target`.
    pub fn single_target(&self, target: u16) -> Result<(Vec<u16>, Vec<f32>), WeightError> {
        let size = self.hotkeys.len();
        if usize::from(target) >= size {
            return Err(WeightError::TargetOutOfRange { uid: target, size });
        }
        let uids = (0..size).filter_map(|i| u16::try_from(i).ok()).collect();
        let mut weights = vec![0.0; size];
        weights[usize::from(target)] = 1.0;
        Ok((uids, weights))
    }
}

#[async_trait]
pub trait WeightPublisher: Send + Sync {
    async fn snapshot(&self) -> Result<WeightSnapshot, WeightError>;

    async fn set_weights(&self, uids: &[u16], weights: &[f32]) -> Result<(), WeightError>;
}

/// Runs external commands for the snapshot and the publish step.
///
/// The snapshot command prints `{"hotkeys": [...]}` or a bare JSON array.
/// The publish command gets `--netuid <n> --weights <json>` appended, with
/// `{"uids": [...], "weights": [...]}` as the payload.
#[derive(Debug, Clone)]
pub struct CommandWeightPublisher {
    snapshot_command: Vec<String>,
    publish_command: Vec<String>,
    netuid: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotOutput {
    Object { hotkeys: Vec<String> },
    List(Vec<String>),
}

#[derive(Serialize)]
struct PublishPayload<'a> {
    uids: &'a [u16],
    weights: &'a [f32],
}

impl CommandWeightPublisher {
    pub fn new(snapshot_command: Vec<String>, publish_command: Vec<String>, netuid: u16) -> Self {
        Self {
            snapshot_command,
            publish_command,
            netuid,
        }
    }

    fn spec(command: &[String]) -> Option<CommandSpec> {
        let (program, args) = command.split_first()?;
        Some(CommandSpec::new(program, COMMAND_TIMEOUT).args(args.iter().cloned()))
    }
}

#[async_trait]
impl WeightPublisher for CommandWeightPublisher {
    async fn snapshot(&self) -> Result<WeightSnapshot, WeightError> {
        let spec = Self::spec(&self.snapshot_command)
            .ok_or_else(|| WeightError::Snapshot("no snapshot command configured".into()))?;
        let out = run_command(&spec)
            .await
            .map_err(|e| WeightError::Snapshot(format!("{}: {e}", spec.display())))?;
        if !out.success() {
            return Err(WeightError::Snapshot(out.stderr_tail(500).trim().to_string()));
        }
        let hotkeys = match serde_json::from_str::<SnapshotOutput>(out.stdout.trim()) {
            Ok(SnapshotOutput::Object { hotkeys }) | Ok(SnapshotOutput::List(hotkeys)) => hotkeys,
            Err(e) => return Err(WeightError::Snapshot(format!("unreadable snapshot: {e}"))),
        };
        debug!(participants = hotkeys.len(), "Loaded weight snapshot");
        Ok(WeightSnapshot { hotkeys })
    }

    async fn set_weights(&self, uids: &[u16], weights: &[f32]) -> Result<(), WeightError> {
        let payload = serde_json::to_string(&PublishPayload { uids, weights })
            .map_err(|e| WeightError::Publish(e.to_string()))?;
        let spec = Self::spec(&self.publish_command)
            .ok_or_else(|| WeightError::Publish("no publish command configured".into()))?
            .arg("--netuid")
            .arg(self.netuid.to_string())
            .arg("--weights")
            .arg(payload);
        let out = run_command(&spec)
            .await
            .map_err(|e| WeightError::Publish(format!("{}: {e}", spec.program)))?;
        if out.timed_out {
            return Err(WeightError::Publish("publish command timed out".into()));
        }
        if !out.success() {
            return Err(WeightError::Publish(out.stderr_tail(500).trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(n: usize) -> WeightSnapshot {
        WeightSnapshot::new((0..n).map(|i| format!("hk{i}")).collect())
    }

    #[test]
    fn test_single_target_vector() {
        let (uids, weights) = snapshot(4).single_target(2).unwrap();
        assert_eq!(uids, vec![0, 1, 2, 3]);
        assert_eq!(weights, vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_single_target_out_of_range() {
        let err = snapshot(2).single_target(5).unwrap_err();
        assert!(matches!(err, WeightError::TargetOutOfRange { uid: 5, size: 2 }));
        assert!(WeightSnapshot::default().single_target(0).is_err());
    }

    #[test]
    fn test_uid_lookup() {
        let snap = snapshot(3);
        assert_eq!(snap.uid_of("hk1"), Some(1));
        assert_eq!(snap.uid_of("nobody"), None);
    }

    #[tokio::test]
    async fn test_command_snapshot_accepts_both_shapes() {
        let object = CommandWeightPublisher::new(
            vec!["echo".into(), r#"{"hotkeys": ["a", "b"]}"#.into()],
            vec![],
            49,
        );
        assert_eq!(object.snapshot().await.unwrap().hotkeys, vec!["a", "b"]);

        let list = CommandWeightPublisher::new(vec!["echo".into(), r#"["x"]"#.into()], vec![], 49);
        assert_eq!(list.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_command_publish_reports_failure() {
        let ok = CommandWeightPublisher::new(vec![], vec!["true".into()], 49);
        ok.set_weights(&[0, 1], &[1.0, 0.0]).await.unwrap();

        let failing = CommandWeightPublisher::new(vec![], vec!["false".into()], 49);
        let err = failing.set_weights(&[0], &[1.0]).await.unwrap_err();
        assert!(matches!(err, WeightError::Publish(_)));

        let unconfigured = CommandWeightPublisher::new(vec![], vec![], 49);
        assert!(unconfigured.snapshot().await.is_err());
    }
}
