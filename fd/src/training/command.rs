//! External training program
//!
//! The program runs under `sh -c` with these environment variables:
//!
//! - `FEDNEST_ROUND_ID` - round being trained for
//! - `FEDNEST_TIER` - `tier2` or `tier3`
//! - `FEDNEST_BASE_PATH` - file holding the base snapshot
//! - `FEDNEST_DELTA_PATH` - file the program must write its delta to
//!
//! If the last non-empty stdout line parses as a number it is used as the
//! update weight; otherwise the weight is 1.0.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{LocalTrainer, TrainerError, TrainingOutput};
use crate::domain::{RoundId, Tier};

const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Trainer backed by an external program
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    command: String,
    tier: Tier,
    timeout: Duration,
    work_dir: PathBuf,
}

impl CommandTrainer {
    pub fn new(command: impl Into<String>, tier: Tier) -> Self {
        Self {
            command: command.into(),
            tier,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            work_dir: std::env::temp_dir().join("fednest-train"),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for the base/delta exchange files
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }
}

fn parse_weight(stdout: &str) -> f64 {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.trim().parse::<f64>().ok())
        .filter(|w| w.is_finite() && *w > 0.0)
        .unwrap_or(1.0)
}

#[async_trait]
impl LocalTrainer for CommandTrainer {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn train(&self, round_id: RoundId, base: &[u8]) -> Result<TrainingOutput, TrainerError> {
        debug!(round_id, command = %self.command, "CommandTrainer::train: called");
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let run_id = uuid::Uuid::now_v7();
        let base_path = self.work_dir.join(format!("{}-base.bin", run_id));
        let delta_path = self.work_dir.join(format!("{}-delta.bin", run_id));
        tokio::fs::write(&base_path, base).await?;

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&self.command)
                .env("FEDNEST_ROUND_ID", round_id.to_string())
                .env("FEDNEST_TIER", self.tier.as_str())
                .env("FEDNEST_BASE_PATH", &base_path)
                .env("FEDNEST_DELTA_PATH", &delta_path)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let result = match output {
            Err(_) => Err(TrainerError::Timeout(self.timeout.as_secs())),
            Ok(Err(e)) => Err(TrainerError::Spawn(e.to_string())),
            Ok(Ok(output)) if !output.status.success() => Err(TrainerError::Failed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Ok(output)) => match tokio::fs::read(&delta_path).await {
                Ok(delta) => Ok(TrainingOutput {
                    delta,
                    weight: parse_weight(&String::from_utf8_lossy(&output.stdout)),
                }),
                Err(e) => Err(TrainerError::InvalidOutput(format!(
                    "no delta written to {}: {}",
                    delta_path.display(),
                    e
                ))),
            },
        };

        for path in [&base_path, &delta_path] {
            if let Err(e) = tokio::fs::remove_file(path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove trainer scratch file");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_weight() {
        assert_eq!(parse_weight("epoch 1\n120\n\n"), 120.0);
        assert_eq!(parse_weight("done"), 1.0);
        assert_eq!(parse_weight(""), 1.0);
        assert_eq!(parse_weight("-4"), 1.0);
    }

    #[tokio::test]
    async fn test_command_trainer_roundtrips_files() {
        let temp = tempdir().unwrap();
        let trainer = CommandTrainer::new(r#"cp "$FEDNEST_BASE_PATH" "$FEDNEST_DELTA_PATH"; echo 42"#, Tier::Tier2)
            .with_work_dir(temp.path());

        let output = trainer.train(7, b"base-bytes").await.unwrap();
        assert_eq!(output.delta, b"base-bytes");
        assert_eq!(output.weight, 42.0);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_command_trainer_sees_round_and_tier() {
        let temp = tempdir().unwrap();
        let trainer = CommandTrainer::new(
            r#"printf '%s/%s' "$FEDNEST_ROUND_ID" "$FEDNEST_TIER" > "$FEDNEST_DELTA_PATH""#,
            Tier::Tier3,
        )
        .with_work_dir(temp.path());

        let output = trainer.train(12, b"").await.unwrap();
        assert_eq!(output.delta, b"12/tier3");
    }

    #[tokio::test]
    async fn test_command_trainer_failure() {
        let temp = tempdir().unwrap();
        let trainer = CommandTrainer::new("echo boom >&2; exit 3", Tier::Tier2).with_work_dir(temp.path());

        match trainer.train(1, b"x").await {
            Err(TrainerError::Failed { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_trainer_missing_delta() {
        let temp = tempdir().unwrap();
        let trainer = CommandTrainer::new("true", Tier::Tier2).with_work_dir(temp.path());
        assert!(matches!(
            trainer.train(1, b"x").await,
            Err(TrainerError::InvalidOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_command_trainer_timeout() {
        let temp = tempdir().unwrap();
        let trainer = CommandTrainer::new("sleep 5", Tier::Tier2)
            .with_work_dir(temp.path())
            .with_timeout(Duration::from_millis(100));
        assert!(matches!(trainer.train(1, b"x").await, Err(TrainerError::Timeout(_))));
    }
}
