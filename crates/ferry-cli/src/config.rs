//! Config file loading.
//!
//! ```toml
//! [queue]
//! default_max_attempts = 3
//! reap_timeout_ms = 500
//! reap_interval_ms = 100
//!
//! [batch]
//! tasks = 200
//! workers = 4
//! failure_rate = 0.2
//! stalled_claims = 3
//! work_ms = 20
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use ferry_core::QueueConfig;
use serde::Deserialize;

use crate::cli::CliArgs;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub queue: QueueConfig,
    pub batch: BatchConfig,
}

/// Shape of the synthetic workload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub tasks: usize,
    pub workers: usize,
    /// Probability that one handler run fails (retryable).
    pub failure_rate: f64,
    /// Tasks claimed by a worker that then goes silent. Only the reaper can
    /// bring them back.
    pub stalled_claims: usize,
    /// Simulated handler time per task.
    pub work_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            tasks: 100,
            workers: 4,
            failure_rate: 0.1,
            stalled_claims: 2,
            work_ms: 10,
        }
    }
}

impl BatchConfig {
    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.workers > 0, "batch.workers must be at least 1");
        ensure!(
            (0.0..=1.0).contains(&self.failure_rate),
            "batch.failure_rate must be within 0.0..=1.0, got {}",
            self.failure_rate
        );
        ensure!(
            self.stalled_claims <= self.tasks,
            "batch.stalled_claims ({}) exceeds batch.tasks ({})",
            self.stalled_claims,
            self.tasks
        );
        Ok(())
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<FileConfig> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn parse(contents: &str) -> Result<FileConfig> {
    Ok(toml::from_str(contents)?)
}

/// File (or defaults), then CLI overrides, then validation.
pub fn resolve(args: &CliArgs) -> Result<FileConfig> {
    let mut config = match &args.config {
        Some(path) => load_from_path(path)?,
        None => FileConfig::default(),
    };

    if let Some(tasks) = args.tasks {
        config.batch.tasks = tasks;
    }
    if let Some(workers) = args.workers {
        config.batch.workers = workers;
    }
    if let Some(stalled) = args.stalled_claims {
        config.batch.stalled_claims = stalled;
    }

    config.queue.validate().context("invalid [queue] config")?;
    config.batch.validate()?;
    // stalled claims are taken before any worker runs, so they must not fill
    // the queue on their own
    if let Some(limit) = config.queue.max_outstanding {
        ensure!(
            limit > config.batch.stalled_claims,
            "queue.max_outstanding ({limit}) must exceed batch.stalled_claims ({})",
            config.batch.stalled_claims
        );
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_both_tables() {
        let config = parse(
            r#"
            [queue]
            default_max_attempts = 5
            reap_timeout_ms = 250
            max_outstanding = 1000

            [batch]
            tasks = 10
            failure_rate = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.default_max_attempts, 5);
        assert_eq!(config.queue.reap_timeout, Duration::from_millis(250));
        assert_eq!(config.queue.reap_interval, QueueConfig::default().reap_interval);
        assert_eq!(config.queue.max_outstanding, Some(1000));
        assert_eq!(config.batch.tasks, 10);
        assert_eq!(config.batch.failure_rate, 0.5);
        assert_eq!(config.batch.workers, BatchConfig::default().workers);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.batch, BatchConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse("[batch]\nthreads = 3\n").is_err());
    }

    #[test]
    fn cli_flags_override_defaults() {
        let args = CliArgs::parse_from(["ferry", "--tasks", "7", "--stalled-claims", "0"]);
        let config = resolve(&args).unwrap();
        assert_eq!(config.batch.tasks, 7);
        assert_eq!(config.batch.stalled_claims, 0);
    }

    #[test]
    fn capacity_must_leave_room_beyond_stalled_claims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        fs::write(
            &path,
            "[queue]\nmax_outstanding = 2\n\n[batch]\ntasks = 50\nstalled_claims = 2\n",
        )
        .unwrap();

        let path_arg = path.to_string_lossy().into_owned();
        let args = CliArgs::parse_from(["ferry", "--config", path_arg.as_str()]);
        assert!(resolve(&args).is_err());

        // smaller than the batch is fine: the driver backs off
        let args = CliArgs::parse_from([
            "ferry",
            "--config",
            path_arg.as_str(),
            "--stalled-claims",
            "1",
        ]);
        let config = resolve(&args).unwrap();
        assert_eq!(config.queue.max_outstanding, Some(2));
        assert_eq!(config.batch.tasks, 50);
    }

    #[test]
    fn invalid_batch_is_rejected() {
        let args = CliArgs::parse_from(["ferry", "--tasks", "1", "--stalled-claims", "2"]);
        assert!(resolve(&args).is_err());

        let args = CliArgs::parse_from(["ferry", "--workers", "0"]);
        assert!(resolve(&args).is_err());
    }
}
