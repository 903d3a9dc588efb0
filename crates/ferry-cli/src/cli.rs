//! CLI argument parsing (clap derive).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Submit a synthetic batch to an in-process ferry queue and report the
/// outcome.
#[derive(Debug, Clone, Parser)]
#[command(name = "ferry", version, about, long_about = None)]
pub struct CliArgs {
    /// TOML file with `[queue]` and `[batch]` tables. Defaults apply when
    /// omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of tasks to submit (overrides `batch.tasks`).
    #[arg(long, value_name = "N")]
    pub tasks: Option<usize>,

    /// Number of well-behaved workers (overrides `batch.workers`).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Claims taken by a worker that never reports back (overrides
    /// `batch.stalled_claims`).
    #[arg(long, value_name = "N")]
    pub stalled_claims: Option<usize>,

    /// Logging level. If omitted, `FERRY_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = CliArgs::try_parse_from([
            "ferry",
            "--config",
            "ferry.toml",
            "--tasks",
            "50",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("ferry.toml")));
        assert_eq!(args.tasks, Some(50));
        assert_eq!(args.workers, None);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(CliArgs::try_parse_from(["ferry", "--log-level", "loud"]).is_err());
    }
}
