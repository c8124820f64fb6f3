//! Supervisor configuration: built-in defaults, an optional JSON file, then
//! command-line flags, in increasing order of precedence.

use crate::trigger::{TriggerSet, DEFAULT_TRIGGER_PHRASES};
use crate::window::DEFAULT_WINDOW_CHARS;
use anyhow::{bail, Context, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REDRAW_DELAY_MS: u64 = 500;
pub const DEFAULT_ACCEPT_DELAY_SECS: u64 = 10;
pub const DEFAULT_DEBOUNCE_MS: u64 = 3_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_LOG_PATH: &str = "/tmp/auto-accept.log";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "auto-accept",
    about = "Run an interactive program in a pty and auto-accept its default prompts",
    author,
    version
)]
pub struct CliArgs {
    /// Phrase that marks a prompt to accept (repeatable; replaces the defaults)
    #[arg(long = "trigger", value_name = "PHRASE")]
    pub triggers: Vec<String>,

    /// Grace period after a match before the countdown starts (ms)
    #[arg(long = "redraw-delay-ms", value_name = "MS")]
    pub redraw_delay_ms: Option<u64>,

    /// Seconds to wait before sending the accept keystroke
    #[arg(long = "accept-delay-secs", value_name = "SECS")]
    pub accept_delay_secs: Option<u64>,

    /// Minimum time between two accepts (ms)
    #[arg(long = "debounce-ms", value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Do not show the countdown in the terminal title
    #[arg(long = "no-countdown", default_value_t = false)]
    pub no_countdown: bool,

    /// JSON file with supervisor settings
    #[arg(long = "config", env = "AUTO_ACCEPT_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write diagnostic tracing to the log file
    #[arg(
        long = "debug",
        env = "AUTO_ACCEPT_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub debug: bool,

    /// Diagnostic log path (used with --debug)
    #[arg(long = "log-file", env = "AUTO_ACCEPT_LOG", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Program to supervise, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl CliArgs {
    /// Program name and its arguments.
    pub fn split_command(&self) -> Option<(&str, &[String])> {
        let (program, args) = self.command.split_first()?;
        Some((program.as_str(), args))
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
    }
}

/// Settings file layout; every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub triggers: Option<Vec<String>>,
    pub redraw_delay_ms: Option<u64>,
    pub accept_delay_secs: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub show_countdown: Option<bool>,
    pub buffer_chars: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Everything the relay loop needs, passed in at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub trigger_phrases: Vec<String>,
    pub redraw_delay: Duration,
    pub debounce_interval: Duration,
    pub accept_delay: Duration,
    pub show_countdown: bool,
    pub buffer_capacity: usize,
    pub poll_interval: Duration,
    pub accept_keystroke: Vec<u8>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            trigger_phrases: DEFAULT_TRIGGER_PHRASES
                .iter()
                .map(|phrase| phrase.to_string())
                .collect(),
            redraw_delay: Duration::from_millis(DEFAULT_REDRAW_DELAY_MS),
            debounce_interval: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            accept_delay: Duration::from_secs(DEFAULT_ACCEPT_DELAY_SECS),
            show_countdown: true,
            buffer_capacity: DEFAULT_WINDOW_CHARS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            accept_keystroke: b"\r".to_vec(),
        }
    }
}

impl SupervisorConfig {
    /// Layer the config file (if any) and then the flags over the defaults.
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = &args.config {
            config.apply_file(FileConfig::load(path)?);
        }
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(triggers) = file.triggers {
            self.trigger_phrases = triggers;
        }
        if let Some(ms) = file.redraw_delay_ms {
            self.redraw_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.accept_delay_secs {
            self.accept_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = file.debounce_ms {
            self.debounce_interval = Duration::from_millis(ms);
        }
        if let Some(show) = file.show_countdown {
            self.show_countdown = show;
        }
        if let Some(chars) = file.buffer_chars {
            self.buffer_capacity = chars;
        }
        if let Some(ms) = file.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if !args.triggers.is_empty() {
            self.trigger_phrases = args.triggers.clone();
        }
        if let Some(ms) = args.redraw_delay_ms {
            self.redraw_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = args.accept_delay_secs {
            self.accept_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = args.debounce_ms {
            self.debounce_interval = Duration::from_millis(ms);
        }
        if args.no_countdown {
            self.show_countdown = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trigger_set().is_empty() {
            bail!("at least one non-empty trigger phrase is required");
        }
        if self.buffer_capacity == 0 {
            bail!("buffer size must be greater than zero");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        if self.accept_keystroke.is_empty() {
            bail!("accept keystroke must not be empty");
        }
        Ok(())
    }

    pub fn trigger_set(&self) -> TriggerSet {
        TriggerSet::new(self.trigger_phrases.iter().cloned())
    }
}
