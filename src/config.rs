use crate::actions::{self, Action};
use crate::conditions::{self, Condition};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from stopwatcher.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct StopwatcherConfig {
    pub watcher: WatcherConfig,
    pub condition: ConditionConfig,
    pub action: ActionConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    pub name: String,
}

/// What to watch for. Every configured condition is polled; the first one to
/// hold triggers the stop action.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ConditionConfig {
    pub stop_file: Option<PathBuf>,
    pub pid: Option<i32>,
    pub log_file: Option<PathBuf>,
    pub pattern: Option<String>,
    pub deadline_secs: Option<u64>,
}

/// What to do once a condition holds. Configured actions run in the order
/// signal, command, marker file.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ActionConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub signal: Option<String>,
    pub pid: Option<i32>,
    pub process_group: bool,
    pub marker_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct StatusConfig {
    pub file: Option<PathBuf>,
    /// Delete the status file when the watch ends cleanly (triggered or cancelled).
    pub remove_on_exit: bool,
}

// --- Default implementations ---

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            name: crate::watcher::DEFAULT_NAME.to_string(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ConditionConfig {
    /// Build the combined condition.
    pub fn build(&self) -> Result<Condition, ConfigError> {
        let mut watched: Vec<Condition> = Vec::new();

        if let Some(path) = &self.stop_file {
            watched.push(conditions::stop_file(path));
        }
        if let Some(pid) = self.pid {
            watched.push(conditions::process_gone(positive_pid(pid, "condition.pid")?));
        }
        match (&self.log_file, &self.pattern) {
            (Some(path), Some(pattern)) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    ConfigError::Invalid(format!("invalid condition.pattern '{pattern}': {e}"))
                })?;
                watched.push(conditions::file_matches(path, regex));
            }
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "condition.log_file requires condition.pattern".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "condition.pattern requires condition.log_file".to_string(),
                ))
            }
            (None, None) => {}
        }
        if let Some(secs) = self.deadline_secs {
            watched.push(conditions::deadline(Duration::from_secs(secs)));
        }

        match watched.len() {
            0 => Err(ConfigError::Invalid(
                "no stop condition configured (set stop_file, pid, log_file/pattern or deadline_secs)"
                    .to_string(),
            )),
            1 => Ok(watched.remove(0)),
            _ => Ok(conditions::any_of(watched)),
        }
    }
}

impl ActionConfig {
    /// Build the stop action. With nothing configured the action only logs.
    pub fn build(&self) -> Result<Action, ConfigError> {
        let mut steps: Vec<Action> = Vec::new();

        match (&self.signal, self.pid) {
            (Some(name), Some(pid)) => {
                let signal = actions::parse_signal(name).ok_or_else(|| {
                    ConfigError::Invalid(format!("unknown signal '{name}' in action.signal"))
                })?;
                let pid = positive_pid(pid, "action.pid")?;
                steps.push(actions::signal_process(pid, signal, self.process_group));
            }
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "action.signal requires action.pid".to_string(),
                ))
            }
            (None, _) => {}
        }
        if let Some(command) = &self.command {
            steps.push(actions::run_command(command.clone(), self.args.clone()));
        }
        if let Some(path) = &self.marker_file {
            steps.push(actions::touch_file(path));
        }

        match steps.len() {
            0 => Ok(actions::log_only()),
            1 => Ok(steps.remove(0)),
            _ => Ok(actions::sequence(steps)),
        }
    }
}

/// Reject pids that `kill` treats as groups or broadcasts (0 and negatives).
fn positive_pid(pid: i32, key: &str) -> Result<i32, ConfigError> {
    if pid > 0 {
        Ok(pid)
    } else {
        Err(ConfigError::Invalid(format!(
            "{key} must be a positive process id, got {pid}"
        )))
    }
}

impl StopwatcherConfig {
    /// Check that a condition and action can be built from this config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let _condition = self.condition.build()?;
        let _action = self.action.build()?;
        Ok(())
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<StopwatcherConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(StopwatcherConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
