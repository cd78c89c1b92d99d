/// Wires a loaded config into a running watcher.
///
/// The watcher itself runs on its own thread; this side waits for it on the
/// blocking pool while listening for SIGINT/SIGTERM, which cancel the watch.
use crate::actions::Action;
use crate::conditions::Condition;
use crate::config::{ConfigError, StopwatcherConfig};
use crate::status::{StatusTracker, WatchState};
use crate::watcher::{StopWatcher, WatchOutcome, WatcherError};
use std::future::Future;

/// Errors that end a run.
#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Watcher(WatcherError),
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "{e}"),
            RunError::Watcher(e) => write!(f, "{e}"),
            RunError::Join(e) => write!(f, "failed to join watcher task: {e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Config(e) => Some(e),
            RunError::Watcher(e) => Some(e),
            RunError::Join(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e)
    }
}

impl From<WatcherError> for RunError {
    fn from(e: WatcherError) -> Self {
        RunError::Watcher(e)
    }
}

/// Build an unstarted watcher from config.
pub fn build_watcher(
    config: &StopwatcherConfig,
) -> Result<StopWatcher<Condition, Action>, ConfigError> {
    let condition = config.condition.build()?;
    let action = config.action.build()?;
    Ok(StopWatcher::new(action, condition)
        .with_interval(config.watcher.poll_interval())
        .with_name(config.watcher.name.clone()))
}

/// Run until the watcher triggers or `shutdown` resolves.
pub async fn run_until<S>(config: &StopwatcherConfig, shutdown: S) -> Result<WatchOutcome, RunError>
where
    S: Future<Output = ()>,
{
    let watcher = build_watcher(config)?;
    tracing::debug!(
        name = %watcher.name(),
        interval_ms = watcher.interval().as_millis() as u64,
        "built watcher from config"
    );
    let tracker = config.status.file.clone().map(|path| {
        StatusTracker::new(path, &config.watcher.name, config.watcher.poll_interval_ms)
    });

    let handle = watcher.start()?;
    tracing::info!(
        name = %handle.name(),
        poll_interval_ms = config.watcher.poll_interval_ms,
        "watching for stop condition"
    );
    if let Some(t) = &tracker {
        t.update(WatchState::Watching);
    }

    let stopper = handle.stopper();
    let mut join = tokio::task::spawn_blocking(move || handle.join());

    let joined = tokio::select! {
        res = &mut join => res,
        _ = shutdown => {
            tracing::info!("shutdown requested, cancelling watcher");
            stopper.request_stop();
            join.await
        }
    };

    let result = joined.map_err(RunError::Join)?;
    let state = match &result {
        Ok(WatchOutcome::Triggered { .. }) => WatchState::Triggered,
        Ok(WatchOutcome::Cancelled { .. }) => WatchState::Cancelled,
        Err(_) => WatchState::Crashed,
    };
    if let Some(t) = &tracker {
        if config.status.remove_on_exit && state != WatchState::Crashed {
            t.remove();
        } else {
            t.update(state);
        }
    }

    match result {
        Ok(outcome) => {
            tracing::info!(?outcome, "watcher finished");
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(error = %e, "watcher crashed");
            Err(e.into())
        }
    }
}

/// Run until the watcher triggers or the process receives SIGINT/SIGTERM.
pub async fn run(config: &StopwatcherConfig) -> Result<WatchOutcome, RunError> {
    run_until(config, shutdown_signal()).await
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler, listening for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = term.recv() => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> StopwatcherConfig {
        let mut config = StopwatcherConfig::default();
        config.watcher.poll_interval_ms = 20;
        config.condition.stop_file = Some(dir.join("STOP"));
        config.action.marker_file = Some(dir.join("stopped"));
        config.status.file = Some(dir.join("stopwatcher.status"));
        config
    }

    fn read_state(path: &std::path::Path) -> String {
        let contents = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        parsed["state"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_build_watcher_applies_settings() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.watcher.name = "app-stop".to_string();

        let watcher = build_watcher(&config).unwrap();
        assert_eq!(watcher.name(), "app-stop");
        assert_eq!(watcher.interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_build_watcher_rejects_missing_condition() {
        let err = build_watcher(&StopwatcherConfig::default()).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_run_triggers_on_existing_stop_file() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("STOP"), "").unwrap();

        let outcome = run_until(&config, std::future::pending()).await.unwrap();

        assert_eq!(outcome, WatchOutcome::Triggered { checks: 1 });
        assert!(dir.path().join("stopped").exists());
        assert_eq!(read_state(&dir.path().join("stopwatcher.status")), "triggered");
    }

    #[tokio::test]
    async fn test_run_triggers_when_stop_file_appears() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let stop = dir.path().join("STOP");

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            std::fs::write(stop, "").unwrap();
        });

        let outcome = run_until(&config, std::future::pending()).await.unwrap();
        writer.await.unwrap();

        assert!(matches!(outcome, WatchOutcome::Triggered { checks } if checks > 1));
        assert!(dir.path().join("stopped").exists());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_without_action() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.watcher.poll_interval_ms = 1000;

        let start = Instant::now();
        let outcome = run_until(&config, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WatchOutcome::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_millis(800));
        assert!(!dir.path().join("stopped").exists());
        assert_eq!(read_state(&dir.path().join("stopwatcher.status")), "cancelled");
    }

    #[tokio::test]
    async fn test_remove_on_exit_deletes_status_file() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.status.remove_on_exit = true;
        std::fs::write(dir.path().join("STOP"), "").unwrap();

        let outcome = run_until(&config, std::future::pending()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Triggered { .. }));
        assert!(dir.path().join("stopped").exists());
        assert!(!dir.path().join("stopwatcher.status").exists());
    }

    #[tokio::test]
    async fn test_remove_on_exit_after_cancel() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.watcher.poll_interval_ms = 1000;
        config.status.remove_on_exit = true;

        let outcome = run_until(&config, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WatchOutcome::Cancelled { .. }));
        assert!(!dir.path().join("stopwatcher.status").exists());
    }

    #[tokio::test]
    async fn test_run_without_status_file() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.status.file = None;
        std::fs::write(dir.path().join("STOP"), "").unwrap();

        let outcome = run_until(&config, std::future::pending()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Triggered { .. }));
        assert!(!dir.path().join("stopwatcher.status").exists());
    }

    #[tokio::test]
    async fn test_run_config_error() {
        let config = StopwatcherConfig {
            status: crate::config::StatusConfig {
                file: Some(PathBuf::from("/nonexistent/stopwatcher.status")),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = run_until(&config, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, RunError::Config(_)));
        assert!(err.to_string().contains("no stop condition configured"));
    }
}
