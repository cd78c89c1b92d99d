/// Ready-made stop actions.
///
/// The watcher never catches failures from its stop action, so each action here
/// reports its own errors through tracing and returns normally.
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Command;

/// A stop action, run at most once.
pub type Action = Box<dyn FnOnce() + Send>;

/// Run `command` with `args` and wait for it to exit.
pub fn run_command(command: String, args: Vec<String>) -> Action {
    Box::new(move || {
        tracing::info!(command = %command, args = ?args, "running stop command");
        match Command::new(&command).args(&args).status() {
            Ok(status) if status.success() => {
                tracing::info!(command = %command, "stop command finished");
            }
            Ok(status) => {
                tracing::warn!(
                    command = %command,
                    exit_code = ?status.code(),
                    "stop command failed"
                );
            }
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "failed to spawn stop command");
            }
        }
    })
}

/// Send `signal` to `pid`, or to the process group `pid` when `group` is set.
pub fn signal_process(pid: i32, signal: Signal, group: bool) -> Action {
    Box::new(move || {
        let target = Pid::from_raw(pid);
        let result = if group {
            killpg(target, signal)
        } else {
            kill(target, signal)
        };
        match result {
            Ok(()) => tracing::info!(pid, signal = %signal, group, "sent stop signal"),
            Err(e) => {
                tracing::warn!(pid, signal = %signal, group, error = %e, "failed to send stop signal")
            }
        }
    })
}

/// Write a marker file containing the current time.
pub fn touch_file(path: impl Into<PathBuf>) -> Action {
    let path = path.into();
    Box::new(move || {
        let stamp = chrono::Utc::now().to_rfc3339();
        match std::fs::write(&path, stamp) {
            Ok(()) => tracing::info!(path = %path.display(), "wrote stop marker"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write stop marker")
            }
        }
    })
}

/// Log that the condition was met. Used when nothing else is configured.
pub fn log_only() -> Action {
    Box::new(|| tracing::info!("stop condition met, no stop action configured"))
}

/// Run `actions` in order.
pub fn sequence(actions: Vec<Action>) -> Action {
    Box::new(move || {
        for action in actions {
            action();
        }
    })
}

/// Parse a signal name such as `TERM`, `sigterm` or `SIGKILL`.
pub fn parse_signal(name: &str) -> Option<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    match bare {
        "TERM" => Some(Signal::SIGTERM),
        "INT" => Some(Signal::SIGINT),
        "KILL" => Some(Signal::SIGKILL),
        "HUP" => Some(Signal::SIGHUP),
        "QUIT" => Some(Signal::SIGQUIT),
        "USR1" => Some(Signal::SIGUSR1),
        "USR2" => Some(Signal::SIGUSR2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!(parse_signal("TERM"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("sigterm"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("SIGKILL"), Some(Signal::SIGKILL));
        assert_eq!(parse_signal(" int "), Some(Signal::SIGINT));
        assert_eq!(parse_signal("usr2"), Some(Signal::SIGUSR2));
    }

    #[test]
    fn test_parse_signal_unknown() {
        assert_eq!(parse_signal("BOGUS"), None);
        assert_eq!(parse_signal(""), None);
        assert_eq!(parse_signal("SIG"), None);
    }

    #[test]
    fn test_run_command_executes() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("ran");
        let action = run_command(
            "sh".to_string(),
            vec!["-c".to_string(), format!("echo stopped > {}", out.display())],
        );

        action();
        let contents = std::fs::read_to_string(&out).unwrap();
        assert_eq!(contents.trim(), "stopped");
    }

    #[test]
    fn test_run_command_failures_do_not_panic() {
        run_command("sh".to_string(), vec!["-c".to_string(), "exit 3".to_string()])();
        run_command("nonexistent-binary-xyz".to_string(), Vec::new())();
    }

    #[test]
    fn test_signal_process_terminates_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        signal_process(child.id() as i32, Signal::SIGTERM, false)();

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_touch_file_writes_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stopped");
        touch_file(&path)();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&contents).is_ok());
    }

    #[test]
    fn test_touch_file_bad_path_does_not_panic() {
        touch_file("/nonexistent/dir/stopped")();
    }

    #[test]
    fn test_sequence_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&log);
        let second = Arc::clone(&log);
        let actions: Vec<Action> = vec![
            Box::new(move || first.lock().unwrap().push("first")),
            Box::new(move || second.lock().unwrap().push("second")),
        ];

        sequence(actions)();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }
}
