/// Ready-made predicates for a [`StopWatcher`](crate::watcher::StopWatcher).
///
/// Each constructor returns a boxed closure that the watcher polls on its own
/// thread. A condition that can't be evaluated (unreadable file, failed liveness check)
/// reports "not yet" rather than stopping.
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A pollable stop condition.
pub type Condition = Box<dyn FnMut() -> bool + Send>;

/// True once `path` exists.
pub fn stop_file(path: impl Into<PathBuf>) -> Condition {
    let path = path.into();
    Box::new(move || {
        let present = path.exists();
        if present {
            tracing::info!(path = %path.display(), "stop file detected");
        }
        present
    })
}

/// True once process `pid` no longer exists.
///
/// Checks with signal 0. `EPERM` means the process exists but belongs to
/// someone else, so only `ESRCH` counts as gone.
pub fn process_gone(pid: i32) -> Condition {
    let target = Pid::from_raw(pid);
    Box::new(move || match kill(target, None::<Signal>) {
        Ok(()) => false,
        Err(Errno::ESRCH) => {
            tracing::info!(pid, "watched process exited");
            true
        }
        Err(e) => {
            tracing::debug!(pid, error = %e, "process liveness check failed");
            false
        }
    })
}

/// True once the content of `path` matches `pattern`.
pub fn file_matches(path: impl Into<PathBuf>, pattern: Regex) -> Condition {
    let path = path.into();
    Box::new(move || {
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    path = %path.display(),
                    "failed to read watched file"
                );
                return false;
            }
        };
        let matched = pattern.is_match(&contents);
        if matched {
            tracing::info!(
                pattern = %pattern,
                path = %path.display(),
                "stop pattern matched"
            );
        }
        matched
    })
}

/// True once `after` has elapsed since the condition was created.
pub fn deadline(after: Duration) -> Condition {
    let started = Instant::now();
    Box::new(move || {
        let reached = started.elapsed() >= after;
        if reached {
            tracing::info!(after_secs = after.as_secs(), "deadline reached");
        }
        reached
    })
}

/// True when any inner condition is true. Evaluated in order, stopping at the
/// first hit. An empty list is never true.
pub fn any_of(mut conditions: Vec<Condition>) -> Condition {
    Box::new(move || conditions.iter_mut().any(|c| c()))
}
