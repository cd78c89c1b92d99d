/// Condition-polling stop watcher.
///
/// Runs on its own thread, evaluating a predicate every poll interval. The first
/// time the predicate returns true the stop action runs (once) and the loop ends.
/// The owner can cancel the loop at any time via [`WatcherHandle::request_stop`],
/// in which case the stop action never runs.
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Thread name used when none is configured.
pub const DEFAULT_NAME: &str = "stop-watcher";

/// How a watcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Predicate returned true on check number `checks`; the stop action ran.
    Triggered { checks: u64 },
    /// Cancelled by the owner after `checks` predicate evaluations.
    Cancelled { checks: u64 },
}

/// Errors surfaced by a watcher.
#[derive(Debug)]
pub enum WatcherError {
    /// The OS refused to spawn the watcher thread.
    Spawn {
        name: String,
        source: std::io::Error,
    },
    /// The predicate or stop action panicked on the watcher thread.
    Panicked { name: String, message: String },
}

impl std::fmt::Display for WatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatcherError::Spawn { name, source } => {
                write!(f, "failed to spawn watcher thread '{name}': {source}")
            }
            WatcherError::Panicked { name, message } => {
                write!(f, "watcher thread '{name}' panicked: {message}")
            }
        }
    }
}

impl std::error::Error for WatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatcherError::Spawn { source, .. } => Some(source),
            WatcherError::Panicked { .. } => None,
        }
    }
}

/// State shared between the loop thread and its owner.
///
/// `watching` is the only field mutated from both sides. Stores use `Release`
/// and loads use `Acquire`. The mutex guards nothing but the condvar wait, so a
/// stop request that lands between the loop's state check and its wait is
/// never lost.
#[derive(Debug)]
struct Shared {
    watching: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            watching: AtomicBool::new(true),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire)
    }

    /// Move to the terminal state. Returns true if this call made the transition.
    fn finish(&self) -> bool {
        self.watching.swap(false, Ordering::AcqRel)
    }

    /// Finish and wake the loop if it is sleeping.
    fn cancel(&self) -> bool {
        let transitioned = self.finish();
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
        transitioned
    }

    /// Sleep for `interval` or until cancelled, whichever comes first.
    /// Spurious wakeups go back to sleep.
    fn sleep(&self, interval: Duration) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .wake
            .wait_timeout_while(guard, interval, |_| self.is_watching())
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Forces the terminal state when the loop exits, including by unwinding.
struct FinishOnExit<'a>(&'a Shared);

impl Drop for FinishOnExit<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// An unstarted watcher: a predicate, a stop action, and a poll interval.
pub struct StopWatcher<P, A> {
    name: String,
    interval: Duration,
    predicate: P,
    stop_action: A,
}

impl<P, A> StopWatcher<P, A>
where
    P: FnMut() -> bool + Send + 'static,
    A: FnOnce() + Send + 'static,
{
    /// Create a watcher with the default name and a 500ms poll interval.
    pub fn new(stop_action: A, predicate: P) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            interval: DEFAULT_POLL_INTERVAL,
            predicate,
            stop_action,
        }
    }

    /// Set the wait between predicate checks. Zero means no wait.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the watcher thread's name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the polling loop on a dedicated thread.
    pub fn start(self) -> Result<WatcherHandle, WatcherError> {
        let shared = Arc::new(Shared::new());
        let loop_shared = Arc::clone(&shared);
        let StopWatcher {
            name,
            interval,
            predicate,
            stop_action,
        } = self;

        tracing::debug!(
            name = %name,
            interval_ms = interval.as_millis() as u64,
            "starting stop watcher"
        );

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || watch_loop(&loop_shared, interval, predicate, stop_action))
            .map_err(|e| WatcherError::Spawn {
                name: name.clone(),
                source: e,
            })?;

        Ok(WatcherHandle {
            name,
            shared,
            thread: Some(thread),
        })
    }
}

/// The polling loop. The predicate runs before the first sleep, so a condition
/// that already holds is acted on immediately.
fn watch_loop<P, A>(
    shared: &Shared,
    interval: Duration,
    mut predicate: P,
    stop_action: A,
) -> WatchOutcome
where
    P: FnMut() -> bool,
    A: FnOnce(),
{
    let _finish = FinishOnExit(shared);
    let mut checks = 0u64;

    loop {
        if !shared.is_watching() {
            tracing::debug!(checks, "stop watcher cancelled");
            return WatchOutcome::Cancelled { checks };
        }
        checks += 1;
        if predicate() {
            break;
        }
        shared.sleep(interval);
    }

    // A stop request that landed while the predicate was running wins.
    if !shared.is_watching() {
        tracing::debug!(checks, "stop watcher cancelled during check");
        return WatchOutcome::Cancelled { checks };
    }

    tracing::info!(checks, "stop condition met, running stop action");
    stop_action();
    shared.finish();
    WatchOutcome::Triggered { checks }
}

/// Owner's side of a running watcher.
///
/// Dropping the handle without joining requests a stop and detaches the thread.
#[derive(Debug)]
pub struct WatcherHandle {
    name: String,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<WatchOutcome>>,
}

impl WatcherHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the loop. Idempotent; has no effect once the loop has stopped.
    pub fn request_stop(&self) {
        if self.shared.cancel() {
            tracing::debug!(name = %self.name, "stop requested");
        }
    }

    /// A cloneable handle that can only cancel, for use from other threads or tasks.
    pub fn stopper(&self) -> Stopper {
        Stopper {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the watcher is still in the running state.
    #[allow(dead_code)]
    pub fn is_watching(&self) -> bool {
        self.shared.is_watching()
    }

    /// Whether the loop thread has exited.
    #[allow(dead_code)]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the loop thread to exit and report how it ended.
    pub fn join(mut self) -> Result<WatchOutcome, WatcherError> {
        let Some(thread) = self.thread.take() else {
            unreachable!("watcher thread joined twice");
        };
        thread.join().map_err(|payload| WatcherError::Panicked {
            name: self.name.clone(),
            message: panic_message(payload.as_ref()),
        })
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
        }
    }
}

/// Cancellation-only view of a watcher.
#[derive(Debug, Clone)]
pub struct Stopper {
    shared: Arc<Shared>,
}

impl Stopper {
    /// Same as [`WatcherHandle::request_stop`].
    pub fn request_stop(&self) {
        self.shared.cancel();
    }

    #[allow(dead_code)]
    pub fn is_watching(&self) -> bool {
        self.shared.is_watching()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
