//! Background work that can be asked to stop and is joined with a bound.
//!
//! A [`SupervisedTask`] runs its closure on a named thread, keeps the first
//! error or panic it ends with, and reports a stuck thread instead of hanging
//! the caller.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::Result;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Cooperative stop flag shared between an owner and a background activity.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct TaskShared {
    alive: AtomicBool,
    fault: OnceLock<String>,
}

/// How a bounded join ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Finished,
    /// The task did not finish in time and was left running detached.
    TimedOut,
}

/// Background thread whose liveness and fault are observable by its owner.
///
/// The work closure receives the task's [`StopToken`]. An `Err` returned by
/// the work, or a panic inside it, is captured into [`last_error`] before the
/// task stops reporting itself alive.
///
/// [`last_error`]: SupervisedTask::last_error
#[derive(Debug)]
pub struct SupervisedTask {
    name: String,
    stop: StopToken,
    shared: Arc<TaskShared>,
    handle: Option<JoinHandle<()>>,
}

impl SupervisedTask {
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Result<Self>
    where
        F: FnOnce(StopToken) -> Result<()> + Send + 'static,
    {
        let name = name.into();
        let stop = StopToken::new();
        let shared = Arc::new(TaskShared {
            alive: AtomicBool::new(true),
            fault: OnceLock::new(),
        });

        let handle = {
            let stop = stop.clone();
            let shared = Arc::clone(&shared);
            let task_name = name.clone();
            thread::Builder::new().name(name.clone()).spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(stop)));
                let fault = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(payload) => Some(panic_message(payload.as_ref())),
                };
                if let Some(fault) = fault {
                    tracing::error!(task = %task_name, "Error: {fault}");
                    let _ = shared.fault.set(fault);
                }
                shared.alive.store(false, Ordering::Release);
            })?
        };

        tracing::debug!(task = %name, "task started");
        Ok(Self {
            name,
            stop,
            shared,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Fault captured when the task ended, if any. Always `None` while the task
    /// is alive.
    pub fn last_error(&self) -> Option<&str> {
        if self.is_alive() {
            return None;
        }
        self.shared.fault.get().map(String::as_str)
    }

    /// Waits up to `timeout` for the task to end. A task that overruns is
    /// detached and reported, never waited on forever.
    pub fn join(&mut self, timeout: Duration) -> JoinOutcome {
        let Some(handle) = self.handle.take() else {
            return JoinOutcome::Finished;
        };

        // A timeout past the end of the clock means no deadline.
        let deadline = Instant::now().checked_add(timeout);
        while !handle.is_finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::warn!(
                    task = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "task did not stop in time, leaving it detached"
                );
                return JoinOutcome::TimedOut;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        // The work runs under catch_unwind, so the thread itself cannot panic.
        let _ = handle.join();
        tracing::debug!(task = %self.name, "task stopped");
        JoinOutcome::Finished
    }
}

impl Drop for SupervisedTask {
    fn drop(&mut self) {
        self.stop.request();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VaderError;

    fn wait_until_dead(task: &SupervisedTask) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while task.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn stops_cooperatively() {
        let mut task = SupervisedTask::spawn("worker", |stop| {
            while !stop.is_requested() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();

        assert!(task.is_alive());
        assert_eq!(task.name(), "worker");
        task.request_stop();
        assert_eq!(task.join(Duration::from_secs(5)), JoinOutcome::Finished);
        assert!(!task.is_alive());
        assert_eq!(task.last_error(), None);
    }

    #[test]
    fn captures_returned_errors() {
        let task = SupervisedTask::spawn("failing", |_| {
            Err(VaderError::SequencerFault("line 9 stuck".into()))
        })
        .unwrap();

        wait_until_dead(&task);
        assert!(!task.is_alive());
        assert!(task.last_error().unwrap().contains("line 9 stuck"));
    }

    #[test]
    fn captures_panics() {
        let task = SupervisedTask::spawn("panicking", |_| -> Result<()> {
            panic!("slot table corrupted");
        })
        .unwrap();

        wait_until_dead(&task);
        assert!(task.last_error().unwrap().contains("slot table corrupted"));
    }

    #[test]
    fn join_accepts_an_unrepresentable_timeout() {
        let mut task = SupervisedTask::spawn("quick", |_| Ok(())).unwrap();
        assert_eq!(task.join(Duration::MAX), JoinOutcome::Finished);
        assert!(!task.is_alive());
    }

    #[test]
    fn join_gives_up_after_the_timeout() {
        let release = StopToken::new();
        let mut task = {
            let release = release.clone();
            SupervisedTask::spawn("stubborn", move |_| {
                while !release.is_requested() {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .unwrap()
        };

        assert_eq!(task.join(Duration::from_millis(20)), JoinOutcome::TimedOut);
        release.request();
    }
}
