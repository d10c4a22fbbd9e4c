//! Bounded parallel execution with a batch deadline.
//!
//! [`run_bounded`] runs a batch of futures at most `pool_size` at a time and
//! waits for them until a single deadline shared by the whole batch. Tasks
//! still running at the deadline are detached, not aborted: they run to
//! completion in the background and their results are dropped.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How one task in a batch ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task panicked; carries the panic message.
    Panicked(String),
    /// The task had not finished when the batch deadline passed.
    TimedOut,
}

impl<T> TaskOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, TaskOutcome::TimedOut)
    }
}

/// Run `tasks` with at most `pool_size` in flight, returning one outcome per
/// task in input order.
///
/// `timeout` bounds the whole batch, including time spent waiting for a
/// pool slot. A panic in one task is captured and does not affect others.
pub async fn run_bounded<T, F>(tasks: Vec<F>, pool_size: usize, timeout: Duration) -> Vec<TaskOutcome<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let total = tasks.len();
    let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
    if total == 0 {
        return Vec::new();
    }

    let permits = Arc::new(Semaphore::new(pool_size.max(1)));
    let mut join_set = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        join_set.spawn(async move {
            // The semaphore is never closed, so acquire cannot fail.
            let _permit = permits.acquire_owned().await.ok();
            let result = AssertUnwindSafe(task).catch_unwind().await;
            (index, result.map_err(panic_message))
        });
    }

    let deadline = Instant::now() + timeout;
    let mut remaining = total;

    while remaining > 0 {
        match tokio::time::timeout_at(deadline, join_set.join_next()).await {
            Ok(Some(Ok((index, Ok(value))))) => {
                outcomes[index] = Some(TaskOutcome::Completed(value));
                remaining -= 1;
            }
            Ok(Some(Ok((index, Err(message))))) => {
                warn!(index, panic = %message, "Task panicked");
                outcomes[index] = Some(TaskOutcome::Panicked(message));
                remaining -= 1;
            }
            Ok(Some(Err(join_error))) => {
                warn!(error = %join_error, "Task failed to join");
                remaining -= 1;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    pending = remaining,
                    timeout_secs = timeout.as_secs_f64(),
                    "Batch deadline reached, abandoning pending tasks"
                );
                join_set.detach_all();
                break;
            }
        }
    }

    debug!(total, finished = total - remaining, "Batch finished");

    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or(TaskOutcome::TimedOut))
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
