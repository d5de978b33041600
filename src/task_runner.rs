//! Periodic background-task driver.
//!
//! Each monitoring concern (status polling, reconciliation, account risk,
//! position risk) runs as an independent scheduled task. A failed iteration
//! is logged and retried after an exponential backoff; it never terminates
//! the loop. After repeated consecutive failures the task escalates to an
//! error-level log so a silently failing loop is visible.

use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, warn};

/// Escalate to error-level logging after this many consecutive failures.
const ESCALATE_AFTER_FAILURES: u32 = 5;

/// Scheduling policy for one background task.
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    /// Tick interval between iterations.
    pub interval: Duration,
    /// Backoff applied after a failed iteration, doubled per consecutive
    /// failure up to `max_backoff`.
    pub error_backoff: Duration,
    pub max_backoff: Duration,
}

impl TaskPolicy {
    pub fn every(interval: Duration) -> Self {
        TaskPolicy {
            interval,
            error_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Drive one iteration function forever on the policy's interval.
///
/// The returned future only completes if the surrounding task is aborted.
pub async fn run_periodic<F, Fut>(task_name: &str, policy: TaskPolicy, mut task_fn: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut ticker = interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures: u32 = 0;
    let mut backoff = policy.error_backoff;

    loop {
        ticker.tick().await;
        match task_fn().await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    warn!(
                        "task '{}' recovered after {} failure(s)",
                        task_name, consecutive_failures
                    );
                }
                consecutive_failures = 0;
                backoff = policy.error_backoff;
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= ESCALATE_AFTER_FAILURES {
                    error!(
                        "task '{}' failing persistently ({} consecutive): {}",
                        task_name, consecutive_failures, e
                    );
                } else {
                    warn!(
                        "task '{}' iteration failed ({} consecutive): {}",
                        task_name, consecutive_failures, e
                    );
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_survives_iteration_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let policy = TaskPolicy {
            interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        };

        let handle = tokio::spawn(async move {
            run_periodic("test_task", policy, || {
                let n = attempts_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Err("simulated failure".to_string())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        // alternating failures must not stop the loop
        assert!(attempts.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_loop_keeps_ticking_on_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let handle = tokio::spawn(async move {
            run_periodic(
                "ticking",
                TaskPolicy::every(Duration::from_millis(5)),
                || {
                    attempts_clone.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await;
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }
}
