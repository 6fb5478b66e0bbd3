//! Bounded, cancellable polling until a domain stops processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::DomainApi;

/// Backoff schedule for [`wait_until_ready`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    /// Delay after the first describe call that still reports processing.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Growth factor applied after every delay.
    pub multiplier: f64,
    /// Total time budget; `None` waits forever.
    pub max_elapsed: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
            multiplier: 1.5,
            max_elapsed: Some(Duration::from_secs(60 * 60)),
        }
    }
}

impl WaitPolicy {
    /// Constant `interval` between calls with no overall ceiling.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            max_elapsed: None,
        }
    }

    /// Delay to use after `current`. Growth that overflows `Duration` (or a
    /// non-finite multiplier) saturates at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        Duration::try_from_secs_f64(grown).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The domain finished processing.
    Ready {
        /// Endpoint reported by the final describe call.
        endpoint: Option<String>,
        /// Describe calls made.
        attempts: usize,
    },
    /// `max_elapsed` passed while the domain was still processing.
    TimedOut {
        /// Describe calls made.
        attempts: usize,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The caller cancelled the wait.
    Cancelled {
        /// Describe calls made.
        attempts: usize,
    },
}

/// Creates a linked cancellation handle and token.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(1);
    let flag = Arc::new(AtomicBool::new(false));
    (
        CancelHandle {
            tx,
            flag: Arc::clone(&flag),
        },
        CancelToken { rx, flag },
    )
}

/// Requests cancellation of waits observing the paired token.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<()>,
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancels the wait and wakes a sleeping waiter.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(());
    }
}

/// Observed by waits; doubles as an interruptible sleep.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        let (_handle, token) = cancel_pair();
        token
    }

    /// True once the paired handle cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `timeout`; returns true when cancelled before or during the sleep.
    pub fn sleep(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            // handle dropped without cancelling
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(timeout);
                self.is_cancelled()
            }
        }
    }
}

/// Re-describes `name` until it stops processing, the budget runs out or `cancel` fires.
/// Describe failures propagate immediately.
pub fn wait_until_ready(
    api: &dyn DomainApi,
    name: &str,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<WaitOutcome> {
    let started = Instant::now();
    let mut attempts = 0usize;
    let mut delay = policy.initial_delay;
    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled { attempts });
        }
        attempts += 1;
        let status = api
            .describe_domain(name)
            .with_context(|| format!("failed to describe domain {name} while waiting"))?;
        if !status.processing {
            return Ok(WaitOutcome::Ready {
                endpoint: status.reachable_endpoint().map(str::to_string),
                attempts,
            });
        }

        let elapsed = started.elapsed();
        let sleep_for = match policy.max_elapsed {
            Some(budget) if elapsed >= budget => {
                tracing::warn!(domain = name, attempts, ?elapsed, "gave up waiting for domain");
                return Ok(WaitOutcome::TimedOut { attempts, elapsed });
            }
            Some(budget) => delay.min(budget - elapsed),
            None => delay,
        };
        tracing::info!(
            domain = name,
            attempts,
            next_check_secs = sleep_for.as_secs(),
            "domain is still processing"
        );
        if cancel.sleep(sleep_for) {
            return Ok(WaitOutcome::Cancelled { attempts });
        }
        delay = policy.next_delay(delay);
    }
}
