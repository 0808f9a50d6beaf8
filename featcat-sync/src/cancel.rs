//! Cooperative cancellation for blocking remote calls.
//!
//! A [`CancelToken`] is a cloneable handle; all clones observe the same
//! signal. Cancellation fires either explicitly through [`CancelToken::cancel`]
//! or implicitly when an optional deadline passes.
//!
//! The signal is a `crossbeam-channel` whose only sender is dropped on
//! cancel, so every blocked `recv_timeout` wakes at once.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;

/// The operation was cancelled or ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug)]
struct Inner {
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token without a deadline.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A token that cancels itself `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (tx, rx) = bounded(0);
        CancelToken {
            inner: Arc::new(Inner {
                trigger: Mutex::new(Some(tx)),
                signal: rx,
                deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.deadline_passed() {
            return true;
        }
        matches!(self.inner.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time left before the deadline; `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    fn deadline_passed(&self) -> bool {
        self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleep for `duration`, returning early with `Err(Cancelled)` if the
    /// token fires first. A deadline inside the sleep window also cancels.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.check()?;
        let (wait, hits_deadline) = match self.remaining() {
            Some(left) if left <= duration => (left, true),
            _ => (duration, false),
        };
        match self.inner.signal.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) if !hits_deadline => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(Cancelled),
            Err(RecvTimeoutError::Disconnected) => Err(Cancelled),
            // Nothing ever sends on the channel.
            Ok(()) => Ok(()),
        }
    }
}
