//! Waitable completion notification.
//!
//! The driver signals the [`Notifier`] each time it finishes a request. The signal is level
//! triggered: it stays pending until [`Notifier::acknowledge`] consumes it, so a waiter that
//! drains requests after acknowledging can never miss one.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one completion is pending; carries the pending count.
    Ready(u64),
    /// The timeout elapsed with nothing pending.
    TimedOut,
    /// The subscription was removed while waiting.
    Closed,
}

#[derive(Default)]
struct NotifierState {
    pending: u64,
    next_token: u64,
    subscribers: HashSet<u64>,
}

#[derive(Default)]
struct NotifierInner {
    state: Mutex<NotifierState>,
    cond: Condvar,
}

#[derive(Clone, Default)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Driver side: record one completion and wake waiters.
    pub fn signal(&self) {
        let mut state = self.lock();
        state.pending += 1;
        self.inner.cond.notify_all();
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending > 0
    }

    /// Consume every pending completion, returning how many there were.
    pub fn acknowledge(&self) -> u64 {
        std::mem::take(&mut self.lock().pending)
    }

    /// Register a listener. Dropping the returned [`Subscription`] unregisters it.
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.subscribers.insert(token);
        Subscription {
            notifier: self.clone(),
            token,
        }
    }

    /// Remove a listener by token, waking it with [`WaitOutcome::Closed`] if it is waiting.
    /// Returns `false` if the token was not registered.
    pub fn unsubscribe(&self, token: u64) -> bool {
        let mut state = self.lock();
        let removed = state.subscribers.remove(&token);
        if removed {
            self.inner.cond.notify_all();
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn wait_for(&self, token: u64, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if !state.subscribers.contains(&token) {
                return WaitOutcome::Closed;
            }
            if state.pending > 0 {
                return WaitOutcome::Ready(state.pending);
            }
            state = match deadline {
                None => self.inner.cond.wait(state).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    let (guard, _) = self
                        .inner
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }
    }
}

/// A registered listener on a [`Notifier`].
pub struct Subscription {
    notifier: Notifier,
    token: u64,
}

impl Subscription {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn is_registered(&self) -> bool {
        self.notifier.lock().subscribers.contains(&self.token)
    }

    /// Block until a completion is pending, the timeout elapses or the subscription is removed.
    /// The pending count is not consumed.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.notifier.wait_for(self.token, timeout)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.token);
    }
}
