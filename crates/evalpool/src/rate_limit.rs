//! Rolling-window rate limiter for outbound calls.
//!
//! At most `max_per_window` calls are admitted in any `window`; each admission
//! frees its slot exactly `window` after it happened. Callers over the limit
//! queue up and are admitted in arrival order. The limiter never retries:
//! whatever the throttled closure returns goes straight back to the caller.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Window {
    /// Admission instants still inside the window, oldest first.
    admitted: VecDeque<Instant>,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    state: Mutex<Window>,
    changed: Condvar,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            state: Mutex::new(Window {
                admitted: VecDeque::new(),
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Admissions currently counted against the window.
    pub fn in_flight(&self) -> usize {
        let mut state = self.lock();
        self.expire(&mut state, Instant::now());
        state.admitted.len()
    }

    /// Run `f` once a slot is free, waiting as long as it takes.
    pub fn throttle<T>(&self, f: impl FnOnce() -> T) -> T {
        self.admit(None);
        f()
    }

    /// Like [`throttle`](Self::throttle) but gives up with `None` when no slot
    /// frees up within `max_wait`. An abandoned waiter leaves the queue
    /// without disturbing the others' order.
    pub fn throttle_within<T>(&self, max_wait: Duration, f: impl FnOnce() -> T) -> Option<T> {
        let deadline = Instant::now() + max_wait;
        self.admit(Some(deadline)).then(f)
    }

    /// Block until admitted (`true`) or `deadline` passes (`false`).
    fn admit(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            let now = Instant::now();
            self.expire(&mut state, now);
            let at_front = state.waiters.front() == Some(&ticket);
            if at_front && state.admitted.len() < self.max_per_window {
                state.waiters.pop_front();
                state.admitted.push_back(now);
                drop(state);
                self.changed.notify_all();
                return true;
            }
            if deadline.is_some_and(|d| now >= d) {
                state.waiters.retain(|t| *t != ticket);
                drop(state);
                self.changed.notify_all();
                return false;
            }

            // 先頭なら最古の枠が空く時刻まで、それ以外は先頭の入場を待つ
            let slot_frees = if at_front {
                state.admitted.front().map(|t| *t + self.window)
            } else {
                None
            };
            let wake = match (slot_frees, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            state = match wake {
                Some(at) => {
                    self.changed
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.changed.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn expire(&self, state: &mut Window, now: Instant) {
        while let Some(&t) = state.admitted.front() {
            if now.duration_since(t) >= self.window {
                state.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
