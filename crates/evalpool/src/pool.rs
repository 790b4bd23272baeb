//! Fixed-size pool of engine handles.
//!
//! Handles move between the pool and callers by value: [`EnginePool::acquire`]
//! hands out an [`EngineLease`] that owns the handle and gives it back on
//! drop, so a handle can be neither shared nor released twice. Waiters are
//! served strictly in arrival order.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ServiceConfig;
use crate::engine::{EngineHandle, EngineLauncher, HandleSettings, ProcessLauncher};
use crate::error::{EvalError, EvalResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Ready,
    /// No engine reached `ready`; acquire fails fast until re-initialized.
    Unavailable,
    ShutDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub capacity: usize,
    /// Handles that completed the handshake and have not died since.
    pub engines: usize,
    pub available: usize,
    pub waiting: usize,
}

struct Inner {
    state: PoolState,
    /// Bumped on every initialize/shutdown so leases from an older lifecycle
    /// are terminated instead of returned.
    generation: u64,
    engines: usize,
    available: VecDeque<EngineHandle>,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

pub struct EnginePool {
    capacity: usize,
    launcher: Arc<dyn EngineLauncher>,
    settings: HandleSettings,
    acquire_timeout: Duration,
    init_lock: Mutex<()>,
    inner: Mutex<Inner>,
    released: Condvar,
}

impl EnginePool {
    pub fn new(
        capacity: usize,
        launcher: Arc<dyn EngineLauncher>,
        settings: HandleSettings,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            capacity: capacity.max(1),
            launcher,
            settings,
            acquire_timeout,
            init_lock: Mutex::new(()),
            inner: Mutex::new(Inner {
                state: PoolState::Uninitialized,
                generation: 0,
                engines: 0,
                available: VecDeque::new(),
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Pool of real engine processes as described by `cfg`.
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self::new(
            cfg.pool.size,
            Arc::new(ProcessLauncher::from_config(&cfg.engine)),
            HandleSettings::from_config(&cfg.engine),
            cfg.pool.acquire_timeout(),
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start the engines unless this lifecycle already did. Returns
    /// [`is_available`](Self::is_available).
    ///
    /// Engine 0 is started first and doubles as the probe: if it fails, no
    /// other process is attempted and the pool stays unavailable until
    /// [`shutdown`](Self::shutdown) + `initialize` starts a new lifecycle.
    pub fn initialize(&self) -> bool {
        let _init = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.lock().state;
        match state {
            PoolState::Ready => return self.is_available(),
            PoolState::Unavailable => return false,
            PoolState::Uninitialized | PoolState::ShutDown => {}
        }

        let started = Instant::now();
        let probe = match self.start_handle(0) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("engine unavailable, local analysis disabled: {e}");
                let mut inner = self.lock();
                inner.state = PoolState::Unavailable;
                inner.generation += 1;
                drop(inner);
                self.released.notify_all();
                return false;
            }
        };

        let mut handles = vec![probe];
        thread::scope(|s| {
            let joins: Vec<_> = (1..self.capacity)
                .map(|id| (id, s.spawn(move || self.start_handle(id))))
                .collect();
            for (id, join) in joins {
                let result = join
                    .join()
                    .unwrap_or_else(|_| Err(EvalError::EngineExited(format!("engine-{id}"))));
                match result {
                    Ok(handle) => handles.push(handle),
                    Err(e) => log::warn!("engine-{id} discarded: {e}"),
                }
            }
        });

        let count = handles.len();
        let mut inner = self.lock();
        inner.state = PoolState::Ready;
        inner.generation += 1;
        inner.engines = count;
        inner.available = handles.into();
        drop(inner);
        self.released.notify_all();
        log::info!(
            "engine pool ready: {count}/{} engines in {:.1}s",
            self.capacity,
            started.elapsed().as_secs_f64()
        );
        true
    }

    /// Lazy entry point: initializes on first use, a state read afterwards.
    pub fn ensure_initialized(&self) -> bool {
        let state = self.lock().state;
        match state {
            PoolState::Ready => self.is_available(),
            PoolState::Unavailable | PoolState::ShutDown => false,
            PoolState::Uninitialized => self.initialize(),
        }
    }

    pub fn is_available(&self) -> bool {
        let inner = self.lock();
        inner.state == PoolState::Ready && inner.engines > 0
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.lock();
        PoolStatus {
            state: inner.state,
            capacity: self.capacity,
            engines: inner.engines,
            available: inner.available.len(),
            waiting: inner.waiters.len(),
        }
    }

    /// Wait (FIFO, up to the acquire timeout) for a free handle.
    pub fn acquire(&self) -> EvalResult<EngineLease<'_>> {
        let state = self.lock().state;
        if state == PoolState::Uninitialized {
            self.initialize();
        }
        let deadline = Instant::now() + self.acquire_timeout;
        let mut inner = self.lock();
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.waiters.push_back(ticket);

        loop {
            let refusal = match inner.state {
                PoolState::Ready => None,
                PoolState::ShutDown => Some(EvalError::PoolShutDown),
                PoolState::Unavailable | PoolState::Uninitialized => {
                    Some(EvalError::PoolUnavailable)
                }
            };
            if let Some(err) = refusal {
                inner.waiters.retain(|t| *t != ticket);
                return Err(err);
            }

            if inner.waiters.front() == Some(&ticket) {
                if let Some(handle) = inner.available.pop_front() {
                    inner.waiters.pop_front();
                    let generation = inner.generation;
                    drop(inner);
                    // 次の待ち手が先頭になったので起こす
                    self.released.notify_all();
                    return Ok(EngineLease {
                        pool: self,
                        handle: Some(handle),
                        generation,
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                inner.waiters.retain(|t| *t != ticket);
                drop(inner);
                self.released.notify_all();
                return Err(EvalError::AcquireTimeout(self.acquire_timeout));
            }
            inner = self
                .released
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Terminate every engine. Handles still checked out are terminated when
    /// their lease is dropped. Waiters fail with [`EvalError::PoolShutDown`].
    pub fn shutdown(&self) {
        let _init = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let handles: Vec<EngineHandle> = {
            let mut inner = self.lock();
            inner.state = PoolState::ShutDown;
            inner.generation += 1;
            inner.engines = 0;
            inner.available.drain(..).collect()
        };
        self.released.notify_all();

        let count = handles.len();
        thread::scope(|s| {
            for mut handle in handles {
                s.spawn(move || handle.terminate());
            }
        });
        log::info!("engine pool shut down ({count} idle engines terminated)");
    }

    fn release(&self, mut handle: EngineHandle, generation: u64) {
        let mut inner = self.lock();
        if inner.state != PoolState::Ready || inner.generation != generation {
            drop(inner);
            handle.terminate();
            return;
        }
        if !handle.is_alive() {
            // 死んだプロセスは再起動せずに退役させる
            inner.engines = inner.engines.saturating_sub(1);
            log::warn!(
                "{} exited; retired from pool ({} engines left)",
                handle.label(),
                inner.engines
            );
            if inner.engines == 0 {
                inner.state = PoolState::Unavailable;
                log::warn!("no live engines left, local analysis disabled");
            }
            drop(inner);
            self.released.notify_all();
            handle.terminate();
            return;
        }
        inner.available.push_back(handle);
        drop(inner);
        self.released.notify_all();
    }

    fn start_handle(&self, id: usize) -> EvalResult<EngineHandle> {
        let io = self.launcher.launch(&format!("engine-{id}"))?;
        EngineHandle::start(id, io, &self.settings)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EnginePool {
    fn drop(&mut self) {
        let state = self.lock().state;
        if state == PoolState::Ready {
            self.shutdown();
        }
    }
}

/// A checked-out handle. Returned to the pool when dropped.
pub struct EngineLease<'a> {
    pool: &'a EnginePool,
    handle: Option<EngineHandle>,
    generation: u64,
}

impl Deref for EngineLease<'_> {
    type Target = EngineHandle;

    fn deref(&self) -> &EngineHandle {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("lease handle is only taken on drop"),
        }
    }
}

impl DerefMut for EngineLease<'_> {
    fn deref_mut(&mut self) -> &mut EngineHandle {
        match &mut self.handle {
            Some(handle) => handle,
            None => unreachable!("lease handle is only taken on drop"),
        }
    }
}

impl Drop for EngineLease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle, self.generation);
        }
    }
}
