//! Scripted stand-in for an engine process.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{EngineIo, EngineLauncher};
use crate::error::{EvalError, EvalResult};

#[derive(Clone, Debug)]
pub(crate) struct Script {
    /// Answer `uci` / `isready`.
    pub handshake: bool,
    /// Advertised `option name ...` entries.
    pub options: Vec<&'static str>,
    pub think: Duration,
    pub mate: Option<i32>,
    pub best_move: &'static str,
    /// The first N searches never answer until `stop`.
    pub hang_searches: usize,
    /// A hung search also ignores `stop` and `isready`.
    pub wedged: bool,
    pub crash_on_search: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            handshake: true,
            options: Vec::new(),
            think: Duration::ZERO,
            mate: None,
            best_move: "e2e4",
            hang_searches: 0,
            wedged: false,
            crash_on_search: false,
        }
    }
}

/// Observations shared by every scripted engine of one test.
#[derive(Default)]
pub(crate) struct Probe {
    writes: Mutex<Vec<String>>,
    busy: Mutex<HashSet<usize>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub overlap: AtomicBool,
    pub launches: AtomicUsize,
    pub searches: AtomicUsize,
    pub terminated: AtomicUsize,
}

impl Probe {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn enter(&self, engine: usize) {
        if !self.busy.lock().unwrap().insert(engine) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, engine: usize) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.busy.lock().unwrap().remove(&engine);
    }
}

pub(crate) struct ScriptedIo {
    engine: usize,
    script: Script,
    probe: Arc<Probe>,
    pending: VecDeque<String>,
    searches: usize,
    hung: bool,
    closed: bool,
}

impl ScriptedIo {
    pub fn new(engine: usize, script: Script, probe: Arc<Probe>) -> Self {
        Self {
            engine,
            script,
            probe,
            pending: VecDeque::new(),
            searches: 0,
            hung: false,
            closed: false,
        }
    }

    fn answer_search(&mut self, depth: u32) {
        self.probe.enter(self.engine);
        std::thread::sleep(self.script.think);
        self.probe.leave(self.engine);
        let score = match self.script.mate {
            Some(n) => format!("mate {n}"),
            None => "cp 35".to_string(),
        };
        self.pending.push_back("info depth 1 score cp 10 pv a2a3".to_string());
        self.pending.push_back("info string scripted engine".to_string());
        self.pending.push_back(format!(
            "info depth {depth} seldepth {} score {score} nodes 4242 pv {}",
            depth + 2,
            self.script.best_move
        ));
        self.pending.push_back(format!("bestmove {}", self.script.best_move));
    }
}

impl EngineIo for ScriptedIo {
    fn write_line(&mut self, msg: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.probe.writes.lock().unwrap().push(msg.to_string());
        let mut tokens = msg.split_whitespace();
        let command = tokens.next();
        if self.hung && self.script.wedged && command != Some("quit") {
            return Ok(());
        }
        match command {
            Some("uci") if self.script.handshake => {
                self.pending.push_back("id name Scripted".to_string());
                for name in &self.script.options {
                    self.pending.push_back(format!("option name {name} type string default"));
                }
                self.pending.push_back("uciok".to_string());
            }
            Some("isready") if self.script.handshake => {
                self.pending.push_back("readyok".to_string());
            }
            Some("go") => {
                self.searches += 1;
                self.probe.searches.fetch_add(1, Ordering::SeqCst);
                if self.script.crash_on_search {
                    self.closed = true;
                } else if self.searches <= self.script.hang_searches {
                    self.hung = true;
                } else {
                    let depth = tokens.nth(1).and_then(|d| d.parse().ok()).unwrap_or(1);
                    self.answer_search(depth);
                }
            }
            Some("stop") if self.hung => {
                self.hung = false;
                self.pending.push_back("bestmove a2a3".to_string());
            }
            Some("quit") => self.closed = true,
            _ => {}
        }
        Ok(())
    }

    fn recv_line(&mut self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(line);
        }
        if self.closed {
            return Err(RecvTimeoutError::Disconnected);
        }
        std::thread::sleep(timeout);
        Err(RecvTimeoutError::Timeout)
    }

    fn terminate(&mut self, _grace: Duration) {
        self.closed = true;
        self.probe.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Launches [`ScriptedIo`]s; launches with index >= `fail_from` fail to spawn.
pub(crate) struct ScriptedLauncher {
    pub script: Script,
    pub probe: Arc<Probe>,
    pub fail_from: Option<usize>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            probe: Arc::new(Probe::default()),
            fail_from: None,
        }
    }

    pub fn missing_binary() -> Self {
        Self {
            fail_from: Some(0),
            ..Self::new(Script::default())
        }
    }
}

impl EngineLauncher for ScriptedLauncher {
    fn launch(&self, _label: &str) -> EvalResult<Box<dyn EngineIo>> {
        let index = self.probe.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_from.is_some_and(|n| index >= n) {
            return Err(EvalError::Spawn {
                path: "scripted-engine".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(Box::new(ScriptedIo::new(index, self.script.clone(), self.probe.clone())))
    }
}
