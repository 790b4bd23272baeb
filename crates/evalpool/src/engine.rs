//! External engine processes and the UCI exchange.
//!
//! The process itself is reached only through [`EngineIo`] ("write a line,
//! receive a line"), so tests can substitute a scripted fake for a real
//! binary. [`EngineHandle`] owns one such channel and knows the protocol.

use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::{EvalError, EvalResult};
use crate::types::{parse_move_token, Position, Score};

pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Line-oriented channel to one running engine.
pub trait EngineIo: Send {
    fn write_line(&mut self, msg: &str) -> io::Result<()>;

    /// `Timeout` when nothing arrived in time, `Disconnected` once the
    /// engine's output has closed for good.
    fn recv_line(&mut self, timeout: Duration) -> Result<String, RecvTimeoutError>;

    /// Ask the engine to quit, then force it after `grace`.
    fn terminate(&mut self, grace: Duration);
}

/// Starts engine channels. Shared by all pool initialization threads.
pub trait EngineLauncher: Send + Sync {
    fn launch(&self, label: &str) -> EvalResult<Box<dyn EngineIo>>;
}

/// [`EngineLauncher`] for a real binary.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub quit_timeout: Duration,
}

impl ProcessLauncher {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            args: cfg.args.clone(),
            quit_timeout: cfg.quit_timeout(),
        }
    }
}

impl EngineLauncher for ProcessLauncher {
    fn launch(&self, label: &str) -> EvalResult<Box<dyn EngineIo>> {
        let proc = EngineProcess::spawn(&self.path, &self.args, label, self.quit_timeout)?;
        Ok(Box::new(proc))
    }
}

/// 1本のエンジンに対する入出力をカプセル化する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    quit_timeout: Duration,
    terminated: bool,
}

impl EngineProcess {
    pub fn spawn(
        path: &Path,
        args: &[String],
        label: &str,
        quit_timeout: Duration,
    ) -> EvalResult<Self> {
        let spawn_err = |source: io::Error| EvalError::Spawn {
            path: path.display().to_string(),
            source,
        };
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(io::Error::other("no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(io::Error::other("no stdout")))?;

        let (tx, rx) = mpsc::channel::<String>();
        let reader = std::thread::Builder::new()
            .name(format!("{label}-stdout"))
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            if tx.send(l).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        if let Err(e) = reader {
            reap(&mut child);
            return Err(spawn_err(e));
        }

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            quit_timeout,
            terminated: false,
        })
    }
}

impl EngineIo for EngineProcess {
    fn write_line(&mut self, msg: &str) -> io::Result<()> {
        self.stdin.write_all(msg.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    fn recv_line(&mut self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn terminate(&mut self, grace: Duration) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let _ = self.write_line("quit");
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        reap(&mut self.child);
    }
}

/// Kill the child and collect its exit status so no zombie is left behind.
fn reap(child: &mut Child) -> Option<ExitStatus> {
    let _ = child.kill();
    child.wait().ok()
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate(self.quit_timeout);
    }
}

/// Protocol settings applied to every handle of a pool.
#[derive(Clone, Debug)]
pub struct HandleSettings {
    pub setoptions: Vec<(String, String)>,
    pub init_timeout: Duration,
    pub analysis_timeout: Duration,
    pub quit_timeout: Duration,
}

impl HandleSettings {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            setoptions: cfg.setoptions(),
            init_timeout: cfg.init_timeout(),
            analysis_timeout: cfg.analysis_timeout(),
            quit_timeout: cfg.quit_timeout(),
        }
    }
}

/// Parsed result of one `position` / `go` exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub depth: u32,
    pub score: Score,
    pub best_move: Option<String>,
}

/// A ready engine plus its protocol state. Never shared between two callers.
pub struct EngineHandle {
    id: usize,
    label: String,
    io: Box<dyn EngineIo>,
    opt_names: HashSet<String>,
    analysis_timeout: Duration,
    quit_timeout: Duration,
    /// The last search was abandoned; its `bestmove` may still be in flight.
    needs_resync: bool,
    exited: bool,
}

impl EngineHandle {
    /// Run the `uci` / `isready` handshake. The whole handshake shares one
    /// `init_timeout` budget.
    pub fn start(id: usize, io: Box<dyn EngineIo>, settings: &HandleSettings) -> EvalResult<Self> {
        let mut handle = Self {
            id,
            label: format!("engine-{id}"),
            io,
            opt_names: HashSet::new(),
            analysis_timeout: settings.analysis_timeout,
            quit_timeout: settings.quit_timeout,
            needs_resync: false,
            exited: false,
        };
        let deadline = Instant::now() + settings.init_timeout;
        let result = handle.handshake(settings, deadline);
        if let Err(err) = result {
            handle.terminate();
            return Err(match err {
                EvalError::AnalysisTimeout { label, .. } => EvalError::HandshakeTimeout {
                    label,
                    timeout: settings.init_timeout,
                },
                other => other,
            });
        }
        Ok(handle)
    }

    fn handshake(&mut self, settings: &HandleSettings, deadline: Instant) -> EvalResult<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_before(deadline)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line.trim_end() == "uciok" {
                break;
            }
        }
        for (name, value) in &settings.setoptions {
            self.set_option_if_available(name, value)?;
        }
        self.sync_ready(deadline)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once the engine's output closed, its stdin broke, or it failed
    /// to resync after an abandoned search.
    pub fn is_alive(&self) -> bool {
        !self.exited
    }

    /// Analyse `position` to `depth` plies.
    ///
    /// `info` lines are folded into a snapshot where later lines replace
    /// earlier ones; the snapshot at `bestmove` is the answer.
    pub fn analyse(&mut self, position: &Position, depth: u32) -> EvalResult<AnalysisOutcome> {
        if self.exited {
            return Err(EvalError::EngineExited(self.label.clone()));
        }
        let deadline = Instant::now() + self.analysis_timeout;
        self.drain();
        if self.needs_resync {
            // 前回打ち切った探索の bestmove を readyok まで読み捨てる
            self.write_line("stop")?;
            if let Err(e) = self.sync_ready(deadline) {
                // stop にも isready にも応答しないエンジンは使えない
                log::warn!("{}: engine unresponsive after abandoned search", self.label);
                self.exited = true;
                return Err(e);
            }
            self.needs_resync = false;
        }

        self.write_line(&format!("position fen {}", position.as_str()))?;
        self.write_line(&format!("go depth {}", depth.max(1)))?;

        let mut snapshot = InfoSnapshot::default();
        loop {
            let line = match self.recv_before(deadline) {
                Ok(line) => line,
                Err(err @ EvalError::AnalysisTimeout { .. }) => {
                    let _ = self.write_line("stop");
                    self.needs_resync = true;
                    log::debug!("{}: abandoned search for {position}", self.label);
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            if line.starts_with("info") {
                snapshot.update_from_line(&line);
                continue;
            }
            if let Some(rest) = line.strip_prefix("bestmove") {
                let mv = rest.split_whitespace().next().unwrap_or_default();
                return Ok(snapshot.into_outcome(mv));
            }
        }
    }

    /// Send `quit` and kill the process if it lingers.
    pub fn terminate(&mut self) {
        self.io.terminate(self.quit_timeout);
        self.exited = true;
    }

    fn sync_ready(&mut self, deadline: Instant) -> EvalResult<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_before(deadline)?;
            if line.trim_end() == "readyok" {
                return Ok(());
            }
        }
    }

    fn set_option_if_available(&mut self, name: &str, value: &str) -> EvalResult<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {name} value {value}"))?;
        }
        Ok(())
    }

    fn drain(&mut self) {
        while let Ok(line) = self.io.recv_line(Duration::ZERO) {
            log::trace!("{}: discarding stale line {line:?}", self.label);
        }
    }

    fn recv_before(&mut self, deadline: Instant) -> EvalResult<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.io.recv_line(remaining) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(EvalError::AnalysisTimeout {
                label: self.label.clone(),
                timeout: self.analysis_timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                self.exited = true;
                Err(EvalError::EngineExited(self.label.clone()))
            }
        }
    }

    fn write_line(&mut self, msg: &str) -> EvalResult<()> {
        self.io.write_line(msg).map_err(|e| {
            self.exited = true;
            EvalError::Io(e)
        })
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("needs_resync", &self.needs_resync)
            .field("exited", &self.exited)
            .finish()
    }
}

/// Latest search state reported by `info` lines.
#[derive(Default, Clone, Debug)]
pub struct InfoSnapshot {
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv_head: Option<String>,
}

impl InfoSnapshot {
    /// info 行を解析し、multipv=1 の情報を保持する。
    pub fn update_from_line(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return;
        }
        if tokens.get(1).copied() == Some("string") {
            return;
        }
        let multipv = tokens
            .windows(2)
            .find(|w| w[0] == "multipv")
            .and_then(|w| w[1].parse::<u32>().ok())
            .unwrap_or(1);
        if multipv != 1 {
            return;
        }
        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    if let Some(d) = tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok()) {
                        self.depth = Some(d);
                        i += 1;
                    }
                }
                "score" => {
                    if i + 2 < tokens.len() {
                        let value = tokens[i + 2].parse::<i32>().ok();
                        match (tokens[i + 1], value) {
                            ("cp", Some(cp)) => self.score = Some(Score::Centipawns(cp)),
                            ("mate", Some(n)) => self.score = Some(Score::Mate(n)),
                            _ => {}
                        }
                        i += 2;
                    }
                }
                "pv" => {
                    if let Some(mv) = tokens.get(i + 1) {
                        self.pv_head = parse_move_token(mv);
                    }
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// `bestmove` is the raw move token. The pv head stands in only when the
    /// token is missing; `(none)` / `0000` mean there is no legal move.
    pub fn into_outcome(self, bestmove: &str) -> AnalysisOutcome {
        let best_move = if bestmove.is_empty() {
            self.pv_head
        } else {
            parse_move_token(bestmove)
        };
        AnalysisOutcome {
            depth: self.depth.unwrap_or(0),
            score: self.score.unwrap_or(Score::Unanalyzed),
            best_move,
        }
    }
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}
