use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};

use super::types::{EngineSession, SearchLimits, SearchReply};

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// movetime 指定がない（深さのみの）探索に対する読み取り上限。
pub const ENGINE_SEARCH_TIMEOUT: Duration = Duration::from_secs(600);
/// movetime 指定時、bestmove 到着までに上乗せして待つ余裕。
pub const SEARCH_TIMEOUT_MARGIN_MS: u64 = 10_000;
/// quit 送信後、強制killまでの猶予。
pub const ENGINE_QUIT_GRACE: Duration = Duration::from_secs(3);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// 追加のUCIオプション (Name=Value 形式)
    pub uci_options: Vec<String>,
}

/// 1本のUCIエンジンに対する入出力をカプセル化する。
///
/// drop 時（または明示的な [`EngineProcess::shutdown`]）に quit → 猶予付き
/// wait → kill の2段階で子プロセスを必ず回収する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    pub label: String,
    finished: bool,
}

impl EngineProcess {
    pub fn spawn(cfg: &EngineConfig, label: String) -> Result<Self> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to spawn engine at {}: {e}", cfg.path.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
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

        let mut proc = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            label,
            finished: false,
        };
        proc.initialize(cfg)?;
        Ok(proc)
    }

    fn initialize(&mut self, cfg: &EngineConfig) -> Result<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line == "uciok" {
                break;
            }
        }
        for opt in &cfg.uci_options {
            if let Some((name, value)) = opt.split_once('=') {
                self.set_option_if_available(name.trim(), value.trim())?;
            } else {
                // "=" がない場合はオプション名のみとみなし、値なしで送る
                self.write_line(&format!("setoption name {}", opt.trim()))?;
            }
        }
        self.sync_ready()?;
        self.write_line("ucinewgame")?;
        Ok(())
    }

    pub fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if line == "readyok" {
                break;
            }
        }
        Ok(())
    }

    pub fn recv_line(&self, timeout: Duration) -> Result<String> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("{}: engine read timeout", self.label))
    }

    pub fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {} value {}", name, value))?;
        }
        Ok(())
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        self.stdin.write_all(msg.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn reap_two_phase(&mut self) {
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl EngineSession for EngineProcess {
    fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.set_option_if_available(name, value)
    }

    fn new_game(&mut self) -> Result<()> {
        self.write_line("ucinewgame")?;
        self.sync_ready()
    }

    fn set_position(&mut self, start_fen: &str, moves: &[String]) -> Result<()> {
        if moves.is_empty() {
            self.write_line(&format!("position fen {start_fen}"))
        } else {
            self.write_line(&format!("position fen {start_fen} moves {}", moves.join(" ")))
        }
    }

    fn search(&mut self, limits: &SearchLimits) -> Result<SearchReply> {
        self.write_line(&go_command(limits))?;

        let start = Instant::now();
        let deadline = limits
            .movetime
            .map(|t| Duration::from_millis(t.saturating_add(SEARCH_TIMEOUT_MARGIN_MS)))
            .unwrap_or(ENGINE_SEARCH_TIMEOUT);
        let mut score: Option<i32> = None;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                bail!("{}: engine search timeout", self.label);
            }
            match self.rx.recv_timeout(deadline - elapsed) {
                Ok(line) => {
                    if line.starts_with("info") {
                        if let Some(s) = parse_info_score(&line) {
                            score = Some(s);
                        }
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix("bestmove ") {
                        let mv = rest.split_whitespace().next().unwrap_or_default();
                        if mv.is_empty() || mv == "(none)" {
                            bail!("{}: engine returned no best move", self.label);
                        }
                        return Ok(SearchReply { bestmove: mv.to_string(), score });
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    bail!("{}: engine search timeout", self.label);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("{}: engine exited unexpectedly", self.label);
                }
            }
        }
    }

    fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.reap_two_phase();
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn go_command(limits: &SearchLimits) -> String {
    let mut cmd = String::from("go");
    if let Some(depth) = limits.depth {
        cmd.push_str(&format!(" depth {depth}"));
    }
    if let Some(movetime) = limits.movetime {
        cmd.push_str(&format!(" movetime {movetime}"));
    }
    cmd
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.peek() {
                if *next == "type" {
                    break;
                }
                parts.push(tokens.next().unwrap().to_string());
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

/// info行から multipv=1 の score を読む。mate は符号だけ残す。
fn parse_info_score(line: &str) -> Option<i32> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "multipv" => {
                if tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok()).unwrap_or(1) != 1 {
                    return None;
                }
                i += 1;
            }
            "score" => {
                return match (tokens.get(i + 1), tokens.get(i + 2)) {
                    (Some(&"cp"), Some(v)) => v.parse::<i32>().ok(),
                    (Some(&"mate"), Some(v)) => {
                        let plies = v.parse::<i32>().ok()?;
                        Some(if plies >= 0 { 32_000 } else { -32_000 })
                    }
                    _ => None,
                };
            }
            _ => {}
        }
        i += 1;
    }
    None
}
