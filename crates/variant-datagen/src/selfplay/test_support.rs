//! テスト用の決定的スタブ（ルールオラクルと台本エンジン）。

use anyhow::{Result, bail};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::generator::GeneratorConfig;
use super::types::{EngineSession, SearchLimits, SearchReply};
use crate::rules::RulesOracle;

pub fn test_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

pub fn stub_config() -> GeneratorConfig {
    GeneratorConfig {
        variant: "stub".to_string(),
        limits: SearchLimits { depth: Some(1), movetime: None },
        book: None,
    }
}

/// 固定手数で終局する決定的オラクル。盤面は `Kk`、`capture_at` 以降は
/// `K`（駒種集合の変化を起こす）。手番は開始局面が白で交互。
#[derive(Clone, Copy, Debug)]
pub struct StubRules {
    plies_per_game: usize,
    capture_at: Option<usize>,
    optional_end_at: Option<(usize, i32)>,
}

impl StubRules {
    pub fn new(plies_per_game: usize) -> Self {
        Self {
            plies_per_game,
            capture_at: None,
            optional_end_at: None,
        }
    }

    pub fn with_capture_at(mut self, ply: usize) -> Self {
        self.capture_at = Some(ply);
        self
    }

    pub fn with_optional_end(mut self, ply: usize, pov_score: i32) -> Self {
        self.optional_end_at = Some((ply, pov_score));
        self
    }

    fn fen_after(&self, plies: usize) -> String {
        let board = match self.capture_at {
            Some(c) if plies >= c => "K",
            _ => "Kk",
        };
        let stm = if plies % 2 == 0 { 'w' } else { 'b' };
        format!("{board}{plies} {stm} - - 0 1")
    }
}

impl RulesOracle for StubRules {
    fn supports_variant(&self, variant: &str) -> bool {
        variant == "stub"
    }

    fn starting_fen(&self, _variant: &str) -> Result<String> {
        Ok(self.fen_after(0))
    }

    fn legal_moves(
        &self,
        _variant: &str,
        _start_fen: &str,
        moves: &[String],
    ) -> Result<Vec<String>> {
        if moves.len() >= self.plies_per_game {
            Ok(Vec::new())
        } else {
            Ok(vec![format!("m{}", moves.len() + 1)])
        }
    }

    fn optional_end(
        &self,
        _variant: &str,
        _start_fen: &str,
        moves: &[String],
    ) -> Result<Option<i32>> {
        match self.optional_end_at {
            Some((ply, score)) if moves.len() >= ply => Ok(Some(score)),
            _ => Ok(None),
        }
    }

    fn result_score(&self, _variant: &str, _start_fen: &str, _moves: &[String]) -> Result<i32> {
        Ok(0)
    }

    fn resulting_fen(&self, _variant: &str, _start_fen: &str, moves: &[String]) -> Result<String> {
        Ok(self.fen_after(moves.len()))
    }
}

/// 台本どおりに指すエンジン。`set_position` で渡された手数から次の
/// 指し手名を決める。`fail_at` 番目の `search` 呼び出しだけ失敗させられる。
pub struct ScriptedEngine {
    moves_seen: usize,
    calls: u64,
    fail_at: Option<u64>,
    pub shutdown_calls: u32,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            moves_seen: 0,
            calls: 0,
            fail_at: None,
            shutdown_calls: 0,
        }
    }

    pub fn with_failure_on_call(mut self, call: u64) -> Self {
        self.fail_at = Some(call);
        self
    }
}

impl EngineSession for ScriptedEngine {
    fn set_option(&mut self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn new_game(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_position(&mut self, _start_fen: &str, moves: &[String]) -> Result<()> {
        self.moves_seen = moves.len();
        Ok(())
    }

    fn search(&mut self, _limits: &SearchLimits) -> Result<SearchReply> {
        self.calls += 1;
        if self.fail_at == Some(self.calls) {
            bail!("scripted engine failure on call {}", self.calls);
        }
        Ok(SearchReply {
            bestmove: format!("m{}", self.moves_seen + 1),
            score: Some(0),
        })
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
    }
}
