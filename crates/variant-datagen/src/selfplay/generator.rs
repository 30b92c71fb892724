use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use rand::Rng;
use rand::prelude::IndexedRandom;
use rand_chacha::ChaCha8Rng;

use super::book::load_book;
use super::types::{EngineSession, PositionRecord, ResultToken, SearchLimits};
use crate::rules::{RulesOracle, material_signature, side_to_move};

/// ジェネレータ設定。
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub variant: String,
    pub limits: SearchLimits,
    /// 開始局面ブック。None なら平手初期局面のみ。
    pub book: Option<PathBuf>,
}

/// 1局分のプレイアウト状態。
///
/// `fens[i]` は i+1 手目を指した後の局面、`hmvc[i]` はその局面での
/// マテリアル安定カウンタ（駒種集合が最後に変わってからのプライ数）。
pub struct Playout {
    pub start_fen: String,
    pub moves: Vec<String>,
    pub fens: Vec<String>,
    pub hmvc: Vec<u32>,
    last_change: usize,
}

impl Playout {
    pub fn new(start_fen: String) -> Self {
        Self {
            start_fen,
            moves: Vec::new(),
            fens: Vec::new(),
            hmvc: Vec::new(),
            last_change: 0,
        }
    }

    /// 1手進めて局面とカウンタを更新する。開始局面も比較対象に入るので、
    /// 初手の駒取りでもカウンタは 0 になる。
    pub fn push_move<R: RulesOracle>(
        &mut self,
        rules: &R,
        variant: &str,
        mv: String,
    ) -> Result<()> {
        self.moves.push(mv);
        let fen = rules.resulting_fen(variant, &self.start_fen, &self.moves)?;
        let prev = self.fens.last().map(String::as_str).unwrap_or(&self.start_fen);
        if material_signature(prev) != material_signature(&fen) {
            self.last_change = self.moves.len();
        }
        self.fens.push(fen);
        self.hmvc.push((self.moves.len() - self.last_change) as u32);
        Ok(())
    }

    pub fn final_fen(&self) -> &str {
        self.fens.last().map(String::as_str).unwrap_or(&self.start_fen)
    }
}

/// 自己対局レコードの無限遅延列。
///
/// 1回の [`GameGenerator::next_record`] はバッファ済みのレコードを1件返すか、
/// バッファが空なら次の1局を最後まで指してから先頭の1件を返す。結果トークン
/// は対局が終わるまで確定しないため、レコードは局単位でまとめて作られる。
pub struct GameGenerator<R: RulesOracle, S: EngineSession> {
    rules: R,
    engine: S,
    variant: String,
    limits: SearchLimits,
    book_path: Option<PathBuf>,
    /// 初回使用時に一度だけロードされる開始局面群。
    book: Option<Vec<String>>,
    rng: ChaCha8Rng,
    pending: VecDeque<PositionRecord>,
}

impl<R: RulesOracle, S: EngineSession> GameGenerator<R, S> {
    /// バリアント未対応と探索制限欠落はここで致命エラーにする。
    pub fn new(
        rules: R,
        mut engine: S,
        cfg: GeneratorConfig,
        rng: ChaCha8Rng,
    ) -> Result<Self> {
        cfg.limits.validate()?;
        if !rules.supports_variant(&cfg.variant) {
            bail!("unsupported variant: {}", cfg.variant);
        }
        engine.set_option("UCI_Variant", &cfg.variant)?;
        Ok(Self {
            rules,
            engine,
            variant: cfg.variant,
            limits: cfg.limits,
            book_path: cfg.book,
            book: None,
            rng,
            pending: VecDeque::new(),
        })
    }

    pub fn engine_mut(&mut self) -> &mut S {
        &mut self.engine
    }

    /// 次のレコードを返す。失敗はこの呼び出し限りで、次の呼び出しは
    /// 新しい対局から再開する。
    pub fn next_record(&mut self) -> Result<PositionRecord> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(record);
            }
            self.play_game()?;
        }
    }

    fn ensure_book(&mut self) -> Result<()> {
        if self.book.is_none() {
            let fens = match &self.book_path {
                Some(path) => load_book(path)?,
                None => vec![self.rules.starting_fen(&self.variant)?],
            };
            log::info!("{}: {} start position(s)", self.variant, fens.len());
            self.book = Some(fens);
        }
        Ok(())
    }

    /// 1局を最後まで指し、全レコードを `pending` に積む。
    fn play_game(&mut self) -> Result<()> {
        self.ensure_book()?;
        self.engine.new_game()?;
        let start_fen = {
            let book = self.book.as_deref().unwrap_or(&[]);
            book.choose(&mut self.rng)
                .cloned()
                .ok_or_else(|| anyhow!("empty opening book"))?
        };

        let mut playout = Playout::new(start_fen);
        let mut optional_score: Option<i32> = None;
        loop {
            let legal =
                self.rules.legal_moves(&self.variant, &playout.start_fen, &playout.moves)?;
            if legal.is_empty() {
                break;
            }
            if let Some(score) =
                self.rules.optional_end(&self.variant, &playout.start_fen, &playout.moves)?
            {
                optional_score = Some(score);
                break;
            }
            self.engine.set_position(&playout.start_fen, &playout.moves)?;
            let reply = self.engine.search(&self.limits)?;
            playout.push_move(&self.rules, &self.variant, reply.bestmove)?;
        }

        let pov_score = match optional_score {
            Some(score) => score,
            None => self.rules.result_score(&self.variant, &playout.start_fen, &playout.moves)?,
        };
        let final_fen = playout.final_fen();
        let stm = side_to_move(final_fen)
            .ok_or_else(|| anyhow!("malformed final FEN: {final_fen}"))?;
        let result = ResultToken::from_pov(pov_score, stm);
        let game_id = format!("{:032x}", self.rng.random::<u128>());

        if playout.fens.is_empty() {
            // 開始局面が既に終端: 指し手なしの1レコードだけの対局
            self.pending.push_back(PositionRecord {
                fen: playout.start_fen.clone(),
                variant: self.variant.clone(),
                best_move: None,
                hmvc: 0,
                result,
                game_id,
            });
            return Ok(());
        }

        // fens[i] には i+2 手目（その局面から指された手）が対応し、
        // 最終局面には番兵が入る。
        for (i, fen) in playout.fens.iter().enumerate() {
            self.pending.push_back(PositionRecord {
                fen: fen.clone(),
                variant: self.variant.clone(),
                best_move: playout.moves.get(i + 1).cloned(),
                hmvc: playout.hmvc[i],
                result,
                game_id: game_id.clone(),
            });
        }
        Ok(())
    }
}
