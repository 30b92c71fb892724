use std::fmt;

use anyhow::{Result, anyhow, bail};

/// 終端局面のレコードに入る「指し手なし」の番兵。
pub const NO_MOVE: &str = "none";

/// 探索制限。深さと持ち時間は少なくとも一方が必須（両方可、組み合わせ方は
/// エンジン定義）。
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchLimits {
    pub depth: Option<u32>,
    /// 1探索あたりの時間 (ms)
    pub movetime: Option<u64>,
}

impl SearchLimits {
    pub fn validate(&self) -> Result<()> {
        if self.depth.is_none() && self.movetime.is_none() {
            bail!("at least one of depth and movetime is required");
        }
        Ok(())
    }
}

/// `go` に対するエンジンの応答。
pub struct SearchReply {
    pub bestmove: String,
    /// 最後に報告された評価値（centipawn、手番側視点）。info行が
    /// 無ければ None。
    pub score: Option<i32>,
}

/// 1本のエンジンとのセッション。実装は [`crate::selfplay::engine::EngineProcess`]。
///
/// `shutdown` は冪等で、どの経路からでも安全に複数回呼べること。
pub trait EngineSession {
    fn set_option(&mut self, name: &str, value: &str) -> Result<()>;
    fn new_game(&mut self) -> Result<()>;
    fn set_position(&mut self, start_fen: &str, moves: &[String]) -> Result<()>;
    fn search(&mut self, limits: &SearchLimits) -> Result<SearchReply>;
    fn shutdown(&mut self);
}

/// 白視点の対局結果トークン。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultToken {
    WhiteWin,
    BlackWin,
    Draw,
}

impl ResultToken {
    /// 手番側視点のスコアを、最終局面の手番から白視点の結果に変換する。
    pub fn from_pov(pov_score: i32, side_to_move: char) -> Self {
        let white_score = if side_to_move == 'w' { pov_score } else { -pov_score };
        match white_score {
            s if s > 0 => ResultToken::WhiteWin,
            s if s < 0 => ResultToken::BlackWin,
            _ => ResultToken::Draw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultToken::WhiteWin => "1-0",
            ResultToken::BlackWin => "0-1",
            ResultToken::Draw => "1/2-1/2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1-0" => Some(ResultToken::WhiteWin),
            "0-1" => Some(ResultToken::BlackWin),
            "1/2-1/2" => Some(ResultToken::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for ResultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 自己対局で訪れた1局面のアノテーション付きレコード。
///
/// - `best_move`: この局面から実際に指された手。終端局面では `None`
///   （テキスト上は `none`）。
/// - `hmvc`: 駒種の多重集合が最後に変化してからのプライ数。
/// - `game_id`: 同一対局の全レコードで共通、対局間ではほぼ確実に異なる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionRecord {
    pub fen: String,
    pub variant: String,
    pub best_move: Option<String>,
    pub hmvc: u32,
    pub result: ResultToken,
    pub game_id: String,
}

impl PositionRecord {
    /// セミコロン区切りの1行EPD表現。
    pub fn epd_line(&self) -> String {
        format!(
            "{};variant {};bm {};hmvc {};result {};game {}",
            self.fen,
            self.variant,
            self.best_move.as_deref().unwrap_or(NO_MOVE),
            self.hmvc,
            self.result,
            self.game_id
        )
    }

    /// `epd_line` の逆変換。下流ツールとテストが使う。
    pub fn parse_epd_line(line: &str) -> Result<Self> {
        let mut tokens = line.trim().split(';');
        let fen = tokens
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| anyhow!("empty EPD line"))?
            .to_string();
        let mut variant = None;
        let mut best_move = None;
        let mut hmvc = None;
        let mut result = None;
        let mut game_id = None;
        for op in tokens {
            let Some((key, value)) = op.trim().split_once(' ') else {
                bail!("malformed EPD op: '{op}'");
            };
            match key {
                "variant" => variant = Some(value.to_string()),
                "bm" => {
                    best_move = Some(if value == NO_MOVE {
                        None
                    } else {
                        Some(value.to_string())
                    })
                }
                "hmvc" => {
                    hmvc = Some(value.parse::<u32>().map_err(|_| anyhow!("bad hmvc: {value}"))?)
                }
                "result" => {
                    result =
                        Some(ResultToken::parse(value).ok_or_else(|| anyhow!("bad result: {value}"))?)
                }
                "game" => game_id = Some(value.to_string()),
                _ => {} // 未知のopは読み飛ばす
            }
        }
        Ok(PositionRecord {
            fen,
            variant: variant.ok_or_else(|| anyhow!("missing variant op"))?,
            best_move: best_move.ok_or_else(|| anyhow!("missing bm op"))?,
            hmvc: hmvc.ok_or_else(|| anyhow!("missing hmvc op"))?,
            result: result.ok_or_else(|| anyhow!("missing result op"))?,
            game_id: game_id.ok_or_else(|| anyhow!("missing game op"))?,
        })
    }
}
