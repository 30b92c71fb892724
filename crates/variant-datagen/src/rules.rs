//! ルールオラクル: バリアントの合法手・終局判定・局面導出への問い合わせ窓口。
//!
//! 生成側はこの trait 経由でのみルールに触れる。ルール自体はここでは
//! 実装せず、標準チェスと shakmaty 組み込みバリアントは [`StandardRules`]
//! が shakmaty に委譲する。

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::variant::{Variant, VariantPosition};
use shakmaty::{CastlingMode, EnPassantMode, Outcome, Position};

/// バリアントのルールに関する問い合わせ。
///
/// スコアはすべて手番側視点（point of view）。符号のみが意味を持つ:
/// 正 = 手番側の勝ち、負 = 手番側の負け、0 = 引き分け。
pub trait RulesOracle {
    fn supports_variant(&self, variant: &str) -> bool;

    /// バリアントの平手初期局面。
    fn starting_fen(&self, variant: &str) -> Result<String>;

    /// `start_fen` から `moves` を進めた局面の合法手（UCI表記）。
    fn legal_moves(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<Vec<String>>;

    /// 任意終局（宣言可能な引き分け等）なら `Some(手番側スコア)`。
    fn optional_end(&self, variant: &str, start_fen: &str, moves: &[String])
    -> Result<Option<i32>>;

    /// 合法手が尽きた局面の結果スコア（手番側視点）。
    fn result_score(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<i32>;

    /// `start_fen` から `moves` を進めた局面のFEN文字列。
    fn resulting_fen(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<String>;
}

static PIECE_RE: OnceLock<Regex> = OnceLock::new();

/// FENの盤面部から駒文字の多重集合（ソート済み）を取り出す。
///
/// 成駒を `+` 接頭辞で書くバリアントでは `+R` のように接頭辞ごと
/// 1つの駒として数える。この集合が変化した手でマテリアル安定カウンタが
/// 0 に戻る。
pub fn material_signature(fen: &str) -> Vec<String> {
    let board = fen.split_whitespace().next().unwrap_or("");
    let re = PIECE_RE.get_or_init(|| Regex::new(r"\+?[A-Za-z]").expect("valid piece regex"));
    let mut pieces: Vec<String> = re.find_iter(board).map(|m| m.as_str().to_string()).collect();
    pieces.sort();
    pieces
}

/// FENの手番フィールド（2番目）を返す。`'w'` か `'b'`。
pub fn side_to_move(fen: &str) -> Option<char> {
    fen.split_whitespace().nth(1).and_then(|f| f.chars().next())
}

/// shakmaty に委譲するルールオラクル。
///
/// 任意終局は宣言可能な引き分けのみ: 50手ルール（ハーフムーブクロック
/// 100以上）と3回同形反復。どちらもスコアは 0。
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardRules;

impl StandardRules {
    pub fn new() -> Self {
        StandardRules
    }

    fn parse_variant(&self, variant: &str) -> Result<Variant> {
        variant_from_name(variant).ok_or_else(|| anyhow!("unsupported variant: {variant}"))
    }

    fn setup(&self, variant: &str, start_fen: &str) -> Result<VariantPosition> {
        let v = self.parse_variant(variant)?;
        let fen: Fen = start_fen
            .parse()
            .with_context(|| format!("invalid start position FEN: {start_fen}"))?;
        VariantPosition::from_setup(v, fen.into_setup(), CastlingMode::Standard)
            .map_err(|e| anyhow!("illegal start position '{start_fen}': {e}"))
    }

    fn replay(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<VariantPosition> {
        let mut pos = self.setup(variant, start_fen)?;
        for mv_str in moves {
            pos = play_one(pos, mv_str)?;
        }
        Ok(pos)
    }
}

fn variant_from_name(name: &str) -> Option<Variant> {
    match name {
        // Fairy-Stockfish 系の表記ゆれを吸収
        "chess" | "standard" => Some(Variant::Chess),
        _ => Variant::from_ascii(name.as_bytes()).ok(),
    }
}

fn play_one(pos: VariantPosition, mv_str: &str) -> Result<VariantPosition> {
    let uci: UciMove =
        mv_str.parse().map_err(|_| anyhow!("unparseable move: {mv_str}"))?;
    let mv = uci.to_move(&pos).map_err(|_| anyhow!("illegal move: {mv_str}"))?;
    let mut pos = pos;
    pos.play_unchecked(&mv);
    Ok(pos)
}

/// 反復判定用キー: FENの盤面・手番・キャスリング権・EPの4フィールド。
fn repetition_key(pos: &VariantPosition) -> String {
    let fen = Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string();
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

impl RulesOracle for StandardRules {
    fn supports_variant(&self, variant: &str) -> bool {
        variant_from_name(variant).is_some()
    }

    fn starting_fen(&self, variant: &str) -> Result<String> {
        let v = self.parse_variant(variant)?;
        let pos = VariantPosition::new(v);
        Ok(Fen::from_position(pos, EnPassantMode::Legal).to_string())
    }

    fn legal_moves(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<Vec<String>> {
        let pos = self.replay(variant, start_fen, moves)?;
        Ok(pos
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect())
    }

    fn optional_end(
        &self,
        variant: &str,
        start_fen: &str,
        moves: &[String],
    ) -> Result<Option<i32>> {
        let mut pos = self.setup(variant, start_fen)?;
        let mut seen: HashMap<String, u32> = HashMap::new();
        seen.insert(repetition_key(&pos), 1);
        for mv_str in moves {
            pos = play_one(pos, mv_str)?;
            *seen.entry(repetition_key(&pos)).or_insert(0) += 1;
        }
        if pos.halfmoves() >= 100 {
            return Ok(Some(0));
        }
        if seen.get(&repetition_key(&pos)).copied().unwrap_or(0) >= 3 {
            return Ok(Some(0));
        }
        Ok(None)
    }

    fn result_score(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<i32> {
        let pos = self.replay(variant, start_fen, moves)?;
        Ok(match pos.outcome() {
            Some(Outcome::Decisive { winner }) => {
                if winner == pos.turn() {
                    1
                } else {
                    -1
                }
            }
            Some(Outcome::Draw) | None => 0,
        })
    }

    fn resulting_fen(&self, variant: &str, start_fen: &str, moves: &[String]) -> Result<String> {
        let pos = self.replay(variant, start_fen, moves)?;
        Ok(Fen::from_position(pos, EnPassantMode::Legal).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn moves(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn material_signature_sorts_piece_letters() {
        let sig = material_signature("8/8/8/8/8/5k2/r7/5K2 w - - 0 60");
        assert_eq!(sig, vec!["K", "k", "r"]);

        // 成駒は接頭辞ごと1駒
        let sig = material_signature("+Rk2K w - - 0 1");
        assert_eq!(sig, vec!["+R", "K", "k"]);

        // 盤面以外のフィールドの文字は数えない
        let full = material_signature(STARTPOS);
        assert_eq!(full.len(), 32);
    }

    #[test]
    fn side_to_move_reads_second_field() {
        assert_eq!(side_to_move(STARTPOS), Some('w'));
        assert_eq!(side_to_move("8/8/8/8/8/5k2/r7/5K2 b - - 0 60"), Some('b'));
        assert_eq!(side_to_move(""), None);
    }

    #[test]
    fn supports_known_variants() {
        let rules = StandardRules::new();
        assert!(rules.supports_variant("chess"));
        assert!(rules.supports_variant("standard"));
        assert!(!rules.supports_variant("klingon"));
    }

    #[test]
    fn starting_position_has_twenty_moves() {
        let rules = StandardRules::new();
        let start = rules.starting_fen("chess").unwrap();
        let legal = rules.legal_moves("chess", &start, &[]).unwrap();
        assert_eq!(legal.len(), 20);
    }

    #[test]
    fn fools_mate_is_a_black_win_from_whites_pov() {
        let rules = StandardRules::new();
        let start = rules.starting_fen("chess").unwrap();
        let mate = moves(&["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert!(rules.legal_moves("chess", &start, &mate).unwrap().is_empty());
        // 手番（白）がメイトされている
        assert_eq!(rules.result_score("chess", &start, &mate).unwrap(), -1);
        let fen = rules.resulting_fen("chess", &start, &mate).unwrap();
        assert_eq!(side_to_move(&fen), Some('w'));
    }

    #[test]
    fn fifty_move_clock_is_an_optional_end() {
        let rules = StandardRules::new();
        let fen = "8/8/8/8/8/5k2/r7/5K2 w - - 100 80";
        assert_eq!(rules.optional_end("chess", fen, &[]).unwrap(), Some(0));
        let fresh = "8/8/8/8/8/5k2/r7/5K2 w - - 3 80";
        assert_eq!(rules.optional_end("chess", fresh, &[]).unwrap(), None);
    }

    #[test]
    fn threefold_repetition_is_an_optional_end() {
        let rules = StandardRules::new();
        let start = rules.starting_fen("chess").unwrap();
        let shuffle = moves(&[
            "g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8",
        ]);
        assert_eq!(rules.optional_end("chess", &start, &shuffle).unwrap(), Some(0));
        assert_eq!(
            rules.optional_end("chess", &start, &shuffle[..4]).unwrap(),
            None
        );
    }

    #[test]
    fn illegal_replay_move_is_rejected() {
        let rules = StandardRules::new();
        let start = rules.starting_fen("chess").unwrap();
        assert!(rules.resulting_fen("chess", &start, &moves(&["e2e5"])).is_err());
    }
}
