//! チェスバリアント用の自己対局データ生成ツール群。
//!
//! UCIエンジンを子プロセスとして起動し、自己対局で訪れた全局面を
//! アノテーション付きEPDレコードとして書き出す。下流の統計ツール
//! （終盤分類・駒価値回帰）がこの出力を読む。

pub mod common;
pub mod rules;
pub mod selfplay;
