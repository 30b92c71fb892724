//! 自己対局によるEPDレコード生成。
//!
//! - [`engine`]: UCIエンジン子プロセスの管理
//! - [`generator`]: 1局を指してレコード列に変換するジェネレータ
//! - [`worker`] / [`pool`]: ワーカー単位の所有と並列オーケストレーション
//! - [`book`]: 開始局面ブックのロード
//! - [`types`]: レコード・探索制限などの共有型

pub mod book;
pub mod engine;
pub mod generator;
pub mod pool;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use book::load_book;
pub use engine::{EngineConfig, EngineProcess};
pub use generator::{GameGenerator, GeneratorConfig, Playout};
pub use pool::{RunSummary, run_pool};
pub use types::{
    EngineSession, NO_MOVE, PositionRecord, ResultToken, SearchLimits, SearchReply,
};
pub use worker::{Worker, WorkerConfig, worker_seed};
