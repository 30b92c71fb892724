use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::engine::{EngineConfig, EngineProcess};
use super::generator::{GameGenerator, GeneratorConfig};
use super::types::{EngineSession, PositionRecord, SearchLimits};
use crate::rules::RulesOracle;

/// ワーカー1体の生成に必要な設定一式。
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub engine: EngineConfig,
    pub variant: String,
    pub limits: SearchLimits,
    pub book: Option<PathBuf>,
}

impl WorkerConfig {
    fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            variant: self.variant.clone(),
            limits: self.limits,
            book: self.book.clone(),
        }
    }
}

/// エンジンセッション1本とジェネレータ1本を所有するワーカー。
///
/// エンジンの回収はセッションの drop でも保証されるが、スレッド終了前に
/// [`Worker::shutdown`] で明示的に2段階終了させるのが行儀。
pub struct Worker<R: RulesOracle, S: EngineSession> {
    pub id: usize,
    generator: GameGenerator<R, S>,
}

impl<R: RulesOracle, S: EngineSession> Worker<R, S> {
    pub fn new(id: usize, rules: R, engine: S, cfg: GeneratorConfig) -> Result<Self> {
        let rng = ChaCha8Rng::seed_from_u64(worker_seed(id));
        let generator = GameGenerator::new(rules, engine, cfg, rng)?;
        Ok(Self { id, generator })
    }

    /// レコードを1件取り出す。失敗はこの1件分の回復可能エラー。
    pub fn pull(&mut self) -> Result<PositionRecord> {
        self.generator.next_record()
    }

    pub fn shutdown(&mut self) {
        self.generator.engine_mut().shutdown();
    }
}

impl<R: RulesOracle> Worker<R, EngineProcess> {
    /// エンジン子プロセスを起動してワーカーを組み立てる。
    pub fn spawn(id: usize, rules: R, cfg: &WorkerConfig) -> Result<Self> {
        let engine = EngineProcess::spawn(&cfg.engine, format!("worker-{id}"))?;
        Self::new(id, rules, engine, cfg.generator_config())
    }
}

/// ワーカーごとの乱数シード。並列ワーカーが同じ対局を再生しないよう、
/// プロセスID・壁時計・ワーカー番号を混ぜる。
pub fn worker_seed(worker_id: usize) -> u64 {
    let pid = u64::from(std::process::id());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    pid ^ nanos.rotate_left(17) ^ (worker_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
