//! ワーカープールのオーケストレーション。
//!
//! crossbeam-channel のワーカーモデルで「レコードを1件引く」タスクを
//! W体のワーカーに分配し、完了順に集約する。出力順は保証しないが、
//! 試行回数は成功・失敗を問わず要求数にちょうど一致する。

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use crossbeam_channel as chan;

use super::types::{EngineSession, PositionRecord};
use super::worker::Worker;
use crate::rules::RulesOracle;

/// 1回の生成ランの集計。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: u64,
    /// 出力されたレコード数
    pub produced: u64,
    /// 失敗した試行数（起動に失敗したワーカーの割当分も含む）
    pub failed: u64,
    /// エンジン起動に失敗したワーカー数（タスク失敗とは別建て）
    pub launch_failures: u64,
}

impl RunSummary {
    fn new(requested: u64) -> Self {
        Self { requested, ..Self::default() }
    }
}

/// 要求総数をワーカー数で分割する。先頭 `total % workers` 体が1件多い。
/// 割当は固定で、実行中の再配分はしない。
pub fn quota(total: u64, workers: usize, index: usize) -> u64 {
    let w = workers as u64;
    total / w + u64::from((index as u64) < total % w)
}

enum WorkerEvent {
    Record { record: PositionRecord },
    PullFailed { worker: usize, error: String },
    LaunchFailed { worker: usize, quota: u64, error: String },
}

/// N件の「1件引く」試行をW体のワーカーで実行し、レコードを完了順に
/// `on_record` へ流す。`on_attempt` は成功・失敗を問わず試行ごとに
/// ちょうど1回呼ばれる。
///
/// - W = 1: プールなし。呼び出し元スレッドでワーカーを直接駆動する。
/// - W > 1: ワーカーごとに長命スレッドを1本立て、それぞれが自分の
///   エンジン子プロセスを起動して固定割当分を処理する。
///
/// 個々の失敗はランを止めない。ワーカーの起動失敗はタスク失敗と
/// 区別して数え、その割当分は失敗試行として進捗に計上する。エラーを
/// 返すのはレコードが1件も作れなかったときだけで、部分結果は常に
/// 先に `on_record` へ渡り終えている。
pub fn run_pool<R, S, F>(
    count: u64,
    workers: usize,
    make_worker: F,
    on_record: &mut dyn FnMut(PositionRecord),
    on_attempt: &mut dyn FnMut(),
    shutdown: &AtomicBool,
) -> Result<RunSummary>
where
    R: RulesOracle + Send,
    S: EngineSession + Send,
    F: Fn(usize) -> Result<Worker<R, S>> + Sync,
{
    if workers == 0 {
        bail!("worker count must be at least 1");
    }
    if workers == 1 {
        return run_single(count, &make_worker, on_record, on_attempt, shutdown);
    }

    let mut summary = RunSummary::new(count);
    let (tx, rx) = chan::bounded::<WorkerEvent>(workers);

    std::thread::scope(|scope| {
        for index in 0..workers {
            let tx = tx.clone();
            let make_worker = &make_worker;
            let assigned = quota(count, workers, index);
            scope.spawn(move || {
                let mut worker = match make_worker(index) {
                    Ok(worker) => worker,
                    Err(e) => {
                        let _ = tx.send(WorkerEvent::LaunchFailed {
                            worker: index,
                            quota: assigned,
                            error: format!("{e:#}"),
                        });
                        return;
                    }
                };
                for _ in 0..assigned {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let event = match worker.pull() {
                        Ok(record) => WorkerEvent::Record { record },
                        Err(e) => WorkerEvent::PullFailed {
                            worker: index,
                            error: format!("{e:#}"),
                        },
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                worker.shutdown();
            });
        }
        // 集約側はワーカーのtxクローンだけを待つ
        drop(tx);

        let mut attempted = 0u64;
        while attempted < count {
            match rx.recv() {
                Ok(WorkerEvent::Record { record }) => {
                    summary.produced += 1;
                    attempted += 1;
                    on_record(record);
                    on_attempt();
                }
                Ok(WorkerEvent::PullFailed { worker, error }) => {
                    log::warn!("worker {worker}: failed to generate position: {error}");
                    summary.failed += 1;
                    attempted += 1;
                    on_attempt();
                }
                Ok(WorkerEvent::LaunchFailed { worker, quota, error }) => {
                    log::warn!("worker {worker}: failed to launch engine: {error}");
                    summary.launch_failures += 1;
                    // 死んだワーカーの割当は失敗試行として消化する
                    summary.failed += quota;
                    for _ in 0..quota {
                        attempted += 1;
                        on_attempt();
                    }
                }
                // 全ワーカー終了（シャットダウン要求時のみ起きる）
                Err(_) => break,
            }
        }
    });

    if summary.produced == 0 && summary.launch_failures == workers as u64 {
        bail!("all {workers} workers failed to launch");
    }
    Ok(summary)
}

/// W=1 の逐次パス。プールを作らず、各試行を順に実行する。
fn run_single<R, S, F>(
    count: u64,
    make_worker: &F,
    on_record: &mut dyn FnMut(PositionRecord),
    on_attempt: &mut dyn FnMut(),
    shutdown: &AtomicBool,
) -> Result<RunSummary>
where
    R: RulesOracle,
    S: EngineSession,
    F: Fn(usize) -> Result<Worker<R, S>>,
{
    // 唯一のワーカーが起動できなければレコードは0件なので、そのまま致命
    let mut worker = make_worker(0)?;
    let mut summary = RunSummary::new(count);
    for _ in 0..count {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match worker.pull() {
            Ok(record) => {
                summary.produced += 1;
                on_record(record);
            }
            Err(e) => {
                log::warn!("worker 0: failed to generate position: {e:#}");
                summary.failed += 1;
            }
        }
        on_attempt();
    }
    worker.shutdown();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfplay::test_support::{ScriptedEngine, StubRules, stub_config};

    fn stub_worker(index: usize) -> Result<Worker<StubRules, ScriptedEngine>> {
        Worker::new(index, StubRules::new(1), ScriptedEngine::new(), stub_config())
    }

    fn collect_run(
        count: u64,
        workers: usize,
        factory: impl Fn(usize) -> Result<Worker<StubRules, ScriptedEngine>> + Sync,
    ) -> (RunSummary, Vec<PositionRecord>, Vec<u64>) {
        let mut records = Vec::new();
        let mut progress = Vec::new();
        let mut attempted = 0u64;
        let shutdown = AtomicBool::new(false);
        let summary = run_pool(
            count,
            workers,
            factory,
            &mut |record| records.push(record),
            &mut || {
                attempted += 1;
                progress.push(attempted);
            },
            &shutdown,
        )
        .unwrap();
        (summary, records, progress)
    }

    #[test]
    fn quota_splits_remainder_to_leading_workers() {
        let shares: Vec<u64> = (0..4).map(|i| quota(10, 4, i)).collect();
        assert_eq!(shares, vec![3, 3, 2, 2]);
        assert_eq!((0..7).map(|i| quota(3, 7, i)).sum::<u64>(), 3);
        assert_eq!(quota(12, 3, 2), 4);
    }

    #[test]
    fn single_worker_attempts_exactly_n() {
        let (summary, records, progress) = collect_run(10, 1, stub_worker);
        assert_eq!(summary.produced + summary.failed, 10);
        assert_eq!(summary.produced, 10);
        assert_eq!(records.len(), 10);
        // 進捗は1ずつ単調に10まで
        assert_eq!(progress, (1..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn four_workers_attempt_exactly_n() {
        let (summary, records, progress) = collect_run(10, 4, stub_worker);
        assert_eq!(summary.produced, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(records.len(), 10);
        assert_eq!(progress, (1..=10).collect::<Vec<u64>>());
        // 全レコードが対局IDを持つ
        assert!(records.iter().all(|r| !r.game_id.is_empty()));
    }

    #[test]
    fn one_scheduled_failure_does_not_stop_the_run() {
        let (summary, records, _) = collect_run(5, 1, |index| {
            Worker::new(
                index,
                StubRules::new(1),
                ScriptedEngine::new().with_failure_on_call(3),
                stub_config(),
            )
        });
        assert_eq!(summary.produced, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn scheduled_failures_in_a_pool_are_counted_not_fatal() {
        let (summary, _, progress) = collect_run(8, 4, |index| {
            // ワーカー0だけ最初の探索で失敗する
            let engine = if index == 0 {
                ScriptedEngine::new().with_failure_on_call(1)
            } else {
                ScriptedEngine::new()
            };
            Worker::new(index, StubRules::new(1), engine, stub_config())
        });
        assert_eq!(summary.produced, 7);
        assert_eq!(summary.failed, 1);
        assert_eq!(progress.len(), 8);
    }

    #[test]
    fn launch_failures_forfeit_their_quota_but_run_completes() {
        let (summary, records, progress) = collect_run(10, 5, |index| {
            if index < 2 {
                bail!("engine binary not found");
            }
            stub_worker(index)
        });
        assert_eq!(summary.launch_failures, 2);
        assert_eq!(summary.produced, 6);
        assert_eq!(summary.failed, 4);
        assert_eq!(records.len(), 6);
        assert_eq!(progress.len(), 10);
    }

    #[test]
    fn all_launch_failures_surface_an_error() {
        let shutdown = AtomicBool::new(false);
        let result = run_pool(
            4,
            2,
            |_| -> Result<Worker<StubRules, ScriptedEngine>> { bail!("no engine") },
            &mut |_| {},
            &mut || {},
            &shutdown,
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let shutdown = AtomicBool::new(false);
        let result = run_pool(
            4,
            0,
            stub_worker,
            &mut |_| {},
            &mut || {},
            &shutdown,
        );
        assert!(result.is_err());
    }

    #[test]
    fn shutdown_flag_stops_the_single_worker_loop_early() {
        let shutdown = AtomicBool::new(false);
        let mut records = 0u64;
        let mut attempts = 0u64;
        let summary = run_pool(
            100,
            1,
            stub_worker,
            &mut |_| records += 1,
            &mut || {
                attempts += 1;
                if attempts == 3 {
                    shutdown.store(true, Ordering::Relaxed);
                }
            },
            &shutdown,
        )
        .unwrap();
        assert_eq!(summary.produced, 3);
        assert_eq!(records, 3);
    }
}
