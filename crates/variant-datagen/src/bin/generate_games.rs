/// バリアント自己対局によるEPDレコード生成。
///
/// UCIエンジンを自己対局させ、訪れた各局面を
/// `fen;variant v;bm m;hmvc n;result r;game id` 形式の1行EPDとして出力する。
///
/// # 使用例
///
/// 8千局面をcrazyhouseで並列生成:
/// ```shell
/// cargo run -p variant-datagen --release --bin generate_games -- \
///   --engine /usr/local/bin/fairy-stockfish \
///   --variant crazyhouse --count 8000 --depth 8 --workers 8 \
///   --uci-option "Threads=1" --uci-option "Hash=64" \
///   --epd-file runs/crazyhouse-d8.epd
/// ```
///
/// 開始局面ブックからmovetimeで標準チェス（stdoutへ）:
/// ```shell
/// cargo run -p variant-datagen --release --bin generate_games -- \
///   --engine /usr/local/bin/stockfish \
///   --movetime 100 --count 500 --book books/openings.epd.gz
/// ```
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser as _;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use variant_datagen::common::io::open_writer;
use variant_datagen::rules::StandardRules;
use variant_datagen::selfplay::{
    EngineConfig, PositionRecord, RunSummary, SearchLimits, Worker, WorkerConfig, run_pool,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(clap::Parser, Debug)]
#[command(about = "generate annotated EPD records from variant engine self-play")]
struct Cli {
    /// UCI engine binary path
    #[arg(short, long)]
    engine: PathBuf,

    /// Extra arguments passed to the engine binary (can be repeated)
    #[arg(long = "engine-arg", num_args = 1)]
    engine_args: Vec<String>,

    /// Additional UCI options (format: "Name=Value", can be repeated)
    #[arg(short = 'o', long = "uci-option", num_args = 1)]
    uci_options: Vec<String>,

    /// Variant to play
    #[arg(short, long, default_value = "chess")]
    variant: String,

    /// Number of position records to generate
    #[arg(short, long, default_value_t = 1000)]
    count: u64,

    /// Search depth per move
    #[arg(short, long)]
    depth: Option<u32>,

    /// Search time per move in milliseconds
    #[arg(short = 't', long)]
    movetime: Option<u64>,

    /// Start position book (one FEN per line, gzip ok).
    /// Without it every game starts from the initial position.
    #[arg(short, long)]
    book: Option<PathBuf>,

    /// Output EPD file (stdout when omitted; appended unless --overwrite)
    #[arg(long)]
    epd_file: Option<PathBuf>,

    /// Truncate the output file instead of appending
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Number of parallel workers, each with its own engine process
    #[arg(short, long, default_value_t = 1)]
    workers: usize,
}

// ---------------------------------------------------------------------------
// ランマニフェスト
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunManifest<'a> {
    timestamp: String,
    engine: String,
    engine_args: &'a [String],
    uci_options: &'a [String],
    settings: ManifestSettings<'a>,
    output: String,
    summary: ManifestSummary,
}

#[derive(Serialize)]
struct ManifestSettings<'a> {
    variant: &'a str,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    movetime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    book: Option<String>,
    workers: usize,
}

#[derive(Serialize)]
struct ManifestSummary {
    requested: u64,
    produced: u64,
    failed: u64,
    launch_failures: u64,
    elapsed_secs: f64,
}

fn write_manifest(
    cli: &Cli,
    epd_file: &std::path::Path,
    summary: &RunSummary,
    elapsed_secs: f64,
) -> Result<()> {
    let manifest = RunManifest {
        timestamp: Local::now().to_rfc3339(),
        engine: cli.engine.display().to_string(),
        engine_args: &cli.engine_args,
        uci_options: &cli.uci_options,
        settings: ManifestSettings {
            variant: &cli.variant,
            count: cli.count,
            depth: cli.depth,
            movetime: cli.movetime,
            book: cli.book.as_ref().map(|p| p.display().to_string()),
            workers: cli.workers,
        },
        output: epd_file.display().to_string(),
        summary: ManifestSummary {
            requested: summary.requested,
            produced: summary.produced,
            failed: summary.failed,
            launch_failures: summary.launch_failures,
            elapsed_secs,
        },
    };
    let path = epd_file.with_extension("meta.json");
    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&path, json + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("run manifest: {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if cli.workers == 0 {
        bail!("--workers must be at least 1");
    }
    if !cli.engine.is_file() {
        bail!("engine binary not found: {}", cli.engine.display());
    }
    let limits = SearchLimits { depth: cli.depth, movetime: cli.movetime };
    limits.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down gracefully...");
            shutdown_clone.store(true, Ordering::Relaxed);
        })
        .context("failed to install ctrl-c handler")?;
    }

    let worker_cfg = WorkerConfig {
        engine: EngineConfig {
            path: cli.engine.clone(),
            args: cli.engine_args.clone(),
            uci_options: cli.uci_options.clone(),
        },
        variant: cli.variant.clone(),
        limits,
        book: cli.book.clone(),
    };

    let out_path: PathBuf = cli.epd_file.clone().unwrap_or_else(|| PathBuf::from("-"));
    let mut writer = open_writer(&out_path, !cli.overwrite)
        .with_context(|| format!("failed to open {}", out_path.display()))?;

    let progress = ProgressBar::new(cli.count);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("valid template"),
    );

    log::info!(
        "generating {} record(s), variant={}, workers={}",
        cli.count,
        cli.variant,
        cli.workers
    );

    let started = Instant::now();
    let mut write_error: Option<std::io::Error> = None;
    let summary = {
        use std::io::Write as _;
        let shutdown = &shutdown;
        let progress = &progress;
        let mut on_record = |record: PositionRecord| {
            if write_error.is_some() {
                return;
            }
            if let Err(e) = writeln!(writer, "{}", record.epd_line()) {
                // 書けない出力先に向かって生成を続けても仕方がない
                shutdown.store(true, Ordering::Relaxed);
                write_error = Some(e);
            }
        };
        let mut on_attempt = || progress.inc(1);
        run_pool(
            cli.count,
            cli.workers,
            |index| Worker::spawn(index, StandardRules::new(), &worker_cfg),
            &mut on_record,
            &mut on_attempt,
            shutdown,
        )?
    };
    progress.finish_and_clear();
    writer.close().context("failed to finalize output")?;
    if let Some(e) = write_error {
        return Err(e).context("failed to write output");
    }

    let elapsed_secs = started.elapsed().as_secs_f64();
    if let Some(epd_file) = &cli.epd_file {
        write_manifest(&cli, epd_file, &summary, elapsed_secs)?;
    }

    if summary.failed > 0 {
        log::warn!("{} attempt(s) failed", summary.failed);
    }
    if summary.launch_failures > 0 {
        log::warn!("{} worker(s) failed to launch", summary.launch_failures);
    }
    log::info!(
        "done: {}/{} record(s) in {:.1}s",
        summary.produced,
        summary.requested,
        elapsed_secs
    );
    if shutdown.load(Ordering::Relaxed) && summary.produced < summary.requested {
        bail!("interrupted after {} record(s)", summary.produced);
    }
    Ok(())
}
