use anyhow::Result;
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use vrcss_datetime_core::{
    app_paths, collect_targets, load_config, parse_path, process_batch, read_embedded_date,
    ProcessOptions, ProcessOutcome, ProcessStatus, ScanStats,
};

const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "vrcss-datetime-fixer")]
#[command(
    about = "VRChatのスクリーンショットのファイル名から日時情報を抽出し、ファイルのタイムスタンプとExif情報を更新します"
)]
struct Cli {
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Fix(FixArgs),
    Inspect(InspectArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct FixArgs {
    /// 処理するファイルまたはディレクトリのパス
    path: PathBuf,
    /// サブディレクトリを再帰的に処理する
    #[arg(short, long, default_value_t = false)]
    recursive: bool,
    #[arg(long, default_value_t = false)]
    include_hidden: bool,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct InspectArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Fix(args) => cmd_fix(args),
        Commands::Inspect(args) => cmd_inspect(&args.file),
        Commands::Config(config) => match config.action {
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

fn cmd_fix(args: FixArgs) -> Result<()> {
    let config = load_config()?;
    let recursive = args.recursive || config.recursive_default;
    let include_hidden = args.include_hidden || config.include_hidden_default;
    let scan = collect_targets(&args.path, recursive, include_hidden)?;
    let options = ProcessOptions {
        sync: config.sync_options(),
        dry_run: args.dry_run,
    };

    let table = args.output == OutputFormat::Table;
    if table {
        print_scan_header(&args.path, &scan.stats);
    }

    let started = Instant::now();
    let mut outcomes = Vec::<ProcessOutcome>::with_capacity(scan.files.len());
    let summary = process_batch(&scan.files, &options, |event| {
        if let Ok(outcome) = event.result {
            if table {
                println!("{}", render_outcome(outcome));
            }
            outcomes.push(outcome.clone());
        }
        let done = event.index + 1;
        if table && (done % PROGRESS_EVERY == 0 || done == event.total) {
            println!("{}", render_progress(done, event.total, started.elapsed()));
        }
        ControlFlow::Continue(())
    });

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        OutputFormat::Table => {
            println!("{}", "=".repeat(80));
            println!(
                "処理が完了しました: {} 件のファイルを処理しました (スキップ {}件 失敗 {}件 エラー {}件)",
                summary.processed, summary.skipped, summary.failed, summary.errored
            );
            println!("所要時間: {}", format_hms(started.elapsed()));
        }
    }

    if args.dry_run {
        eprintln!("dry-runモード: 実ファイルは変更していません。");
    }
    Ok(())
}

fn cmd_inspect(file: &Path) -> Result<()> {
    println!("ファイル: {}", file.display());
    match parse_path(file) {
        Ok(timestamp) => println!(
            "ファイル名の日時: {}",
            timestamp.naive().format("%Y-%m-%d %H:%M:%S%.3f")
        ),
        Err(rejection) => println!("ファイル名の日時: 抽出できません ({rejection})"),
    }

    let meta = std::fs::metadata(file)?;
    println!("作成日時: {}", format_system_time(meta.created().ok()));
    println!("更新日時: {}", format_system_time(meta.modified().ok()));
    println!("読み取り専用: {}", meta.permissions().readonly());

    match read_embedded_date(file) {
        Ok(Some(date)) => println!("撮影日時: {}", date.format("%Y:%m:%d %H:%M:%S")),
        Ok(None) => println!("撮影日時: なし"),
        Err(err) => println!("撮影日時: 読み取れません ({err:#})"),
    }
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let paths = app_paths()?;
    println!("設定ファイル: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_scan_header(path: &Path, stats: &ScanStats) {
    println!("{}", path.display());
    println!(
        "対象ファイル数: {} 件 (非対応 {}件 隠しファイル {}件を除外)",
        stats.image_files, stats.skipped_unsupported, stats.skipped_hidden
    );
    println!("{}", "=".repeat(80));
}

fn render_outcome(outcome: &ProcessOutcome) -> String {
    let name = outcome
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| outcome.path.display().to_string());
    let reason = outcome.message.as_deref().unwrap_or_default();

    match &outcome.status {
        ProcessStatus::Skipped(_) => format!("{name}: スキップ ({reason})"),
        ProcessStatus::Failed(_) => format!("{name}: エラー: {reason}"),
        ProcessStatus::Processed => {
            let date = outcome
                .timestamp
                .map(|ts| ts.naive().format("%Y年%m月%d日 %H時%M分%S%.3f").to_string())
                .unwrap_or_default();
            let mut line = format!(
                "{name}:{date} 作成日時：{} 更新日時：{} 撮影日時：{}",
                mark(outcome.creation_updated),
                mark(outcome.modification_updated),
                mark(outcome.embedded_date_updated)
            );
            if !reason.is_empty() {
                line.push_str(&format!(" ({reason})"));
            }
            line
        }
    }
}

fn mark(updated: bool) -> &'static str {
    if updated {
        "更新済"
    } else {
        "スキップ"
    }
}

fn render_progress(done: usize, total: usize, elapsed: Duration) -> String {
    let remaining = if done == 0 {
        Duration::ZERO
    } else {
        elapsed.mul_f64(total.saturating_sub(done) as f64 / done as f64)
    };
    format!(
        "進捗: {done}/{total} 件 ({}%) 経過: {} 残り: {}",
        done * 100 / total.max(1),
        format_hms(elapsed),
        format_hms(remaining)
    )
}

fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

fn format_system_time(time: Option<SystemTime>) -> String {
    time.map(|t| {
        DateTime::<Local>::from(t)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string()
    })
    .unwrap_or_else(|| "取得できません".to_string())
}
