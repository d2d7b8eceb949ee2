use crate::config::SyncOptions;
use crate::embedded::{rewrite_embedded_date_to, RewriteStatus};
use crate::filename::parse_path;
use crate::outcome::{BatchSummary, FailureKind, ProcessOutcome, ProcessStatus};
use crate::timestamps::sync_timestamps;
use anyhow::{Context, Result};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    pub sync: SyncOptions,
    /// Parse and report only; the file is left untouched.
    pub dry_run: bool,
}

/// Runs the full update for one file.
///
/// The embedded date is rewritten before the filesystem times are synchronized. The rewrite
/// restores the pre-rewrite times, so running the synchronizer last is what leaves the file at
/// the filename-derived time.
pub fn process_file(path: &Path, options: &ProcessOptions) -> Result<ProcessOutcome> {
    let timestamp = match parse_path(path) {
        Ok(timestamp) => timestamp,
        Err(rejection) => {
            log::debug!("スキップ: {}: {rejection}", path.display());
            return Ok(ProcessOutcome::skipped(path.to_path_buf(), rejection));
        }
    };

    if !path.is_file() {
        return Ok(ProcessOutcome::failed(
            path.to_path_buf(),
            FailureKind::NotFound,
            Some(timestamp),
        ));
    }

    if options.dry_run {
        return Ok(ProcessOutcome {
            path: path.to_path_buf(),
            status: ProcessStatus::Processed,
            timestamp: Some(timestamp),
            creation_updated: false,
            modification_updated: false,
            embedded_date_updated: false,
            message: None,
        });
    }

    let rewrite = rewrite_embedded_date_to(path, &timestamp, &options.sync);
    let synced = sync_timestamps(path, &timestamp, &options.sync.retry);
    let rewrite = rewrite
        .with_context(|| format!("撮影日時の更新中にエラーが発生しました: {}", path.display()))?;

    let (embedded_date_updated, message) = match rewrite {
        RewriteStatus::Updated => (true, None),
        RewriteStatus::Failed(kind) => (false, Some(kind.to_string())),
    };

    Ok(ProcessOutcome {
        path: path.to_path_buf(),
        status: ProcessStatus::Processed,
        timestamp: Some(timestamp),
        creation_updated: synced.creation_updated,
        modification_updated: synced.modification_updated,
        embedded_date_updated,
        message,
    })
}

/// Progress report handed to the caller after each file.
#[derive(Debug)]
pub struct BatchEvent<'a> {
    pub index: usize,
    pub total: usize,
    pub path: &'a Path,
    pub result: &'a Result<ProcessOutcome>,
}

/// Processes files one after another. An error on one file is logged and counted; it never
/// stops the batch. Returning `ControlFlow::Break` from `on_event` stops before the next file.
pub fn process_batch(
    paths: &[PathBuf],
    options: &ProcessOptions,
    on_event: impl FnMut(BatchEvent<'_>) -> ControlFlow<()>,
) -> BatchSummary {
    run_batch(paths, |path| process_file(path, options), on_event)
}

fn run_batch(
    paths: &[PathBuf],
    mut process: impl FnMut(&Path) -> Result<ProcessOutcome>,
    mut on_event: impl FnMut(BatchEvent<'_>) -> ControlFlow<()>,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for (index, path) in paths.iter().enumerate() {
        let result = process(path);
        match &result {
            Ok(outcome) => summary.record(outcome),
            Err(err) => {
                log::error!("{err:#}");
                summary.record_error();
            }
        }
        let flow = on_event(BatchEvent {
            index,
            total: paths.len(),
            path,
            result: &result,
        });
        if flow.is_break() {
            log::info!("処理を中断しました: {}/{}", index + 1, paths.len());
            break;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::{process_batch, process_file, run_batch, ProcessOptions};
    use crate::config::SyncOptions;
    use crate::embedded::read_embedded_date;
    use crate::filename::{parse_filename, Rejection};
    use crate::outcome::{FailureKind, ProcessStatus};
    use crate::retry::RetryPolicy;
    use crate::timestamps::set_modified;
    use fs2::FileExt;
    use std::fs::{self, File};
    use std::ops::ControlFlow;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    const PNG_NAME: &str = "VRChat_1920x1080_2022-08-31_21-54-39.227.png";

    fn options() -> ProcessOptions {
        ProcessOptions {
            sync: SyncOptions {
                retry: RetryPolicy {
                    attempts: 2,
                    delay: Duration::from_millis(1),
                },
                release_wait: Duration::from_millis(50),
                release_poll: Duration::from_millis(5),
            },
            dry_run: false,
        }
    }

    fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]))
            .save(&path)
            .expect("encode fixture");
        set_modified(&path, SystemTime::UNIX_EPOCH + Duration::from_secs(86_400))
            .expect("set mtime");
        path
    }

    fn modified(path: &Path) -> SystemTime {
        fs::metadata(path).expect("metadata").modified().expect("mtime")
    }

    #[test]
    fn full_pipeline_leaves_filename_time_on_disk() {
        let temp = tempdir().expect("tempdir");
        let file = write_image(temp.path(), PNG_NAME);
        let ts = parse_filename(PNG_NAME).expect("parse");

        let outcome = process_file(&file, &options()).expect("process");

        assert!(outcome.is_success());
        assert_eq!(outcome.timestamp, Some(ts));
        assert!(outcome.modification_updated);
        assert!(outcome.embedded_date_updated);
        assert_eq!(outcome.message, None);
        assert_eq!(modified(&file), ts.to_system_time());
        assert_eq!(
            read_embedded_date(&file).expect("read").map(|d| d.to_string()),
            Some("2022-08-31 21:54:39".to_string())
        );
    }

    #[test]
    fn running_twice_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let file = write_image(temp.path(), "VRChat_2022-08-31_21-54-39.227_1920x1080.jpg");

        process_file(&file, &options()).expect("first run");
        let first_time = modified(&file);
        let first_tag = read_embedded_date(&file).expect("first tag");
        process_file(&file, &options()).expect("second run");

        assert_eq!(modified(&file), first_time);
        assert_eq!(read_embedded_date(&file).expect("second tag"), first_tag);
    }

    #[test]
    fn non_matching_name_is_skipped_untouched() {
        let temp = tempdir().expect("tempdir");
        let file = write_image(temp.path(), "not_vrchat_format.jpg");
        let before = fs::read(&file).expect("bytes");
        let before_time = modified(&file);

        let outcome = process_file(&file, &options()).expect("process");

        assert_eq!(outcome.status, ProcessStatus::Skipped(Rejection::NoLayoutMatch));
        assert!(!outcome.any_updated());
        assert_eq!(fs::read(&file).expect("bytes after"), before);
        assert_eq!(modified(&file), before_time);
    }

    #[test]
    fn calendar_invalid_name_is_skipped() {
        let temp = tempdir().expect("tempdir");
        let file = write_image(temp.path(), "VRChat_1920x1080_2022-02-30_00-00-00.000.png");

        let outcome = process_file(&file, &options()).expect("process");

        assert_eq!(outcome.status, ProcessStatus::Skipped(Rejection::InvalidCalendarDate));
        assert_eq!(read_embedded_date(&file).ok().flatten(), None);
    }

    #[test]
    fn missing_file_is_a_failure_not_a_skip() {
        let temp = tempdir().expect("tempdir");
        let outcome = process_file(&temp.path().join(PNG_NAME), &options()).expect("process");
        assert_eq!(outcome.status, ProcessStatus::Failed(FailureKind::NotFound));
        assert!(outcome.timestamp.is_some());
        assert!(!outcome.any_updated());
    }

    #[test]
    fn locked_file_still_gets_filesystem_times() {
        let temp = tempdir().expect("tempdir");
        let file = write_image(temp.path(), PNG_NAME);
        let holder = File::open(&file).expect("open holder");
        FileExt::lock_exclusive(&holder).expect("lock");

        let outcome = process_file(&file, &options()).expect("process");
        FileExt::unlock(&holder).expect("unlock");

        assert!(outcome.is_success());
        assert!(!outcome.embedded_date_updated);
        assert!(outcome.modification_updated);
        assert!(outcome
            .message
            .as_deref()
            .is_some_and(|m| m.contains("ロック")));
    }

    #[test]
    fn dry_run_reports_without_touching() {
        let temp = tempdir().expect("tempdir");
        let file = write_image(temp.path(), PNG_NAME);
        let before_time = modified(&file);
        let opts = ProcessOptions {
            dry_run: true,
            ..options()
        };

        let outcome = process_file(&file, &opts).expect("process");

        assert!(outcome.is_success());
        assert!(outcome.timestamp.is_some());
        assert!(!outcome.any_updated());
        assert_eq!(modified(&file), before_time);
    }

    #[test]
    fn batch_continues_past_failures_and_can_stop() {
        let temp = tempdir().expect("tempdir");
        let paths = vec![
            temp.path().join(PNG_NAME),
            write_image(temp.path(), "not_vrchat_format.png"),
            write_image(temp.path(), "VRChat_1x1_2022-01-01_00-00-00.000.png"),
        ];

        let mut seen = 0;
        let summary = process_batch(&paths, &options(), |event| {
            seen += 1;
            assert_eq!(event.total, 3);
            ControlFlow::Continue(())
        });
        assert_eq!(seen, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);

        let stopped = process_batch(&paths, &options(), |_| ControlFlow::Break(()));
        assert_eq!(stopped.total(), 1);
    }

    #[test]
    fn unexpected_error_is_counted_and_the_batch_moves_on() {
        let temp = tempdir().expect("tempdir");
        let broken = temp.path().join("VRChat_1920x1080_2022-01-01_00-00-00.000.png");
        let paths = vec![
            broken.clone(),
            write_image(temp.path(), PNG_NAME),
            write_image(temp.path(), "not_vrchat_format.png"),
        ];

        let mut processed_after_error = Vec::new();
        let summary = run_batch(
            &paths,
            |path| {
                if path == broken.as_path() {
                    anyhow::bail!("一時ファイルへの書き込みに失敗しました: {}", path.display());
                }
                process_file(path, &options())
            },
            |event| {
                if event.index > 0 {
                    processed_after_error.push(event.result.is_ok());
                }
                ControlFlow::Continue(())
            },
        );

        assert_eq!(summary.errored, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(processed_after_error, vec![true, true]);
        assert_eq!(
            modified(&paths[1]),
            parse_filename(PNG_NAME).expect("parse").to_system_time()
        );
    }
}
