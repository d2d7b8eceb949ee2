use crate::access::with_write_access;
use crate::filename::ExtractedTimestamp;
use crate::retry::{is_transient_io, retry, RetryPolicy};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, FileTimes, OpenOptions};
use std::io;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncResult {
    pub creation_updated: bool,
    pub modification_updated: bool,
}

/// Filesystem times and read-only flag captured before a destructive rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimestampState {
    pub created: Option<SystemTime>,
    pub modified: SystemTime,
    pub accessed: Option<SystemTime>,
    pub read_only: bool,
}

impl FileTimestampState {
    pub fn capture(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)
            .with_context(|| format!("タイムスタンプを取得できませんでした: {}", path.display()))?;
        let modified = meta
            .modified()
            .with_context(|| format!("更新日時を取得できませんでした: {}", path.display()))?;
        Ok(Self {
            created: meta.created().ok(),
            modified,
            accessed: meta.accessed().ok(),
            read_only: meta.permissions().readonly(),
        })
    }

    /// Writes the captured times back. The caller must already hold write access.
    ///
    /// Returns false when the modification time could not be restored. A creation time the
    /// platform cannot set is not treated as a failure.
    pub fn restore_times(&self, path: &Path, policy: &RetryPolicy) -> bool {
        let mut times = FileTimes::new().set_modified(self.modified);
        if let Some(accessed) = self.accessed {
            times = times.set_accessed(accessed);
        }
        let modified_ok = attempt(path, "更新日時の復元", policy, || set_times(path, times));

        let created_ok = match self.created {
            Some(created) if creation_time_supported() => {
                attempt(path, "作成日時の復元", policy, || set_created(path, created))
            }
            _ => true,
        };

        modified_ok && created_ok
    }
}

/// Sets creation and modification time of `path` to `timestamp`.
///
/// Each attribute is attempted on its own and reported on its own. Expected failures end up as
/// `false`, never as an error.
pub fn sync_timestamps(
    path: &Path,
    timestamp: &ExtractedTimestamp,
    policy: &RetryPolicy,
) -> SyncResult {
    if !path.exists() {
        log::debug!("ファイルが存在しないため日時同期をスキップ: {}", path.display());
        return SyncResult::default();
    }

    let target = timestamp.to_system_time();
    let synced = with_write_access(path, |_| SyncResult {
        creation_updated: attempt(path, "作成日時の更新", policy, || set_created(path, target)),
        modification_updated: attempt(path, "更新日時の更新", policy, || {
            set_modified(path, target)
        }),
    });

    match synced {
        Ok(result) => result,
        Err(err) => {
            log::warn!("{err:#}");
            SyncResult::default()
        }
    }
}

pub fn set_modified(path: &Path, time: SystemTime) -> io::Result<()> {
    set_times(path, FileTimes::new().set_modified(time))
}

pub fn set_times(path: &Path, times: FileTimes) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_times(times)
}

pub fn set_created(path: &Path, time: SystemTime) -> io::Result<()> {
    set_times(path, created_times(time)?)
}

pub fn creation_time_supported() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

#[cfg(windows)]
fn created_times(time: SystemTime) -> io::Result<FileTimes> {
    use std::os::windows::fs::FileTimesExt;
    Ok(FileTimes::new().set_created(time))
}

#[cfg(target_os = "macos")]
fn created_times(time: SystemTime) -> io::Result<FileTimes> {
    use std::os::macos::fs::FileTimesExt;
    Ok(FileTimes::new().set_created(time))
}

#[cfg(not(any(windows, target_os = "macos")))]
fn created_times(_time: SystemTime) -> io::Result<FileTimes> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "このプラットフォームでは作成日時を変更できません",
    ))
}

fn attempt(
    path: &Path,
    label: &str,
    policy: &RetryPolicy,
    op: impl FnMut() -> io::Result<()>,
) -> bool {
    match retry(policy, op, is_transient_io) {
        Ok(()) => true,
        Err(err) => {
            log::warn!("{label}に失敗しました: {}: {err}", path.display());
            false
        }
    }
}
