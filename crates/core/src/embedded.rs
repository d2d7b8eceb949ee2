use crate::access::WriteAccess;
use crate::config::SyncOptions;
use crate::filename::{parse_path, ExtractedTimestamp};
use crate::outcome::FailureKind;
use crate::timestamps::FileTimestampState;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use exif::{In, Reader, Tag, Value};
use fs2::FileExt;
use img_parts::{Bytes, DynImage, ImageEXIF};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::panic::{self, UnwindSafe};
use std::path::Path;
use std::sync::Once;
use std::thread;
use std::time::Instant;

pub const TEMP_PREFIX: &str = ".vrcss_tmp_";

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
const JPEG_EXIF_OVERHEAD: usize = 10;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStatus {
    Updated,
    Failed(FailureKind),
}

impl RewriteStatus {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

/// Rewrites DateTimeOriginal from the file's own name.
///
/// Expected failures come back as `Ok(false)`; only unexpected I/O errors such as a full disk
/// while writing the temporary file are returned as `Err`.
pub fn rewrite_embedded_date(path: &Path, options: &SyncOptions) -> Result<bool> {
    Ok(rewrite_embedded_date_status(path, options)?.is_updated())
}

pub fn rewrite_embedded_date_status(path: &Path, options: &SyncOptions) -> Result<RewriteStatus> {
    if !path.exists() {
        return Ok(RewriteStatus::Failed(FailureKind::NotFound));
    }
    let timestamp = match parse_path(path) {
        Ok(timestamp) => timestamp,
        Err(rejection) => {
            log::debug!("撮影日時の更新をスキップ: {}: {rejection}", path.display());
            return Ok(RewriteStatus::Failed(FailureKind::InvalidFilename));
        }
    };
    rewrite_embedded_date_to(path, &timestamp, options)
}

/// Rewrites DateTimeOriginal to `timestamp` through a temporary file and an atomic replace,
/// then puts the pre-rewrite filesystem times and read-only flag back.
pub fn rewrite_embedded_date_to(
    path: &Path,
    timestamp: &ExtractedTimestamp,
    options: &SyncOptions,
) -> Result<RewriteStatus> {
    if !path.exists() {
        return Ok(RewriteStatus::Failed(FailureKind::NotFound));
    }
    let state = FileTimestampState::capture(path)?;

    let access = match WriteAccess::acquire(path) {
        Ok(access) => access,
        Err(err) => {
            log::warn!("{err:#}");
            return Ok(RewriteStatus::Failed(FailureKind::ReadOnlyBlocked));
        }
    };

    let status = replace_with_updated_date(path, timestamp, &access)?;
    if status.is_updated() && !state.restore_times(path, &options.retry) {
        log::warn!("書き換え後のタイムスタンプを復元できませんでした: {}", path.display());
    }
    drop(access);

    match status {
        RewriteStatus::Updated => {
            log::debug!(
                "撮影日時を更新: {} -> {}",
                path.display(),
                timestamp.embedded_date_string()
            );
            wait_until_readable(path, options);
        }
        RewriteStatus::Failed(kind) => {
            log::warn!("撮影日時を更新できませんでした: {}: {kind}", path.display());
        }
    }
    Ok(status)
}

fn replace_with_updated_date(
    path: &Path,
    timestamp: &ExtractedTimestamp,
    access: &WriteAccess,
) -> Result<RewriteStatus> {
    let raw = match read_shared(path) {
        Ok(raw) => raw,
        Err(err) => return classify_io(err, path, "画像を読み込めませんでした"),
    };

    let mut image = match DynImage::from_bytes(Bytes::from(raw)) {
        Ok(Some(image)) => image,
        Ok(None) => {
            log::debug!("未対応の画像形式です: {}", path.display());
            return Ok(RewriteStatus::Failed(FailureKind::UnsupportedOrCorruptImage));
        }
        Err(err) => {
            log::debug!("画像を解析できませんでした: {}: {err}", path.display());
            return Ok(RewriteStatus::Failed(FailureKind::UnsupportedOrCorruptImage));
        }
    };

    let Some(tiff) = build_exif_payload(image.exif(), timestamp)? else {
        return Ok(RewriteStatus::Failed(FailureKind::UnsupportedOrCorruptImage));
    };
    image.set_exif(Some(Bytes::from(tiff)));
    let encoded = image.encoder().bytes();

    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut temp = match tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(&suffix)
        .tempfile_in(dir)
    {
        Ok(temp) => temp,
        Err(err) => return classify_io(err, dir, "一時ファイルを作成できませんでした"),
    };
    temp.write_all(&encoded)
        .and_then(|()| temp.as_file().sync_all())
        .with_context(|| format!("一時ファイルへの書き込みに失敗しました: {}", path.display()))?;
    temp.as_file()
        .set_permissions(access.writable().clone())
        .with_context(|| format!("一時ファイルの属性を設定できませんでした: {}", path.display()))?;

    if let Err(err) = probe_shared(path) {
        return classify_io(err, path, "置き換え前のロック確認に失敗しました");
    }
    if let Err(err) = temp.persist(path) {
        return classify_io(err.error, path, "ファイルを置き換えられませんでした");
    }
    Ok(RewriteStatus::Updated)
}

/// Builds the TIFF payload for the EXIF segment, keeping any tags already present.
///
/// Returns `None` when existing EXIF cannot be parsed, so it is never silently replaced.
fn build_exif_payload(
    existing: Option<Bytes>,
    timestamp: &ExtractedTimestamp,
) -> Result<Option<Vec<u8>>> {
    let mut metadata = match existing.filter(|tiff| !tiff.is_empty()) {
        Some(tiff) => match parse_existing_exif(&tiff)? {
            Some(metadata) => metadata,
            None => return Ok(None),
        },
        None => Metadata::new(),
    };
    metadata.set_tag(ExifTag::DateTimeOriginal(timestamp.embedded_date_string()));

    let app1 = metadata.as_u8_vec(FileExtension::JPEG);
    if app1.len() <= JPEG_EXIF_OVERHEAD {
        return Ok(None);
    }
    Ok(Some(app1[JPEG_EXIF_OVERHEAD..].to_vec()))
}

fn parse_existing_exif(tiff: &[u8]) -> Result<Option<Metadata>> {
    let segment_len = EXIF_HEADER.len() + tiff.len() + 2;
    let Ok(segment_len) = u16::try_from(segment_len) else {
        log::debug!("EXIFが大きすぎて解析できません: {} bytes", tiff.len());
        return Ok(None);
    };

    // little_exif only loads from a path, so stage the payload as a bare JPEG.
    let mut container = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".jpg")
        .tempfile()
        .context("EXIF解析用の一時ファイルを作成できませんでした")?;
    container
        .write_all(&[0xFF, 0xD8, 0xFF, 0xE1])
        .and_then(|()| container.write_all(&segment_len.to_be_bytes()))
        .and_then(|()| container.write_all(EXIF_HEADER))
        .and_then(|()| container.write_all(tiff))
        .and_then(|()| container.write_all(&[0xFF, 0xD9]))
        .and_then(|()| container.flush())
        .context("EXIF解析用の一時ファイルへの書き込みに失敗しました")?;

    let staged = container.path().to_path_buf();
    let result = catch_quietly(move || Metadata::new_from_path(&staged));

    Ok(match result {
        Ok(Ok(metadata)) if !metadata.data().is_empty() => Some(metadata),
        Ok(Ok(_)) => {
            log::debug!("既存のEXIFからタグを読み取れませんでした");
            None
        }
        Ok(Err(err)) => {
            log::debug!("既存のEXIFを解析できませんでした: {err}");
            None
        }
        Err(_) => {
            log::debug!("既存のEXIFの解析中にパニックしました");
            None
        }
    })
}

thread_local! {
    static QUIET_PANICS: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// `catch_unwind` that keeps the panic message off stderr for this thread only.
///
/// little_exif panics on some malformed input. The hook is installed once and forwards to the
/// previous hook for every other panic.
fn catch_quietly<T>(f: impl FnOnce() -> T + UnwindSafe) -> thread::Result<T> {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !QUIET_PANICS.with(Cell::get) {
                previous(info);
            }
        }));
    });
    QUIET_PANICS.with(|quiet| quiet.set(true));
    let result = panic::catch_unwind(f);
    QUIET_PANICS.with(|quiet| quiet.set(false));
    result
}

fn read_shared(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    FileExt::try_lock_shared(&file)?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    FileExt::unlock(&file)?;
    Ok(raw)
}

fn probe_shared(path: &Path) -> io::Result<()> {
    let file = File::open(path)?;
    FileExt::try_lock_shared(&file)?;
    FileExt::unlock(&file)
}

fn is_lock_conflict(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    let contended = fs2::lock_contended_error();
    if err.raw_os_error().is_some() && err.raw_os_error() == contended.raw_os_error() {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33))
}

fn classify_io(err: io::Error, path: &Path, what: &str) -> Result<RewriteStatus> {
    let kind = if is_lock_conflict(&err) {
        FailureKind::ExclusiveLockConflict
    } else {
        match err.kind() {
            io::ErrorKind::NotFound => FailureKind::NotFound,
            io::ErrorKind::PermissionDenied if cfg!(windows) => FailureKind::ExclusiveLockConflict,
            io::ErrorKind::PermissionDenied => FailureKind::ReadOnlyBlocked,
            _ => {
                return Err(anyhow::Error::from(err).context(format!("{what}: {}", path.display())))
            }
        }
    };
    log::debug!("{what}: {}: {err}", path.display());
    Ok(RewriteStatus::Failed(kind))
}

/// Waits, bounded by `release_wait`, until the file opens for shared read.
fn wait_until_readable(path: &Path, options: &SyncOptions) -> bool {
    let deadline = Instant::now() + options.release_wait;
    loop {
        if probe_shared(path).is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            log::warn!("置き換え後のファイルを開けません: {}", path.display());
            return false;
        }
        thread::sleep(options.release_poll);
    }
}

/// Reads DateTimeOriginal from the image. Missing EXIF or a missing tag is `None`.
pub fn read_embedded_date(path: &Path) -> Result<Option<NaiveDateTime>> {
    let file = File::open(path)
        .with_context(|| format!("EXIF読み込み対象を開けませんでした: {}", path.display()))?;
    let mut buf = BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut buf) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(err) => {
            return Err(anyhow::Error::from(err)
                .context(format!("EXIFを解析できませんでした: {}", path.display())))
        }
    };

    let Some(field) = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) else {
        return Ok(None);
    };
    let Value::Ascii(ref values) = field.value else {
        return Ok(None);
    };
    let Some(raw) = values.first() else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(raw);
    Ok(NaiveDateTime::parse_from_str(text.trim_end_matches('\0').trim(), "%Y:%m:%d %H:%M:%S").ok())
}
