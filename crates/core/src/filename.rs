use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;
use thiserror::Error;

pub const MIN_RESOLUTION: u32 = 1;
pub const MAX_RESOLUTION: u32 = 99_999;

const EMBEDDED_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

// VRChat_{W}x{H}_{YYYY-MM-DD}_{HH-mm-ss}.{fff}.{ext}
static LAYOUT_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^VRChat_
        (?P<width>[0-9]{1,5}) x (?P<height>[0-9]{1,5}) _
        (?P<year>[0-9]{4}) - (?P<month>[0-9]{2}) - (?P<day>[0-9]{2}) _
        (?P<hour>[0-9]{2}) - (?P<minute>[0-9]{2}) - (?P<second>[0-9]{2}) \. (?P<millis>[0-9]{3})
        \. (?:png|jpe?g)$",
    )
    .expect("layout A regex must compile")
});

// VRChat_{YYYY-MM-DD}_{HH-mm-ss}.{fff}_{W}x{H}.{ext}
static LAYOUT_B: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^VRChat_
        (?P<year>[0-9]{4}) - (?P<month>[0-9]{2}) - (?P<day>[0-9]{2}) _
        (?P<hour>[0-9]{2}) - (?P<minute>[0-9]{2}) - (?P<second>[0-9]{2}) \. (?P<millis>[0-9]{3}) _
        (?P<width>[0-9]{1,5}) x (?P<height>[0-9]{1,5})
        \. (?:png|jpe?g)$",
    )
    .expect("layout B regex must compile")
});

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum FilenameLayout {
    /// `VRChat_{W}x{H}_{date}_{time}.{ms}.{ext}`
    ResolutionFirst,
    /// `VRChat_{date}_{time}.{ms}_{W}x{H}.{ext}`
    TimestampFirst,
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum Rejection {
    #[error("ファイル名が空です")]
    EmptyOrNull,
    #[error("VRChatスクリーンショットの形式に一致しません")]
    NoLayoutMatch,
    #[error("解像度が範囲外です: {width}x{height}")]
    ResolutionOutOfRange { width: u32, height: u32 },
    #[error("存在しない日時です")]
    InvalidCalendarDate,
}

/// Local wall-clock instant recovered from a screenshot filename.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ExtractedTimestamp {
    layout: FilenameLayout,
    width: u32,
    height: u32,
    datetime: NaiveDateTime,
}

impl ExtractedTimestamp {
    pub fn layout(&self) -> FilenameLayout {
        self.layout
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.datetime
    }

    /// Text for the embedded DateTimeOriginal tag. The tag has second precision.
    pub fn embedded_date_string(&self) -> String {
        self.datetime.format(EMBEDDED_DATE_FORMAT).to_string()
    }

    /// Resolves the wall-clock value against the local zone.
    ///
    /// A value inside a DST fold resolves to the earlier instant; a value that falls in a DST gap
    /// is moved forward by one hour, the same way clocks skip it.
    pub fn to_system_time(&self) -> SystemTime {
        let local = Local
            .from_local_datetime(&self.datetime)
            .earliest()
            .or_else(|| {
                Local
                    .from_local_datetime(&(self.datetime + Duration::hours(1)))
                    .earliest()
            });
        match local {
            Some(dt) => SystemTime::from(dt),
            None => SystemTime::from(self.datetime.and_utc()),
        }
    }
}

impl fmt::Display for ExtractedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.datetime.format("%Y-%m-%dT%H:%M:%S%.3f"))
    }
}

/// Parses a bare file name. Layout A is tried first so it wins any tie.
pub fn parse_filename(file_name: &str) -> Result<ExtractedTimestamp, Rejection> {
    if file_name.trim().is_empty() {
        return Err(Rejection::EmptyOrNull);
    }

    let (layout, caps) = if let Some(caps) = LAYOUT_A.captures(file_name) {
        (FilenameLayout::ResolutionFirst, caps)
    } else if let Some(caps) = LAYOUT_B.captures(file_name) {
        (FilenameLayout::TimestampFirst, caps)
    } else {
        return Err(Rejection::NoLayoutMatch);
    };

    let width = number(&caps, "width")?;
    let height = number(&caps, "height")?;
    if !is_valid_resolution(width) || !is_valid_resolution(height) {
        return Err(Rejection::ResolutionOutOfRange { width, height });
    }

    let date = NaiveDate::from_ymd_opt(
        number(&caps, "year")? as i32,
        number(&caps, "month")?,
        number(&caps, "day")?,
    )
    .ok_or(Rejection::InvalidCalendarDate)?;
    let time = NaiveTime::from_hms_milli_opt(
        number(&caps, "hour")?,
        number(&caps, "minute")?,
        number(&caps, "second")?,
        number(&caps, "millis")?,
    )
    .ok_or(Rejection::InvalidCalendarDate)?;

    Ok(ExtractedTimestamp {
        layout,
        width,
        height,
        datetime: NaiveDateTime::new(date, time),
    })
}

/// Parses the file name component of `path`.
pub fn parse_path(path: &Path) -> Result<ExtractedTimestamp, Rejection> {
    let Some(name) = path.file_name() else {
        return Err(Rejection::EmptyOrNull);
    };
    parse_filename(&name.to_string_lossy())
}

fn number(caps: &Captures<'_>, group: &str) -> Result<u32, Rejection> {
    caps.name(group)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or(Rejection::NoLayoutMatch)
}

fn is_valid_resolution(value: u32) -> bool {
    (MIN_RESOLUTION..=MAX_RESOLUTION).contains(&value)
}
