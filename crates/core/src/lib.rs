mod access;
mod config;
mod embedded;
mod filename;
mod outcome;
mod processor;
mod retry;
mod scan;
mod timestamps;

pub use access::{with_write_access, WriteAccess};
pub use config::{app_paths, load_config, save_config, AppConfig, AppPaths, SyncOptions};
pub use embedded::{
    read_embedded_date, rewrite_embedded_date, rewrite_embedded_date_status,
    rewrite_embedded_date_to, RewriteStatus,
};
pub use filename::{
    parse_filename, parse_path, ExtractedTimestamp, FilenameLayout, Rejection, MAX_RESOLUTION,
    MIN_RESOLUTION,
};
pub use outcome::{BatchSummary, FailureKind, ProcessOutcome, ProcessStatus};
pub use processor::{process_batch, process_file, BatchEvent, ProcessOptions};
pub use retry::{retry, RetryPolicy};
pub use scan::{collect_targets, is_supported_image, ScanResult, ScanStats};
pub use timestamps::{sync_timestamps, FileTimestampState, SyncResult};
