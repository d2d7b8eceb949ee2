use crate::filename::{ExtractedTimestamp, Rejection};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Expected per-file failure classes. None of these abort a batch.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    #[error("ファイルが見つかりません")]
    NotFound,
    #[error("ファイル名から日時を抽出できません")]
    InvalidFilename,
    #[error("読み取り専用属性を解除できません")]
    ReadOnlyBlocked,
    #[error("サポートされていないか破損した画像です")]
    UnsupportedOrCorruptImage,
    #[error("他のプロセスがファイルをロックしています")]
    ExclusiveLockConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ProcessStatus {
    Processed,
    /// The name did not follow the screenshot grammar; the file was not touched.
    Skipped(Rejection),
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub path: PathBuf,
    pub status: ProcessStatus,
    pub timestamp: Option<ExtractedTimestamp>,
    pub creation_updated: bool,
    pub modification_updated: bool,
    pub embedded_date_updated: bool,
    pub message: Option<String>,
}

impl ProcessOutcome {
    pub(crate) fn skipped(path: PathBuf, rejection: Rejection) -> Self {
        let message = Some(format!(
            "{}: {}",
            FailureKind::InvalidFilename,
            rejection
        ));
        Self {
            path,
            status: ProcessStatus::Skipped(rejection),
            timestamp: None,
            creation_updated: false,
            modification_updated: false,
            embedded_date_updated: false,
            message,
        }
    }

    pub(crate) fn failed(
        path: PathBuf,
        kind: FailureKind,
        timestamp: Option<ExtractedTimestamp>,
    ) -> Self {
        Self {
            path,
            status: ProcessStatus::Failed(kind),
            timestamp,
            creation_updated: false,
            modification_updated: false,
            embedded_date_updated: false,
            message: Some(kind.to_string()),
        }
    }

    /// True when the filename parsed and the file was handed to the updaters.
    pub fn is_success(&self) -> bool {
        matches!(self.status, ProcessStatus::Processed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, ProcessStatus::Skipped(_))
    }

    pub fn any_updated(&self) -> bool {
        self.creation_updated || self.modification_updated || self.embedded_date_updated
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errored: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome.status {
            ProcessStatus::Processed => self.processed += 1,
            ProcessStatus::Skipped(_) => self.skipped += 1,
            ProcessStatus::Failed(_) => self.failed += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.errored += 1;
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed + self.errored
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchSummary, FailureKind, ProcessOutcome, ProcessStatus};
    use crate::filename::Rejection;
    use std::path::PathBuf;

    #[test]
    fn skipped_outcome_is_not_a_failure() {
        let outcome = ProcessOutcome::skipped(
            PathBuf::from("not_vrchat_format.jpg"),
            Rejection::NoLayoutMatch,
        );
        assert!(outcome.is_skipped());
        assert!(!outcome.is_success());
        assert!(!outcome.any_updated());
        assert!(outcome
            .message
            .as_deref()
            .is_some_and(|m| m.contains("ファイル名から日時を抽出できません")));
    }

    #[test]
    fn summary_counts_each_status() {
        let mut summary = BatchSummary::default();
        summary.record(&ProcessOutcome::skipped(
            PathBuf::from("a.png"),
            Rejection::NoLayoutMatch,
        ));
        summary.record(&ProcessOutcome::failed(
            PathBuf::from("b.png"),
            FailureKind::NotFound,
            None,
        ));
        summary.record_error();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn status_serializes_with_reason() {
        let status = ProcessStatus::Failed(FailureKind::ExclusiveLockConflict);
        let value = serde_json::to_string(&status).expect("serialize");
        assert_eq!(
            value,
            "{\"status\":\"failed\",\"reason\":\"ExclusiveLockConflict\"}"
        );
    }
}
