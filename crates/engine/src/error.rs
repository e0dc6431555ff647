//! Error types for regression runs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Dimensions;

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error("Cannot read URL source {source_name}: {reason}")]
    SourceRead { source_name: String, reason: String },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Capture of {url} timed out after {timeout_ms} ms")]
    CaptureTimeout { url: String, timeout_ms: u64 },

    #[error("Baseline not found: {0}")]
    MissingBaseline(PathBuf),

    #[error("Dimension mismatch: baseline {baseline}, candidate {candidate}")]
    DimensionMismatch {
        baseline: Dimensions,
        candidate: Dimensions,
    },

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt image {path}: {reason}")]
    CorruptImage { path: PathBuf, reason: String },

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type RegressionResult<T> = Result<T, RegressionError>;

impl RegressionError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn source_read(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceRead {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error for per-target reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SourceRead { .. } => FailureKind::SourceRead,
            Self::Navigation { .. } => FailureKind::Navigation,
            Self::CaptureTimeout { .. } => FailureKind::CaptureTimeout,
            Self::MissingBaseline(_) => FailureKind::MissingBaseline,
            Self::DimensionMismatch { .. } => FailureKind::DimensionMismatch,
            Self::Storage { .. } | Self::Io(_) => FailureKind::Storage,
            Self::CorruptImage { .. } | Self::Image(_) => FailureKind::CorruptImage,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Task(_) => FailureKind::Internal,
            Self::Driver(_) | Self::Json(_) => FailureKind::Driver,
            Self::Config(_) | Self::Toml(_) => FailureKind::Config,
        }
    }
}

/// Failure classification carried in reports and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceRead,
    Navigation,
    CaptureTimeout,
    MissingBaseline,
    DimensionMismatch,
    PixelDiff,
    Storage,
    CorruptImage,
    Driver,
    Config,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SourceRead => "source_read",
            FailureKind::Navigation => "navigation",
            FailureKind::CaptureTimeout => "capture_timeout",
            FailureKind::MissingBaseline => "missing_baseline",
            FailureKind::DimensionMismatch => "dimension_mismatch",
            FailureKind::PixelDiff => "pixel_diff",
            FailureKind::Storage => "storage",
            FailureKind::CorruptImage => "corrupt_image",
            FailureKind::Driver => "driver",
            FailureKind::Config => "config",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = RegressionError::CaptureTimeout {
            url: "https://a.example/".into(),
            timeout_ms: 10,
        };
        assert_eq!(err.kind(), FailureKind::CaptureTimeout);
        assert_eq!(RegressionError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(
            serde_json::to_string(&FailureKind::MissingBaseline).unwrap(),
            "\"missing_baseline\""
        );
    }
}
