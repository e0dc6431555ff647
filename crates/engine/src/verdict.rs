//! Per-task outcomes and their aggregation into a run verdict

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::{DiffOutcome, DiffResult};
use crate::error::{FailureKind, RegressionError};
use crate::target::Target;

/// Which workflow a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Capture targets into the baseline store
    Record,
    /// Capture candidates and diff them against the baseline
    Compare,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Record => "record",
            RunMode::Compare => "compare",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Passed,
    Failed,
    /// Not finished because the run was cancelled
    Skipped,
}

/// Outcome of one (target, profile) pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub profile: String,
    pub identifier: String,
    pub url: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Image written by this task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffResult>,
    pub duration_ms: u64,
}

impl TaskReport {
    pub fn new(profile: &str, target: &Target) -> Self {
        Self {
            profile: profile.to_string(),
            identifier: target.identifier.clone(),
            url: target.url.clone(),
            status: TaskStatus::Passed,
            failure: None,
            message: None,
            capture: None,
            diff: None,
            duration_ms: 0,
        }
    }

    pub fn with_capture(mut self, path: PathBuf) -> Self {
        self.capture = Some(path);
        self
    }

    /// Attach a diff; anything other than a match fails the task
    pub fn with_diff(mut self, diff: DiffResult) -> Self {
        match &diff.outcome {
            DiffOutcome::Match => {}
            DiffOutcome::PixelsDiffer {
                diff_pixels,
                total_pixels,
                ..
            } => {
                self.status = TaskStatus::Failed;
                self.failure = Some(FailureKind::PixelDiff);
                self.message = Some(format!("{} of {} pixels differ", diff_pixels, total_pixels));
            }
            DiffOutcome::DimensionMismatch => {
                self.status = TaskStatus::Failed;
                self.failure = Some(FailureKind::DimensionMismatch);
                self.message = Some(format!(
                    "baseline is {}, candidate is {}",
                    diff.baseline, diff.candidate
                ));
            }
        }
        self.diff = Some(diff);
        self
    }

    /// Record an error; cancellation marks the task skipped rather than failed
    pub fn with_error(mut self, error: &RegressionError) -> Self {
        self.status = match error {
            RegressionError::Cancelled => TaskStatus::Skipped,
            _ => TaskStatus::Failed,
        };
        self.failure = Some(error.kind());
        self.message = Some(error.to_string());
        self
    }

    pub fn skipped(self) -> Self {
        self.with_error(&RegressionError::Cancelled)
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn diff_artifact(&self) -> Option<&PathBuf> {
        match self.diff.as_ref().map(|d| &d.outcome) {
            Some(DiffOutcome::PixelsDiffer { diff_image, .. }) => Some(diff_image),
            _ => None,
        }
    }
}

/// Aggregate outcome of one run.
///
/// Built by a commutative fold: the same set of reports in any order yields
/// the same verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunVerdict {
    pub mode: RunMode,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub diff_artifacts: Vec<PathBuf>,
    /// Sorted by (profile, identifier)
    pub tasks: Vec<TaskReport>,
}

impl RunVerdict {
    pub fn from_reports<I>(mode: RunMode, reports: I, cancelled: bool) -> Self
    where
        I: IntoIterator<Item = TaskReport>,
    {
        let mut verdict = Self {
            mode,
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            cancelled,
            failures_by_kind: BTreeMap::new(),
            diff_artifacts: Vec::new(),
            tasks: Vec::new(),
        };

        for report in reports {
            verdict.total += 1;
            match report.status {
                TaskStatus::Passed => verdict.passed += 1,
                TaskStatus::Failed => verdict.failed += 1,
                TaskStatus::Skipped => verdict.skipped += 1,
            }
            if report.status == TaskStatus::Failed {
                if let Some(kind) = report.failure {
                    *verdict.failures_by_kind.entry(kind).or_default() += 1;
                }
            }
            if let Some(path) = report.diff_artifact() {
                verdict.diff_artifacts.push(path.clone());
            }
            verdict.tasks.push(report);
        }

        verdict.diff_artifacts.sort();
        verdict
            .tasks
            .sort_by(|a, b| (&a.profile, &a.identifier).cmp(&(&b.profile, &b.identifier)));
        verdict
    }

    /// Pass iff the run completed and every task passed
    pub fn is_pass(&self) -> bool {
        !self.cancelled && self.failed == 0 && self.skipped == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Failed)
    }
}

/// Persisted run report (`report.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub baseline_root: PathBuf,
    pub candidate_root: PathBuf,
    pub profiles: Vec<String>,
    pub verdict: RunVerdict,
}

impl RunReport {
    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }
}
