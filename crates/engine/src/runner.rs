//! Run orchestration: enumerate, capture, diff, report

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::Capturer;
use crate::config::RunConfig;
use crate::diff::Differ;
use crate::driver::CaptureDriver;
use crate::error::{RegressionError, RegressionResult};
use crate::profile::{validate_profile_name, ProfileRegistry, ViewportProfile};
use crate::record::CaptureRecord;
use crate::source::TargetSource;
use crate::store::{ImageStore, Role};
use crate::target::{enumerate_targets, sanitize_identifier, Target};
use crate::verdict::{RunMode, RunReport, RunVerdict, TaskReport};

pub const REPORT_FILE: &str = "report.json";

/// Lifecycle of a run. `Done` is always reached once targets are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    EnumeratingTargets,
    CapturingBaseline,
    CapturingCandidate,
    /// Every capture has finished; remaining diffs are draining
    Diffing,
    Reporting,
    Done,
}

/// Progress notifications emitted while a run executes
#[derive(Debug, Clone)]
pub enum RunEvent {
    Phase(RunPhase),
    TargetsEnumerated { targets: usize, tasks: usize },
    TaskFinished(TaskReport),
}

#[derive(Clone)]
struct EventSink(Option<mpsc::UnboundedSender<RunEvent>>);

impl EventSink {
    fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.0 {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }

    fn phase(&self, phase: RunPhase) {
        debug!("Run phase: {:?}", phase);
        self.send(RunEvent::Phase(phase));
    }
}

/// Drives regression runs over a capture driver
pub struct RegressionRunner<D: CaptureDriver> {
    config: RunConfig,
    driver: Arc<D>,
    registry: ProfileRegistry,
    cancel: CancellationToken,
    events: EventSink,
}

impl<D: CaptureDriver> RegressionRunner<D> {
    /// Validate `config` and build a runner around `driver`
    pub fn new(config: RunConfig, driver: D) -> RegressionResult<Self> {
        config.validate()?;
        let registry = config.registry()?;
        Ok(Self {
            config,
            driver: Arc::new(driver),
            registry,
            cancel: CancellationToken::new(),
            events: EventSink(None),
        })
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = EventSink(Some(tx));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Token that cancels the run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Execute one run.
    ///
    /// Only enumeration, profile resolution and output layout errors abort the
    /// run; every per-target failure is folded into the verdict.
    pub async fn run(&self, mode: RunMode, source: &dyn TargetSource) -> RegressionResult<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        self.events.phase(RunPhase::Idle);

        self.events.phase(RunPhase::EnumeratingTargets);
        let targets = enumerate_targets(source)?;
        let profiles = self.registry.resolve_all(&self.config.profiles)?;
        let store = self.config.store();
        self.prepare_layout(mode, &store, &profiles).await?;

        let task_count = targets.len() * profiles.len();
        info!(
            "Run {} ({}): {} target(s) x {} profile(s)",
            run_id,
            mode.as_str(),
            targets.len(),
            profiles.len()
        );
        self.events.send(RunEvent::TargetsEnumerated {
            targets: targets.len(),
            tasks: task_count,
        });

        let deadline = self.config.deadline().map(|limit| {
            let token = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        warn!("Deadline of {:?} exceeded, cancelling run", limit);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        self.events.phase(match mode {
            RunMode::Record => RunPhase::CapturingBaseline,
            RunMode::Compare => RunPhase::CapturingCandidate,
        });

        let reports = self.run_tasks(mode, &store, &targets, &profiles).await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        self.events.phase(RunPhase::Reporting);
        let cancelled = self.cancel.is_cancelled();
        let verdict = RunVerdict::from_reports(mode, reports, cancelled);
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            baseline_root: self.config.baseline_root.clone(),
            candidate_root: self.config.candidate_root.clone(),
            profiles: profiles.iter().map(|p| p.name.clone()).collect(),
            verdict,
        };

        let output_root = match mode {
            RunMode::Record => store.root(Role::Baseline),
            RunMode::Compare => store.root(Role::Candidate),
        };
        write_report(output_root, &report).await?;

        let verdict = &report.verdict;
        if verdict.is_pass() {
            info!("Run passed: {} of {} task(s)", verdict.passed, verdict.total);
        } else {
            error!(
                "Run failed: {} passed, {} failed, {} skipped{}",
                verdict.passed,
                verdict.failed,
                verdict.skipped,
                if cancelled { " (cancelled)" } else { "" }
            );
        }

        self.events.phase(RunPhase::Done);
        Ok(report)
    }

    async fn prepare_layout(
        &self,
        mode: RunMode,
        store: &ImageStore,
        profiles: &[Arc<ViewportProfile>],
    ) -> RegressionResult<()> {
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        match mode {
            RunMode::Record => store.ensure_layout(Role::Baseline, &names).await,
            RunMode::Compare => {
                store.ensure_layout(Role::Candidate, &names).await?;
                store.reset_candidates(&names).await?;
                store.reset_diffs(&names).await
            }
        }
    }

    async fn run_tasks(
        &self,
        mode: RunMode,
        store: &ImageStore,
        targets: &[Target],
        profiles: &[Arc<ViewportProfile>],
    ) -> Vec<TaskReport> {
        let capturer = Capturer::new(
            self.driver.clone(),
            store.clone(),
            self.config.capture.navigate_options(),
            self.config.capture.cancel_grace(),
            self.config.effective_concurrency(),
        );
        let differ = Arc::new(Differ::new(self.config.diff.clone()));
        let task_count = targets.len() * profiles.len();
        let captures_left = Arc::new(AtomicUsize::new(task_count));
        // Bounds whole capture-then-diff pipelines, so finished captures
        // cannot pile up waiting for a diff
        let pipelines = Arc::new(Semaphore::new(self.config.effective_concurrency()));

        let mut pending = FuturesUnordered::new();
        for profile in profiles {
            for target in targets {
                let task = TaskContext {
                    mode,
                    capturer: capturer.clone(),
                    differ: differ.clone(),
                    profile: profile.clone(),
                    target: target.clone(),
                    pipelines: pipelines.clone(),
                    cancel: self.cancel.clone(),
                    events: self.events.clone(),
                    captures_left: captures_left.clone(),
                };
                let profile_name = profile.name.clone();
                let target = target.clone();
                let handle = tokio::spawn(task.run());
                pending.push(async move {
                    match handle.await {
                        Ok(report) => report,
                        Err(e) => TaskReport::new(&profile_name, &target)
                            .with_error(&RegressionError::Task(e.to_string())),
                    }
                });
            }
        }

        let mut reports = Vec::with_capacity(pending.len());
        while let Some(report) = pending.next().await {
            self.events.send(RunEvent::TaskFinished(report.clone()));
            reports.push(report);
        }

        // Aborted tasks never count their capture down, and an empty run has none
        if mode == RunMode::Compare && (task_count == 0 || captures_left.load(Ordering::SeqCst) > 0) {
            self.events.phase(RunPhase::Diffing);
        }
        reports
    }
}

/// Everything one (target, profile) pipeline owns
struct TaskContext<D: CaptureDriver> {
    mode: RunMode,
    capturer: Capturer<D>,
    differ: Arc<Differ>,
    profile: Arc<ViewportProfile>,
    target: Target,
    pipelines: Arc<Semaphore>,
    cancel: CancellationToken,
    events: EventSink,
    captures_left: Arc<AtomicUsize>,
}

impl<D: CaptureDriver> TaskContext<D> {
    async fn run(self) -> TaskReport {
        let start = Instant::now();
        let report = TaskReport::new(&self.profile.name, &self.target);

        let slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            slot = self.pipelines.clone().acquire_owned() => slot.ok(),
        };

        let report = match slot {
            Some(_slot) => match self.mode {
                RunMode::Record => self.record(report).await,
                RunMode::Compare => self.compare(report).await,
            },
            None => {
                self.capture_finished();
                report.skipped()
            }
        };

        let report = report.with_duration_ms(start.elapsed().as_millis() as u64);
        match &report.failure {
            Some(kind) => warn!(
                profile = %report.profile,
                target = %report.identifier,
                "{:?} ({}): {}",
                report.status,
                kind,
                report.message.as_deref().unwrap_or_default()
            ),
            None => debug!(profile = %report.profile, target = %report.identifier, "Passed"),
        }
        report
    }

    fn capture_finished(&self) {
        if self.mode == RunMode::Compare && self.captures_left.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.events.phase(RunPhase::Diffing);
        }
    }

    async fn record(&self, report: TaskReport) -> TaskReport {
        match self
            .capturer
            .capture(&self.target, &self.profile, Role::Baseline, &self.cancel)
            .await
        {
            Ok(record) => report.with_capture(record.path),
            Err(e) => report.with_error(&e),
        }
    }

    async fn compare(&self, report: TaskReport) -> TaskReport {
        let store = self.capturer.store();
        let name = &self.profile.name;
        let id = &self.target.identifier;

        if !store.exists(Role::Baseline, name, id).await {
            self.capture_finished();
            if let Some(shared) = &self.target.shared_identifier {
                if store.exists(Role::Baseline, name, shared).await {
                    warn!(
                        profile = %name,
                        target = %id,
                        "Baseline '{}' no longer matches {}: the identifier is now shared with another URL",
                        shared,
                        self.target.url
                    );
                }
            }
            let missing = store.resolve_path(Role::Baseline, name, id);
            return report.with_error(&RegressionError::MissingBaseline(missing));
        }

        let captured = self
            .capturer
            .capture(&self.target, &self.profile, Role::Candidate, &self.cancel)
            .await;
        self.capture_finished();

        let candidate = match captured {
            Ok(record) => record,
            Err(e) => return report.with_error(&e),
        };
        let report = report.with_capture(candidate.path.clone());

        let baseline_path = store.resolve_path(Role::Baseline, name, id);
        let diff_path = store.diff_path(name, id);
        match diff_against_baseline(self.differ.clone(), baseline_path, candidate, diff_path).await {
            Ok(diff) => report.with_diff(diff),
            Err(e) => report.with_error(&e),
        }
    }
}

async fn diff_against_baseline(
    differ: Arc<Differ>,
    baseline_path: PathBuf,
    candidate: CaptureRecord,
    diff_path: PathBuf,
) -> RegressionResult<crate::diff::DiffResult> {
    let bytes = ImageStore::read_image(&baseline_path).await?;
    tokio::task::spawn_blocking(move || {
        let baseline = CaptureRecord::decode(
            Role::Baseline,
            &candidate.profile,
            &candidate.identifier,
            &baseline_path,
            &bytes,
        )?;
        differ.diff(&baseline, &candidate, &diff_path)
    })
    .await
    .map_err(|e| RegressionError::Task(e.to_string()))?
}

async fn write_report(root: &Path, report: &RunReport) -> RegressionResult<PathBuf> {
    let path = root.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| RegressionError::storage(&path, e))?;

    info!("Report written to: {}", path.display());
    Ok(path)
}

/// Promote candidate images into the baseline store.
///
/// With no `identifiers`, every candidate of each profile is promoted.
pub async fn approve_candidates(
    store: &ImageStore,
    profiles: &[String],
    identifiers: &[String],
) -> RegressionResult<Vec<PathBuf>> {
    for id in identifiers {
        if id.is_empty() || sanitize_identifier(id) != *id {
            return Err(RegressionError::Config(format!("Invalid target identifier '{}'", id)));
        }
    }

    let mut promoted = Vec::new();
    for profile in profiles {
        validate_profile_name(profile)?;
        let selected = if identifiers.is_empty() {
            store.list_identifiers(Role::Candidate, profile)?
        } else {
            identifiers.to_vec()
        };

        if selected.is_empty() {
            warn!("No candidates to approve for profile '{}'", profile);
        }
        for id in &selected {
            promoted.push(store.promote(profile, id).await?);
        }
    }

    info!("Approved {} candidate image(s)", promoted.len());
    Ok(promoted)
}
