//! Record and Compare Commands

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;

use pagediff_engine::playwright::Browser;
use pagediff_engine::runner::REPORT_FILE;
use pagediff_engine::{
    PlaywrightDriver, RegressionRunner, RunConfig, RunEvent, RunMode, RunPhase, RunReport,
    TaskReport, TaskStatus,
};

use super::{load_config, SourceArgs, StoreArgs};
use crate::output::{print_document, print_info, print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Viewport profile to capture under (repeatable)
    #[arg(short, long = "profile", value_name = "NAME")]
    pub profiles: Vec<String>,

    /// Maximum simultaneously open browser contexts
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Colour distance threshold between 0 and 1
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Count anti-aliased pixels as differences
    #[arg(long)]
    pub include_aa: bool,

    /// Navigation timeout per target
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline_secs: Option<u64>,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut RunConfig) -> Result<()> {
        self.store.apply(config);
        if !self.profiles.is_empty() {
            config.profiles = self.profiles.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(threshold) = self.threshold {
            config.diff.threshold = threshold;
        }
        if self.include_aa {
            config.diff.include_aa = true;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.capture.navigation_timeout_ms = timeout_ms;
        }
        if let Some(deadline) = self.deadline_secs {
            config.deadline_secs = Some(deadline);
        }
        if let Some(browser) = &self.browser {
            config.capture.browser = browser.parse::<Browser>()?;
        }
        if self.headed {
            config.capture.headless = false;
        }
        Ok(())
    }
}

/// Task result display wrapper for serialization
#[derive(Serialize)]
pub struct TaskDisplay {
    pub profile: String,
    pub target: String,
    pub status: TaskStatus,
    pub failure: Option<String>,
    pub detail: String,
}

impl From<&TaskReport> for TaskDisplay {
    fn from(task: &TaskReport) -> Self {
        let detail = match (task.status, task.diff_artifact()) {
            (TaskStatus::Failed, Some(diff)) => diff.display().to_string(),
            (TaskStatus::Passed, _) => task
                .capture
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            _ => task.message.clone().unwrap_or_default(),
        };

        Self {
            profile: task.profile.clone(),
            target: task.identifier.clone(),
            status: task.status,
            failure: task.failure.map(|k| k.to_string()),
            detail,
        }
    }
}

impl TableDisplay for TaskDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Profile", "Target", "Status", "Failure", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.status {
            TaskStatus::Passed => "✓ passed",
            TaskStatus::Failed => "✗ failed",
            TaskStatus::Skipped => "- skipped",
        };
        vec![
            self.profile.clone(),
            self.target.clone(),
            status.to_string(),
            self.failure.clone().unwrap_or_default(),
            self.detail.clone(),
        ]
    }
}

fn progress_bar(format: OutputFormat) -> ProgressBar {
    if format.is_machine() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>12.cyan.bold} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn phase_label(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Idle => "Starting",
        RunPhase::EnumeratingTargets => "Enumerating",
        RunPhase::CapturingBaseline => "Recording",
        RunPhase::CapturingCandidate => "Capturing",
        RunPhase::Diffing => "Diffing",
        RunPhase::Reporting => "Reporting",
        RunPhase::Done => "Done",
    }
}

async fn drive_progress(bar: ProgressBar, mut events: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Phase(phase) => bar.set_prefix(phase_label(phase)),
            RunEvent::TargetsEnumerated { tasks, .. } => bar.set_length(tasks as u64),
            RunEvent::TaskFinished(task) => {
                bar.set_message(format!("{}/{}", task.profile, task.identifier));
                bar.inc(1);
            }
        }
    }
    bar.finish_and_clear();
}

/// Execute a record or compare run; returns whether the verdict passed
pub async fn execute(
    mode: RunMode,
    args: RunArgs,
    config_path: &std::path::Path,
    format: OutputFormat,
) -> Result<bool> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config)?;
    let source = args.source.build()?;

    let driver = PlaywrightDriver::new(config.capture.playwright());
    driver.check_available().await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let runner = RegressionRunner::new(config, driver)
        .context("Invalid run configuration")?
        .with_events(tx);

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling in-flight captures...".yellow());
            cancel.cancel();
        }
    });

    let progress = tokio::spawn(drive_progress(progress_bar(format), rx));
    let result = runner.run(mode, source.as_ref()).await;
    // The runner holds the only sender; dropping it ends the progress loop
    drop(runner);
    let _ = progress.await;

    let report = result?;
    print_report(&report, mode, format);
    Ok(report.is_pass())
}

fn print_report(report: &RunReport, mode: RunMode, format: OutputFormat) {
    if print_document(report, format) {
        return;
    }

    let verdict = &report.verdict;
    let rows: Vec<TaskDisplay> = verdict.tasks.iter().map(TaskDisplay::from).collect();
    print_list(&rows, format);

    println!();
    println!(
        "{} {} task(s): {} passed, {} failed, {} skipped ({} ms)",
        "Summary:".bold(),
        verdict.total,
        verdict.passed.to_string().green(),
        verdict.failed.to_string().red(),
        verdict.skipped.to_string().yellow(),
        report.duration_ms
    );

    for (kind, count) in &verdict.failures_by_kind {
        println!("  {:<20} {}", kind.to_string(), count);
    }

    if !verdict.diff_artifacts.is_empty() {
        println!("{}", "Diff images:".bold());
        for path in &verdict.diff_artifacts {
            println!("  {}", path.display());
        }
    }

    let root = match mode {
        RunMode::Record => &report.baseline_root,
        RunMode::Compare => &report.candidate_root,
    };
    print_info(&format!("Report: {}", root.join(REPORT_FILE).display()));

    if verdict.cancelled {
        println!("{}", "Run was cancelled; results are partial.".yellow());
    }

    match (mode, verdict.is_pass()) {
        (_, true) => println!("{}", "PASS".green().bold()),
        (RunMode::Compare, false) if verdict.failed > 0 => println!(
            "{} Review the diffs, then `pagediff approve` to accept candidates from {}",
            "FAIL".red().bold(),
            report.candidate_root.display()
        ),
        (_, false) => println!("{}", "FAIL".red().bold()),
    }
}
