//! End-to-end regression runs against a scripted in-memory browser

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use pagediff_engine::record::encode_png;
use pagediff_engine::{
    approve_candidates, CaptureDriver, FailureKind, NavigateOptions, NavigationOutcome, RawImage,
    RegressionError, RegressionResult, RegressionRunner, Role, RunConfig, RunEvent, RunMode,
    RunPhase, StaticSource, TaskStatus, ViewportProfile,
};

#[derive(Debug, Clone)]
enum Page {
    Rendered {
        width: u32,
        height: u32,
        marks: Vec<(u32, u32)>,
    },
    Unreachable,
    Hang,
}

impl Page {
    fn plain(width: u32, height: u32) -> Self {
        Page::Rendered {
            width,
            height,
            marks: Vec::new(),
        }
    }

    fn render(&self) -> Option<RgbaImage> {
        match self {
            Page::Rendered { width, height, marks } => {
                let mut img = RgbaImage::from_pixel(*width, *height, Rgba([255, 255, 255, 255]));
                for &(x, y) in marks {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
                Some(img)
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct SiteState {
    pages: Mutex<HashMap<String, Page>>,
    visits: Mutex<Vec<String>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
    opened_total: AtomicUsize,
    navigation_delay: Mutex<Duration>,
    /// When set, every open checks that all earlier pipelines left their diff here
    diff_dir: Mutex<Option<PathBuf>>,
    early_opens: AtomicUsize,
}

/// Serves pages from a map; tracks how many contexts are open at once.
#[derive(Clone, Default)]
struct ScriptedSite {
    state: Arc<SiteState>,
}

impl ScriptedSite {
    fn with_pages(pages: &[(&str, Page)]) -> Self {
        let site = Self::default();
        for (url, page) in pages {
            site.set_page(url, page.clone());
        }
        site
    }

    fn set_page(&self, url: &str, page: Page) {
        self.state.pages.lock().insert(url.to_string(), page);
    }

    fn set_delay(&self, delay: Duration) {
        *self.state.navigation_delay.lock() = delay;
    }

    fn visited(&self, url: &str) -> bool {
        self.state.visits.lock().iter().any(|v| v == url)
    }

    fn max_open(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    fn open_now(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }
}

struct ScriptedContext {
    page: Option<Page>,
}

#[async_trait::async_trait]
impl CaptureDriver for ScriptedSite {
    type Context = ScriptedContext;

    async fn open(&self, _profile: &ViewportProfile) -> RegressionResult<ScriptedContext> {
        let now = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(now, Ordering::SeqCst);
        let earlier = self.state.opened_total.fetch_add(1, Ordering::SeqCst);
        if let Some(dir) = self.state.diff_dir.lock().as_ref() {
            let diffs = std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0);
            if diffs < earlier {
                self.state.early_opens.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(ScriptedContext { page: None })
    }

    async fn navigate(
        &self,
        context: &mut ScriptedContext,
        url: &str,
        _options: &NavigateOptions,
    ) -> RegressionResult<NavigationOutcome> {
        self.state.visits.lock().push(url.to_string());
        let delay = *self.state.navigation_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let page = self.state.pages.lock().get(url).cloned();
        match page {
            Some(Page::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Page::Unreachable) | None => Err(RegressionError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            }),
            Some(page) => {
                context.page = Some(page);
                Ok(NavigationOutcome { status: Some(200) })
            }
        }
    }

    async fn capture_full_page(&self, context: &mut ScriptedContext) -> RegressionResult<RawImage> {
        let img = context
            .page
            .as_ref()
            .and_then(Page::render)
            .ok_or_else(|| RegressionError::Driver("nothing to capture".to_string()))?;
        Ok(RawImage::new(encode_png(&img)?))
    }

    async fn close(&self, _context: ScriptedContext) -> RegressionResult<()> {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

const HOME: &str = "https://a.example/";
const ABOUT: &str = "https://a.example/about";
const CARS: &str = "https://a.example/cars";

fn config(tmp: &TempDir, profiles: &[&str]) -> RunConfig {
    RunConfig {
        baseline_root: tmp.path().join("baseline"),
        candidate_root: tmp.path().join("current"),
        profiles: profiles.iter().map(|p| p.to_string()).collect(),
        ..RunConfig::default()
    }
}

fn runner(config: RunConfig, site: &ScriptedSite) -> RegressionRunner<ScriptedSite> {
    RegressionRunner::new(config, site.clone()).unwrap()
}

fn source(urls: &[&str]) -> StaticSource {
    StaticSource::new(urls.iter().copied())
}

fn two_page_site() -> ScriptedSite {
    ScriptedSite::with_pages(&[(HOME, Page::plain(32, 48)), (ABOUT, Page::plain(32, 64))])
}

#[tokio::test]
async fn record_writes_baselines_per_profile() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["1920x1080"]);

    let report = runner(config, &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    assert!(report.is_pass());
    assert_eq!(report.verdict.total, 2);
    assert!(tmp.path().join("baseline/1920x1080/a-example.png").is_file());
    assert!(tmp.path().join("baseline/1920x1080/a-example-about.png").is_file());
    assert!(tmp.path().join("baseline/report.json").is_file());
    assert!(!tmp.path().join("current").exists());
}

#[tokio::test]
async fn compare_against_unchanged_site_passes() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["1920x1080", "ipad"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert!(report.is_pass());
    assert_eq!(verdict.total, 4);
    assert_eq!(verdict.passed, 4);
    assert!(verdict.diff_artifacts.is_empty());
    assert!(tmp.path().join("current/ipad/a-example-about.png").is_file());
    assert_eq!(
        std::fs::read_dir(tmp.path().join("current/ipad/diff")).unwrap().count(),
        0
    );

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("current/report.json")).unwrap())
            .unwrap();
    assert_eq!(written["verdict"]["passed"], 4);
}

#[tokio::test]
async fn missing_baseline_fails_only_that_target() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    site.set_page(CARS, Page::plain(32, 32));
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    site.state.visits.lock().clear();

    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT, CARS]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert!(!report.is_pass());
    assert_eq!(verdict.passed, 2);
    assert_eq!(verdict.failed, 1);
    assert_eq!(verdict.failures_by_kind[&FailureKind::MissingBaseline], 1);

    let cars = verdict.tasks.iter().find(|t| t.identifier == "a-example-cars").unwrap();
    assert_eq!(cars.status, TaskStatus::Failed);
    assert!(!site.visited(CARS), "missing baselines are reported before capture");
}

#[tokio::test]
async fn changed_pixels_produce_diff_artifact() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    site.set_page(
        ABOUT,
        Page::Rendered {
            width: 32,
            height: 64,
            marks: vec![(3, 3), (20, 40), (31, 63)],
        },
    );
    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert!(!report.is_pass());
    assert_eq!(verdict.failures_by_kind[&FailureKind::PixelDiff], 1);

    let diff_image = tmp.path().join("current/laptop_screen/diff/a-example-about.png");
    assert_eq!(verdict.diff_artifacts, vec![diff_image.clone()]);
    assert!(diff_image.is_file());

    let about = verdict.tasks.iter().find(|t| t.identifier == "a-example-about").unwrap();
    assert_eq!(about.diff.as_ref().and_then(|d| d.diff_pixels()), Some(3));
    // The candidate image is kept for inspection either way
    assert!(tmp.path().join("current/laptop_screen/a-example-about.png").is_file());
    assert!(!tmp.path().join("current/laptop_screen/diff/a-example.png").exists());
}

#[tokio::test]
async fn dimension_change_is_not_a_pixel_count() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME]))
        .await
        .unwrap();
    site.set_page(HOME, Page::plain(32, 50));

    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME]))
        .await
        .unwrap();

    let task = &report.verdict.tasks[0];
    assert_eq!(task.failure, Some(FailureKind::DimensionMismatch));
    assert_eq!(task.diff.as_ref().and_then(|d| d.diff_pixels()), None);
    assert!(report.verdict.diff_artifacts.is_empty());
}

#[tokio::test]
async fn navigation_failure_does_not_hide_other_results() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    site.set_page(CARS, Page::Unreachable);
    let config = config(&tmp, &["laptop_screen"]);

    let report = runner(config, &site)
        .run(RunMode::Record, &source(&[HOME, CARS, ABOUT]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert_eq!(verdict.total, 3);
    assert_eq!(verdict.passed, 2);
    assert_eq!(verdict.failures_by_kind[&FailureKind::Navigation], 1);
    assert!(tmp.path().join("baseline/laptop_screen/a-example-about.png").is_file());
    assert!(!tmp.path().join("baseline/laptop_screen/a-example-cars.png").exists());
}

#[tokio::test]
async fn open_contexts_never_exceed_concurrency() {
    let tmp = TempDir::new().unwrap();
    let urls: Vec<String> = (0..12).map(|i| format!("https://a.example/page/{}", i)).collect();
    let site = ScriptedSite::default();
    for url in &urls {
        site.set_page(url, Page::plain(8, 8));
    }
    site.set_delay(Duration::from_millis(20));

    let config = RunConfig {
        concurrency: 3,
        ..config(&tmp, &["laptop_screen", "ipad"])
    };
    let report = runner(config, &site)
        .run(RunMode::Record, &StaticSource::new(urls.clone()))
        .await
        .unwrap();

    assert!(report.is_pass());
    assert_eq!(report.verdict.total, 24);
    assert!(site.max_open() <= 3, "saw {} open contexts", site.max_open());
    assert!(site.max_open() >= 2);
    assert_eq!(site.open_now(), 0);
}

#[tokio::test]
async fn hanging_navigation_times_out() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    site.set_page(CARS, Page::Hang);

    let mut config = config(&tmp, &["laptop_screen"]);
    config.capture.navigation_timeout_ms = 50;
    config.capture.cancel_grace_ms = 50;

    let report = runner(config, &site)
        .run(RunMode::Record, &source(&[HOME, CARS]))
        .await
        .unwrap();

    assert_eq!(report.verdict.passed, 1);
    assert_eq!(report.verdict.failures_by_kind[&FailureKind::CaptureTimeout], 1);
    assert_eq!(site.open_now(), 0);
}

#[tokio::test]
async fn cancellation_reports_partial_verdict() {
    let tmp = TempDir::new().unwrap();
    let site = ScriptedSite::with_pages(&[
        (HOME, Page::plain(16, 16)),
        (ABOUT, Page::Hang),
        (CARS, Page::plain(16, 16)),
    ]);

    let config = RunConfig {
        concurrency: 1,
        ..config(&tmp, &["laptop_screen"])
    };
    let runner = runner(config, &site);
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let report = runner
        .run(RunMode::Record, &source(&[HOME, ABOUT, CARS]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert!(verdict.cancelled);
    assert!(!report.is_pass());
    assert_eq!(verdict.total, 3);
    assert_eq!(verdict.passed + verdict.skipped, 3);
    assert!(verdict.skipped >= 1);
    assert_eq!(verdict.failed, 0);
    assert_eq!(site.open_now(), 0);

    let about = verdict.tasks.iter().find(|t| t.identifier == "a-example-about").unwrap();
    assert_eq!(about.status, TaskStatus::Skipped);
}

#[tokio::test]
async fn events_follow_run_phases() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    runner(config, &site)
        .with_events(tx)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    let mut phases = Vec::new();
    let mut finished = 0;
    let mut announced = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::Phase(phase) => phases.push(phase),
            RunEvent::TargetsEnumerated { tasks, .. } => announced = Some(tasks),
            RunEvent::TaskFinished(_) => finished += 1,
        }
    }

    assert_eq!(announced, Some(2));
    assert_eq!(finished, 2);
    assert_eq!(
        phases,
        vec![
            RunPhase::Idle,
            RunPhase::EnumeratingTargets,
            RunPhase::CapturingCandidate,
            RunPhase::Diffing,
            RunPhase::Reporting,
            RunPhase::Done,
        ]
    );
}

#[tokio::test]
async fn approve_promotes_candidates() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    site.set_page(HOME, Page::plain(32, 40));

    let failing = runner(config.clone(), &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    assert!(!failing.is_pass());

    let promoted = approve_candidates(
        &config.store(),
        &["laptop_screen".to_string()],
        &["a-example".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(
        promoted,
        vec![config.store().resolve_path(Role::Baseline, "laptop_screen", "a-example")]
    );

    let passing = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    assert!(passing.is_pass());
}

#[tokio::test]
async fn unreadable_source_aborts_before_capture() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    let err = runner(config, &site)
        .run(RunMode::Record, &source(&[HOME, "ftp://a.example/file"]))
        .await
        .unwrap_err();

    assert!(matches!(err, RegressionError::SourceRead { .. }));
    assert_eq!(site.state.opened_total.load(Ordering::SeqCst), 0);
    assert!(!tmp.path().join("baseline").exists());
}

#[tokio::test]
async fn compare_discards_candidates_from_earlier_runs() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    runner(config.clone(), &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    let stale = tmp.path().join("current/laptop_screen/a-example-about.png");
    assert!(stale.is_file());

    site.set_page(ABOUT, Page::Unreachable);
    let report = runner(config.clone(), &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    assert_eq!(report.verdict.failures_by_kind[&FailureKind::Navigation], 1);
    assert!(!stale.exists(), "a failed capture must not leave the previous run's image");

    let promoted = approve_candidates(&config.store(), &["laptop_screen".to_string()], &[])
        .await
        .unwrap();
    assert_eq!(
        promoted,
        vec![config.store().resolve_path(Role::Baseline, "laptop_screen", "a-example")]
    );
}

#[tokio::test]
async fn each_pipeline_finishes_its_diff_before_the_next_opens() {
    let tmp = TempDir::new().unwrap();
    let urls: Vec<String> = (0..4).map(|i| format!("https://a.example/page/{}", i)).collect();
    let site = ScriptedSite::default();
    for url in &urls {
        site.set_page(url, Page::plain(24, 24));
    }

    let config = RunConfig {
        concurrency: 1,
        ..config(&tmp, &["laptop_screen"])
    };
    runner(config.clone(), &site)
        .run(RunMode::Record, &StaticSource::new(urls.clone()))
        .await
        .unwrap();

    for url in &urls {
        site.set_page(
            url,
            Page::Rendered {
                width: 24,
                height: 24,
                marks: vec![(5, 5)],
            },
        );
    }
    site.state.opened_total.store(0, Ordering::SeqCst);
    *site.state.diff_dir.lock() = Some(tmp.path().join("current/laptop_screen/diff"));

    let report = runner(config, &site)
        .run(RunMode::Compare, &StaticSource::new(urls.clone()))
        .await
        .unwrap();

    assert_eq!(report.verdict.failures_by_kind[&FailureKind::PixelDiff], 4);
    assert_eq!(report.verdict.diff_artifacts.len(), 4);
    assert_eq!(site.state.early_opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn corrupt_baseline_is_reported_per_target() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();
    std::fs::write(
        tmp.path().join("baseline/laptop_screen/a-example-about.png"),
        b"definitely not a png",
    )
    .unwrap();

    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert!(!report.is_pass());
    assert_eq!(verdict.passed, 1);
    assert_eq!(verdict.failures_by_kind[&FailureKind::CorruptImage], 1);
    let about = verdict.tasks.iter().find(|t| t.identifier == "a-example-about").unwrap();
    assert_eq!(about.failure, Some(FailureKind::CorruptImage));
}

#[tokio::test]
async fn unwritable_candidate_fails_only_that_target() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    // A directory squatting on the candidate path cannot be replaced by the image
    let blocked = tmp.path().join("current/laptop_screen/a-example-about.png");
    std::fs::create_dir_all(&blocked).unwrap();
    std::fs::write(blocked.join("keep"), b"x").unwrap();

    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[HOME, ABOUT]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert_eq!(verdict.total, 2);
    assert_eq!(verdict.passed, 1);
    assert_eq!(verdict.failures_by_kind[&FailureKind::Storage], 1);
    assert!(tmp.path().join("current/report.json").is_file());
}

#[tokio::test]
async fn empty_compare_still_reports_every_phase() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let config = config(&tmp, &["laptop_screen"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = runner(config, &site)
        .with_events(tx)
        .run(RunMode::Compare, &source(&[]))
        .await
        .unwrap();
    assert_eq!(report.verdict.total, 0);

    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::Phase(phase) = event {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            RunPhase::Idle,
            RunPhase::EnumeratingTargets,
            RunPhase::CapturingCandidate,
            RunPhase::Diffing,
            RunPhase::Reporting,
            RunPhase::Done,
        ]
    );
}

#[tokio::test]
async fn colliding_identifier_reports_missing_baseline() {
    let tmp = TempDir::new().unwrap();
    let site = two_page_site();
    let about_slash = "https://a.example/about/";
    site.set_page(about_slash, Page::plain(32, 64));
    let config = config(&tmp, &["laptop_screen"]);

    runner(config.clone(), &site)
        .run(RunMode::Record, &source(&[ABOUT]))
        .await
        .unwrap();

    let report = runner(config, &site)
        .run(RunMode::Compare, &source(&[ABOUT, about_slash]))
        .await
        .unwrap();

    let verdict = &report.verdict;
    assert_eq!(verdict.failures_by_kind[&FailureKind::MissingBaseline], 2);
    for task in &verdict.tasks {
        assert!(task.identifier.starts_with("a-example-about-"));
    }
}
