//! pagediff screenshot regression engine
//!
//! Captures every target URL under every selected viewport profile and
//! compares the captures pixel by pixel against a stored baseline:
//! - Enumerates targets from line files, sitemaps and JSON page lists
//! - Drives Playwright through a per-context node bridge
//! - Bounds simultaneously open browsing contexts
//! - Writes diff images only for targets that changed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RegressionRunner                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run(mode, source) -> RunReport                             │
//! │    ├── enumerate_targets(source) -> [Target]                │
//! │    ├── ImageStore::ensure_layout(role, profiles)            │
//! │    ├── per (target, profile), at most K at once:            │
//! │    │     ├── Capturer::capture(target, profile, role)       │
//! │    │     └── Differ::diff(baseline, candidate)  [compare]   │
//! │    └── RunVerdict::from_reports(..) -> report.json          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CaptureDriver: open / navigate / capture_full_page / close │
//! │    └── PlaywrightDriver (node + JSON lines)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod diff;
pub mod driver;
pub mod error;
pub mod playwright;
pub mod profile;
pub mod record;
pub mod runner;
pub mod source;
pub mod store;
pub mod target;
pub mod verdict;

pub use config::RunConfig;
pub use diff::{DiffConfig, DiffOutcome, DiffResult, Differ};
pub use driver::{CaptureDriver, NavigateOptions, NavigationOutcome, ReadySignal};
pub use error::{FailureKind, RegressionError, RegressionResult};
pub use playwright::{PlaywrightConfig, PlaywrightDriver};
pub use profile::{ProfileRegistry, ViewportProfile};
pub use record::{CaptureRecord, Dimensions, RawImage};
pub use runner::{approve_candidates, RegressionRunner, RunEvent, RunPhase};
pub use source::{LineFileSource, PageListSource, SitemapSource, SourceEntry, StaticSource, TargetSource};
pub use store::{ImageStore, Role};
pub use target::Target;
pub use verdict::{RunMode, RunReport, RunVerdict, TaskReport, TaskStatus};
