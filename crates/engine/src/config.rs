//! Run configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diff::DiffConfig;
use crate::driver::{NavigateOptions, ReadySignal};
use crate::error::{RegressionError, RegressionResult};
use crate::playwright::{Browser, PlaywrightConfig};
use crate::profile::{ProfileRegistry, ViewportProfile};
use crate::store::ImageStore;

/// Regression run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Root of the baseline image store
    pub baseline_root: PathBuf,

    /// Root of this run's candidate images and diff artifacts
    pub candidate_root: PathBuf,

    /// Maximum simultaneously open browsing contexts
    pub concurrency: usize,

    /// Viewport profile names to capture under
    pub profiles: Vec<String>,

    /// Cancel the run after this many seconds
    pub deadline_secs: Option<u64>,

    pub capture: CaptureSettings,

    pub diff: DiffConfig,

    /// Extra viewport profiles, overriding built-ins of the same name
    pub custom_profiles: Vec<ViewportProfile>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            baseline_root: PathBuf::from("screenshots-originals"),
            candidate_root: PathBuf::from("screenshots-current"),
            concurrency: 4,
            profiles: vec!["large_desktop_screen".to_string(), "laptop_screen".to_string()],
            deadline_secs: None,
            capture: CaptureSettings::default(),
            diff: DiffConfig::default(),
            custom_profiles: Vec::new(),
        }
    }
}

/// Browser capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Navigation timeout per target
    pub navigation_timeout_ms: u64,

    /// Page state awaited before capturing
    pub ready_signal: ReadySignal,

    /// Time an in-flight capture gets to stop after cancellation
    pub cancel_grace_ms: u64,

    /// Node.js executable used to run Playwright
    pub node_command: String,

    /// Module directory exported to node as `NODE_PATH`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_path: Option<PathBuf>,

    pub browser: Browser,

    pub headless: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            ready_signal: ReadySignal::DomContentLoaded,
            cancel_grace_ms: 5_000,
            node_command: "node".to_string(),
            node_path: None,
            browser: Browser::Chromium,
            headless: true,
        }
    }
}

impl CaptureSettings {
    pub fn navigate_options(&self) -> NavigateOptions {
        NavigateOptions {
            timeout: Duration::from_millis(self.navigation_timeout_ms),
            ready_signal: self.ready_signal,
        }
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn playwright(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            node_command: self.node_command.clone(),
            node_path: self.node_path.clone(),
            browser: self.browser,
            headless: self.headless,
            grace_period: self.cancel_grace(),
            ..PlaywrightConfig::default()
        }
    }
}

impl RunConfig {
    /// Load configuration from file; a missing file yields defaults
    pub fn load(path: &Path) -> RegressionResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| RegressionError::storage(path, e))?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> RegressionResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RegressionError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RegressionError::storage(parent, e))?;
            }
        }
        std::fs::write(path, content).map_err(|e| RegressionError::storage(path, e))?;
        Ok(())
    }

    /// Concurrency limit, never below one
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn store(&self) -> ImageStore {
        ImageStore::new(&self.baseline_root, &self.candidate_root)
    }

    pub fn registry(&self) -> RegressionResult<ProfileRegistry> {
        ProfileRegistry::with_custom(&self.custom_profiles)
    }

    /// Reject configurations a run cannot start with
    pub fn validate(&self) -> RegressionResult<()> {
        self.diff.validate()?;

        if self.baseline_root == self.candidate_root {
            return Err(RegressionError::Config(format!(
                "Baseline and candidate roots must differ (both are {})",
                self.baseline_root.display()
            )));
        }

        // Unknown and duplicate names are rejected here too
        self.registry()?.resolve_all(&self.profiles)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.baseline_root, PathBuf::from("screenshots-originals"));
        assert_eq!(config.candidate_root, PathBuf::from("screenshots-current"));
        assert_eq!(config.capture.ready_signal, ReadySignal::DomContentLoaded);
        assert_eq!(config.diff.threshold, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
concurrency = 8
profiles = ["1920x1080", "tablet"]

[diff]
threshold = 0.2

[capture]
ready_signal = "network_idle"

[[custom_profiles]]
name = "tablet"
width = 800
height = 1280
"#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.diff.threshold, 0.2);
        assert_eq!(config.diff.diff_color, [255, 0, 0, 255]);
        assert_eq!(config.capture.ready_signal, ReadySignal::NetworkIdle);
        assert_eq!(config.capture.navigation_timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("pagediff.toml");
        let config = RunConfig {
            deadline_secs: Some(600),
            ..RunConfig::default()
        };

        config.save(&path).unwrap();
        assert_eq!(RunConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_threshold = RunConfig {
            diff: DiffConfig {
                threshold: 2.0,
                ..DiffConfig::default()
            },
            ..RunConfig::default()
        };
        assert!(matches!(bad_threshold.validate(), Err(RegressionError::Config(_))));

        let no_profiles = RunConfig {
            profiles: vec![],
            ..RunConfig::default()
        };
        assert!(no_profiles.validate().is_err());

        let unknown = RunConfig {
            profiles: vec!["commodore_64".to_string()],
            ..RunConfig::default()
        };
        assert!(unknown.validate().is_err());

        let same_roots = RunConfig {
            candidate_root: PathBuf::from("screenshots-originals"),
            ..RunConfig::default()
        };
        assert!(same_roots.validate().is_err());
    }

    #[test]
    fn test_concurrency_clamped() {
        let config = RunConfig {
            concurrency: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }
}
