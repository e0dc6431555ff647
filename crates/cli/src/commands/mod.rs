//! CLI Commands

pub mod approve;
pub mod init;
pub mod profiles;
pub mod run;
pub mod targets;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::debug;

use pagediff_engine::{LineFileSource, PageListSource, RunConfig, SitemapSource, TargetSource};

/// Where target URLs come from; exactly one source is required
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Text file with one URL per line
    #[arg(long, value_name = "FILE", conflicts_with_all = ["sitemap", "pages"])]
    pub urls: Option<PathBuf>,

    /// Local sitemap XML file
    #[arg(long, value_name = "FILE", conflicts_with = "pages")]
    pub sitemap: Option<PathBuf>,

    /// JSON page list with URL fragments and identifiers
    #[arg(long, value_name = "FILE")]
    pub pages: Option<PathBuf>,

    /// Base URL joined to relative page list fragments
    #[arg(long, env = "PAGEDIFF_BASE_URL")]
    pub base_url: Option<String>,
}

impl SourceArgs {
    pub fn build(&self) -> Result<Box<dyn TargetSource>> {
        match (&self.urls, &self.sitemap, &self.pages) {
            (Some(path), None, None) => Ok(Box::new(LineFileSource::new(path))),
            (None, Some(path), None) => Ok(Box::new(SitemapSource::new(path))),
            (None, None, Some(path)) => {
                let source = PageListSource::new(path);
                Ok(Box::new(match &self.base_url {
                    Some(base) => source.with_base_url(base),
                    None => source,
                }))
            }
            (None, None, None) => bail!("A URL source is required: --urls, --sitemap or --pages"),
            _ => bail!("Only one of --urls, --sitemap or --pages may be given"),
        }
    }
}

/// Image store roots
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Root directory for baseline images
    #[arg(long, value_name = "DIR", env = "PAGEDIFF_BASELINE_ROOT")]
    pub baseline_root: Option<PathBuf>,

    /// Root directory for this run's images and diffs
    #[arg(long, value_name = "DIR", env = "PAGEDIFF_CANDIDATE_ROOT")]
    pub candidate_root: Option<PathBuf>,
}

impl StoreArgs {
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(root) = &self.baseline_root {
            config.baseline_root = root.clone();
        }
        if let Some(root) = &self.candidate_root {
            config.candidate_root = root.clone();
        }
    }
}

/// Load the config file, falling back to defaults when it does not exist
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if path.exists() {
        debug!("Loading config from {}", path.display());
    } else {
        debug!("No config at {}, using defaults", path.display());
    }
    RunConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}
