//! Targets Command

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use pagediff_engine::target::enumerate_targets;
use pagediff_engine::{Role, Target};

use super::{load_config, SourceArgs, StoreArgs};
use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct TargetsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Profile to check baselines for (repeatable; defaults to the configured profiles)
    #[arg(short, long = "profile", value_name = "NAME")]
    pub profiles: Vec<String>,
}

/// Target display wrapper for serialization
#[derive(Serialize)]
pub struct TargetDisplay {
    pub identifier: String,
    pub url: String,
    /// Profiles that already have a baseline for this target
    pub baselines: Vec<String>,
    /// Identifier the URL had before colliding with another URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_identifier: Option<String>,
    #[serde(skip)]
    profile_count: usize,
}

impl TableDisplay for TargetDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Identifier", "URL", "Baselines", "Note"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.identifier.clone(),
            self.url.clone(),
            format!("{}/{}", self.baselines.len(), self.profile_count),
            self.shared_identifier
                .as_ref()
                .map(|shared| format!("renamed from {} (collision)", shared))
                .unwrap_or_default(),
        ]
    }
}

pub async fn execute(args: TargetsArgs, config_path: &Path, format: OutputFormat) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);
    if !args.profiles.is_empty() {
        config.profiles = args.profiles.clone();
    }

    let profiles = config.registry()?.resolve_all(&config.profiles)?;
    let source = args.source.build()?;
    let targets: Vec<Target> = enumerate_targets(source.as_ref())?;
    let store = config.store();

    let mut rows = Vec::with_capacity(targets.len());
    for target in targets {
        let mut baselines = Vec::new();
        for profile in &profiles {
            if store.exists(Role::Baseline, &profile.name, &target.identifier).await {
                baselines.push(profile.name.clone());
            }
        }
        rows.push(TargetDisplay {
            identifier: target.identifier,
            url: target.url,
            baselines,
            shared_identifier: target.shared_identifier,
            profile_count: profiles.len(),
        });
    }

    print_list(&rows, format);
    Ok(())
}
