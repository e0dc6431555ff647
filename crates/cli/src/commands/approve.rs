//! Approve Command

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use pagediff_engine::approve_candidates;

use super::{load_config, StoreArgs};
use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Args, Debug, Clone)]
pub struct ApproveArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Profile whose candidates to approve (repeatable; defaults to the configured profiles)
    #[arg(short, long = "profile", value_name = "NAME")]
    pub profiles: Vec<String>,

    /// Target identifier to approve (repeatable; defaults to every candidate)
    #[arg(short, long = "target", value_name = "ID")]
    pub targets: Vec<String>,
}

#[derive(Serialize)]
pub struct PromotedDisplay {
    pub baseline: String,
}

impl TableDisplay for PromotedDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Promoted baseline"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.baseline.clone()]
    }
}

pub async fn execute(args: ApproveArgs, config_path: &Path, format: OutputFormat) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    let profiles = if args.profiles.is_empty() {
        config.profiles.clone()
    } else {
        args.profiles
    };

    let promoted = approve_candidates(&config.store(), &profiles, &args.targets).await?;
    let rows: Vec<PromotedDisplay> = promoted
        .iter()
        .map(|p| PromotedDisplay {
            baseline: p.display().to_string(),
        })
        .collect();

    print_list(&rows, format);
    if !format.is_machine() {
        print_success(&format!("Approved {} image(s)", rows.len()));
    }
    Ok(())
}
