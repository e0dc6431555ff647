//! Profiles Command

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use pagediff_engine::ViewportProfile;

use super::load_config;
use crate::output::{print_list, OutputFormat, TableDisplay};

/// Viewport profile display wrapper for serialization
#[derive(Serialize)]
pub struct ProfileDisplay {
    pub name: String,
    pub viewport: String,
    pub device_scale_factor: f64,
    pub mobile: bool,
    pub touch: bool,
    pub selected: bool,
}

impl ProfileDisplay {
    fn new(profile: &ViewportProfile, selected: bool) -> Self {
        Self {
            name: profile.name.clone(),
            viewport: format!("{}x{}", profile.width, profile.height),
            device_scale_factor: profile.device_scale_factor,
            mobile: profile.is_mobile,
            touch: profile.has_touch,
            selected,
        }
    }
}

impl TableDisplay for ProfileDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Viewport", "Scale", "Mobile", "Touch", "Selected"]
    }

    fn row(&self) -> Vec<String> {
        let mark = |b: bool| if b { "✓" } else { "" }.to_string();
        vec![
            self.name.clone(),
            self.viewport.clone(),
            format!("{}", self.device_scale_factor),
            mark(self.mobile),
            mark(self.touch),
            mark(self.selected),
        ]
    }
}

pub fn execute(config_path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = config.registry()?;

    let mut rows: Vec<ProfileDisplay> = registry
        .list()
        .iter()
        .map(|p| ProfileDisplay::new(p, config.profiles.contains(&p.name)))
        .collect();

    // Ad hoc `<W>x<H>` selections are not in the registry listing
    for name in &config.profiles {
        if rows.iter().all(|r| &r.name != name) {
            let profile = registry.resolve(name)?;
            rows.push(ProfileDisplay::new(&profile, true));
        }
    }

    print_list(&rows, format);
    Ok(())
}
