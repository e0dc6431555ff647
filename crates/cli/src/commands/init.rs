//! Init Command

use std::path::Path;

use anyhow::{bail, Result};

use pagediff_engine::RunConfig;

use crate::output::print_success;

/// Write a config file populated with the defaults
pub fn execute(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    RunConfig::default().save(config_path)?;
    print_success(&format!("Wrote {}", config_path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pagediff.toml");

        execute(&path, false).unwrap();
        assert_eq!(RunConfig::load(&path).unwrap(), RunConfig::default());

        assert!(execute(&path, false).is_err());
        execute(&path, true).unwrap();
    }
}
