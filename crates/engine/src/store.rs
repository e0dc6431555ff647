//! Filesystem image store
//!
//! Layout:
//!
//! ```text
//! <baseline_root>/<profile>/<identifier>.png
//! <candidate_root>/<profile>/<identifier>.png
//! <candidate_root>/<profile>/diff/<identifier>.png
//! ```
//!
//! Both roots use the same `(profile, identifier)` scheme, so a baseline path
//! and its candidate path are derived independently without cross-referencing.
//! Every task writes only to its own `(role, profile, identifier)` paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{RegressionError, RegressionResult};

const IMAGE_EXT: &str = "png";
const DIFF_DIR: &str = "diff";

/// Which half of the store an image belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Long-lived reference captures
    Baseline,
    /// This run's captures
    Candidate,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Baseline => "baseline",
            Role::Candidate => "candidate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    baseline_root: PathBuf,
    candidate_root: PathBuf,
}

impl ImageStore {
    pub fn new(baseline_root: impl Into<PathBuf>, candidate_root: impl Into<PathBuf>) -> Self {
        Self {
            baseline_root: baseline_root.into(),
            candidate_root: candidate_root.into(),
        }
    }

    pub fn root(&self, role: Role) -> &Path {
        match role {
            Role::Baseline => &self.baseline_root,
            Role::Candidate => &self.candidate_root,
        }
    }

    pub fn profile_dir(&self, role: Role, profile: &str) -> PathBuf {
        self.root(role).join(profile)
    }

    pub fn diff_dir(&self, profile: &str) -> PathBuf {
        self.profile_dir(Role::Candidate, profile).join(DIFF_DIR)
    }

    /// Path of the image for `(role, profile, identifier)`. Pure; touches nothing on disk.
    pub fn resolve_path(&self, role: Role, profile: &str, identifier: &str) -> PathBuf {
        self.profile_dir(role, profile)
            .join(format!("{}.{}", identifier, IMAGE_EXT))
    }

    /// Path of the diff artifact derived from a candidate's `(profile, identifier)`
    pub fn diff_path(&self, profile: &str, identifier: &str) -> PathBuf {
        self.diff_dir(profile)
            .join(format!("{}.{}", identifier, IMAGE_EXT))
    }

    /// Create the directories for a role and its profiles. Idempotent.
    pub async fn ensure_layout(&self, role: Role, profiles: &[&str]) -> RegressionResult<()> {
        let root = self.root(role);
        fs::create_dir_all(root)
            .await
            .map_err(|e| RegressionError::storage(root, e))?;

        for profile in profiles {
            let dir = match role {
                Role::Baseline => self.profile_dir(role, profile),
                Role::Candidate => self.diff_dir(profile),
            };
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| RegressionError::storage(&dir, e))?;
        }

        debug!(
            "Store layout ready for {} ({} profile(s)) under {}",
            role.as_str(),
            profiles.len(),
            root.display()
        );
        Ok(())
    }

    /// Remove diff artifacts left over from earlier runs
    pub async fn reset_diffs(&self, profiles: &[&str]) -> RegressionResult<()> {
        for profile in profiles {
            let dir = self.diff_dir(profile);
            if fs::metadata(&dir).await.is_ok() {
                fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| RegressionError::storage(&dir, e))?;
            }
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| RegressionError::storage(&dir, e))?;
        }
        Ok(())
    }

    /// Remove candidate images left over from earlier runs.
    ///
    /// Only files directly under each profile directory are removed; the
    /// `diff/` directory is handled by [`ImageStore::reset_diffs`].
    pub async fn reset_candidates(&self, profiles: &[&str]) -> RegressionResult<usize> {
        let mut removed = 0;
        for profile in profiles {
            let dir = self.profile_dir(Role::Candidate, profile);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(RegressionError::storage(&dir, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RegressionError::storage(&dir, e))?
            {
                let path = entry.path();
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if !is_file {
                    continue;
                }
                fs::remove_file(&path)
                    .await
                    .map_err(|e| RegressionError::storage(&path, e))?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Removed {} stale candidate file(s)", removed);
        }
        Ok(removed)
    }

    pub async fn exists(&self, role: Role, profile: &str, identifier: &str) -> bool {
        fs::metadata(self.resolve_path(role, profile, identifier))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Write image bytes via a temp file and rename
    pub async fn write_image(path: &Path, bytes: &[u8]) -> RegressionResult<()> {
        let tmp_path = path.with_extension("png.tmp");
        fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| RegressionError::storage(&tmp_path, e))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| RegressionError::storage(path, e))?;

        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    pub async fn read_image(path: &Path) -> RegressionResult<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|e| RegressionError::storage(path, e))
    }

    /// Identifiers that have an image for `(role, profile)`, sorted
    pub fn list_identifiers(&self, role: Role, profile: &str) -> RegressionResult<Vec<String>> {
        let dir = self.profile_dir(role, profile);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut identifiers: Vec<String> = walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().map(|ext| ext == IMAGE_EXT).unwrap_or(false))
            .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        identifiers.sort();
        Ok(identifiers)
    }

    /// Copy a candidate image over its baseline
    pub async fn promote(&self, profile: &str, identifier: &str) -> RegressionResult<PathBuf> {
        let candidate = self.resolve_path(Role::Candidate, profile, identifier);
        let baseline = self.resolve_path(Role::Baseline, profile, identifier);

        let bytes = Self::read_image(&candidate).await?;
        let dir = self.profile_dir(Role::Baseline, profile);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RegressionError::storage(&dir, e))?;
        Self::write_image(&baseline, &bytes).await?;

        info!("Promoted {}/{} to baseline", profile, identifier);
        Ok(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> ImageStore {
        ImageStore::new(tmp.path().join("baseline"), tmp.path().join("candidate"))
    }

    #[test]
    fn test_resolve_path_layout() {
        let store = ImageStore::new("baseline", "current");
        assert_eq!(
            store.resolve_path(Role::Baseline, "1920x1080", "a-example"),
            PathBuf::from("baseline/1920x1080/a-example.png")
        );
        assert_eq!(
            store.resolve_path(Role::Candidate, "1920x1080", "a-example-about"),
            PathBuf::from("current/1920x1080/a-example-about.png")
        );
        assert_eq!(
            store.diff_path("1920x1080", "a-example"),
            PathBuf::from("current/1920x1080/diff/a-example.png")
        );
    }

    #[test]
    fn test_resolve_path_is_deterministic_and_injective() {
        let store = ImageStore::new("b", "c");
        let mut seen = HashSet::new();
        for role in [Role::Baseline, Role::Candidate] {
            for profile in ["ipad", "laptop_screen", "1920x1080"] {
                for id in ["a", "a-b", "ab", "diff"] {
                    let path = store.resolve_path(role, profile, id);
                    assert_eq!(path, store.resolve_path(role, profile, id));
                    assert!(seen.insert(path), "collision for {:?}/{}/{}", role, profile, id);
                }
            }
        }
        for profile in ["ipad", "laptop_screen", "1920x1080"] {
            assert!(seen.insert(store.diff_path(profile, "a")));
        }
    }

    #[tokio::test]
    async fn test_ensure_layout_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.ensure_layout(Role::Candidate, &["ipad"]).await.unwrap();
        store.ensure_layout(Role::Candidate, &["ipad"]).await.unwrap();
        store.ensure_layout(Role::Baseline, &["ipad"]).await.unwrap();

        assert!(store.diff_dir("ipad").is_dir());
        assert!(store.profile_dir(Role::Baseline, "ipad").is_dir());
    }

    #[tokio::test]
    async fn test_resolve_path_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let _ = store.resolve_path(Role::Baseline, "ipad", "x");
        assert!(!store.root(Role::Baseline).exists());
    }

    #[tokio::test]
    async fn test_reset_diffs_clears_old_artifacts() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.ensure_layout(Role::Candidate, &["ipad"]).await.unwrap();

        let stale = store.diff_path("ipad", "old");
        std::fs::write(&stale, b"stale").unwrap();

        store.reset_diffs(&["ipad"]).await.unwrap();
        assert!(!stale.exists());
        assert!(store.diff_dir("ipad").is_dir());
    }

    #[tokio::test]
    async fn test_reset_candidates_keeps_baselines_and_diff_dir() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.ensure_layout(Role::Candidate, &["ipad"]).await.unwrap();
        store.ensure_layout(Role::Baseline, &["ipad"]).await.unwrap();

        let candidate = store.resolve_path(Role::Candidate, "ipad", "home");
        let baseline = store.resolve_path(Role::Baseline, "ipad", "home");
        std::fs::write(&candidate, b"old").unwrap();
        std::fs::write(&baseline, b"ref").unwrap();

        assert_eq!(store.reset_candidates(&["ipad", "laptop_screen"]).await.unwrap(), 1);
        assert!(!candidate.exists());
        assert!(baseline.is_file());
        assert!(store.diff_dir("ipad").is_dir());
        assert!(store.list_identifiers(Role::Candidate, "ipad").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_list_and_promote() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.ensure_layout(Role::Candidate, &["ipad"]).await.unwrap();

        let path = store.resolve_path(Role::Candidate, "ipad", "home");
        ImageStore::write_image(&path, b"png-bytes").await.unwrap();
        assert!(store.exists(Role::Candidate, "ipad", "home").await);
        assert!(!store.exists(Role::Baseline, "ipad", "home").await);

        // diff/ holds a directory, not an identifier
        assert_eq!(
            store.list_identifiers(Role::Candidate, "ipad").unwrap(),
            vec!["home".to_string()]
        );

        let baseline = store.promote("ipad", "home").await.unwrap();
        assert_eq!(std::fs::read(baseline).unwrap(), b"png-bytes");
    }
}
