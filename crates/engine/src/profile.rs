//! Viewport and device emulation profiles

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RegressionError, RegressionResult};

const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 11_0 like Mac OS X) AppleWebKit/604.1.38 (KHTML, like Gecko) Version/11.0 Mobile/15A372 Safari/604.1";
const IPAD_UA: &str = "Mozilla/5.0 (iPad; CPU OS 11_0 like Mac OS X) AppleWebKit/604.1.34 (KHTML, like Gecko) Version/11.0 Mobile/15A5341f Safari/604.1";
const PIXEL_2_UA: &str = "Mozilla/5.0 (Linux; Android 8.0; Pixel 2 Build/OPD3.170816.012) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/75.0.3765.0 Mobile Safari/537.36";
const PIXEL_2_XL_UA: &str = "Mozilla/5.0 (Linux; Android 8.0.0; Pixel 2 XL Build/OPD1.170816.004) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/75.0.3765.0 Mobile Safari/537.36";

/// A named screen or device configuration a page is rendered under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportProfile {
    /// Name, also used as the store directory
    pub name: String,

    pub width: u32,
    pub height: u32,

    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,

    #[serde(default)]
    pub is_mobile: bool,

    #[serde(default)]
    pub has_touch: bool,

    /// User agent override for device emulation
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl ViewportProfile {
    /// Plain desktop viewport
    pub fn desktop(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            device_scale_factor: 1.0,
            is_mobile: false,
            has_touch: false,
            user_agent: None,
        }
    }

    fn device(name: &str, width: u32, height: u32, scale: f64, user_agent: &str) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            device_scale_factor: scale,
            is_mobile: true,
            has_touch: true,
            user_agent: Some(user_agent.to_string()),
        }
    }

    /// Parse an ad hoc `<width>x<height>` profile name
    pub fn from_size_name(name: &str) -> Option<Self> {
        let (w, h) = name.split_once('x')?;
        let width: u32 = w.parse().ok()?;
        let height: u32 = h.parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::desktop(name, width, height))
    }

    pub fn validate(&self) -> RegressionResult<()> {
        validate_profile_name(&self.name)?;
        if self.width == 0 || self.height == 0 {
            return Err(RegressionError::Config(format!(
                "Profile '{}' has an empty viewport",
                self.name
            )));
        }
        if !(self.device_scale_factor > 0.0) {
            return Err(RegressionError::Config(format!(
                "Profile '{}' has a non-positive device scale factor",
                self.name
            )));
        }
        Ok(())
    }
}

/// Profile names become directory names, so they are restricted to a path-safe alphabet.
pub fn validate_profile_name(name: &str) -> RegressionResult<()> {
    let safe = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if safe {
        Ok(())
    } else {
        Err(RegressionError::Config(format!(
            "Invalid profile name '{}': use letters, digits, '.', '_' or '-'",
            name
        )))
    }
}

/// Built-in desktop viewports and device presets
pub fn builtin_profiles() -> Vec<ViewportProfile> {
    vec![
        ViewportProfile::desktop("large_desktop_screen", 1920, 1080),
        ViewportProfile::desktop("laptop_screen", 1440, 900),
        ViewportProfile::device("iphone_8", 375, 667, 2.0, IPHONE_UA),
        ViewportProfile::device("iphone_8_plus", 414, 736, 3.0, IPHONE_UA),
        ViewportProfile::device("iphone_x", 375, 812, 3.0, IPHONE_UA),
        ViewportProfile::device("pixel_2", 411, 731, 2.625, PIXEL_2_UA),
        ViewportProfile::device("pixel_2_xl", 411, 823, 3.5, PIXEL_2_XL_UA),
        ViewportProfile::device("ipad_pro", 1024, 1366, 2.0, IPAD_UA),
        ViewportProfile::device("ipad", 768, 1024, 2.0, IPAD_UA),
        ViewportProfile::device("ipad_mini", 768, 1024, 2.0, IPAD_UA),
    ]
}

/// Registry of known profiles, enumerated once at startup
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<ViewportProfile>>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    pub fn builtin() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Self { profiles }
    }

    /// Built-ins extended (or overridden) by custom profiles
    pub fn with_custom(custom: &[ViewportProfile]) -> RegressionResult<Self> {
        let mut registry = Self::builtin();
        for profile in custom {
            profile.validate()?;
            registry
                .profiles
                .insert(profile.name.clone(), Arc::new(profile.clone()));
        }
        Ok(registry)
    }

    /// Resolve a profile by name; `<W>x<H>` names build an ad hoc desktop profile.
    pub fn resolve(&self, name: &str) -> RegressionResult<Arc<ViewportProfile>> {
        if let Some(profile) = self.profiles.get(name) {
            return Ok(profile.clone());
        }

        match ViewportProfile::from_size_name(name) {
            Some(profile) => Ok(Arc::new(profile)),
            None => Err(RegressionError::Config(format!(
                "Unknown viewport profile '{}'",
                name
            ))),
        }
    }

    /// Resolve a list of names, rejecting duplicates
    pub fn resolve_all(&self, names: &[String]) -> RegressionResult<Vec<Arc<ViewportProfile>>> {
        if names.is_empty() {
            return Err(RegressionError::Config(
                "At least one viewport profile is required".to_string(),
            ));
        }

        let mut resolved: Vec<Arc<ViewportProfile>> = Vec::with_capacity(names.len());
        for name in names {
            if resolved.iter().any(|p| &p.name == name) {
                return Err(RegressionError::Config(format!(
                    "Viewport profile '{}' listed twice",
                    name
                )));
            }
            resolved.push(self.resolve(name)?);
        }
        Ok(resolved)
    }

    pub fn list(&self) -> Vec<Arc<ViewportProfile>> {
        self.profiles.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_builtin_profiles_are_valid() {
        for profile in builtin_profiles() {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_resolve_builtin() {
        let registry = ProfileRegistry::builtin();
        let profile = registry.resolve("large_desktop_screen").unwrap();
        assert_eq!((profile.width, profile.height), (1920, 1080));
        assert!(!profile.is_mobile);

        let phone = registry.resolve("iphone_x").unwrap();
        assert!(phone.is_mobile);
        assert!(phone.user_agent.is_some());
    }

    #[test]
    fn test_resolve_size_name() {
        let registry = ProfileRegistry::builtin();
        let profile = registry.resolve("1920x1080").unwrap();
        assert_eq!(profile.name, "1920x1080");
        assert_eq!((profile.width, profile.height), (1920, 1080));
    }

    #[test_case("0x100" ; "zero width")]
    #[test_case("widex100" ; "non numeric")]
    #[test_case("nope" ; "unknown name")]
    fn test_resolve_rejects(name: &str) {
        assert!(ProfileRegistry::builtin().resolve(name).is_err());
    }

    #[test_case("laptop_screen", true)]
    #[test_case("1440x900", true)]
    #[test_case("..", false)]
    #[test_case("a/b", false)]
    #[test_case("", false)]
    fn test_profile_name_validation(name: &str, ok: bool) {
        assert_eq!(validate_profile_name(name).is_ok(), ok);
    }

    #[test]
    fn test_custom_profile_overrides_builtin() {
        let custom = ViewportProfile::desktop("laptop_screen", 1366, 768);
        let registry = ProfileRegistry::with_custom(&[custom]).unwrap();
        let profile = registry.resolve("laptop_screen").unwrap();
        assert_eq!(profile.width, 1366);
    }

    #[test]
    fn test_resolve_all_rejects_duplicates() {
        let registry = ProfileRegistry::builtin();
        let names = vec!["ipad".to_string(), "ipad".to_string()];
        assert!(registry.resolve_all(&names).is_err());
        assert!(registry.resolve_all(&[]).is_err());
    }
}
