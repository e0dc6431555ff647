//! Targets and stable identifier derivation

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{RegressionError, RegressionResult};
use crate::source::{SourceEntry, TargetSource};

/// A URL to capture, plus the identifier its artifacts are stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub identifier: String,
    /// Identifier this URL would have had alone, when it collided with another URL's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_identifier: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.url)
    }
}

/// Lowercase, collapse every run of non-alphanumeric characters into `-`, trim `-`.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }

    out
}

/// Identifier for a URL: host, path and query, sanitized.
///
/// `https://a.example/about` becomes `a-example-about`.
pub fn derive_identifier(url: &Url) -> String {
    let mut raw = String::new();
    if let Some(host) = url.host_str() {
        raw.push_str(host);
    }
    if let Some(port) = url.port() {
        raw.push('-');
        raw.push_str(&port.to_string());
    }
    raw.push_str(url.path());
    if let Some(query) = url.query() {
        raw.push('-');
        raw.push_str(query);
    }
    sanitize_identifier(&raw)
}

fn short_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

/// Parse and validate an absolute http(s) URL
pub fn parse_target_url(source_name: &str, raw: &str) -> RegressionResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| RegressionError::source_read(source_name, format!("invalid URL '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RegressionError::source_read(
            source_name,
            format!("unsupported URL scheme '{}' in '{}'", other, raw),
        )),
    }
}

/// Build targets from raw source entries.
///
/// Blank entries are discarded, repeated URLs keep their first occurrence,
/// and source order is preserved. Distinct URLs whose identifiers collide all
/// get a short digest of their URL appended.
pub fn targets_from_entries(
    source_name: &str,
    entries: Vec<SourceEntry>,
) -> RegressionResult<Vec<Target>> {
    let mut seen_urls = HashSet::new();
    let mut candidates: Vec<Target> = Vec::new();

    for entry in entries {
        let raw = entry.url.trim();
        if raw.is_empty() {
            continue;
        }

        let url = parse_target_url(source_name, raw)?;
        let url_string = url.to_string();
        if !seen_urls.insert(url_string.clone()) {
            debug!("Skipping duplicate URL {}", url_string);
            continue;
        }

        let identifier = match entry.identifier.as_deref() {
            Some(explicit) => sanitize_identifier(explicit),
            None => derive_identifier(&url),
        };
        // Bare-host URLs with exotic hosts can sanitize to nothing
        let identifier = if identifier.is_empty() {
            format!("page-{}", short_digest(&url_string))
        } else {
            identifier
        };

        candidates.push(Target {
            url: url_string,
            identifier,
            shared_identifier: None,
        });
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for target in &candidates {
        *counts.entry(target.identifier.clone()).or_default() += 1;
    }

    for target in &mut candidates {
        if counts[&target.identifier] > 1 {
            let suffixed = format!("{}-{}", target.identifier, short_digest(&target.url));
            warn!(
                "Identifier '{}' is shared by several URLs, using '{}' for {}; images stored as '{}' will not match",
                target.identifier, suffixed, target.url, target.identifier
            );
            let shared = std::mem::replace(&mut target.identifier, suffixed);
            target.shared_identifier = Some(shared);
        }
    }

    Ok(candidates)
}

/// Enumerate the ordered, deduplicated targets of a source.
pub fn enumerate_targets(source: &dyn TargetSource) -> RegressionResult<Vec<Target>> {
    let name = source.describe();
    let entries = source.read_entries()?;
    let targets = targets_from_entries(&name, entries)?;
    info!("Enumerated {} target(s) from {}", targets.len(), name);
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn entries(urls: &[&str]) -> Vec<SourceEntry> {
        urls.iter().map(|u| SourceEntry::url(*u)).collect()
    }

    #[test_case("https://a.example/", "a-example")]
    #[test_case("https://a.example/about", "a-example-about")]
    #[test_case("https://a.example/about/", "a-example-about")]
    #[test_case("https://WWW.Example.com/Cars/ASX?model=2019", "www-example-com-cars-asx-model-2019")]
    #[test_case("http://localhost:8080/x", "localhost-8080-x")]
    fn test_derive_identifier(url: &str, expected: &str) {
        let url = Url::parse(url).unwrap();
        assert_eq!(derive_identifier(&url), expected);
    }

    #[test]
    fn test_derivation_is_stable() {
        let url = Url::parse("https://a.example/about").unwrap();
        assert_eq!(derive_identifier(&url), derive_identifier(&url));
    }

    #[test]
    fn test_blank_entries_dropped_and_order_kept() {
        let targets = targets_from_entries(
            "test",
            entries(&["https://b.example/", "", "   ", "https://a.example/"]),
        )
        .unwrap();

        let ids: Vec<_> = targets.iter().map(|t| t.identifier.as_str()).collect();
        assert_eq!(ids, vec!["b-example", "a-example"]);
    }

    #[test]
    fn test_duplicate_urls_keep_first() {
        let targets = targets_from_entries(
            "test",
            entries(&["https://a.example/", "https://a.example/about", "https://a.example/"]),
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_colliding_identifiers_get_digest_suffix() {
        let targets = targets_from_entries(
            "test",
            entries(&["https://a.example/about", "https://a-example/about"]),
        )
        .unwrap();

        assert_eq!(targets.len(), 2);
        assert_ne!(targets[0].identifier, targets[1].identifier);
        assert!(targets[0].identifier.starts_with("a-example-about-"));
        assert!(targets[1].identifier.starts_with("a-example-about-"));

        // Same input set, same identifiers
        let again = targets_from_entries(
            "test",
            entries(&["https://a.example/about", "https://a-example/about"]),
        )
        .unwrap();
        assert_eq!(targets, again);
    }

    #[test]
    fn test_new_collision_records_previous_identifier() {
        let alone = targets_from_entries("test", entries(&["https://a.example/about"])).unwrap();
        assert_eq!(alone[0].identifier, "a-example-about");
        assert_eq!(alone[0].shared_identifier, None);

        let both = targets_from_entries(
            "test",
            entries(&["https://a.example/about", "https://a.example/about/"]),
        )
        .unwrap();
        assert_ne!(both[0].identifier, "a-example-about");
        assert_eq!(both[0].shared_identifier.as_deref(), Some("a-example-about"));
        assert_eq!(both[1].shared_identifier.as_deref(), Some("a-example-about"));
    }

    #[test]
    fn test_explicit_identifier_is_sanitized() {
        let targets = targets_from_entries(
            "test",
            vec![SourceEntry::with_identifier("https://a.example/", "Home Page")],
        )
        .unwrap();
        assert_eq!(targets[0].identifier, "home-page");
    }

    #[test_case("not a url" ; "garbage")]
    #[test_case("/relative/path" ; "relative")]
    #[test_case("ftp://a.example/file" ; "unsupported scheme")]
    fn test_invalid_urls_are_source_errors(raw: &str) {
        let err = targets_from_entries("urls.txt", entries(&[raw])).unwrap_err();
        assert!(matches!(err, RegressionError::SourceRead { .. }));
    }
}
