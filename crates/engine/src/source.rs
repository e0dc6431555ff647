//! URL sources: line-delimited files, sitemaps and JSON page lists

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::{RegressionError, RegressionResult};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// A raw entry read from a source, before identifier derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub url: String,
    pub identifier: Option<String>,
}

impl SourceEntry {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identifier: None,
        }
    }

    pub fn with_identifier(url: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identifier: Some(identifier.into()),
        }
    }
}

/// Anything that yields an ordered list of URLs to capture
pub trait TargetSource: Send + Sync {
    /// Human-readable name used in logs and errors
    fn describe(&self) -> String;

    fn read_entries(&self) -> RegressionResult<Vec<SourceEntry>>;
}

fn read_source_file(path: &Path) -> RegressionResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| RegressionError::source_read(path.display().to_string(), e))
}

/// One URL per line. Blank lines and `#` comments are ignored.
#[derive(Debug, Clone)]
pub struct LineFileSource {
    path: PathBuf,
}

impl LineFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> Vec<SourceEntry> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(SourceEntry::url)
            .collect()
    }
}

impl TargetSource for LineFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read_entries(&self) -> RegressionResult<Vec<SourceEntry>> {
        let content = read_source_file(&self.path)?;
        Ok(Self::parse(&content))
    }
}

/// A local `<urlset>` sitemap; each `<url><loc>` becomes an entry
#[derive(Debug, Clone)]
pub struct SitemapSource {
    path: PathBuf,
}

impl SitemapSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(source_name: &str, xml: &str) -> RegressionResult<Vec<SourceEntry>> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| RegressionError::source_read(source_name, format!("malformed sitemap: {}", e)))?;

        let root = doc.root_element();
        if root.tag_name().name() != "urlset" {
            return Err(RegressionError::source_read(
                source_name,
                format!("expected <urlset> root, found <{}>", root.tag_name().name()),
            ));
        }

        let entries = root
            .children()
            .filter(|n| is_sitemap_tag(n, "url"))
            .filter_map(|url| url.children().find(|n| is_sitemap_tag(n, "loc")))
            .filter_map(|loc| loc.text())
            .map(|text| SourceEntry::url(text.trim()))
            .collect();

        Ok(entries)
    }
}

impl TargetSource for SitemapSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read_entries(&self) -> RegressionResult<Vec<SourceEntry>> {
        let xml = read_source_file(&self.path)?;
        Self::parse(&self.describe(), &xml)
    }
}

// Namespaced and bare sitemaps both occur in the wild
fn is_sitemap_tag(node: &roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && matches!(node.tag_name().namespace(), None | Some(SITEMAP_NS))
}

#[derive(Debug, Deserialize)]
struct PageDescriptor {
    url: String,
    #[serde(default, alias = "identifier")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageList {
    Bare(Vec<PageDescriptor>),
    WithBase {
        #[serde(default)]
        base_url: Option<String>,
        pages: Vec<PageDescriptor>,
    },
}

/// JSON page descriptors: `[{"url": ..., "id": ...}]` or
/// `{"base_url": ..., "pages": [...]}` with relative URL fragments.
#[derive(Debug, Clone)]
pub struct PageListSource {
    path: PathBuf,
    base_url: Option<String>,
}

impl PageListSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base_url: None,
        }
    }

    /// Base URL for relative fragments; wins over the file's `base_url`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn parse(
        source_name: &str,
        json: &str,
        base_override: Option<&str>,
    ) -> RegressionResult<Vec<SourceEntry>> {
        let list: PageList = serde_json::from_str(json)
            .map_err(|e| RegressionError::source_read(source_name, format!("malformed page list: {}", e)))?;

        let (file_base, pages) = match list {
            PageList::Bare(pages) => (None, pages),
            PageList::WithBase { base_url, pages } => (base_url, pages),
        };

        let base = match base_override.map(str::to_string).or(file_base) {
            Some(raw) => Some(Url::parse(&raw).map_err(|e| {
                RegressionError::source_read(source_name, format!("invalid base URL '{}': {}", raw, e))
            })?),
            None => None,
        };

        pages
            .into_iter()
            .map(|page| {
                let url = resolve_fragment(source_name, base.as_ref(), &page.url)?;
                Ok(SourceEntry {
                    url,
                    identifier: page.id,
                })
            })
            .collect()
    }
}

fn resolve_fragment(source_name: &str, base: Option<&Url>, fragment: &str) -> RegressionResult<String> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return Ok(String::new());
    }

    match Url::parse(fragment) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(fragment)
                .map(|u| u.to_string())
                .map_err(|e| RegressionError::source_read(source_name, e)),
            None => Err(RegressionError::source_read(
                source_name,
                format!("relative URL '{}' needs a base URL", fragment),
            )),
        },
        Err(e) => Err(RegressionError::source_read(
            source_name,
            format!("invalid URL '{}': {}", fragment, e),
        )),
    }
}

impl TargetSource for PageListSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read_entries(&self) -> RegressionResult<Vec<SourceEntry>> {
        let json = read_source_file(&self.path)?;
        Self::parse(&self.describe(), &json, self.base_url.as_deref())
    }
}

/// In-memory URL list
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    urls: Vec<String>,
}

impl StaticSource {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

impl TargetSource for StaticSource {
    fn describe(&self) -> String {
        format!("static list ({} entries)", self.urls.len())
    }

    fn read_entries(&self) -> RegressionResult<Vec<SourceEntry>> {
        Ok(self.urls.iter().cloned().map(SourceEntry::url).collect())
    }
}
