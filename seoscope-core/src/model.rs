// Crawl payload produced by the analysis backend

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Internal,
    External,
    Mailto,
    Tel,
    Unknown,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Internal => "Internal",
            LinkType::External => "External",
            LinkType::Mailto => "Mailto",
            LinkType::Tel => "Tel",
            LinkType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCategory {
    #[serde(rename = "SEO")]
    Seo,
    Accessibility,
    Performance,
    BestPractices,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Seo => "SEO",
            RuleCategory::Accessibility => "Accessibility",
            RuleCategory::Performance => "Performance",
            RuleCategory::BestPractices => "BestPractices",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RuleCategory::Seo => "SEO",
            RuleCategory::Accessibility => "Accessibility",
            RuleCategory::Performance => "Performance",
            RuleCategory::BestPractices => "Best Practices",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule evaluated against one page (or the whole site).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub passed: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

/// Which URLs a site-level rule result applies to.
///
/// The backend sends `{"Urls": [...]}`, `{"Values": {key: [...]}}` or a plain
/// string. Anything else is kept as `Unrecognized` and applies to no URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SiteContext {
    Text(String),
    Urls {
        #[serde(rename = "Urls")]
        urls: Vec<String>,
    },
    Values {
        #[serde(rename = "Values")]
        values: IndexMap<String, Option<Vec<Option<String>>>>,
    },
    Unrecognized(serde_json::Value),
}

impl Default for SiteContext {
    fn default() -> Self {
        SiteContext::Unrecognized(serde_json::Value::Null)
    }
}

impl SiteContext {
    /// Every URL this context names, in order. `Values` mappings are
    /// flattened and their null entries dropped.
    pub fn urls(&self) -> Vec<String> {
        match self {
            SiteContext::Urls { urls } => urls.clone(),
            SiteContext::Values { values } => values
                .values()
                .flatten()
                .flatten()
                .flatten()
                .cloned()
                .collect(),
            SiteContext::Text(_) | SiteContext::Unrecognized(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteIssue {
    #[serde(flatten)]
    pub rule: RuleResult,
    #[serde(default)]
    pub context: SiteContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkSourceType {
    Link,
    Sitemap,
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSource {
    pub link_source_type: LinkSourceType,
    pub url: String,
}

/// Rule results for one analyzed page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageAnalysis {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub results: Vec<RuleResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub link_type: LinkType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub found_in: Vec<LinkSource>,
    /// `None` until the page has been analyzed.
    #[serde(default)]
    pub result: Option<PageAnalysis>,
}

impl PageResult {
    pub fn new(url: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            url: url.into(),
            link_type,
            found_in: Vec::new(),
            result: None,
        }
    }

    pub fn with_results(mut self, results: Vec<RuleResult>) -> Self {
        self.result = Some(PageAnalysis {
            error: false,
            results,
        });
        self
    }

    pub fn is_analyzed(&self) -> bool {
        self.result.is_some()
    }
}

/// Root of one crawl. Replaced wholesale on every run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CrawlResult {
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub page_results: Vec<PageResult>,
    #[serde(default)]
    pub site_result: Vec<SiteIssue>,
}

impl CrawlResult {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.total_pages == 0 && self.page_results.is_empty() && self.site_result.is_empty()
    }
}

/// Crawl progress as pushed by the backend. Each event replaces the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Progress {
    Urls {
        completed_urls: u32,
        total_urls: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Pages {
        completed_pages: u32,
        total_pages: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl Progress {
    pub fn urls(completed: u32, total: u32) -> Self {
        Progress::Urls {
            completed_urls: completed,
            total_urls: total,
            url: None,
        }
    }

    pub fn pages(completed: u32, total: u32, url: Option<String>) -> Self {
        Progress::Pages {
            completed_pages: completed,
            total_pages: total,
            url,
        }
    }

    pub fn completed(&self) -> u32 {
        match self {
            Progress::Urls { completed_urls, .. } => *completed_urls,
            Progress::Pages {
                completed_pages, ..
            } => *completed_pages,
        }
    }

    pub fn total(&self) -> u32 {
        match self {
            Progress::Urls { total_urls, .. } => *total_urls,
            Progress::Pages { total_pages, .. } => *total_pages,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Progress::Urls { url, .. } | Progress::Pages { url, .. } => url.as_deref(),
        }
    }

    /// Completed share in `[0, 1]`; zero while the total is unknown.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (f64::from(self.completed()) / f64::from(total)).min(1.0)
    }
}
