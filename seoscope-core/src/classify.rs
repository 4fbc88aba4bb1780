// Classification of a crawl result into link groups, issues and categories.
//
// Everything here is pure; `crate::crawl` wraps these functions in derived
// cells.

use crate::model::{CrawlResult, LinkType, PageResult, RuleCategory, RuleResult, Severity, SiteIssue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use url::Url;

/// Name of the link group that holds every page.
pub const TOTAL_GROUP: &str = "Total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Page,
    Site,
}

/// A rule result attributed to a single URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub rule_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
    pub page_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pathname: Option<String>,
    pub source: IssueSource,
}

impl Issue {
    pub fn from_rule(rule: &RuleResult, page_url: impl Into<String>, source: IssueSource) -> Self {
        let page_url = page_url.into();
        Self {
            rule_id: rule.rule_id.clone(),
            name: rule.name.clone(),
            plugin_name: rule.plugin_name.clone(),
            category: rule.category,
            severity: rule.severity,
            passed: rule.passed,
            message: rule.message.clone(),
            pathname: pathname(&page_url),
            page_url,
            source,
        }
    }
}

/// Group `items` by `key`, keeping keys in order of first occurrence and
/// items in their original order.
pub fn group_by<K, T, I, F>(items: I, key: F) -> IndexMap<K, Vec<T>>
where
    K: Hash + Eq,
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> K,
{
    let mut groups: IndexMap<K, Vec<T>> = IndexMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

/// Path component of a URL, `None` when it does not parse.
pub fn pathname(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| {
        let path = u.path();
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }
    })
}

// ============================================================================
// Link grouping
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkGroups {
    pub total: Vec<PageResult>,
    pub by_type: IndexMap<LinkType, Vec<PageResult>>,
}

impl LinkGroups {
    /// Look a group up by display name: `"Total"` or a link type.
    pub fn get(&self, name: &str) -> Option<&[PageResult]> {
        if name == TOTAL_GROUP {
            return Some(&self.total);
        }
        self.by_type
            .iter()
            .find(|(link_type, _)| link_type.as_str() == name)
            .map(|(_, pages)| pages.as_slice())
    }

    /// Group sizes, `"Total"` first.
    pub fn counts(&self) -> IndexMap<String, usize> {
        std::iter::once((TOTAL_GROUP.to_string(), self.total.len()))
            .chain(
                self.by_type
                    .iter()
                    .map(|(link_type, pages)| (link_type.to_string(), pages.len())),
            )
            .collect()
    }
}

pub fn group_links(pages: &[PageResult]) -> LinkGroups {
    LinkGroups {
        total: pages.to_vec(),
        by_type: group_by(pages.iter().cloned(), |page| page.link_type),
    }
}

// ============================================================================
// Issue flattening
// ============================================================================

/// One issue per rule result of every analyzed page. Pages without a result
/// contribute nothing.
pub fn page_issues(pages: &[PageResult]) -> Vec<Issue> {
    pages
        .iter()
        .filter_map(|page| page.result.as_ref().map(|analysis| (page, analysis)))
        .flat_map(|(page, analysis)| {
            analysis
                .results
                .iter()
                .map(move |rule| Issue::from_rule(rule, page.url.as_str(), IssueSource::Page))
        })
        .collect()
}

/// One issue per URL named by each site issue's context.
pub fn site_issues(site: &[SiteIssue]) -> Vec<Issue> {
    site.iter()
        .flat_map(|issue| {
            issue
                .context
                .urls()
                .into_iter()
                .map(move |url| Issue::from_rule(&issue.rule, url, IssueSource::Site))
        })
        .collect()
}

/// Page issues followed by site issues.
pub fn flatten_issues(result: &CrawlResult) -> Vec<Issue> {
    let mut issues = page_issues(&result.page_results);
    issues.extend(site_issues(&result.site_result));
    issues
}

// ============================================================================
// Category grouping
// ============================================================================

pub type CategoryGroups = IndexMap<RuleCategory, Vec<Issue>>;

pub fn group_by_category(issues: &[Issue]) -> CategoryGroups {
    group_by(issues.iter().cloned(), |issue| issue.category)
}

pub fn group_by_severity(issues: &[Issue]) -> IndexMap<Severity, Vec<Issue>> {
    group_by(issues.iter().cloned(), |issue| issue.severity)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOccurrence {
    pub message: String,
    pub page_url: String,
}

/// Every failing instance of one rule within a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub name: String,
    pub rule_id: String,
    pub severity: Severity,
    pub occurrences: Vec<RuleOccurrence>,
}

impl RuleSummary {
    pub fn count(&self) -> usize {
        self.occurrences.len()
    }
}

/// Failing issues grouped by rule name, one summary per rule.
pub fn failing_rules(issues: &[Issue]) -> Vec<RuleSummary> {
    group_by(
        issues.iter().filter(|issue| !issue.passed),
        |issue| issue.name.clone(),
    )
    .into_iter()
    .filter_map(|(name, failed)| {
        let first = failed.first()?;
        Some(RuleSummary {
            name,
            rule_id: first.rule_id.clone(),
            severity: first.severity,
            occurrences: failed
                .iter()
                .map(|issue| RuleOccurrence {
                    message: issue.message.clone(),
                    page_url: issue.page_url.clone(),
                })
                .collect(),
        })
    })
    .collect()
}

/// Failing-rule summaries for each category that has at least one failure.
pub fn category_detail(groups: &CategoryGroups) -> IndexMap<RuleCategory, Vec<RuleSummary>> {
    groups
        .iter()
        .map(|(category, issues)| (*category, failing_rules(issues)))
        .filter(|(_, rules)| !rules.is_empty())
        .collect()
}

// ============================================================================
// Category counts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

impl CategoryResult {
    fn record(&mut self, passed: bool) {
        self.total += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryResultDisplay {
    pub data: IndexMap<RuleCategory, CategoryResult>,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

pub fn category_counts(issues: &[Issue]) -> CategoryResultDisplay {
    let mut display = CategoryResultDisplay::default();
    for issue in issues {
        display
            .data
            .entry(issue.category)
            .or_default()
            .record(issue.passed);
    }
    display.total = display.data.values().map(|r| r.total).sum();
    display.passed = display.data.values().map(|r| r.passed).sum();
    display.failed = display.data.values().map(|r| r.failed).sum();
    display
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_keeps_first_occurrence_order() {
        let groups = group_by(vec![3, 1, 4, 1, 5, 9, 2, 6], |n| n % 3);
        let keys: Vec<_> = groups.keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert_eq!(groups[&0], vec![3, 9, 6]);
        assert_eq!(groups[&1], vec![1, 4, 1]);
    }

    #[test]
    fn test_pathname() {
        assert_eq!(pathname("https://example.com/blog/post?x=1#top"), Some("/blog/post".to_string()));
        assert_eq!(pathname("https://example.com"), Some("/".to_string()));
        assert_eq!(pathname("not a url"), None);
    }
}
