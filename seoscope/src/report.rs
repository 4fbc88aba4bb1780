// Terminal and JSON rendering of a classified crawl

use anyhow::Result;
use colored::Colorize;
use indexmap::IndexMap;
use seoscope_core::classify::{CategoryResultDisplay, RuleSummary};
use seoscope_core::model::{RuleCategory, Severity};
use seoscope_core::{CrawlState, RunPhase};
use seoscope_graph::Readable;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

/// Snapshot of everything the report shows.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub phase: RunPhase,
    pub total_pages: u32,
    pub links: IndexMap<String, usize>,
    pub categories: CategoryResultDisplay,
    pub severities: IndexMap<Severity, usize>,
    pub failing_rules: IndexMap<RuleCategory, Vec<RuleSummary>>,
}

impl Report {
    pub fn from_state(state: &CrawlState) -> Self {
        Self {
            phase: state.phase().get(),
            total_pages: state.total_pages().get(),
            links: state.links().get().counts(),
            categories: state.category_counts().get(),
            severities: state
                .severities()
                .get()
                .into_iter()
                .map(|(severity, issues)| (severity, issues.len()))
                .collect(),
            failing_rules: state.category_detail().get(),
        }
    }
}

pub fn render_report(state: &CrawlState, format: ReportFormat) -> Result<String> {
    let report = Report::from_state(state);
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(&report)?),
        ReportFormat::Text => Ok(render_text(&report)),
    }
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Critical => severity.as_str().red().bold().to_string(),
        Severity::Error => severity.as_str().red().to_string(),
        Severity::Warning => severity.as_str().yellow().to_string(),
        Severity::Info => severity.as_str().bright_black().to_string(),
    }
}

fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let divider = "═".repeat(60);

    out.push_str(&format!("{}\n", divider.bright_blue().bold()));
    out.push_str(&format!("{}\n", "  SEO REPORT".bright_white().bold()));
    out.push_str(&format!("{}\n\n", divider.bright_blue().bold()));

    out.push_str(&format!("{}\n", "Summary".bold()));
    out.push_str(&format!("  Run: {}\n", report.phase));
    out.push_str(&format!("  Pages crawled: {}\n", report.total_pages));
    out.push_str(&format!(
        "  Rules checked: {} ({} passed, {} failed)\n",
        report.categories.total,
        report.categories.passed.to_string().green(),
        report.categories.failed.to_string().red()
    ));

    out.push_str(&format!("\n{}\n", "Links".bold()));
    for (group, count) in &report.links {
        out.push_str(&format!("  {:<12} {}\n", group, count));
    }

    if !report.categories.data.is_empty() {
        out.push_str(&format!("\n{}\n", "Categories".bold()));
        for (category, result) in &report.categories.data {
            out.push_str(&format!(
                "  {:<16} {:>4} checked  {:>4} passed  {:>4} failed\n",
                category.label(),
                result.total,
                result.passed,
                result.failed
            ));
        }
    }

    if !report.severities.is_empty() {
        out.push_str(&format!("\n{}\n", "Severity".bold()));
        for (severity, count) in &report.severities {
            out.push_str(&format!("  {:<10} {}\n", severity_label(*severity), count));
        }
    }

    for (category, rules) in &report.failing_rules {
        out.push_str(&format!("\n{}\n", category.label().bold().underline()));
        for rule in rules {
            out.push_str(&format!(
                "  {} {} [{}] x{}\n",
                "✗".red().bold(),
                rule.name.bright_white(),
                severity_label(rule.severity),
                rule.count()
            ));
            for occurrence in &rule.occurrences {
                out.push_str(&format!(
                    "      {} {}\n",
                    occurrence.page_url.bright_black(),
                    occurrence.message
                ));
            }
        }
    }

    out
}
