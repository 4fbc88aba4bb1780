use seoscope::handlers::*;
use seoscope::{ReportFormat, render_report};
use seoscope_core::backend::BackendEvent;
use seoscope_core::settings::{self, SettingsPatch};
use seoscope_core::{CrawlState, Notifier, RunPhase};
use seoscope_graph::{Graph, Readable};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

fn crawl_result_json() -> serde_json::Value {
    json!({
        "total_pages": 2,
        "page_results": [
            {
                "url": "https://a.test/",
                "link_type": "Internal",
                "result": {"results": [{
                    "rule_id": "r1",
                    "name": "missing-title",
                    "category": "SEO",
                    "severity": "Error",
                    "passed": false,
                    "message": "No title"
                }]}
            },
            {"url": "https://b.test/", "link_type": "External"}
        ],
        "site_result": []
    })
}

fn event_log() -> String {
    [
        json!({"event": "site_run_id_set", "payload": {"site_run_id": 11}}),
        json!({"event": "analysis_progress", "payload": {"completed_urls": 1, "total_urls": 2}}),
        json!({"event": "analysis_progress", "payload": {"completed_urls": 2, "total_urls": 2}}),
        json!({"event": "analysis_finished", "payload": {"site_run_id": 11, "result": crawl_result_json()}}),
    ]
    .iter()
    .map(|event| event.to_string())
    .collect::<Vec<_>>()
    .join("\n")
}

// ============================================================================
// Event Log Tests
// ============================================================================

#[test]
fn test_parse_event_line_valid() {
    let event = parse_event_line(r#"{"event": "site_run_id_set", "payload": {"site_run_id": 4}}"#);
    assert_eq!(event, Some(BackendEvent::SiteRunIdSet { site_run_id: 4 }));
}

#[test]
fn test_parse_event_line_blank_and_invalid() {
    assert_eq!(parse_event_line("   "), None);
    assert_eq!(parse_event_line("{not json"), None);
    assert_eq!(parse_event_line(r#"{"event": "unknown", "payload": {}}"#), None);
}

#[test]
fn test_load_events_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "{}", event_log())?;
    writeln!(temp_file)?; // Empty line

    let path = PathBuf::from(temp_file.path());
    let events = load_events_from_file(&path)?;

    assert_eq!(events.len(), 4);
    assert_eq!(events[0], BackendEvent::SiteRunIdSet { site_run_id: 11 });
    Ok(())
}

#[test]
fn test_load_events_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();

    let result = load_events_from_file(temp_file.path());
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("No valid events"));
}

// ============================================================================
// Report Tests
// ============================================================================

#[test]
fn test_load_crawl_result() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    write!(temp_file, "{}", crawl_result_json())?;

    let result = load_crawl_result(temp_file.path())?;
    assert_eq!(result.total_pages, 2);
    assert_eq!(result.page_results.len(), 2);
    Ok(())
}

#[test]
fn test_load_crawl_result_rejects_garbage() {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "[1, 2, 3]").unwrap();
    assert!(load_crawl_result(temp_file.path()).is_err());
}

#[test]
fn test_json_report_shape() {
    let graph = Graph::new();
    let state = CrawlState::new(&graph);
    state.load(serde_json::from_value(crawl_result_json()).unwrap());

    let rendered = render_report(&state, ReportFormat::Json).unwrap();
    let report: serde_json::Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(report["total_pages"], 2);
    assert_eq!(report["links"]["Total"], 2);
    assert_eq!(report["links"]["External"], 1);
    assert_eq!(report["categories"]["failed"], 1);
    assert_eq!(report["failing_rules"]["SEO"][0]["name"], "missing-title");
    assert_eq!(report["phase"]["phase"], "idle");
}

#[test]
fn test_text_report_lists_failing_rules() {
    let graph = Graph::new();
    let state = CrawlState::new(&graph);
    state.load(serde_json::from_value(crawl_result_json()).unwrap());

    let rendered = render_report(&state, ReportFormat::Text).unwrap();
    assert!(rendered.contains("missing-title"));
    assert!(rendered.contains("https://a.test/"));
}

// ============================================================================
// Replay Tests
// ============================================================================

#[tokio::test]
async fn test_replay_events_finishes_run() {
    let events: Vec<BackendEvent> = event_log().lines().filter_map(parse_event_line).collect();
    let graph = Graph::new();

    let state = replay_events(&graph, events, Duration::ZERO, Notifier::silent(), None)
        .await
        .unwrap();

    assert_eq!(state.phase().get(), RunPhase::Finished { run_id: Some(11) });
    assert_eq!(
        state.progress().get().map(|p| (p.completed(), p.total())),
        Some((2, 2))
    );
    assert_eq!(state.issues().get().len(), 1);
}

#[tokio::test]
async fn test_replay_without_result_fails() {
    let events = vec![BackendEvent::SiteRunIdSet { site_run_id: 1 }];
    let graph = Graph::new();
    let (notifier, mut notifications) = Notifier::channel();

    let outcome = replay_events(&graph, events, Duration::ZERO, notifier, None).await;
    assert!(outcome.is_err());
    assert!(notifications.try_recv().is_ok());
}

// ============================================================================
// Settings Handler Tests
// ============================================================================

#[test]
fn test_expand_store_path_tilde() {
    let path = expand_store_path("~/.config/seoscope/store.db");
    assert!(!path.to_string_lossy().starts_with('~'));
    assert!(path.ends_with(".config/seoscope/store.db"));
}

#[test]
fn test_open_store_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("store.db");

    open_store(&path).unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn test_settings_set_merges_into_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir.path().join("store.db")).unwrap();

    handle_settings_set(
        &store,
        SettingsPatch {
            base_url: Some("https://a.test".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    handle_settings_set(
        &store,
        SettingsPatch {
            request_delay_ms: Some(250),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let stored = settings::load(&store).await.unwrap();
    assert_eq!(stored.base_url, "https://a.test");
    assert_eq!(stored.request_delay_ms, 250);
    assert_eq!(stored.max_concurrent_requests, 10);
}

#[tokio::test]
async fn test_settings_set_rejects_empty_and_invalid() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir.path().join("store.db")).unwrap();

    assert!(handle_settings_set(&store, SettingsPatch::default()).await.is_err());
    assert!(
        handle_settings_set(
            &store,
            SettingsPatch {
                max_concurrent_requests: Some(0),
                ..Default::default()
            },
        )
        .await
        .is_err()
    );
}
