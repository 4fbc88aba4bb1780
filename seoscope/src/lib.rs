pub mod handlers;
pub mod report;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    DEFAULT_STORE_PATH, ReplayBackend, expand_store_path, load_crawl_result, load_events_from_file,
    open_store, parse_event_line, replay_events,
};
pub use report::{Report, ReportFormat, render_report};
