use crate::report::{ReportFormat, render_report};
use anyhow::{Context, Result, bail};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use seoscope_core::backend::{
    Backend, BackendEvent, CategoryDetail, CategoryHistoryEntry, CommandResult, EventBus,
    LinkCount, RunId, Site, SiteId, SiteRun, SiteWithRuns,
};
use seoscope_core::classify::{CategoryResultDisplay, pathname};
use seoscope_core::notify::{Notification, NotifyLevel};
use seoscope_core::settings::{self, SETTINGS_KEY, Settings, SettingsPatch, SettingsSync};
use seoscope_core::{
    CrawlConsumer, CrawlResult, CrawlState, Notifier, QueryCache, SqliteStore,
};
use seoscope_graph::Graph;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_STORE_PATH: &str = "~/.config/seoscope/store.db";

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub fn print_notification(notification: &Notification) {
    let marker = match notification.level {
        NotifyLevel::Info => "ℹ".blue().bold(),
        NotifyLevel::Success => "✓".green().bold(),
        NotifyLevel::Warn => "⚠".yellow().bold(),
        NotifyLevel::Error => "✗".red().bold(),
    };
    eprintln!(
        "{} {} {}",
        notification.at.format("%H:%M:%S").to_string().bright_black(),
        marker,
        notification.message
    );
}

// ============================================================================
// Store helpers
// ============================================================================

/// Expand `~` and environment variables in a store path.
pub fn expand_store_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            warn!("Could not expand {}: {}", raw, e);
            PathBuf::from(shellexpand::tilde(raw).as_ref())
        }
    }
}

/// Open the store, creating its directory on first use.
pub fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

// ============================================================================
// Settings
// ============================================================================

pub fn render_settings(settings: &Settings) -> String {
    let base_url = if settings.base_url.is_empty() {
        "(not set)".bright_black().to_string()
    } else {
        settings.base_url.bright_white().to_string()
    };
    format!(
        "  {:<26} {}\n  {:<26} {}\n  {:<26} {} ms\n",
        "base_url",
        base_url,
        "max_concurrent_requests",
        settings.max_concurrent_requests.to_string().cyan(),
        "request_delay_ms",
        settings.request_delay_ms.to_string().cyan()
    )
}

pub async fn handle_settings_show(store: &SqliteStore, format: ReportFormat) -> Result<()> {
    let settings = settings::load(store).await.context("Failed to load settings")?;
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&settings)?),
        ReportFormat::Text => {
            println!("{}", "SETTINGS".bright_blue().bold());
            print!("{}", render_settings(&settings));
        }
    }
    Ok(())
}

pub async fn handle_settings_set(store: &SqliteStore, patch: SettingsPatch) -> Result<Settings> {
    if patch.is_empty() {
        bail!("Nothing to set; pass at least one of --base-url, --max-concurrent-requests, --request-delay-ms");
    }
    let saved = settings::save(store, &patch)
        .await
        .context("Failed to save settings")?;
    println!("{} Settings saved", "✓".green().bold());
    print!("{}", render_settings(&saved));
    Ok(saved)
}

/// Keep a settings cell in sync with the store and print every value it
/// converges to, until Ctrl-C.
pub async fn handle_settings_watch(store: SqliteStore, interval: Duration) -> Result<()> {
    let graph = Graph::new();
    let (notifier, mut notifications) = Notifier::channel();
    let sync = SettingsSync::new(&graph, store.clone(), notifier);

    sync.activate().await;
    println!(
        "{} Watching {} (Ctrl-C to stop)",
        "→".blue(),
        store.path().display().to_string().bright_white()
    );
    print!("{}", render_settings(&sync.settings().get()));

    let _printer = graph.subscribe(sync.settings(), |settings: &Settings| {
        println!(
            "\n{} {}",
            chrono::Local::now().format("%H:%M:%S").to_string().bright_black(),
            "settings changed".yellow()
        );
        print!("{}", render_settings(settings));
    });
    sync.install();

    let cancel = CancellationToken::new();
    let watcher = store.watch(vec![SETTINGS_KEY.to_string()], interval, cancel.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
        }
        cancel.cancel();
    };
    let toasts = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(notification) = notifications.recv() => print_notification(&notification),
            }
        }
    };
    tokio::join!(sync.run(cancel.clone()), shutdown, toasts);

    watcher.await.context("Store watcher failed")?;
    println!("\n{} Stopped watching", "✓".green().bold());
    Ok(())
}

// ============================================================================
// Crawl files
// ============================================================================

pub fn load_crawl_result(path: &Path) -> Result<CrawlResult> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read crawl result {}", path.display()))?;
    CrawlResult::from_json(&content)
        .with_context(|| format!("{} is not a crawl result", path.display()))
}

/// Parse one JSON-lines event, skipping blank and malformed lines.
pub fn parse_event_line(line: &str) -> Option<BackendEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            eprintln!("{} Skipping invalid event: {}", "⚠".yellow(), e);
            None
        }
    }
}

pub fn load_events_from_file(path: &Path) -> Result<Vec<BackendEvent>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log {}", path.display()))?;

    let events: Vec<BackendEvent> = content.lines().filter_map(parse_event_line).collect();

    if events.is_empty() {
        bail!("No valid events found in {}", path.display());
    }
    Ok(events)
}

pub fn handle_report(path: &Path, format: ReportFormat) -> Result<()> {
    let result = load_crawl_result(path)?;
    let graph = Graph::new();
    let state = CrawlState::new(&graph);
    state.load(result);

    if format == ReportFormat::Text {
        print_divider();
        println!(
            "{} {}",
            "Source:".blue(),
            path.display().to_string().bright_white()
        );
    }
    print!("{}", render_report(&state, format)?);
    if format == ReportFormat::Json {
        println!();
    }
    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

/// Backend that answers a crawl by pushing a recorded event log onto the
/// bus, then returning the result the log finished with.
pub struct ReplayBackend {
    events: Vec<BackendEvent>,
    bus: EventBus,
    delay: Duration,
}

impl ReplayBackend {
    pub fn new(events: Vec<BackendEvent>, bus: EventBus, delay: Duration) -> Self {
        Self { events, bus, delay }
    }

    fn final_result(&self) -> Option<CrawlResult> {
        self.events.iter().rev().find_map(|event| match event {
            BackendEvent::AnalysisFinished {
                result: Some(result),
                ..
            } => Some(result.clone()),
            _ => None,
        })
    }

    async fn play(&self) -> CommandResult<CrawlResult> {
        for event in &self.events {
            debug!(event = event.name(), "replaying");
            self.bus.emit(event.clone());
            if self.delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.delay).await;
            }
        }
        match self.final_result() {
            Some(result) => CommandResult::ok(result),
            None => CommandResult::error("Recording ended without a crawl result"),
        }
    }

    fn not_recorded<T>(command: &str) -> CommandResult<T> {
        CommandResult::error(format!("{} is not part of the recording", command))
    }
}

impl Backend for ReplayBackend {
    async fn get_config(&self) -> CommandResult<Settings> {
        Self::not_recorded("get_config")
    }

    async fn set_config(&self, _settings: Settings) -> CommandResult<()> {
        Self::not_recorded("set_config")
    }

    async fn get_sites(&self) -> CommandResult<Vec<SiteWithRuns>> {
        Self::not_recorded("get_sites")
    }

    async fn get_site_by_id(&self, _id: SiteId) -> CommandResult<Site> {
        Self::not_recorded("get_site_by_id")
    }

    async fn get_site_run_by_id(&self, _id: RunId) -> CommandResult<SiteRun> {
        Self::not_recorded("get_site_run_by_id")
    }

    async fn analyze_url_seo(&self, _url: &str) -> CommandResult<CrawlResult> {
        self.play().await
    }

    async fn crawl_seo(&self) -> CommandResult<CrawlResult> {
        self.play().await
    }

    async fn get_category_result(
        &self,
        _run: RunId,
        _passed: Option<bool>,
    ) -> CommandResult<CategoryResultDisplay> {
        Self::not_recorded("get_category_result")
    }

    async fn get_category_result_detail(
        &self,
        _run: RunId,
        _passed: Option<bool>,
    ) -> CommandResult<CategoryDetail> {
        Self::not_recorded("get_category_result_detail")
    }

    async fn get_site_run_link_counts(&self, _run: RunId) -> CommandResult<Vec<LinkCount>> {
        Self::not_recorded("get_site_run_link_counts")
    }

    async fn get_site_category_history(
        &self,
        _site: SiteId,
    ) -> CommandResult<Vec<CategoryHistoryEntry>> {
        Self::not_recorded("get_site_category_history")
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// Run a recorded crawl through a fresh [`CrawlState`]. Progress events
/// drive `bar` when one is given.
pub async fn replay_events(
    graph: &Graph,
    events: Vec<BackendEvent>,
    delay: Duration,
    notifier: Notifier,
    bar: Option<ProgressBar>,
) -> Result<CrawlState> {
    let bus = EventBus::default();
    let backend = Rc::new(ReplayBackend::new(events, bus.clone(), delay));
    let state = CrawlState::new(graph);
    let consumer = CrawlConsumer::new(backend, state.clone(), QueryCache::new(graph), notifier);

    let _progress = bar.map(|bar| {
        graph.subscribe(state.progress(), move |progress| {
            if let Some(progress) = progress {
                bar.set_length(u64::from(progress.total()));
                bar.set_position(u64::from(progress.completed()));
                if let Some(url) = progress.url() {
                    bar.set_message(pathname(url).unwrap_or_else(|| url.to_string()));
                }
            } else {
                bar.reset();
            }
        })
    });

    let cancel = CancellationToken::new();
    let events = bus.subscribe();
    let run = async {
        let applied = consumer.crawl().await;
        cancel.cancel();
        applied
    };
    let (applied, ()) = tokio::join!(run, consumer.listen(events, cancel.clone()));

    if !applied {
        bail!("Replay did not produce a crawl result");
    }
    Ok(state)
}

pub async fn handle_replay(
    path: &Path,
    delay: Duration,
    format: ReportFormat,
    quiet: bool,
) -> Result<()> {
    let events = load_events_from_file(path)?;
    let graph = Graph::new();
    let (notifier, mut notifications) = Notifier::channel();
    let bar = if quiet { None } else { Some(progress_bar()) };

    let outcome = replay_events(&graph, events, delay, notifier, bar.clone()).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    while let Ok(notification) = notifications.try_recv() {
        print_notification(&notification);
    }

    let state = outcome?;
    if format == ReportFormat::Text {
        println!("{} Replay complete: {}", "✓".green().bold(), state.phase().get());
    }
    print!("{}", render_report(&state, format)?);
    if format == ReportFormat::Json {
        println!();
    }
    Ok(())
}
