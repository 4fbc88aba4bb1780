//! Client-side state for the SEO analysis app: settings kept in sync with a
//! persistent store, and crawl results classified into links, issues and
//! categories on top of [`seoscope_graph`].

pub mod backend;
pub mod classify;
pub mod crawl;
pub mod model;
pub mod notify;
pub mod query;
pub mod settings;
pub mod store;

pub use backend::{Backend, BackendEvent, CommandError, CommandResult, EventBus, RunId, SiteId};
pub use crawl::{CrawlConsumer, CrawlState, RunPhase};
pub use model::{CrawlResult, PageResult, Progress, RuleCategory, Severity};
pub use notify::{Notification, Notifier, NotifyLevel};
pub use query::{Queries, QueryCache, QueryKey};
pub use settings::{Settings, SettingsError, SettingsPatch, SettingsSync};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreChange, StoreError};
