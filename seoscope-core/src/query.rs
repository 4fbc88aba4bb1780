// Cached backend queries, invalidated when a run finishes

use crate::backend::{
    Backend, CategoryDetail, CategoryHistoryEntry, CommandResult, LinkCount, RunId, Site, SiteId,
    SiteRun, SiteWithRuns,
};
use crate::classify::CategoryResultDisplay;
use crate::notify::Notifier;
use chrono::{DateTime, Utc};
use seoscope_graph::{Cell, Graph};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Sites,
    Site(SiteId),
    SiteRun(RunId),
    CategoryResult { run: RunId, passed: Option<bool> },
    CategoryDetail { run: RunId, passed: Option<bool> },
    LinkCounts(RunId),
    CategoryHistory(SiteId),
}

impl QueryKey {
    /// The run this query is keyed by, if any.
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            QueryKey::SiteRun(run)
            | QueryKey::CategoryResult { run, .. }
            | QueryKey::CategoryDetail { run, .. }
            | QueryKey::LinkCounts(run) => Some(*run),
            QueryKey::Sites | QueryKey::Site(_) | QueryKey::CategoryHistory(_) => None,
        }
    }

    /// Queries whose answer grows when any run finishes.
    pub fn lists_sites(&self) -> bool {
        matches!(self, QueryKey::Sites | QueryKey::CategoryHistory(_))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Value,
    stale: bool,
    fetched_at: DateTime<Utc>,
}

/// Query results keyed by what was asked. A stale entry is still returned as
/// a fallback but is refetched on the next read.
#[derive(Debug, Clone)]
pub struct QueryCache {
    entries: Rc<RefCell<HashMap<QueryKey, Entry>>>,
    revision: Cell<u64>,
}

impl QueryCache {
    pub fn new(graph: &Graph) -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
            revision: graph.cell(0),
        }
    }

    /// Bumped on every invalidation; subscribe to it to refetch.
    pub fn revision(&self) -> &Cell<u64> {
        &self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn insert<T: Serialize>(&self, key: QueryKey, data: &T) -> serde_json::Result<()> {
        let entry = Entry {
            data: serde_json::to_value(data)?,
            stale: false,
            fetched_at: Utc::now(),
        };
        self.entries.borrow_mut().insert(key, entry);
        Ok(())
    }

    /// The cached answer, only if it is fresh.
    pub fn fresh<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let entries = self.entries.borrow();
        let entry = entries.get(key).filter(|entry| !entry.stale)?;
        serde_json::from_value(entry.data.clone()).ok()
    }

    /// The cached answer, fresh or stale.
    pub fn cached<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let entries = self.entries.borrow();
        serde_json::from_value(entries.get(key)?.data.clone()).ok()
    }

    pub fn is_stale(&self, key: &QueryKey) -> Option<bool> {
        self.entries.borrow().get(key).map(|entry| entry.stale)
    }

    pub fn fetched_at(&self, key: &QueryKey) -> Option<DateTime<Utc>> {
        self.entries.borrow().get(key).map(|entry| entry.fetched_at)
    }

    /// Mark every entry matching `predicate` stale. Returns how many were.
    pub fn invalidate(&self, predicate: impl Fn(&QueryKey) -> bool) -> usize {
        let mut marked = 0;
        for (key, entry) in self.entries.borrow_mut().iter_mut() {
            if !entry.stale && predicate(key) {
                entry.stale = true;
                marked += 1;
            }
        }
        if marked > 0 {
            self.revision.update(|rev| rev + 1);
        }
        marked
    }

    /// Invalidate what a finished run changes: queries keyed by that run and
    /// the site listings. With no run id only the listings are touched.
    pub fn invalidate_run(&self, run: Option<RunId>) -> usize {
        let marked = self.invalidate(|key| {
            key.lists_sites() || (run.is_some() && key.run_id() == run)
        });
        debug!(?run, marked, "Invalidated queries for finished run");
        marked
    }
}

/// Typed backend queries through a [`QueryCache`]. Failures are reported to
/// the notifier and fall back to whatever was cached before.
pub struct Queries<B> {
    backend: Rc<B>,
    cache: QueryCache,
    notifier: Notifier,
}

impl<B: Backend> Queries<B> {
    pub fn new(backend: Rc<B>, cache: QueryCache, notifier: Notifier) -> Self {
        Self {
            backend,
            cache,
            notifier,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    async fn fetch<T, F>(&self, key: QueryKey, request: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = CommandResult<T>>,
    {
        if let Some(hit) = self.cache.fresh(&key) {
            return Some(hit);
        }
        match request.await.into_result() {
            Ok(data) => {
                if let Err(e) = self.cache.insert(key, &data) {
                    warn!("Could not cache query result: {}", e);
                }
                Some(data)
            }
            Err(e) => {
                self.notifier.error(format!("Query failed: {}", e));
                self.cache.cached(&key)
            }
        }
    }

    /// Every site with its runs; empty when the backend fails and nothing
    /// was cached.
    pub async fn sites(&self) -> Vec<SiteWithRuns> {
        self.fetch(QueryKey::Sites, self.backend.get_sites())
            .await
            .unwrap_or_default()
    }

    pub async fn site(&self, id: SiteId) -> Option<Site> {
        self.fetch(QueryKey::Site(id), self.backend.get_site_by_id(id))
            .await
    }

    pub async fn site_run(&self, id: RunId) -> Option<SiteRun> {
        self.fetch(QueryKey::SiteRun(id), self.backend.get_site_run_by_id(id))
            .await
    }

    pub async fn category_result(
        &self,
        run: RunId,
        passed: Option<bool>,
    ) -> Option<CategoryResultDisplay> {
        self.fetch(
            QueryKey::CategoryResult { run, passed },
            self.backend.get_category_result(run, passed),
        )
        .await
    }

    pub async fn category_detail(&self, run: RunId, passed: Option<bool>) -> Option<CategoryDetail> {
        self.fetch(
            QueryKey::CategoryDetail { run, passed },
            self.backend.get_category_result_detail(run, passed),
        )
        .await
    }

    pub async fn link_counts(&self, run: RunId) -> Option<Vec<LinkCount>> {
        self.fetch(
            QueryKey::LinkCounts(run),
            self.backend.get_site_run_link_counts(run),
        )
        .await
    }

    pub async fn category_history(&self, site: SiteId) -> Option<Vec<CategoryHistoryEntry>> {
        self.fetch(
            QueryKey::CategoryHistory(site),
            self.backend.get_site_category_history(site),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_run_marks_run_and_listings() {
        let graph = Graph::new();
        let cache = QueryCache::new(&graph);
        cache.insert(QueryKey::Sites, &Vec::<u32>::new()).unwrap();
        cache.insert(QueryKey::LinkCounts(1), &Vec::<u32>::new()).unwrap();
        cache.insert(QueryKey::LinkCounts(2), &Vec::<u32>::new()).unwrap();
        cache.insert(QueryKey::Site(9), &"site").unwrap();

        assert_eq!(cache.invalidate_run(Some(1)), 2);
        assert_eq!(cache.is_stale(&QueryKey::Sites), Some(true));
        assert_eq!(cache.is_stale(&QueryKey::LinkCounts(1)), Some(true));
        assert_eq!(cache.is_stale(&QueryKey::LinkCounts(2)), Some(false));
        assert_eq!(cache.is_stale(&QueryKey::Site(9)), Some(false));
        assert_eq!(cache.revision().get(), 1);
    }

    #[test]
    fn test_stale_entry_is_not_fresh_but_still_cached() {
        let graph = Graph::new();
        let cache = QueryCache::new(&graph);
        cache.insert(QueryKey::SiteRun(3), &42u32).unwrap();
        assert_eq!(cache.fresh::<u32>(&QueryKey::SiteRun(3)), Some(42));

        cache.invalidate_run(Some(3));
        assert_eq!(cache.fresh::<u32>(&QueryKey::SiteRun(3)), None);
        assert_eq!(cache.cached::<u32>(&QueryKey::SiteRun(3)), Some(42));
    }

    #[test]
    fn test_invalidate_without_matches_keeps_revision() {
        let graph = Graph::new();
        let cache = QueryCache::new(&graph);
        assert_eq!(cache.invalidate_run(None), 0);
        assert_eq!(cache.revision().get(), 0);
    }
}
