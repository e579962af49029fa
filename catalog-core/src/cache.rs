//! Lazily populated child caches.
//!
//! Every catalog container owns one [`ObjectCache`] per child type. The first
//! reader populates it; everyone else either finds it populated or waits on
//! the population lock and then reads the same children. A failed or
//! cancelled population leaves nothing behind, so the next access retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use tokio::sync::{Mutex, RwLock};
use tracing::Span;

use crate::progress::ProgressMonitor;
use crate::transport::{CatalogQuery, QueryExecutor, ResultRow};

/// An object stored in a cache, indexed by name.
pub trait CachedObject: Send + Sync + 'static {
    fn name(&self) -> &str;
}

/// Container side of a cache: identity, logging span and execution context.
#[async_trait]
pub trait CacheOwner: Send + Sync {
    /// Label used in logs and errors, e.g. `schema public`.
    fn owner_label(&self) -> String;

    /// Span all cache events for this owner are recorded under.
    fn span(&self) -> &Span;

    /// Executor for the owner's catalog queries.
    async fn query_executor(&self) -> AppResult<Arc<dyn QueryExecutor>>;
}

/// Per child type: how to query and how to materialize rows.
pub trait ObjectLoader<O, C>: Send + Sync {
    /// Builds the catalog query, including any pushed-down filter.
    fn prepare_query(&self, owner: &O) -> AppResult<CatalogQuery>;

    /// Materializes one row. `Ok(None)` skips the row; it is neither cached
    /// nor returned.
    fn fetch_object(&self, owner: &O, row: &ResultRow) -> AppResult<Option<Arc<C>>>;
}

/// Population state of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationState {
    Unpopulated,
    Populating,
    Populated,
}

/// Children in fetch order plus a name index.
struct Children<C> {
    items: Vec<Arc<C>>,
    by_name: HashMap<String, usize>,
}

impl<C: CachedObject> Children<C> {
    fn new(items: Vec<Arc<C>>) -> Self {
        let mut by_name = HashMap::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            by_name.entry(item.name().to_string()).or_insert(index);
        }
        Self { items, by_name }
    }

    fn get(&self, name: &str) -> Option<Arc<C>> {
        self.by_name.get(name).map(|&i| self.items[i].clone())
    }
}

/// Resets the populating flag however the population ends, including when
/// the caller's future is dropped mid-fetch.
struct PopulatingGuard<'a>(&'a AtomicBool);

impl<'a> PopulatingGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PopulatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fetch-once cache of an owner's children.
pub struct ObjectCache<O, C> {
    loader: Box<dyn ObjectLoader<O, C>>,
    children: RwLock<Option<Arc<Children<C>>>>,
    /// Held for the whole population and by `invalidate`.
    populate_lock: Mutex<()>,
    populating: AtomicBool,
    fetch_count: AtomicUsize,
}

impl<O, C> ObjectCache<O, C>
where
    O: CacheOwner,
    C: CachedObject,
{
    pub fn new(loader: impl ObjectLoader<O, C> + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            children: RwLock::new(None),
            populate_lock: Mutex::new(()),
            populating: AtomicBool::new(false),
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// Returns all children in fetch order, populating on first use.
    ///
    /// # Errors
    /// `AppError::Fetch` if the query or a row fails, `AppError::Cancelled`
    /// if the monitor cancels. Either way the cache stays unpopulated.
    pub async fn get_all_objects(
        &self,
        owner: &O,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Vec<Arc<C>>> {
        Ok(self.populated(owner, monitor).await?.items.clone())
    }

    /// Returns the child named `name`.
    ///
    /// # Errors
    /// `AppError::ObjectNotFound` if no such child exists after population,
    /// plus the errors of [`get_all_objects`](Self::get_all_objects).
    pub async fn get_object(
        &self,
        owner: &O,
        name: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Arc<C>> {
        self.find_object(owner, name, monitor)
            .await?
            .ok_or_else(|| AppError::not_found(owner.owner_label(), name))
    }

    /// Like [`get_object`](Self::get_object) but reports absence as `None`.
    pub async fn find_object(
        &self,
        owner: &O,
        name: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Option<Arc<C>>> {
        Ok(self.populated(owner, monitor).await?.get(name))
    }

    /// Returns the cached children without fetching.
    pub async fn cached_objects(&self) -> Option<Vec<Arc<C>>> {
        self.children.read().await.as_ref().map(|c| c.items.clone())
    }

    /// Discards the children. Waits for an in-flight population first.
    pub async fn invalidate(&self, owner: &O) {
        let _lock = self.populate_lock.lock().await;
        if self.children.write().await.take().is_some() {
            tracing::debug!(parent: owner.span(), owner = %owner.owner_label(), "Cache invalidated");
        }
    }

    /// Invalidates and fetches again.
    pub async fn refresh(&self, owner: &O, monitor: &dyn ProgressMonitor) -> AppResult<Vec<Arc<C>>> {
        self.invalidate(owner).await;
        self.get_all_objects(owner, monitor).await
    }

    pub async fn state(&self) -> PopulationState {
        if self.children.read().await.is_some() {
            PopulationState::Populated
        } else if self.populating.load(Ordering::SeqCst) {
            PopulationState::Populating
        } else {
            PopulationState::Unpopulated
        }
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    async fn populated(
        &self,
        owner: &O,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Arc<Children<C>>> {
        if let Some(children) = self.children.read().await.as_ref() {
            return Ok(children.clone());
        }

        let _lock = self.populate_lock.lock().await;
        if let Some(children) = self.children.read().await.as_ref() {
            return Ok(children.clone());
        }

        let _populating = PopulatingGuard::raise(&self.populating);
        let children = match self.load(owner, monitor).await {
            Ok(items) => Arc::new(Children::new(items)),
            Err(e) => {
                tracing::warn!(parent: owner.span(), owner = %owner.owner_label(), error = %e, "Population failed");
                return Err(e);
            }
        };
        *self.children.write().await = Some(children.clone());
        Ok(children)
    }

    async fn load(&self, owner: &O, monitor: &dyn ProgressMonitor) -> AppResult<Vec<Arc<C>>> {
        let label = owner.owner_label();
        if monitor.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        monitor.begin_task(&format!("Load children of {}", label));
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let query = self.loader.prepare_query(owner)?;
        let executor = owner
            .query_executor()
            .await
            .map_err(|e| as_fetch_error(&label, e))?;
        let mut cursor = executor
            .execute(&query)
            .await
            .map_err(|e| as_fetch_error(&label, e))?;

        let mut items = Vec::new();
        let mut skipped = 0usize;
        while let Some(row) = cursor.next_row().await.map_err(|e| as_fetch_error(&label, e))? {
            if monitor.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            match self
                .loader
                .fetch_object(owner, &row)
                .map_err(|e| as_fetch_error(&label, e))?
            {
                Some(object) => items.push(object),
                None => skipped += 1,
            }
        }

        tracing::debug!(parent: owner.span(), owner = %label, count = items.len(), skipped, "Cache populated");
        Ok(items)
    }
}

fn as_fetch_error(owner: &str, error: AppError) -> AppError {
    match error {
        AppError::Fetch { .. } | AppError::Cancelled => error,
        other => AppError::fetch(owner, other.to_string()),
    }
}
