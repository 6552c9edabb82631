//! Read side of the resource binding: keyed, staleness-aware fetch cache.
//!
//! A [`Query`] pairs a [`ResourceKey`] with a fetch function. The shared
//! [`QueryClient`] decides whether that function runs: disabled queries never
//! fetch, fresh cache entries are served without a network call, and
//! concurrent fetches of one key are serialized so the second caller reuses
//! the first caller's result.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    sync::{broadcast, watch, Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    error::{ClientError, ClientResult},
};

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 256;
const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    name: &'static str,
    params: Vec<String>,
}

impl ResourceKey {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl ToString) -> Self {
        self.params.push(param.to_string());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// `user-profiles/7` matches the prefixes `user-profiles` and `user-profiles/7`.
    pub fn matches(&self, prefix: &ResourceKey) -> bool {
        self.name == prefix.name && self.params.starts_with(&prefix.params)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for param in &self.params {
            write!(f, "/{param}")?;
        }
        Ok(())
    }
}

pub type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, ClientResult<T>> + Send + Sync>;

pub struct Query<T> {
    key: ResourceKey,
    fetch: FetchFn<T>,
    enabled: bool,
    stale_time: Option<Duration>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetch: Arc::clone(&self.fetch),
            enabled: self.enabled,
            stale_time: self.stale_time,
        }
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    pub fn new<F, Fut>(key: ResourceKey, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        let fetch: FetchFn<T> = Arc::new(move || fetch().boxed());
        Self {
            key,
            fetch,
            enabled: true,
            stale_time: None,
        }
    }

    /// A disabled query never reaches its fetch function.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Overrides the client's default staleness window for this query.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

impl<T> Query<T> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn staleness_window(&self) -> Option<Duration> {
        self.stale_time
    }
}

#[derive(Debug)]
pub enum QueryState<T> {
    /// No data and no error yet. Disabled queries stay here.
    Pending,
    Success(Arc<T>),
    /// The last fetch failed; `stale` holds the previous value if one was cached.
    Error {
        error: ClientError,
        stale: Option<Arc<T>>,
    },
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Success(value) => Self::Success(Arc::clone(value)),
            Self::Error { error, stale } => Self::Error {
                error: error.clone(),
                stale: stale.clone(),
            },
        }
    }
}

impl<T> QueryState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn data(&self) -> Option<&Arc<T>> {
        match self {
            Self::Pending => None,
            Self::Success(value) => Some(value),
            Self::Error { stale, .. } => stale.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn into_result(self) -> ClientResult<Arc<T>> {
        match self {
            Self::Pending => Err(ClientError::PreconditionNotMet(
                "the request's required parameters are not set",
            )),
            Self::Success(value) => Ok(value),
            Self::Error { error, .. } => Err(error),
        }
    }
}

type CachedValue = Arc<dyn Any + Send + Sync>;

struct CacheEntry {
    value: Option<CachedValue>,
    fetched_at: Option<Instant>,
    touched_at: Instant,
    invalidated: bool,
    generation: u64,
    last_error: Option<ClientError>,
}

impl CacheEntry {
    fn empty(now: Instant) -> Self {
        Self {
            value: None,
            fetched_at: None,
            touched_at: now,
            invalidated: false,
            generation: 0,
            last_error: None,
        }
    }

    fn is_fresh(&self, stale_time: Duration, now: Instant) -> bool {
        if self.invalidated || self.value.is_none() {
            return false;
        }
        self.fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < stale_time)
    }
}

/// Cache state a fetch started from; a store is only trusted if both still match.
#[derive(Debug, Clone, Copy)]
struct Fence {
    epoch: u64,
    generation: u64,
}

fn downcast<T: Send + Sync + 'static>(value: CachedValue) -> Option<Arc<T>> {
    value.downcast::<T>().ok()
}

/// Process-wide cache shared by every binding.
pub struct QueryClient {
    entries: Mutex<HashMap<ResourceKey, CacheEntry>>,
    inflight: Mutex<HashMap<ResourceKey, Arc<Mutex<()>>>>,
    /// Bumped by `clear`; results of fetches started before it are discarded.
    epoch: AtomicU64,
    invalidations: broadcast::Sender<ResourceKey>,
    max_entries: usize,
    gc_time: Duration,
    default_stale_time: Duration,
}

impl QueryClient {
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEFAULT_MAX_ENTRIES, DEFAULT_GC_TIME)
    }

    pub fn from_settings(settings: &ClientSettings) -> Arc<Self> {
        Self::build(
            settings.cache_max_entries,
            settings.cache_gc_time(),
            settings.default_stale_time(),
        )
    }

    pub fn with_limits(max_entries: usize, gc_time: Duration) -> Arc<Self> {
        Self::build(max_entries, gc_time, DEFAULT_STALE_TIME)
    }

    fn build(max_entries: usize, gc_time: Duration, default_stale_time: Duration) -> Arc<Self> {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            invalidations,
            max_entries: max_entries.max(1),
            gc_time,
            default_stale_time,
        })
    }

    async fn acquire(&self, key: &ResourceKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drops the key's lock once no other caller holds or awaits it.
    async fn release(&self, key: &ResourceKey) {
        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            inflight.remove(key);
        }
    }

    pub async fn fetch_query<T: Send + Sync + 'static>(&self, query: &Query<T>) -> QueryState<T> {
        if !query.enabled {
            debug!(key = %query.key, "query: disabled, fetch skipped");
            return QueryState::Pending;
        }

        // Held until the result is stored, so a second caller sees it fresh.
        let inflight = self.acquire(&query.key).await;
        let state = self.fetch_locked(query).await;
        drop(inflight);
        self.release(&query.key).await;
        state
    }

    async fn fetch_locked<T: Send + Sync + 'static>(&self, query: &Query<T>) -> QueryState<T> {
        let stale_time = query.stale_time.unwrap_or(self.default_stale_time);
        let (fence, stale) = {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            let entry = entries
                .entry(query.key.clone())
                .or_insert_with(|| CacheEntry::empty(now));
            let cached = entry.value.clone().and_then(downcast::<T>);
            if entry.is_fresh(stale_time, now) {
                if let Some(value) = &cached {
                    entry.touched_at = now;
                    debug!(key = %query.key, "query: cache hit");
                    return QueryState::Success(Arc::clone(value));
                }
            }
            let fence = Fence {
                epoch: self.epoch.load(Ordering::Acquire),
                generation: entry.generation,
            };
            (fence, cached)
        };

        info!(key = %query.key, "query: fetching");
        match (query.fetch)().await {
            Ok(value) => {
                let value = Arc::new(value);
                self.store(&query.key, Arc::clone(&value) as CachedValue, Some(fence))
                    .await;
                QueryState::Success(value)
            }
            Err(error) => {
                warn!(key = %query.key, error = %error, "query: fetch failed");
                let mut entries = self.entries.lock().await;
                if self.epoch.load(Ordering::Acquire) == fence.epoch {
                    if let Some(entry) = entries.get_mut(&query.key) {
                        entry.last_error = Some(error.clone());
                    }
                }
                QueryState::Error { error, stale }
            }
        }
    }

    async fn store(&self, key: &ResourceKey, value: CachedValue, fence: Option<Fence>) {
        let now = Instant::now();
        let gc_time = self.gc_time;
        let mut entries = self.entries.lock().await;
        if fence.is_some_and(|f| f.epoch != self.epoch.load(Ordering::Acquire)) {
            debug!(key = %key, "query: cache cleared while in flight, result dropped");
            return;
        }
        entries.retain(|k, e| k == key || now.saturating_duration_since(e.touched_at) <= gc_time);

        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::empty(now));
        // An invalidation that landed mid-flight keeps the entry stale.
        let superseded = fence.is_some_and(|f| f.generation != entry.generation);
        if superseded {
            debug!(key = %key, "query: invalidated while in flight, result kept stale");
        }
        entry.value = Some(value);
        entry.fetched_at = Some(now);
        entry.touched_at = now;
        entry.invalidated = superseded;
        entry.last_error = None;

        while entries.len() > self.max_entries {
            let Some(victim) = entries
                .iter()
                .filter(|(k, _)| *k != key)
                .min_by_key(|(_, e)| e.touched_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            debug!(key = %victim, "query: evicted");
            entries.remove(&victim);
        }
    }

    pub async fn get_query_data<T: Send + Sync + 'static>(
        &self,
        key: &ResourceKey,
    ) -> Option<Arc<T>> {
        let entries = self.entries.lock().await;
        entries.get(key)?.value.clone().and_then(downcast::<T>)
    }

    /// Seeds or replaces a cached value as if it had just been fetched.
    pub async fn set_query_data<T: Send + Sync + 'static>(&self, key: &ResourceKey, value: T) {
        self.store(key, Arc::new(value) as CachedValue, None).await;
    }

    pub async fn last_error(&self, key: &ResourceKey) -> Option<ClientError> {
        let entries = self.entries.lock().await;
        entries.get(key)?.last_error.clone()
    }

    /// Marks every entry under `prefix` stale and wakes observers of those keys.
    pub async fn invalidate(&self, prefix: &ResourceKey) -> usize {
        let mut invalidated = 0;
        {
            let mut entries = self.entries.lock().await;
            for (key, entry) in entries.iter_mut() {
                if key.matches(prefix) {
                    entry.invalidated = true;
                    entry.generation += 1;
                    invalidated += 1;
                }
            }
        }
        info!(key = %prefix, invalidated, "query: invalidated");
        let _ = self.invalidations.send(prefix.clone());
        invalidated
    }

    /// Forgets every entry. Fetches already in flight still return their result
    /// to their caller but never write it back.
    pub async fn clear(&self) {
        {
            let mut entries = self.entries.lock().await;
            self.epoch.fetch_add(1, Ordering::AcqRel);
            entries.clear();
        }
        self.inflight.lock().await.clear();
        info!("query: cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Subscribes a view to `query`.
    ///
    /// A background task fetches, publishes the state, and refetches whenever a
    /// matching key is invalidated. Dropping the observer stops delivery; a
    /// fetch already on the wire still completes and still fills the cache.
    pub fn watch<T: Send + Sync + 'static>(self: &Arc<Self>, query: Query<T>) -> QueryObserver<T> {
        let (tx, rx) = watch::channel(QueryState::Pending);
        let key = query.key.clone();
        if !query.enabled {
            debug!(key = %key, "query: observer created for disabled query");
            return QueryObserver { key, rx };
        }

        let mut invalidations = self.invalidations.subscribe();
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let state = client.fetch_query(&query).await;
                if tx.send(state).is_err() {
                    debug!(key = %query.key, "query: observer gone, result discarded");
                    return;
                }
                if !wait_for_invalidation(&tx, &mut invalidations, &query.key).await {
                    return;
                }
            }
        });

        QueryObserver { key, rx }
    }
}

async fn wait_for_invalidation<T>(
    tx: &watch::Sender<QueryState<T>>,
    invalidations: &mut broadcast::Receiver<ResourceKey>,
    key: &ResourceKey,
) -> bool {
    loop {
        tokio::select! {
            _ = tx.closed() => return false,
            event = invalidations.recv() => match event {
                Ok(prefix) if key.matches(&prefix) => return true,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => return true,
                Err(broadcast::error::RecvError::Closed) => return false,
            },
        }
    }
}

/// View-scoped handle onto a watched query.
pub struct QueryObserver<T> {
    key: ResourceKey,
    rx: watch::Receiver<QueryState<T>>,
}

impl<T> QueryObserver<T> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<T> {
        (*self.rx.borrow()).clone()
    }

    /// Waits for the next published state. `None` once no more states will arrive,
    /// which is immediate for a disabled query.
    pub async fn next(&mut self) -> Option<QueryState<T>> {
        self.rx.changed().await.ok()?;
        let state = (*self.rx.borrow_and_update()).clone();
        Some(state)
    }

    /// Waits until the state is no longer pending.
    pub async fn settled(&mut self) -> Option<QueryState<T>> {
        loop {
            let state = (*self.rx.borrow_and_update()).clone();
            if !state.is_pending() {
                return Some(state);
            }
            self.rx.changed().await.ok()?;
        }
    }
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
