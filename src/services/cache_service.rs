//! In-process TTL cache with tag-based invalidation.
//!
//! Each logical domain gets its own explicitly constructed [`CacheService`];
//! handles are cheap to clone and share one underlying map. Entries expire
//! strictly (an expired entry is never served), are evicted least-recently-used
//! first when the entry or memory budget is exceeded, and can be dropped in
//! bulk by tag.
//!
//! Nothing here is durable or shared across processes.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashMap},
    fmt::Display,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const TOP_KEYS: usize = 10;
/// Upper bound for TTLs that would overflow the clock.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// How `get_or_set` treats concurrent misses on the same key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Every caller that misses runs its own fetch.
    #[default]
    Independent,
    /// Callers missing the same key wait for a single in-flight fetch.
    Coalesced,
}

/// Per-instance behaviour.
#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Approximate byte budget across all entries. `None` disables it.
    pub max_memory_bytes: Option<usize>,
    /// Push `expires_at` forward on every hit.
    pub refresh_on_access: bool,
    /// Tags attached to every entry of this instance.
    pub tags: Vec<String>,
    pub fetch_mode: FetchMode,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_memory_bytes: None,
            refresh_on_access: true,
            tags: Vec::new(),
            fetch_mode: FetchMode::Independent,
        }
    }
}

/// Per-call overrides for `set`.
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            tags: Vec::new(),
        }
    }

    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ttl: None,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub accessed_at: Instant,
    pub access_count: u64,
    pub ttl: Duration,
    pub tags: BTreeSet<String>,
    /// Length of the JSON encoding, used for memory accounting.
    pub size: usize,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct KeyStats {
    pub key: String,
    pub hits: u64,
    pub size: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CacheStats {
    pub name: String,
    pub total_entries: usize,
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_sets: u64,
    pub total_deletes: u64,
    pub total_evictions: u64,
    pub total_expirations: u64,
    pub memory_usage: usize,
    pub uptime_secs: u64,
    pub top_keys: Vec<KeyStats>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
    expirations: u64,
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    memory: usize,
    counters: Counters,
}

impl<T> CacheState<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            memory: 0,
            counters: Counters::default(),
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.memory = self.memory.saturating_sub(entry.size);
        Some(entry)
    }

    /// Evict the least recently used entry, oldest first on ties.
    fn evict_lru(&mut self, protect: Option<&str>) -> Option<String> {
        let victim = self
            .entries
            .values()
            .filter(|entry| Some(entry.key.as_str()) != protect)
            .min_by(|a, b| {
                a.accessed_at
                    .cmp(&b.accessed_at)
                    .then(a.created_at.cmp(&b.created_at))
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|entry| entry.key.clone())?;
        self.remove(&victim);
        self.counters.evictions += 1;
        Some(victim)
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.counters.expirations += expired.len() as u64;
        expired.len()
    }
}

/// A named, shareable TTL cache.
pub struct CacheService<T> {
    name: Arc<str>,
    options: Arc<CacheOptions>,
    state: Arc<Mutex<CacheState<T>>>,
    in_flight: Arc<InFlightMap>,
    started_at: Instant,
}

impl<T> Clone for CacheService<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            in_flight: self.in_flight.clone(),
            started_at: self.started_at,
        }
    }
}

impl<T> CacheService<T>
where
    T: Clone + Serialize,
{
    pub fn new(name: impl Into<String>, options: CacheOptions) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        debug!(cache = %name, ttl_secs = options.ttl.as_secs(), max_entries = options.max_entries, "cache initialised");
        Self {
            name,
            options: Arc::new(options),
            state: Arc::new(Mutex::new(CacheState::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Insert or overwrite `key`.
    ///
    /// A zero TTL stores an entry that is already expired.
    pub fn set(&self, key: impl Into<String>, value: T, opts: SetOptions) {
        let key = key.into();
        let now = Instant::now();
        let ttl = opts.ttl.unwrap_or(self.options.ttl).min(MAX_TTL);
        let size = estimate_size(&value);
        let tags: BTreeSet<String> = self
            .options
            .tags
            .iter()
            .chain(opts.tags.iter())
            .cloned()
            .collect();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.remove(&key).is_none() {
            while state.entries.len() >= self.options.max_entries.max(1) {
                match state.evict_lru(None) {
                    Some(evicted) => debug!(cache = %self.name, key = %evicted, "evicted lru entry"),
                    None => break,
                }
            }
        }

        state.memory += size;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                value,
                created_at: now,
                expires_at: now + ttl,
                accessed_at: now,
                access_count: 0,
                ttl,
                tags,
                size,
            },
        );
        state.counters.sets += 1;

        if let Some(cap) = self.options.max_memory_bytes {
            while state.memory > cap && state.entries.len() > 1 {
                match state.evict_lru(Some(&key)) {
                    Some(evicted) => {
                        debug!(cache = %self.name, key = %evicted, memory = state.memory, cap, "evicted entry over memory budget")
                    }
                    None => break,
                }
            }
        }

        debug!(cache = %self.name, key = %key, ttl_ms = ttl.as_millis() as u64, size, "cache set");
    }

    /// Fresh value for `key`, or `None` on a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        self.lookup(key, true)
    }

    fn lookup(&self, key: &str, record: bool) -> Option<T> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.get(key) {
            None => {
                if record {
                    state.counters.misses += 1;
                    debug!(cache = %self.name, key, "cache miss");
                }
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove(key);
            state.counters.expirations += 1;
            if record {
                state.counters.misses += 1;
            }
            debug!(cache = %self.name, key, "cache miss (expired)");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.accessed_at = now;
        entry.access_count += 1;
        if self.options.refresh_on_access {
            entry.expires_at = now + entry.ttl;
        }
        let value = entry.value.clone();
        if record {
            state.counters.hits += 1;
        }
        Some(value)
    }

    /// True when `key` holds a fresh entry. Does not touch statistics.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                state.remove(key);
                state.counters.expirations += 1;
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.remove(key).is_some();
        if existed {
            state.counters.deletes += 1;
            debug!(cache = %self.name, key, "cache delete");
        }
        existed
    }

    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.memory = 0;
        info!(cache = %self.name, count, "cache cleared");
        count
    }

    /// Remove every entry carrying at least one of `tags`.
    pub fn clear_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .entries
            .values()
            .filter(|entry| tags.iter().any(|tag| entry.tags.contains(tag.as_ref())))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        info!(
            cache = %self.name,
            tags = ?tags.iter().map(|tag| tag.as_ref()).collect::<Vec<&str>>(),
            cleared = doomed.len(),
            "cache cleared by tags"
        );
        doomed.len()
    }

    /// Stored entries, expired ones included until they are swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry now.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.state.lock().sweep(Instant::now());
        if removed > 0 {
            info!(cache = %self.name, expired = removed, "cache cleanup");
        }
        removed
    }

    /// Return the cached value or run `fetch` and store its result.
    ///
    /// Fetch errors are returned unchanged and nothing is stored. Whether
    /// concurrent misses share a fetch depends on [`FetchMode`].
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, fetch: F, opts: SetOptions) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        match self.options.fetch_mode {
            FetchMode::Independent => self.fetch_and_store(key, fetch, opts).await,
            FetchMode::Coalesced => {
                let flight = InFlight::join(&self.in_flight, key);
                let _permit = flight.gate.lock().await;
                match self.lookup(key, false) {
                    Some(value) => Ok(value),
                    None => self.fetch_and_store(key, fetch, opts).await,
                }
            }
        }
    }

    async fn fetch_and_store<F, Fut, E>(&self, key: &str, fetch: F, opts: SetOptions) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        match fetch().await {
            Ok(value) => {
                self.set(key, value.clone(), opts);
                Ok(value)
            }
            Err(err) => {
                warn!(cache = %self.name, key, error = %err, "cache fetch failed");
                Err(err)
            }
        }
    }

    /// Run all fetches concurrently and store the successful ones.
    pub async fn warm<I, Fut, E>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Fut)>,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let results = join_all(
            entries
                .into_iter()
                .map(|(key, fetch)| async move { (key, fetch.await) }),
        )
        .await;

        let total = results.len();
        let mut loaded = 0;
        for (key, result) in results {
            match result {
                Ok(value) => {
                    self.set(key, value, SetOptions::default());
                    loaded += 1;
                }
                Err(err) => warn!(cache = %self.name, key = %key, error = %err, "cache warming failed"),
            }
        }
        info!(cache = %self.name, loaded, total, "cache warmed");
        loaded
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let counters = &state.counters;
        let requests = counters.hits + counters.misses;
        let hit_rate = if requests > 0 {
            (counters.hits as f64 / requests as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };

        let mut top_keys: Vec<KeyStats> = state
            .entries
            .values()
            .map(|entry| KeyStats {
                key: entry.key.clone(),
                hits: entry.access_count,
                size: entry.size,
            })
            .collect();
        top_keys.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.key.cmp(&b.key)));
        top_keys.truncate(TOP_KEYS);

        CacheStats {
            name: self.name.to_string(),
            total_entries: state.entries.len(),
            hit_rate,
            total_hits: counters.hits,
            total_misses: counters.misses,
            total_sets: counters.sets,
            total_deletes: counters.deletes,
            total_evictions: counters.evictions,
            total_expirations: counters.expirations,
            memory_usage: state.memory,
            uptime_secs: self.started_at.elapsed().as_secs(),
            top_keys,
        }
    }
}

impl<T> CacheService<T>
where
    T: Send + 'static,
{
    /// Periodically drop expired entries so keys that are never read again
    /// do not pin memory. The task ends once every handle is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let state: Weak<Mutex<CacheState<T>>> = Arc::downgrade(&self.state);
        let name = self.name.clone();
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = state.upgrade() else {
                    debug!(cache = %name, "cache dropped, sweeper exiting");
                    break;
                };
                let removed = strong.lock().sweep(Instant::now());
                if removed > 0 {
                    info!(cache = %name, expired = removed, "cache cleanup");
                }
            }
        })
    }
}

type InFlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// One caller's stake in a key's fetch gate. Dropping it, including when the
/// caller is cancelled mid-fetch, forgets the gate once nobody else holds it.
struct InFlight<'a> {
    map: &'a InFlightMap,
    key: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn join(map: &'a InFlightMap, key: &'a str) -> Self {
        let gate = map.lock().entry(key.to_string()).or_default().clone();
        Self { map, key, gate }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // Only the map and this guard still hold the gate.
        if Arc::strong_count(&self.gate) == 2 {
            map.remove(self.key);
        }
    }
}

fn estimate_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}
