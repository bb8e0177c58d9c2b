//! Multi-scope TTL cache store.
//!
//! Maps `(scope, key)` to a record carrying an opaque payload, a lifespan,
//! and at most one live eviction timer. Payloads leave the store only as
//! deep copies; callers can never alias stored state.
//!
//! Expiration timers are lazy and self-rearming: a read under
//! `reset_on_access` only refreshes the record's `last_accessed` stamp.
//! When the timer fires it recomputes the expiry deadline and either goes
//! back to sleep until exactly that instant or evicts. Timer churn stays
//! O(1) regardless of read volume.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CacheError;

use super::controllers::ControllerRecord;
use super::files::FileRecord;
use super::lock::{rw_read, rw_write};
use super::routes::RouteRecord;

const SOURCE: &str = "cache::store";

/// Scope names owned by the framework; `set` rejects them.
pub const RESERVED_SCOPES: [&str; 3] = ["routes", "files", "controllers"];

pub(crate) const ROUTES_SCOPE: &str = "routes";
pub(crate) const FILES_SCOPE: &str = "files";
pub(crate) const CONTROLLERS_SCOPE: &str = "controllers";

/// How long a record stays valid absent expiration resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifespan {
    /// Never expires; cleared only explicitly or at shutdown.
    Application,
    /// Expires after the given duration.
    For(Duration),
}

impl Lifespan {
    pub fn from_millis(ms: u64) -> Self {
        Self::For(Duration::from_millis(ms))
    }
}

/// Caller-side override of a record's `reset_on_access` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOverride {
    RecordDefault,
    Force(bool),
}

/// Payload stored in a cache record.
///
/// `Data` and `Bytes` are the ad-hoc shapes available to application
/// scopes; the remaining variants belong to the reserved scopes.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Data(Value),
    Bytes(Bytes),
    File(FileRecord),
    Route(RouteRecord),
    Controller(ControllerRecord),
}

struct CacheRecord {
    value: CacheValue,
    lifespan: Lifespan,
    reset_on_access: bool,
    last_accessed: Instant,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct StoreInner {
    scopes: RwLock<HashMap<String, HashMap<String, CacheRecord>>>,
    next_generation: AtomicU64,
}

/// Process-wide cache store.
///
/// Cheap to clone; clones share state. Explicitly injectable so tests can
/// run against isolated instances, and [`CacheStore::shutdown`] tears down
/// every live timer.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `(scope, key)`.
    ///
    /// An existing record under the same key is cleared first (its timer
    /// cancelled) and then replaced; last writer wins, never a merge.
    pub fn set(
        &self,
        scope: &str,
        key: &str,
        value: CacheValue,
        lifespan: Lifespan,
        reset_on_access: bool,
    ) -> Result<(), CacheError> {
        validate_scope_key(scope, key)?;
        if RESERVED_SCOPES.contains(&scope) {
            return Err(CacheError::reserved_scope(scope));
        }
        self.insert(scope, key, value, lifespan, reset_on_access);
        Ok(())
    }

    /// Fetch a deep copy of the value under `(scope, key)`.
    pub fn get(&self, scope: &str, key: &str) -> Result<Option<CacheValue>, CacheError> {
        self.get_with(scope, key, ResetOverride::RecordDefault)
    }

    /// Fetch with an explicit override of the record's reset behavior.
    pub fn get_with(
        &self,
        scope: &str,
        key: &str,
        reset: ResetOverride,
    ) -> Result<Option<CacheValue>, CacheError> {
        validate_scope_key(scope, key)?;
        let mut scopes = rw_write(&self.inner.scopes, SOURCE, "get");
        let record = scopes.get_mut(scope).and_then(|records| records.get_mut(key));
        match record {
            Some(record) => {
                let resets = match reset {
                    ResetOverride::RecordDefault => record.reset_on_access,
                    ResetOverride::Force(value) => value,
                };
                if resets {
                    record.last_accessed = Instant::now();
                }
                counter!("tessera_cache_hit_total").increment(1);
                Ok(Some(record.value.clone()))
            }
            None => {
                counter!("tessera_cache_miss_total").increment(1);
                Ok(None)
            }
        }
    }

    /// Fetch every value in a scope, applying per-record reset rules.
    ///
    /// Returns `None` when the scope does not exist.
    pub fn get_scope(&self, scope: &str) -> Result<Option<HashMap<String, CacheValue>>, CacheError> {
        if scope.is_empty() {
            return Err(CacheError::missing_arguments("scope must be non-empty"));
        }
        let mut scopes = rw_write(&self.inner.scopes, SOURCE, "get_scope");
        let Some(records) = scopes.get_mut(scope) else {
            return Ok(None);
        };
        let now = Instant::now();
        let mut out = HashMap::with_capacity(records.len());
        for (key, record) in records.iter_mut() {
            if record.reset_on_access {
                record.last_accessed = now;
            }
            out.insert(key.clone(), record.value.clone());
        }
        Ok(Some(out))
    }

    /// Whether a record exists, without touching its access stamp.
    pub fn exists(&self, scope: &str, key: &str) -> bool {
        let scopes = rw_read(&self.inner.scopes, SOURCE, "exists");
        scopes
            .get(scope)
            .is_some_and(|records| records.contains_key(key))
    }

    /// Remove one record, cancelling its timer. Returns whether it existed.
    pub fn clear(&self, scope: &str, key: &str) -> Result<bool, CacheError> {
        validate_scope_key(scope, key)?;
        let removed = {
            let mut scopes = rw_write(&self.inner.scopes, SOURCE, "clear");
            let removed = scopes
                .get_mut(scope)
                .and_then(|records| records.remove(key));
            if scopes.get(scope).is_some_and(HashMap::is_empty) {
                scopes.remove(scope);
            }
            removed
        };
        match removed {
            Some(record) => {
                if let Some(timer) = record.timer {
                    timer.abort();
                }
                debug!(scope, key, "cleared cache record");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every record in a scope. Returns whether the scope existed.
    pub fn clear_scope(&self, scope: &str) -> bool {
        let removed = {
            let mut scopes = rw_write(&self.inner.scopes, SOURCE, "clear_scope");
            scopes.remove(scope)
        };
        match removed {
            Some(records) => {
                for record in records.into_values() {
                    if let Some(timer) = record.timer {
                        timer.abort();
                    }
                }
                debug!(scope, "cleared cache scope");
                true
            }
            None => false,
        }
    }

    /// Remove every record in every scope, cancelling all timers.
    pub fn clear_all(&self) {
        let drained = {
            let mut scopes = rw_write(&self.inner.scopes, SOURCE, "clear_all");
            std::mem::take(&mut *scopes)
        };
        for records in drained.into_values() {
            for record in records.into_values() {
                if let Some(timer) = record.timer {
                    timer.abort();
                }
            }
        }
        debug!("cleared all cache scopes");
    }

    /// Tear the store down: no records, no live timers.
    pub fn shutdown(&self) {
        self.clear_all();
    }

    /// Insert without the reserved-scope check; specializations write to
    /// their own reserved scopes through this.
    pub(crate) fn insert(
        &self,
        scope: &str,
        key: &str,
        value: CacheValue,
        lifespan: Lifespan,
        reset_on_access: bool,
    ) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let timer = match lifespan {
            Lifespan::Application => None,
            Lifespan::For(duration) => Some(self.spawn_eviction(scope, key, duration, generation)),
        };
        let record = CacheRecord {
            value,
            lifespan,
            reset_on_access,
            last_accessed: Instant::now(),
            generation,
            timer,
        };
        let replaced = {
            let mut scopes = rw_write(&self.inner.scopes, SOURCE, "set");
            scopes
                .entry(scope.to_string())
                .or_default()
                .insert(key.to_string(), record)
        };
        if let Some(previous) = replaced {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
            debug!(scope, key, "replaced existing cache record");
        } else {
            debug!(scope, key, "stored cache record");
        }
    }

    fn spawn_eviction(
        &self,
        scope: &str,
        key: &str,
        lifespan: Duration,
        generation: u64,
    ) -> JoinHandle<()> {
        let store = self.clone();
        let scope = scope.to_string();
        let key = key.to_string();
        // The deadline is fixed here, before the task is first polled;
        // scheduling lag must not extend the record's life.
        let mut deadline = Instant::now() + lifespan;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;
                match store.check_expiry(&scope, &key, generation) {
                    TimerVerdict::Rearm(next) => deadline = next,
                    TimerVerdict::Evict => {
                        store.evict(&scope, &key, generation);
                        break;
                    }
                    TimerVerdict::Stale => break,
                }
            }
        })
    }

    fn check_expiry(&self, scope: &str, key: &str, generation: u64) -> TimerVerdict {
        let scopes = rw_read(&self.inner.scopes, SOURCE, "check_expiry");
        let Some(record) = scopes.get(scope).and_then(|records| records.get(key)) else {
            return TimerVerdict::Stale;
        };
        if record.generation != generation {
            // A newer set replaced this record; its own timer owns it now.
            return TimerVerdict::Stale;
        }
        let Lifespan::For(lifespan) = record.lifespan else {
            return TimerVerdict::Stale;
        };
        let expires_at = record.last_accessed + lifespan;
        if expires_at > Instant::now() {
            TimerVerdict::Rearm(expires_at)
        } else {
            TimerVerdict::Evict
        }
    }

    fn evict(&self, scope: &str, key: &str, generation: u64) {
        let mut scopes = rw_write(&self.inner.scopes, SOURCE, "evict");
        let Some(records) = scopes.get_mut(scope) else {
            return;
        };
        // Re-check under the write lock: a set may have raced the verdict.
        if records
            .get(key)
            .is_some_and(|record| record.generation == generation)
        {
            records.remove(key);
            if records.is_empty() {
                scopes.remove(scope);
            }
            counter!("tessera_cache_evict_total").increment(1);
            debug!(scope, key, "evicted expired cache record");
        }
    }
}

enum TimerVerdict {
    /// Life remains; sleep until the new deadline.
    Rearm(Instant),
    Evict,
    Stale,
}

fn validate_scope_key(scope: &str, key: &str) -> Result<(), CacheError> {
    if scope.is_empty() || key.is_empty() {
        return Err(CacheError::missing_arguments(
            "both a scope and a key must be provided",
        ));
    }
    Ok(())
}
