use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use chrono::prelude::*;
use chrono::Duration;
use lru::LruCache;
use tracing::trace;
use uuid::Uuid;
use crate::api::SuggestionResponse;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TTL_SECS: i64 = 10 * 60;

/// source of "now" for anything that expires or looks back in time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SuggestionKey {
    Parameters {
        user_id: Uuid,
        exercise_id: Uuid,
        window_days: u32,
    },

    Weekly {
        user_id: Uuid,
    },

    Progressive {
        user_id: Uuid,
        exercise_id: Uuid,
    },
}

impl SuggestionKey {
    pub fn user_id(&self) -> Uuid {
        match *self {
            SuggestionKey::Parameters { user_id, .. }
            | SuggestionKey::Weekly { user_id }
            | SuggestionKey::Progressive { user_id, .. } => user_id,
        }
    }
}

impl fmt::Display for SuggestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestionKey::Parameters { user_id, exercise_id, window_days } => {
                write!(f, "suggestions:params:{}:{}:{}", user_id, exercise_id, window_days)
            }
            SuggestionKey::Weekly { user_id } => write!(f, "suggestions:weekly:{}", user_id),
            SuggestionKey::Progressive { user_id, exercise_id } => {
                write!(f, "suggestions:progressive:{}:{}", user_id, exercise_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedSuggestion {
    Sets(SuggestionResponse),
    Weekly(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: CachedSuggestion,
    inserted_at: DateTime<Utc>,
}

/// bounded, expiring memo of computed suggestions shared by all requests
///
/// Entries live for `ttl` after they are written and the least recently used
/// entry is evicted once `capacity` is reached. Expired entries are dropped
/// when a `get` finds them.
#[derive(Clone)]
pub struct SuggestionCache {
    entries: Arc<Mutex<LruCache<SuggestionKey, Entry>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SuggestionCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(DEFAULT_CAPACITY, Duration::seconds(DEFAULT_TTL_SECS), clock)
    }

    pub fn with_limits(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<SuggestionKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &SuggestionKey) -> Option<CachedSuggestion> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if now - entry.inserted_at < self.ttl => {
                trace!(%key, "suggestion cache hit");
                return Some(entry.value.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            trace!(%key, "suggestion cache entry expired");
            entries.pop(key);
        }
        None
    }

    pub fn put(&self, key: SuggestionKey, value: CachedSuggestion) {
        let inserted_at = self.clock.now();
        self.lock().put(key, Entry { value, inserted_at });
    }

    pub fn invalidate(&self, key: &SuggestionKey) {
        self.lock().pop(key);
    }

    /// drop every entry computed for `user_id`
    pub fn invalidate_user(&self, user_id: Uuid) {
        let mut entries = self.lock();
        let keys: Vec<SuggestionKey> = entries.iter()
            .filter(|(k, _)| k.user_id() == user_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[allow(unused)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::SuggestedSet;

    fn sets(weight: f64) -> CachedSuggestion {
        CachedSuggestion::Sets(SuggestionResponse {
            sets: vec![SuggestedSet { reps: 10, weight }],
        })
    }

    fn weekly(user_id: Uuid) -> SuggestionKey {
        SuggestionKey::Weekly { user_id }
    }

    fn manual_cache() -> (Arc<ManualClock>, SuggestionCache) {
        let clock = Arc::new(ManualClock::new(Utc.ymd(2024, 3, 1).and_hms(8, 0, 0)));
        let cache = SuggestionCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn put_then_get_returns_written_value() {
        let (_, cache) = manual_cache();
        let key = SuggestionKey::Progressive { user_id: Uuid::new_v4(), exercise_id: Uuid::new_v4() };
        assert_eq!(cache.get(&key), None);
        cache.put(key.clone(), sets(40.0));
        assert_eq!(cache.get(&key), Some(sets(40.0)));
        cache.put(key.clone(), sets(42.5));
        assert_eq!(cache.get(&key), Some(sets(42.5)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entries_expire_ten_minutes_after_write() {
        let (clock, cache) = manual_cache();
        let key = weekly(Uuid::new_v4());
        cache.put(key.clone(), CachedSuggestion::Weekly(vec!["rest on sunday".into()]));

        clock.advance(Duration::minutes(9) + Duration::seconds(59));
        assert!(cache.get(&key).is_some());

        // reads do not extend the lifetime
        clock.advance(Duration::seconds(1));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_entry_is_evicted_at_capacity() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = SuggestionCache::with_limits(2, Duration::minutes(10), clock);
        let (a, b, c) = (weekly(Uuid::new_v4()), weekly(Uuid::new_v4()), weekly(Uuid::new_v4()));
        cache.put(a.clone(), sets(1.0));
        cache.put(b.clone(), sets(2.0));
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), sets(3.0));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert_eq!(cache.get(&b), None);
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn invalidation_by_key_user_and_all() {
        let (_, cache) = manual_cache();
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let exercise_id = Uuid::new_v4();
        let params = SuggestionKey::Parameters { user_id: me, exercise_id, window_days: 30 };
        let progressive = SuggestionKey::Progressive { user_id: me, exercise_id };
        cache.put(params.clone(), sets(1.0));
        cache.put(progressive.clone(), sets(2.0));
        cache.put(weekly(me), CachedSuggestion::Weekly(vec![]));
        cache.put(weekly(other), CachedSuggestion::Weekly(vec![]));

        cache.invalidate(&params);
        assert_eq!(cache.get(&params), None);
        assert_eq!(cache.len(), 3);

        cache.invalidate_user(me);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&weekly(other)).is_some());

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_access_never_sees_torn_values() {
        let cache = SuggestionCache::new(Arc::new(SystemClock));
        let key = weekly(Uuid::new_v4());
        let handles: Vec<_> = (0..8).map(|i| {
            let cache = cache.clone();
            let key = key.clone();
            std::thread::spawn(move || {
                for j in 0..200 {
                    let line = format!("{}-{}", i, j);
                    cache.put(key.clone(), CachedSuggestion::Weekly(vec![line.clone(), line]));
                    if let Some(CachedSuggestion::Weekly(lines)) = cache.get(&key) {
                        assert_eq!(lines.len(), 2);
                        assert_eq!(lines[0], lines[1]);
                    }
                }
            })
        }).collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_format_like_namespaced_strings() {
        let user_id = Uuid::nil();
        assert_eq!(weekly(user_id).to_string(), format!("suggestions:weekly:{}", user_id));
        let key = SuggestionKey::Parameters { user_id, exercise_id: user_id, window_days: 7 };
        assert!(key.to_string().ends_with(":7"));
        assert_eq!(key.user_id(), user_id);
    }
}
