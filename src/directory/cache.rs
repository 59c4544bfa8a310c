use std::{collections::HashMap, sync::Arc};

use log::{error, trace};
use tokio::sync::RwLock;

use crate::error::DirectoryError;

use super::UserLookup;

/// Memoized outcome of one lookup. Entries are never updated in place, they
/// only go away with `LookupCache::clear`.
pub(crate) enum CacheEntry<R> {
    Found(Arc<R>),
    NotFound,
}

impl<R> CacheEntry<R> {
    fn outcome(&self) -> Result<Arc<R>, DirectoryError> {
        match self {
            CacheEntry::Found(record) => Ok(record.clone()),
            CacheEntry::NotFound => Err(DirectoryError::UserNotFound),
        }
    }
}

/// pool id -> sub -> entry
type CacheStore<R> = HashMap<String, HashMap<String, CacheEntry<R>>>;

fn find_entry<'a, R>(store: &'a CacheStore<R>, pool_id: &str, sub: &str) -> Option<&'a CacheEntry<R>> {
    store.get(pool_id).and_then(|users| users.get(sub))
}

/// Read-through cache for user lookups, keyed by pool id and `sub`.
///
/// Both found users and "not found" answers are memoized, any other provider
/// failure is passed through without being cached, so the next call asks the
/// provider again. There is no expiry: entries stay until `clear` is called
/// for their pool.
///
/// All pools share a single `RwLock`. A miss holds the write lock while the
/// provider is queried, which serializes all misses of the cache but also
/// guarantees that concurrent misses of the same key query the provider
/// only once.
///
/// Clones share the same store.
pub struct LookupCache<P>
where P: UserLookup
{
    provider: Arc<P>,
    store: Arc<RwLock<CacheStore<P::Record>>>,
}

impl<P> Clone for LookupCache<P>
where P: UserLookup
{
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            store: self.store.clone(),
        }
    }
}

impl<P> LookupCache<P>
where P: UserLookup
{
    pub fn new(provider: P) -> Self {
        Self::with_shared_provider(Arc::new(provider))
    }

    pub fn with_shared_provider(provider: Arc<P>) -> Self {
        Self {
            provider,
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The provider behind the cache, for calls that should bypass it.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn get(&self, pool_id: &str, sub: &str) -> Result<Arc<P::Record>, DirectoryError> {
        if let Some(outcome) = self.get_cached(pool_id, sub).await {
            trace!("cache hit for {sub} in pool {pool_id}");
            return outcome;
        }

        let mut store = self.store.write().await;

        // another caller may have filled the entry while we waited for the lock
        if let Some(entry) = find_entry(&store, pool_id, sub) {
            trace!("entry for {sub} in pool {pool_id} populated concurrently");
            return entry.outcome();
        }

        trace!("cache miss for {sub} in pool {pool_id}, querying directory");
        let entry = match self.provider.lookup(pool_id, sub).await {
            Ok(record) => CacheEntry::Found(Arc::new(record)),
            Err(DirectoryError::UserNotFound) => CacheEntry::NotFound,
            Err(e) => {
                error!("error getting user by sub {sub} from pool {pool_id}: {e}");
                return Err(e);
            }
        };

        let outcome = entry.outcome();
        store
            .entry(pool_id.to_string())
            .or_default()
            .insert(sub.to_string(), entry);
        outcome
    }

    async fn get_cached(&self, pool_id: &str, sub: &str) -> Option<Result<Arc<P::Record>, DirectoryError>> {
        let store = self.store.read().await;
        find_entry(&store, pool_id, sub).map(CacheEntry::outcome)
    }

    /// Number of cached entries, found and not found, for a pool.
    pub async fn len(&self, pool_id: &str) -> usize {
        self.store
            .read()
            .await
            .get(pool_id)
            .map_or(0, HashMap::len)
    }

    /// Drops all cached entries of a pool.
    pub async fn clear(&self, pool_id: &str) {
        if self.store.write().await.remove(pool_id).is_some() {
            trace!("cleared cached users of pool {pool_id}");
        }
    }
}
