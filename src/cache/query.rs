//! Keyed, cached queries with SWR-style state.
//!
//! [`OptimizedQuery`] binds a fetcher to a cache key derived from a base
//! key plus serialized parameters. [`load()`](OptimizedQuery::load) serves
//! from the [`TtlCache`] when it can, and [`refresh()`](OptimizedQuery::refresh)
//! always goes to the fetcher. A [`QueryState`] snapshot exposes the data,
//! the last error, and the loading flags for a view to render.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, warn};

use super::TtlCache;
use crate::{Result, lock, telemetry};

/// Default TTL for query results.
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(60);

type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Options for an [`OptimizedQuery`].
#[derive(Debug, Clone)]
pub struct QueryOptions<T> {
    /// How long a fetched result stays cached. Default: 60s.
    pub ttl: Duration,
    /// Data shown before the first fetch completes.
    pub initial_data: Option<T>,
    /// Always fetch, never serve from the cache. Results are still stored.
    pub skip_cache: bool,
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_QUERY_TTL,
            initial_data: None,
            skip_cache: false,
        }
    }
}

impl<T> QueryOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }
}

/// Observable state of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    /// Display form of the last fetch error, cleared by the next success.
    pub error: Option<String>,
    /// True while there is no data at all and a fetch is pending.
    pub is_loading: bool,
    /// True while any fetch is in flight, including background refreshes.
    pub is_validating: bool,
}

/// A cached query bound to one key and one fetcher.
pub struct OptimizedQuery<T> {
    cache: Arc<TtlCache<T>>,
    cache_key: String,
    fetcher: Fetcher<T>,
    ttl: Duration,
    skip_cache: bool,
    state: Mutex<QueryState<T>>,
}

impl<T> OptimizedQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a query. `params` are serialized into the cache key, so two
    /// queries with equal keys and parameters share cached results.
    pub fn new<P, F, Fut>(
        cache: Arc<TtlCache<T>>,
        key: &str,
        params: &P,
        fetcher: F,
        options: QueryOptions<T>,
    ) -> Result<Self>
    where
        P: Serialize + ?Sized,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cache_key = query_key(key, params)?;
        let is_loading = options.initial_data.is_none();
        Ok(Self {
            cache,
            cache_key,
            fetcher: Box::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(fetcher()) }),
            ttl: options.ttl,
            skip_cache: options.skip_cache,
            state: Mutex::new(QueryState {
                data: options.initial_data,
                error: None,
                is_loading,
                is_validating: false,
            }),
        })
    }

    /// The derived cache key.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Current state snapshot.
    pub fn state(&self) -> QueryState<T> {
        lock(&self.state).clone()
    }

    /// Serve from cache when possible, otherwise fetch.
    pub async fn load(&self) -> Result<T> {
        if !self.skip_cache {
            if let Some(hit) = self.cache.get(&self.cache_key) {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => "query")
                    .increment(1);
                debug!(key = %self.cache_key, "query cache hit");
                let mut state = lock(&self.state);
                state.data = Some(hit.clone());
                state.error = None;
                state.is_loading = false;
                return Ok(hit);
            }
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => "query").increment(1);
        }
        self.revalidate().await
    }

    /// Drop the cached result and fetch again.
    pub async fn refresh(&self) -> Result<T> {
        self.cache.remove(&self.cache_key);
        self.revalidate().await
    }

    async fn revalidate(&self) -> Result<T> {
        {
            let mut state = lock(&self.state);
            state.is_validating = true;
            state.is_loading = state.data.is_none();
        }

        let result = (self.fetcher)().await;

        let mut state = lock(&self.state);
        state.is_validating = false;
        state.is_loading = false;
        match result {
            Ok(value) => {
                self.cache.set(&self.cache_key, value.clone(), self.ttl);
                state.data = Some(value.clone());
                state.error = None;
                Ok(value)
            }
            Err(e) => {
                warn!(key = %self.cache_key, error = %e, "query fetch failed");
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Derive a query cache key: `{key}:{json(params)}`.
fn query_key<P: Serialize + ?Sized>(key: &str, params: &P) -> Result<String> {
    Ok(format!("{key}:{}", serde_json::to_string(params)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_key_is_deterministic() {
        let a = query_key("students", &("class-1", 2)).unwrap();
        let b = query_key("students", &("class-1", 2)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"students:["class-1",2]"#);
    }

    #[test]
    fn query_key_differs_on_params() {
        let a = query_key("students", &1).unwrap();
        let b = query_key("students", &2).unwrap();
        assert_ne!(a, b);
    }
}
