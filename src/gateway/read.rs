//! Cached read paths over a [`DocumentStore`].

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::document::{Constraint, Cursor, Document, DocumentStore, Page};
use crate::cache::TtlCache;
use crate::{KeepsakeError, Result, telemetry};

/// Configuration for the read gateway.
///
/// ```rust
/// # use keepsake::GatewayConfig;
/// # use std::time::Duration;
/// let config = GatewayConfig::new()
///     .page_ttl(Duration::from_secs(30))
///     .document_ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// TTL for cached first pages. Default: 60s.
    pub page_ttl: Duration,
    /// TTL for cached single documents. Default: 5 minutes.
    pub document_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            page_ttl: Duration::from_secs(60),
            document_ttl: Duration::from_secs(300),
        }
    }
}

impl GatewayConfig {
    /// Create a config with default TTLs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TTL for first pages.
    pub fn page_ttl(mut self, ttl: Duration) -> Self {
        self.page_ttl = ttl;
        self
    }

    /// Set the TTL for single documents.
    pub fn document_ttl(mut self, ttl: Duration) -> Self {
        self.document_ttl = ttl;
        self
    }
}

/// Cached read result: either a first page or a single document.
#[derive(Debug, Clone)]
pub enum CachedRead {
    Page(Page),
    Document(Document),
}

/// Read gateway with first-page and single-document caching.
///
/// Only pages requested without a cursor are cached; continuation pages
/// always go to the remote store. Remote errors propagate unchanged, with
/// no retry at this layer.
pub struct ReadGateway {
    store: Arc<dyn DocumentStore>,
    cache: Arc<TtlCache<CachedRead>>,
    config: GatewayConfig,
}

impl ReadGateway {
    /// Create a gateway with its own cache.
    pub fn new(store: Arc<dyn DocumentStore>, config: GatewayConfig) -> Self {
        Self::with_cache(store, Arc::new(TtlCache::new()), config)
    }

    /// Create a gateway sharing an existing cache.
    pub fn with_cache(
        store: Arc<dyn DocumentStore>,
        cache: Arc<TtlCache<CachedRead>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache(&self) -> &TtlCache<CachedRead> {
        &self.cache
    }

    /// Fetch a page using the configured page TTL.
    pub async fn fetch_page(
        &self,
        collection: &str,
        constraints: &[Constraint],
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page> {
        self.fetch_page_with_ttl(collection, constraints, page_size, cursor, self.config.page_ttl)
            .await
    }

    /// Fetch a page, caching a first page for `ttl`.
    ///
    /// Requests `page_size + 1` documents so `has_more` is known without a
    /// count query. The extra document is dropped and never becomes the
    /// cursor.
    pub async fn fetch_page_with_ttl(
        &self,
        collection: &str,
        constraints: &[Constraint],
        page_size: usize,
        cursor: Option<&Cursor>,
        ttl: Duration,
    ) -> Result<Page> {
        if page_size == 0 {
            return Err(KeepsakeError::InvalidInput(
                "page size must be at least 1".to_string(),
            ));
        }

        let key = match cursor {
            None => Some(page_key(collection, constraints, page_size)?),
            Some(_) => None,
        };

        if let Some(key) = &key {
            if let Some(CachedRead::Page(page)) = self.cache.get(key) {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => "page").increment(1);
                debug!(collection, key = %key, "first page served from cache");
                return Ok(page);
            }
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => "page").increment(1);
        }

        let probe = page_size.checked_add(1).ok_or_else(|| {
            KeepsakeError::InvalidInput(format!("page size {page_size} is too large"))
        })?;
        let mut items = self
            .store
            .fetch_page(collection, constraints, probe, cursor)
            .await?;
        let has_more = items.len() > page_size;
        items.truncate(page_size);
        let next_cursor = items.last().cloned().map(Cursor::new);
        let page = Page {
            items,
            next_cursor,
            has_more,
        };

        if let Some(key) = key {
            self.cache.set(&key, CachedRead::Page(page.clone()), ttl);
        }
        debug!(
            collection,
            store = self.store.name(),
            items = page.items.len(),
            has_more,
            "page fetched from remote store"
        );
        Ok(page)
    }

    /// Fetch one document by id. Not-found is `Ok(None)` and is not cached.
    pub async fn fetch_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let key = document_key(collection, id);
        if let Some(CachedRead::Document(doc)) = self.cache.get(&key) {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => "document").increment(1);
            return Ok(Some(doc));
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => "document").increment(1);

        let doc = self.store.fetch_document(collection, id).await?;
        if let Some(doc) = &doc {
            self.cache.set(
                &key,
                CachedRead::Document(doc.clone()),
                self.config.document_ttl,
            );
        }
        Ok(doc)
    }

    /// Drop every cached read whose key mentions `collection`.
    ///
    /// Must be called after any write to the collection.
    pub fn invalidate(&self, collection: &str) -> usize {
        metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(1);
        let removed = self.cache.invalidate(Some(collection));
        debug!(collection, removed, "cache invalidated");
        removed
    }
}

/// First-page key: `{collection}:{json(constraints)}:{page_size}`.
fn page_key(collection: &str, constraints: &[Constraint], page_size: usize) -> Result<String> {
    Ok(format!(
        "{collection}:{}:{page_size}",
        serde_json::to_string(constraints)?
    ))
}

/// Single-document key: `{collection}/{id}`.
fn document_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Direction;

    #[test]
    fn page_key_is_stable_for_equal_constraints() {
        let a = vec![
            Constraint::eq("class_id", "c1"),
            Constraint::order_by("name", Direction::Asc),
        ];
        let b = a.clone();
        assert_eq!(
            page_key("students", &a, 10).unwrap(),
            page_key("students", &b, 10).unwrap()
        );
    }

    #[test]
    fn page_key_depends_on_constraint_order() {
        let a = vec![
            Constraint::eq("class_id", "c1"),
            Constraint::order_by("name", Direction::Asc),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_ne!(
            page_key("students", &a, 10).unwrap(),
            page_key("students", &b, 10).unwrap()
        );
    }

    #[test]
    fn keys_contain_collection_name() {
        assert!(page_key("grades", &[], 5).unwrap().contains("grades"));
        assert!(document_key("grades", "g1").contains("grades"));
    }
}
