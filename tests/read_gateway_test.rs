//! Tests for [`ReadGateway`]: first-page caching, pagination and
//! single-document reads against a mock document store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use keepsake::{
    Constraint, Cursor, Direction, Document, DocumentStore, GatewayConfig, KeepsakeError,
    ReadGateway, Result,
};

// ============================================================================
// Mock store
// ============================================================================

struct MockStore {
    documents: Vec<Document>,
    page_calls: AtomicU32,
    document_calls: AtomicU32,
    last_limit: AtomicUsize,
    fail: AtomicBool,
}

impl MockStore {
    fn with_items(count: usize) -> Self {
        Self {
            documents: (0..count)
                .map(|i| Document::new(format!("s-{i:02}"), json!({ "n": i })))
                .collect(),
            page_calls: AtomicU32::new(0),
            document_calls: AtomicU32::new(0),
            last_limit: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn page_calls(&self) -> u32 {
        self.page_calls.load(Ordering::SeqCst)
    }

    fn document_calls(&self) -> u32 {
        self.document_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_page(
        &self,
        collection: &str,
        _constraints: &[Constraint],
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Vec<Document>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeepsakeError::remote(collection, "backend unavailable"));
        }
        let start = match cursor {
            Some(cursor) => self
                .documents
                .iter()
                .position(|d| d.id == cursor.last_document().id)
                .map_or(0, |i| i + 1),
            None => 0,
        };
        Ok(self.documents.iter().skip(start).take(limit).cloned().collect())
    }

    async fn fetch_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeepsakeError::remote(collection, "backend unavailable"));
        }
        Ok(self.documents.iter().find(|d| d.id == id).cloned())
    }
}

fn gateway(store: &Arc<MockStore>) -> ReadGateway {
    ReadGateway::new(store.clone(), GatewayConfig::default())
}

fn constraints() -> Vec<Constraint> {
    vec![
        Constraint::eq("class_id", "c-1"),
        Constraint::order_by("name", Direction::Asc),
    ]
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn first_page_of_eleven_with_page_size_ten() {
    let store = Arc::new(MockStore::with_items(11));
    let gateway = gateway(&store);

    let page = gateway
        .fetch_page("students", &constraints(), 10, None)
        .await
        .unwrap();

    assert_eq!(page.items.len(), 10);
    assert!(page.has_more);
    assert_eq!(store.last_limit.load(Ordering::SeqCst), 11);
    // The cursor is the last returned item, never the probe item.
    let cursor = page.next_cursor.as_ref().unwrap();
    assert_eq!(cursor.last_document().id, "s-09");
}

#[tokio::test]
async fn second_page_bypasses_cache() {
    let store = Arc::new(MockStore::with_items(11));
    let gateway = gateway(&store);

    let first = gateway
        .fetch_page("students", &constraints(), 10, None)
        .await
        .unwrap();
    let cursor = first.next_cursor.unwrap();

    let second = gateway
        .fetch_page("students", &constraints(), 10, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, "s-10");
    assert!(!second.has_more);

    gateway
        .fetch_page("students", &constraints(), 10, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(store.page_calls(), 3);
}

#[tokio::test]
async fn cached_first_page_skips_remote() {
    let store = Arc::new(MockStore::with_items(11));
    let gateway = gateway(&store);

    let a = gateway
        .fetch_page("students", &constraints(), 10, None)
        .await
        .unwrap();
    let b = gateway
        .fetch_page("students", &constraints(), 10, None)
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(store.page_calls(), 1);
}

#[tokio::test]
async fn page_size_is_part_of_the_key() {
    let store = Arc::new(MockStore::with_items(11));
    let gateway = gateway(&store);

    gateway
        .fetch_page("students", &constraints(), 10, None)
        .await
        .unwrap();
    let small = gateway
        .fetch_page("students", &constraints(), 5, None)
        .await
        .unwrap();

    assert_eq!(small.items.len(), 5);
    assert_eq!(store.page_calls(), 2);
}

#[tokio::test]
async fn exact_page_has_no_more() {
    let store = Arc::new(MockStore::with_items(10));
    let page = gateway(&store)
        .fetch_page("students", &[], 10, None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 10);
    assert!(!page.has_more);
}

#[tokio::test]
async fn empty_collection_has_no_cursor() {
    let store = Arc::new(MockStore::with_items(0));
    let page = gateway(&store)
        .fetch_page("students", &[], 10, None)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(page.next_cursor.is_none());
    assert!(!page.has_more);
}

#[tokio::test]
async fn zero_page_size_is_rejected() {
    let store = Arc::new(MockStore::with_items(3));
    let err = gateway(&store)
        .fetch_page("students", &[], 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeepsakeError::InvalidInput(_)));
    assert_eq!(store.page_calls(), 0);
}

#[tokio::test]
async fn oversized_page_size_is_rejected() {
    let store = Arc::new(MockStore::with_items(3));
    let err = gateway(&store)
        .fetch_page("students", &[], usize::MAX, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeepsakeError::InvalidInput(_)));
    assert_eq!(store.page_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn first_page_refetched_after_ttl() {
    let store = Arc::new(MockStore::with_items(3));
    let gateway = ReadGateway::new(
        store.clone(),
        GatewayConfig::new().page_ttl(Duration::from_secs(30)),
    );

    gateway.fetch_page("students", &[], 10, None).await.unwrap();
    tokio::time::advance(Duration::from_secs(31)).await;
    gateway.fetch_page("students", &[], 10, None).await.unwrap();

    assert_eq!(store.page_calls(), 2);
}

#[tokio::test]
async fn invalidate_forces_refetch() {
    let store = Arc::new(MockStore::with_items(3));
    let gateway = gateway(&store);

    gateway.fetch_page("students", &[], 10, None).await.unwrap();
    gateway.fetch_by_id("students", "s-01").await.unwrap();
    assert_eq!(gateway.invalidate("students"), 2);

    gateway.fetch_page("students", &[], 10, None).await.unwrap();
    assert_eq!(store.page_calls(), 2);
}

#[tokio::test]
async fn remote_errors_propagate_and_are_not_cached() {
    let store = Arc::new(MockStore::with_items(3));
    let gateway = gateway(&store);

    store.fail.store(true, Ordering::SeqCst);
    let err = gateway
        .fetch_page("students", &[], 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeepsakeError::RemoteFetch { .. }));

    store.fail.store(false, Ordering::SeqCst);
    let page = gateway.fetch_page("students", &[], 10, None).await.unwrap();
    assert_eq!(page.items.len(), 3);
    assert_eq!(store.page_calls(), 2);
}

// ============================================================================
// Single documents
// ============================================================================

#[tokio::test]
async fn document_is_cached_by_collection_and_id() {
    let store = Arc::new(MockStore::with_items(3));
    let gateway = gateway(&store);

    let a = gateway.fetch_by_id("students", "s-02").await.unwrap();
    let b = gateway.fetch_by_id("students", "s-02").await.unwrap();

    assert_eq!(a.unwrap().data, json!({ "n": 2 }));
    assert!(b.is_some());
    assert_eq!(store.document_calls(), 1);
    assert!(gateway.cache().get("students/s-02").is_some());
}

#[tokio::test]
async fn missing_document_is_none_and_not_cached() {
    let store = Arc::new(MockStore::with_items(3));
    let gateway = gateway(&store);

    assert!(gateway.fetch_by_id("students", "ghost").await.unwrap().is_none());
    assert!(gateway.fetch_by_id("students", "ghost").await.unwrap().is_none());
    assert_eq!(store.document_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn document_ttl_outlives_page_ttl() {
    let store = Arc::new(MockStore::with_items(3));
    let gateway = gateway(&store);

    gateway.fetch_page("students", &[], 10, None).await.unwrap();
    gateway.fetch_by_id("students", "s-00").await.unwrap();
    tokio::time::advance(Duration::from_secs(120)).await;

    gateway.fetch_page("students", &[], 10, None).await.unwrap();
    gateway.fetch_by_id("students", "s-00").await.unwrap();

    assert_eq!(store.page_calls(), 2);
    assert_eq!(store.document_calls(), 1);
}
