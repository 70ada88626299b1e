//! Remote document store boundary.
//!
//! The remote database is opaque: documents are addressed by collection
//! name plus id, and listed in pages driven by an ordered constraint list
//! and an optional continuation [`Cursor`]. Implement [`DocumentStore`] to
//! plug in a real backend.
//!
//! # Write paths
//!
//! Writes (`put`, `delete`) are not part of this trait and do not touch the
//! read cache. Whoever performs a write must call
//! [`ReadGateway::invalidate()`](super::ReadGateway::invalidate) with the
//! collection name afterwards, or stale first pages keep being served until
//! their TTL runs out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// A document fetched from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Comparison operator of a `where` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    ArrayContains,
}

/// Sort direction of an `order_by` constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One element of an ordered query constraint list.
///
/// Serialization is stable (fixed field order, tagged variants), so two
/// equal constraint lists always derive the same cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Where {
        field: String,
        op: FilterOp,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: Direction,
    },
}

impl Constraint {
    /// `field <op> value`
    pub fn filter(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Where {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(field, FilterOp::Eq, value)
    }

    /// Sort by `field`.
    pub fn order_by(field: impl Into<String>, direction: Direction) -> Self {
        Self::OrderBy {
            field: field.into(),
            direction,
        }
    }
}

/// Opaque continuation handle: the last document of the previous page.
///
/// Cursors are never used as cache keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor(Document);

impl Cursor {
    pub fn new(last: Document) -> Self {
        Self(last)
    }

    /// The document the next page starts after.
    pub fn last_document(&self) -> &Document {
        &self.0
    }
}

/// One page of results as returned by [`ReadGateway::fetch_page()`](super::ReadGateway::fetch_page).
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Document>,
    /// Cursor for the following page. `None` when the page is empty.
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// The remote keyed, paginated document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &str;

    /// Fetch up to `limit` documents of `collection` matching `constraints`,
    /// starting after `cursor` when one is given.
    ///
    /// Failures should be reported as [`KeepsakeError::RemoteFetch`](crate::KeepsakeError::RemoteFetch).
    async fn fetch_page(
        &self,
        collection: &str,
        constraints: &[Constraint],
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Vec<Document>>;

    /// Fetch one document. A missing document is `Ok(None)`, not an error.
    async fn fetch_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;
}
