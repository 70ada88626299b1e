//! Cached read gateways over a remote document store

mod document;
mod read;

pub use document::{Constraint, Cursor, Direction, Document, DocumentStore, FilterOp, Page};
pub use read::{CachedRead, GatewayConfig, ReadGateway};
