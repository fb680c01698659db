//! Backend collaborator contract.
//!
//! The hosted database is an opaque CRUD service to the rest of the crate.
//! `PosBackend` names the calls the catalog, checkout and quick-stock flows
//! rely on; `Backend` picks the Supabase client or the local SQLite store at
//! startup.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::SupabaseClient;
use crate::local_store::LocalStore;
use crate::models::{Item, ItemId, ItemUpdate, NewItem, TransactionRecord, TransactionRequest};

/// Default page size for the transaction history.
pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Backend not configured: {0}")]
    NotConfigured(String),
    /// A write failed halfway and its compensation failed too.
    #[error("Transaction {transaction_id} left incomplete: {message}")]
    Incomplete { transaction_id: i64, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Calls the POS core makes against the data store.
///
/// `adjust_stock` reads the current stock and writes `max(0, current + delta)`;
/// the clamp there is the authoritative bound, local checks are only a
/// pre-check against a possibly stale snapshot. `create_transaction` writes
/// the record and its lines but never touches stock.
#[allow(async_fn_in_trait)]
pub trait PosBackend {
    async fn list_items(&self) -> Result<Vec<Item>, StoreError>;

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError>;

    async fn update_item(&self, id: ItemId, update: &ItemUpdate) -> Result<Item, StoreError>;

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError>;

    async fn adjust_stock(&self, id: ItemId, delta: i64) -> Result<Item, StoreError>;

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionRecord, StoreError>;

    /// Newest first.
    async fn list_transactions(&self, limit: usize) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Inclusive on both ends, newest first.
    async fn transactions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// The backend chosen at startup.
pub enum Backend {
    Remote(SupabaseClient),
    Local(LocalStore),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Remote(_) => "supabase",
            Backend::Local(_) => "local",
        }
    }
}

impl PosBackend for Backend {
    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        match self {
            Backend::Remote(b) => b.list_items().await,
            Backend::Local(b) => b.list_items().await,
        }
    }

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        match self {
            Backend::Remote(b) => b.create_item(item).await,
            Backend::Local(b) => b.create_item(item).await,
        }
    }

    async fn update_item(&self, id: ItemId, update: &ItemUpdate) -> Result<Item, StoreError> {
        match self {
            Backend::Remote(b) => b.update_item(id, update).await,
            Backend::Local(b) => b.update_item(id, update).await,
        }
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        match self {
            Backend::Remote(b) => b.delete_item(id).await,
            Backend::Local(b) => b.delete_item(id).await,
        }
    }

    async fn adjust_stock(&self, id: ItemId, delta: i64) -> Result<Item, StoreError> {
        match self {
            Backend::Remote(b) => b.adjust_stock(id, delta).await,
            Backend::Local(b) => b.adjust_stock(id, delta).await,
        }
    }

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionRecord, StoreError> {
        match self {
            Backend::Remote(b) => b.create_transaction(request).await,
            Backend::Local(b) => b.create_transaction(request).await,
        }
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<TransactionRecord>, StoreError> {
        match self {
            Backend::Remote(b) => b.list_transactions(limit).await,
            Backend::Local(b) => b.list_transactions(limit).await,
        }
    }

    async fn transactions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        match self {
            Backend::Remote(b) => b.transactions_between(start, end).await,
            Backend::Local(b) => b.transactions_between(start, end).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
