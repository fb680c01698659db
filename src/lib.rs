//! PIPITI POS core.
//!
//! A host shell (mobile or desktop) drives the crate through the JSON command
//! layer in [`commands`]: every command takes the shared [`AppState`] and an
//! optional JSON payload and answers with JSON or a user-facing error string.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod commands;
pub mod db;
pub mod diagnostics;
pub mod escpos;
pub mod formatting;
pub mod local_store;
pub mod models;
pub mod quick_stock;
pub mod receipt_renderer;
pub mod refresh;
pub mod reports;
pub mod settings;
pub mod storage;
pub mod store;

use crate::api::SupabaseClient;
use crate::cart::Cart;
use crate::catalog::Catalog;
use crate::checkout::{CheckoutEngine, StockCorrection};
use crate::db::DbState;
use crate::local_store::LocalStore;
use crate::quick_stock::PendingStockDelta;
use crate::refresh::RefreshSignal;
use crate::store::Backend;

const DEFAULT_LOG_FILTER: &str = "info,pipiti_pos=debug";

/// Session state shared by every command.
///
/// The mutexes guard plain in-memory state and are never held across an
/// `.await`; backend calls work on clones and write the result back.
pub struct AppState {
    pub backend: Backend,
    pub db: Arc<DbState>,
    pub catalog: Catalog,
    pub cart: Mutex<Cart>,
    pub checkout: Mutex<CheckoutEngine>,
    pub quick_stock: Mutex<Option<PendingStockDelta>>,
    /// Post-sale stock decrements that have not reached the backend yet.
    pub corrections: Mutex<Vec<StockCorrection>>,
    pub refresh: RefreshSignal,
}

impl AppState {
    pub fn new(backend: Backend, db: Arc<DbState>) -> Self {
        Self {
            backend,
            db,
            catalog: Catalog::new(),
            cart: Mutex::new(Cart::new()),
            checkout: Mutex::new(CheckoutEngine::new()),
            quick_stock: Mutex::new(None),
            corrections: Mutex::new(Vec::new()),
            refresh: RefreshSignal::new(),
        }
    }

    /// Open the local database in `data_dir` and pick the backend: the
    /// configured Supabase project, or the local store when none resolves.
    pub fn init(data_dir: &Path) -> Result<Self, String> {
        let db = Arc::new(db::init(data_dir)?);
        let backend = match storage::resolve_supabase_config() {
            Some(config) => {
                info!(url = %config.url, "Using Supabase backend");
                Backend::Remote(SupabaseClient::new(config).map_err(|e| e.to_string())?)
            }
            None => {
                warn!("No Supabase project configured, using local store");
                Backend::Local(LocalStore::new(db.clone()))
            }
        };
        Ok(Self::new(backend, db))
    }

    /// Fresh state over an in-memory local store.
    pub fn in_memory() -> Result<Self, String> {
        let db = Arc::new(db::open_in_memory()?);
        Ok(Self::new(Backend::Local(LocalStore::new(db.clone())), db))
    }
}

/// Lock a session mutex, recovering the data from a poisoned lock.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Integer field, given as a JSON number or numeric text.
pub(crate) fn value_i64(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(n) = n.as_i64() {
                    return Some(n);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

/// An id passed either bare (`5`, `"5"`) or inside an object.
pub(crate) fn payload_id(payload: Option<&Value>, keys: &[&str]) -> Option<i64> {
    match payload? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        obj @ Value::Object(_) => value_i64(obj, keys),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Structured logging to the console and a daily rolling file in `log_dir`.
/// `RUST_LOG` overrides the default filter. Safe to call more than once;
/// later calls leave the first subscriber in place.
pub fn init_logging(log_dir: &Path) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        // Dropping the guard flushes and stops the writer; the app logs until exit.
        std::mem::forget(guard);
    }
}

/// Start the core: logging, local database, backend, and a first catalog load.
/// A failed catalog load is logged and left for the next refresh.
pub async fn start(data_dir: Option<PathBuf>) -> Result<AppState, String> {
    let data_dir = data_dir.unwrap_or_else(diagnostics::default_data_dir);
    init_logging(&diagnostics::get_log_dir(&data_dir));
    info!("Starting PIPITI POS v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::init(&data_dir)?;
    if let Err(e) = state.catalog.refresh(&state.backend).await {
        warn!(error = %e, backend = state.backend.kind(), "Initial catalog load failed");
    }
    Ok(state)
}
