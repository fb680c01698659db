//! Supabase API client.
//!
//! PostgREST calls for the `items`, `transactions` and `transaction_items`
//! tables plus the `item-images` storage bucket. Requests carry the anon key
//! as both `apikey` and bearer token.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::models::{
    Item, ItemId, ItemUpdate, NewItem, TransactionItemRecord, TransactionRecord,
    TransactionRequest,
};
use crate::store::{PosBackend, StoreError};

/// Request timeout for every Supabase call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Storage bucket holding item photos.
pub const IMAGE_BUCKET: &str = "item-images";

const TRANSACTION_SELECT: &str =
    "*,transaction_items(*,items(id,name,price,stock,barcode,image_url))";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Project URL and anon key. The key is wiped from memory on drop.
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: Zeroizing<String>,
}

impl SupabaseConfig {
    pub fn new(url: &str, anon_key: &str) -> Result<Self, StoreError> {
        let url = normalize_supabase_url(url);
        let key = anon_key.trim();
        if url.is_empty() || key.is_empty() {
            return Err(StoreError::NotConfigured(
                "Supabase URL and anon key are required".into(),
            ));
        }
        Url::parse(&url).map_err(|e| StoreError::NotConfigured(format!("Invalid Supabase URL: {e}")))?;
        Ok(Self {
            url,
            anon_key: Zeroizing::new(key.to_string()),
        })
    }

    /// Build from a connection string (`{"url": .., "key": ..}` as JSON or
    /// URL-safe base64).
    pub fn from_connection_string(raw: &str) -> Result<Self, StoreError> {
        let url = extract_url_from_connection_string(raw).ok_or_else(|| {
            StoreError::NotConfigured("Connection string has no project URL".into())
        })?;
        let key = extract_key_from_connection_string(raw)
            .ok_or_else(|| StoreError::NotConfigured("Connection string has no anon key".into()))?;
        Self::new(&url, &key)
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"***")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the project URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/rest/v1` segment
pub fn normalize_supabase_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

pub fn extract_key_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .or_else(|| v.get("anonKey"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| v.get("url").and_then(Value::as_str).map(normalize_supabase_url))
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> StoreError {
    let message = if err.is_connect() {
        format!("Cannot reach Supabase at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid Supabase URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    StoreError::Network(message)
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Anon key is invalid or expired".to_string(),
        403 => "Request rejected by row level security".to_string(),
        404 => "Supabase endpoint not found".to_string(),
        409 => "Conflicting row already exists".to_string(),
        s if s >= 500 => format!("Supabase server error (HTTP {s})"),
        s => format!("Unexpected response from Supabase (HTTP {s})"),
    }
}

/// Build the error for a non-2xx response, preferring the PostgREST message.
fn http_error(status: StatusCode, body_text: &str) -> StoreError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .or_else(|| json.get("msg"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status_error(status));
    StoreError::Http {
        status: status.as_u16(),
        message,
    }
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Decode(format!("{what}: {e}")))
}

/// PostgREST returns a one-element array for single-row writes.
fn single_row<T: DeserializeOwned>(
    what: &str,
    entity: &'static str,
    id: i64,
    value: Value,
) -> Result<T, StoreError> {
    let mut rows: Vec<Value> = decode(what, value)?;
    if rows.is_empty() {
        return Err(StoreError::NotFound { entity, id });
    }
    decode(what, rows.swap_remove(0))
}

fn filter_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The record described by a successful insert: the header row the server
/// returned plus the request's lines.
fn record_from_insert(
    tx_id: i64,
    header_row: Value,
    request: &TransactionRequest,
) -> TransactionRecord {
    let items = request
        .lines
        .iter()
        .map(|l| TransactionItemRecord {
            id: None,
            item_id: l.item_id,
            quantity: l.quantity,
            price_at_time: l.price_at_time,
            item: None,
        })
        .collect();
    let created_at = decode::<TransactionRecord>("created transaction", header_row)
        .map(|r| r.created_at)
        .unwrap_or_else(|_| Utc::now());
    TransactionRecord {
        id: tx_id,
        total: request.total,
        payment: request.payment,
        change: request.change,
        payment_method: Some(request.payment_method),
        created_at,
        items,
    }
}

/// Storage object name for a freshly uploaded image.
pub fn image_object_name(extension: &str) -> String {
    let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    let ext = if ext.is_empty() { "jpg".to_string() } else { ext };
    format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        ext
    )
}

/// Object name inside the image bucket, if `url` points at it.
pub fn image_object_from_url(url: &str) -> Option<String> {
    let marker = format!("/storage/v1/object/public/{IMAGE_BUCKET}/");
    let idx = url.find(&marker)?;
    let name = url[idx + marker.len()..].split(['?', '#']).next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SupabaseClient {
    config: SupabaseConfig,
    http: Client,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Network(format!("Failed to create HTTP client: {e}")))?;
        info!(url = %config.url, "Supabase client ready");
        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let key = self.config.anon_key.as_str();
        builder
            .header("apikey", key)
            .header("Authorization", format!("Bearer {key}"))
    }

    fn rest_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{table}", self.config.url))
            .map_err(|e| StoreError::NotConfigured(format!("Invalid Supabase URL: {e}")))?;
        if !params.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Perform a PostgREST request. Writes ask for the affected rows back.
    async fn rest(
        &self,
        method: Method,
        table: &str,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, StoreError> {
        let url = self.rest_url(table, params)?;
        debug!(%method, table, "Supabase request");

        let mut req = self
            .authed(self.http.request(method.clone(), url))
            .header("Content-Type", "application/json");
        if method != Method::GET {
            req = req.header("Prefer", "return=representation");
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = http_error(status, &body_text);
            warn!(table, status = status.as_u16(), error = %err, "Supabase request failed");
            return Err(err);
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| StoreError::Decode(format!("Invalid JSON from Supabase: {e}")))
    }

    async fn get_item(&self, id: ItemId) -> Result<Item, StoreError> {
        let rows = self
            .rest(
                Method::GET,
                "items",
                &[("select", "*".into()), ("id", format!("eq.{id}"))],
                None,
            )
            .await?;
        single_row("item", "item", id, rows)
    }

    // -- storage ----------------------------------------------------------

    /// Public URL of an object in the image bucket.
    pub fn public_image_url(&self, object_name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{IMAGE_BUCKET}/{object_name}",
            self.config.url
        )
    }

    /// Upload image bytes under a fresh unique name; returns the public URL.
    pub async fn upload_image(&self, bytes: Vec<u8>, extension: &str) -> Result<String, StoreError> {
        let name = image_object_name(extension);
        let url = format!(
            "{}/storage/v1/object/{IMAGE_BUCKET}/{name}",
            self.config.url
        );
        let size = bytes.len();
        let resp = self
            .authed(self.http.post(&url))
            .header("Content-Type", content_type_for(extension))
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.url, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(http_error(status, &body_text));
        }
        info!(object = %name, size, "Item image uploaded");
        Ok(self.public_image_url(&name))
    }

    /// Delete a stored image by its public URL. URLs outside the bucket are ignored.
    pub async fn delete_image(&self, public_url: &str) -> Result<(), StoreError> {
        let Some(name) = image_object_from_url(public_url) else {
            debug!(url = public_url, "Image URL is not in the item bucket, skipping delete");
            return Ok(());
        };
        let url = format!("{}/storage/v1/object/{IMAGE_BUCKET}", self.config.url);
        let resp = self
            .authed(self.http.delete(&url))
            .json(&json!({ "prefixes": [name] }))
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.url, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(http_error(status, &body_text));
        }
        info!(object = %name, "Item image deleted");
        Ok(())
    }
}

impl PosBackend for SupabaseClient {
    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let rows = self
            .rest(
                Method::GET,
                "items",
                &[("select", "*".into()), ("order", "name.asc".into())],
                None,
            )
            .await?;
        decode("items", rows)
    }

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        item.validate().map_err(StoreError::Validation)?;
        let mut body = serde_json::to_value(item)
            .map_err(|e| StoreError::Decode(format!("item payload: {e}")))?;
        body["name"] = Value::String(item.name.trim().to_string());
        let rows = self.rest(Method::POST, "items", &[], Some(body)).await?;
        let created: Item = single_row("created item", "item", 0, rows)?;
        info!(item_id = created.id, name = %created.name, "Item created");
        Ok(created)
    }

    async fn update_item(&self, id: ItemId, update: &ItemUpdate) -> Result<Item, StoreError> {
        update.validate().map_err(StoreError::Validation)?;
        let mut body = serde_json::to_value(update)
            .map_err(|e| StoreError::Decode(format!("item update payload: {e}")))?;
        body["updated_at"] = Value::String(filter_ts(Utc::now()));
        let rows = self
            .rest(Method::PATCH, "items", &[("id", format!("eq.{id}"))], Some(body))
            .await?;
        single_row("updated item", "item", id, rows)
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        let rows = self
            .rest(Method::DELETE, "items", &[("id", format!("eq.{id}"))], None)
            .await?;
        let deleted: Vec<Value> = decode("deleted items", rows)?;
        if deleted.is_empty() {
            return Err(StoreError::NotFound { entity: "item", id });
        }
        info!(item_id = id, "Item deleted");
        Ok(())
    }

    async fn adjust_stock(&self, id: ItemId, delta: i64) -> Result<Item, StoreError> {
        let current = self.get_item(id).await?;
        let stock = (current.stock + delta).max(0);
        let updated = self.update_item(id, &ItemUpdate::stock(stock)).await?;
        debug!(item_id = id, previous = current.stock, delta, stock, "Stock adjusted");
        Ok(updated)
    }

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionRecord, StoreError> {
        let header = json!({
            "total": request.total,
            "payment": request.payment,
            "change": request.change,
            "payment_method": request.payment_method.as_str(),
        });
        let rows = self
            .rest(Method::POST, "transactions", &[], Some(header))
            .await?;
        let created: Vec<Value> = decode("created transaction", rows)?;
        let header_row = created
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("transaction insert returned no rows".into()))?;
        let tx_id = header_row
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::Decode("transaction insert returned no id".into()))?;

        if !request.lines.is_empty() {
            let lines: Vec<Value> = request
                .lines
                .iter()
                .map(|l| {
                    json!({
                        "transaction_id": tx_id,
                        "item_id": l.item_id,
                        "quantity": l.quantity,
                        "price_at_time": l.price_at_time,
                    })
                })
                .collect();
            if let Err(e) = self
                .rest(Method::POST, "transaction_items", &[], Some(Value::Array(lines)))
                .await
            {
                warn!(transaction_id = tx_id, error = %e, "Line insert failed, removing transaction header");
                if let Err(cleanup) = self
                    .rest(
                        Method::DELETE,
                        "transactions",
                        &[("id", format!("eq.{tx_id}"))],
                        None,
                    )
                    .await
                {
                    error!(
                        transaction_id = tx_id,
                        error = %cleanup,
                        "Transaction header left without lines"
                    );
                    return Err(StoreError::Incomplete {
                        transaction_id: tx_id,
                        message: format!("{e}; cleanup failed: {cleanup}"),
                    });
                }
                return Err(e);
            }
        }

        info!(
            transaction_id = tx_id,
            total = request.total,
            method = %request.payment_method,
            lines = request.lines.len(),
            "Transaction recorded"
        );

        // stored; a failed read-back falls back to the inserted rows
        let fetched = self
            .rest(
                Method::GET,
                "transactions",
                &[
                    ("select", TRANSACTION_SELECT.into()),
                    ("id", format!("eq.{tx_id}")),
                ],
                None,
            )
            .await
            .and_then(|rows| single_row::<TransactionRecord>("transaction", "transaction", tx_id, rows));
        match fetched {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(transaction_id = tx_id, error = %e, "Transaction read-back failed, using inserted rows");
                Ok(record_from_insert(tx_id, header_row, request))
            }
        }
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = self
            .rest(
                Method::GET,
                "transactions",
                &[
                    ("select", TRANSACTION_SELECT.into()),
                    ("order", "created_at.desc".into()),
                    ("limit", limit.to_string()),
                ],
                None,
            )
            .await?;
        decode("transactions", rows)
    }

    async fn transactions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = self
            .rest(
                Method::GET,
                "transactions",
                &[
                    ("select", TRANSACTION_SELECT.into()),
                    ("created_at", format!("gte.{}", filter_ts(start))),
                    ("created_at", format!("lte.{}", filter_ts(end))),
                    ("order", "created_at.desc".into()),
                ],
                None,
            )
            .await?;
        decode("transactions", rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_supabase_url() {
        assert_eq!(
            normalize_supabase_url("abc.supabase.co/"),
            "https://abc.supabase.co"
        );
        assert_eq!(
            normalize_supabase_url("https://abc.supabase.co/rest/v1/"),
            "https://abc.supabase.co"
        );
        assert_eq!(
            normalize_supabase_url("localhost:54321"),
            "http://localhost:54321"
        );
        assert_eq!(normalize_supabase_url("   "), "");
    }

    #[test]
    fn test_connection_string_json_and_base64() {
        let raw = r#"{"url":"abc.supabase.co","key":"anon-123"}"#;
        assert_eq!(
            extract_url_from_connection_string(raw).as_deref(),
            Some("https://abc.supabase.co")
        );
        assert_eq!(
            extract_key_from_connection_string(raw).as_deref(),
            Some("anon-123")
        );

        let encoded = BASE64_STANDARD
            .encode(raw)
            .replace('+', "-")
            .replace('/', "_")
            .trim_end_matches('=')
            .to_string();
        let cfg = SupabaseConfig::from_connection_string(&encoded).unwrap();
        assert_eq!(cfg.url, "https://abc.supabase.co");
        assert_eq!(cfg.anon_key.as_str(), "anon-123");

        assert!(extract_key_from_connection_string("short").is_none());
    }

    #[test]
    fn test_config_rejects_missing_parts() {
        assert!(matches!(
            SupabaseConfig::new("", "key"),
            Err(StoreError::NotConfigured(_))
        ));
        assert!(matches!(
            SupabaseConfig::new("abc.supabase.co", "  "),
            Err(StoreError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_config_debug_hides_key() {
        let cfg = SupabaseConfig::new("abc.supabase.co", "secret-key").unwrap();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("secret-key"));
    }

    #[test]
    fn test_http_error_prefers_postgrest_message() {
        let err = http_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":"23514","message":"new row violates check constraint"}"#,
        );
        match err {
            StoreError::Http { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "new row violates check constraint");
            }
            other => panic!("unexpected {other:?}"),
        }

        match http_error(StatusCode::UNAUTHORIZED, "") {
            StoreError::Http { message, .. } => assert_eq!(message, "Anon key is invalid or expired"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_image_object_names() {
        let name = image_object_name(".PNG");
        assert!(name.ends_with(".png"));
        let (millis, rest) = name.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(rest.len(), 32 + ".png".len());

        assert!(image_object_name("").ends_with(".jpg"));
    }

    #[test]
    fn test_image_object_from_url() {
        let url = "https://abc.supabase.co/storage/v1/object/public/item-images/1700-abc.jpg?t=1";
        assert_eq!(image_object_from_url(url).as_deref(), Some("1700-abc.jpg"));
        assert_eq!(image_object_from_url("https://cdn.example.com/x.jpg"), None);

        let client = SupabaseClient::new(SupabaseConfig::new("abc.supabase.co", "k").unwrap()).unwrap();
        assert_eq!(
            client.public_image_url("1700-abc.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/item-images/1700-abc.jpg"
        );
    }

    #[test]
    fn test_single_row_errors_on_empty_array() {
        let res: Result<Item, _> = single_row("item", "item", 4, json!([]));
        assert!(matches!(res, Err(StoreError::NotFound { id: 4, .. })));
    }

    // -- create_transaction against a canned PostgREST --------------------

    use crate::models::{PaymentMethod, TransactionLine};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// `(method, path, status, body)`; the first route matching method and path answers.
    type Route = (&'static str, &'static str, u16, &'static str);

    /// Serve canned responses on a local port. Returns the base URL and the
    /// `METHOD /path` of every request received.
    async fn canned_server(routes: Vec<Route>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break None;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break Some(pos + 4);
                    }
                };
                let Some(head_end) = head_end else { continue };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
                let content_length = head
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < head_end + content_length {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let mut first = head.lines().next().unwrap_or_default().split_whitespace();
                let method = first.next().unwrap_or_default().to_string();
                let target = first.next().unwrap_or_default();
                let path = target.split('?').next().unwrap_or_default().to_string();
                log.lock().unwrap().push(format!("{method} {path}"));

                let (status, body) = routes
                    .iter()
                    .find(|(m, p, _, _)| *m == method && *p == path)
                    .map(|(_, _, status, body)| (*status, *body))
                    .unwrap_or((404, "{}"));
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        (format!("http://{addr}"), seen)
    }

    const HEADER_ROW: &str = r#"[{"id":7,"total":29000,"payment":30000,"change":1000,"payment_method":"Cash","created_at":"2025-03-01T10:00:00+00:00"}]"#;

    fn sale_request() -> TransactionRequest {
        TransactionRequest {
            total: 29000,
            payment: 30000,
            change: 1000,
            payment_method: PaymentMethod::Cash,
            lines: vec![
                TransactionLine {
                    item_id: 1,
                    quantity: 2,
                    price_at_time: 12000,
                },
                TransactionLine {
                    item_id: 2,
                    quantity: 1,
                    price_at_time: 5000,
                },
            ],
        }
    }

    fn client_for(base: &str) -> SupabaseClient {
        SupabaseClient::new(SupabaseConfig::new(base, "anon").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_failed_read_back_still_reports_the_stored_sale() {
        let (base, seen) = canned_server(vec![
            ("POST", "/rest/v1/transactions", 201, HEADER_ROW),
            ("POST", "/rest/v1/transaction_items", 201, "[]"),
            ("GET", "/rest/v1/transactions", 500, r#"{"message":"statement timeout"}"#),
        ])
        .await;

        let record = client_for(&base)
            .create_transaction(&sale_request())
            .await
            .expect("stored sale must not be reported as failed");
        assert_eq!(record.id, 7);
        assert_eq!(record.total, 29000);
        assert_eq!(record.change, 1000);
        assert_eq!(record.items.len(), 2);
        assert_eq!(record.items_sold(), 3);
        assert_eq!(record.created_at.to_rfc3339(), "2025-03-01T10:00:00+00:00");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "POST /rest/v1/transactions",
                "POST /rest/v1/transaction_items",
                "GET /rest/v1/transactions",
            ]
        );
    }

    #[tokio::test]
    async fn test_line_failure_removes_header() {
        let (base, seen) = canned_server(vec![
            ("POST", "/rest/v1/transactions", 201, HEADER_ROW),
            ("POST", "/rest/v1/transaction_items", 400, r#"{"message":"bad line"}"#),
            ("DELETE", "/rest/v1/transactions", 200, "[]"),
        ])
        .await;

        let err = client_for(&base)
            .create_transaction(&sale_request())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 400, .. }));
        assert_eq!(
            seen.lock().unwrap().last().map(String::as_str),
            Some("DELETE /rest/v1/transactions")
        );
    }

    #[tokio::test]
    async fn test_failed_cleanup_is_surfaced() {
        let (base, _seen) = canned_server(vec![
            ("POST", "/rest/v1/transactions", 201, HEADER_ROW),
            ("POST", "/rest/v1/transaction_items", 400, r#"{"message":"bad line"}"#),
            ("DELETE", "/rest/v1/transactions", 503, r#"{"message":"unavailable"}"#),
        ])
        .await;

        let err = client_for(&base)
            .create_transaction(&sale_request())
            .await
            .unwrap_err();
        match err {
            StoreError::Incomplete {
                transaction_id,
                message,
            } => {
                assert_eq!(transaction_id, 7);
                assert!(message.contains("bad line"));
                assert!(message.contains("unavailable"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
