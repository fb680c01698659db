//! Supabase credential storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Environment variables take priority
//! so CI and kiosk images can be provisioned without a keyring.

use keyring::Entry;
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::api::SupabaseConfig;

const SERVICE_NAME: &str = "pipiti-pos";

// Credential keys
const KEY_SUPABASE_URL: &str = "supabase_url";
const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";
const KEY_CONNECTION_STRING: &str = "connection_string";

const ALL_KEYS: &[&str] = &[KEY_SUPABASE_URL, KEY_SUPABASE_ANON_KEY, KEY_CONNECTION_STRING];

pub const ENV_SUPABASE_URL: &str = "PIPITI_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "PIPITI_SUPABASE_ANON_KEY";

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Supabase configuration
// ---------------------------------------------------------------------------

fn env_value(name: &str) -> Option<Zeroizing<String>> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(Zeroizing::new)
}

/// Resolve the Supabase project from the environment first, then from
/// `lookup` (the keyring in production): an explicit URL + key pair, then a
/// stored connection string. `None` means run against the local store.
pub fn resolve_supabase_config_with<F>(lookup: F) -> Option<SupabaseConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let (Some(url), Some(key)) = (env_value(ENV_SUPABASE_URL), env_value(ENV_SUPABASE_ANON_KEY)) {
        match SupabaseConfig::new(&url, &key) {
            Ok(cfg) => {
                debug!(url = %cfg.url, "Supabase config from environment");
                return Some(cfg);
            }
            Err(e) => warn!(error = %e, "Ignoring invalid Supabase environment config"),
        }
    }

    let url = lookup(KEY_SUPABASE_URL).map(Zeroizing::new);
    let key = lookup(KEY_SUPABASE_ANON_KEY).map(Zeroizing::new);
    if let (Some(url), Some(key)) = (url, key) {
        match SupabaseConfig::new(&url, &key) {
            Ok(cfg) => {
                debug!(url = %cfg.url, "Supabase config from credential store");
                return Some(cfg);
            }
            Err(e) => warn!(error = %e, "Ignoring invalid stored Supabase config"),
        }
    }

    let raw = Zeroizing::new(lookup(KEY_CONNECTION_STRING)?);
    match SupabaseConfig::from_connection_string(&raw) {
        Ok(cfg) => {
            debug!(url = %cfg.url, "Supabase config from stored connection string");
            Some(cfg)
        }
        Err(e) => {
            warn!(error = %e, "Ignoring invalid stored connection string");
            None
        }
    }
}

pub fn resolve_supabase_config() -> Option<SupabaseConfig> {
    resolve_supabase_config_with(get_credential)
}

/// Parse a credentials payload into a config without storing it.
///
/// Accepts `{ "supabaseUrl": .., "supabaseAnonKey": .. }` (snake_case too) or
/// `{ "connectionString": .. }`.
pub fn config_from_payload(payload: &Value) -> Result<SupabaseConfig, String> {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| payload.get(*n).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(raw) = field(&["connectionString", "connection_string"]) {
        return SupabaseConfig::from_connection_string(raw).map_err(|e| e.to_string());
    }

    let url = field(&["supabaseUrl", "supabase_url", "url"])
        .ok_or("Missing required field: supabaseUrl")?;
    let key = field(&["supabaseAnonKey", "supabase_anon_key", "anonKey", "key"])
        .ok_or("Missing required field: supabaseAnonKey")?;
    SupabaseConfig::new(url, key).map_err(|e| e.to_string())
}

/// Validate and persist Supabase credentials. Takes effect on next start.
pub fn update_supabase_credentials(payload: &Value) -> Result<Value, String> {
    let cfg = config_from_payload(payload)?;
    set_credential(KEY_SUPABASE_URL, &cfg.url)?;
    set_credential(KEY_SUPABASE_ANON_KEY, cfg.anon_key.as_str())?;
    delete_credential(KEY_CONNECTION_STRING)?;
    info!(url = %cfg.url, "Supabase credentials updated");
    Ok(serde_json::json!({ "success": true, "url": cfg.url }))
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset – deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}

/// Whether a remote project is reachable by config (not by network).
pub fn is_configured() -> bool {
    resolve_supabase_config().is_some()
}

/// Report where the store would connect, without the key.
pub fn describe_config() -> Value {
    match resolve_supabase_config() {
        Some(cfg) => serde_json::json!({ "backend": "supabase", "url": cfg.url }),
        None => serde_json::json!({ "backend": "local", "url": Value::Null }),
    }
}
