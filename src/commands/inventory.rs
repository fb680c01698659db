//! Item create / update / delete.
//!
//! Image bytes arrive base64-encoded (optionally as a `data:` URL) and are
//! stored in the Supabase image bucket. The local store has no object
//! storage, so images are skipped there.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::commands::refresh_after_mutation;
use crate::formatting::parse_amount;
use crate::models::{ItemUpdate, NewItem};
use crate::store::{Backend, PosBackend};
use crate::{lock, payload_id, value_str, AppState};

/// Decoded image from a payload.
#[derive(Debug, PartialEq, Eq)]
struct ImageUpload {
    bytes: Vec<u8>,
    extension: String,
}

/// Money/stock field as a JSON number or text (`"12.000"`, `"Rp 5.000"`).
/// `Ok(None)` when the key is absent.
fn amount_field(v: &Value, keys: &[&str], label: &str) -> Result<Option<i64>, String> {
    let Some(raw) = keys.iter().find_map(|k| v.get(*k)).filter(|x| !x.is_null()) else {
        return Ok(None);
    };
    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| format!("{label} tidak valid"))
}

fn extension_from_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

fn image_from_payload(v: &Value) -> Result<Option<ImageUpload>, String> {
    let Some(image) = v.get("image").filter(|x| !x.is_null()) else {
        return Ok(None);
    };
    let (raw, explicit_ext) = match image {
        Value::String(s) => (s.as_str(), None),
        obj => (
            obj.get("base64")
                .or_else(|| obj.get("data"))
                .and_then(Value::as_str)
                .ok_or("Data gambar tidak ditemukan")?,
            value_str(obj, &["extension", "ext"]),
        ),
    };

    let (data, mime_ext) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest.split_once(',').ok_or("Format gambar tidak valid")?;
            let mime = meta.split(';').next().unwrap_or_default();
            (data, Some(extension_from_mime(mime).to_string()))
        }
        None => (raw, None),
    };

    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| format!("Gambar tidak valid: {e}"))?;
    if bytes.is_empty() {
        return Err("Gambar kosong".into());
    }
    Ok(Some(ImageUpload {
        bytes,
        extension: explicit_ext.or(mime_ext).unwrap_or_else(|| "jpg".into()),
    }))
}

async fn upload_image(state: &AppState, image: ImageUpload) -> Result<Option<String>, String> {
    match &state.backend {
        Backend::Remote(client) => client
            .upload_image(image.bytes, &image.extension)
            .await
            .map(Some)
            .map_err(|e| format!("Gagal mengunggah gambar: {e}")),
        Backend::Local(_) => {
            warn!("Image upload needs a Supabase project, skipping");
            Ok(None)
        }
    }
}

/// Best-effort removal of a stored image.
async fn discard_image(state: &AppState, url: &str) {
    if let Backend::Remote(client) = &state.backend {
        if let Err(e) = client.delete_image(url).await {
            warn!(url, error = %e, "Failed to delete item image");
        }
    }
}

pub async fn inventory_create_item(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let v = payload.unwrap_or_else(|| json!({}));
    let mut new_item = NewItem {
        name: value_str(&v, &["name"]).unwrap_or_default(),
        price: amount_field(&v, &["price"], "Harga")?.unwrap_or(0),
        stock: amount_field(&v, &["stock"], "Stok")?.unwrap_or(0),
        barcode: value_str(&v, &["barcode"]),
        image_url: value_str(&v, &["imageUrl", "image_url"]),
    };
    new_item.validate()?;

    let uploaded = match image_from_payload(&v)? {
        Some(image) => upload_image(state, image).await?,
        None => None,
    };
    if let Some(url) = &uploaded {
        new_item.image_url = Some(url.clone());
    }

    match state.backend.create_item(&new_item).await {
        Ok(item) => {
            info!(item_id = item.id, name = %item.name, "Item added");
            refresh_after_mutation(state).await;
            serde_json::to_value(item).map_err(|e| e.to_string())
        }
        Err(e) => {
            if let Some(url) = uploaded {
                discard_image(state, &url).await;
            }
            Err(format!("Gagal menambah barang: {e}"))
        }
    }
}

pub async fn inventory_update_item(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let v = payload.unwrap_or_else(|| json!({}));
    let id = payload_id(Some(&v), &["id", "itemId", "item_id"]).ok_or("Missing item id")?;
    let previous_image = state.catalog.get(id).and_then(|i| i.image_url);

    let mut update = ItemUpdate {
        name: v.get("name").and_then(Value::as_str).map(str::to_string),
        price: amount_field(&v, &["price"], "Harga")?,
        stock: amount_field(&v, &["stock"], "Stok")?,
        barcode: v
            .get("barcode")
            .map(|b| b.as_str().map(str::trim).unwrap_or_default().to_string()),
        image_url: None,
    };
    update.validate()?;

    let remove_image = v
        .get("removeImage")
        .or_else(|| v.get("remove_image"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let uploaded = match image_from_payload(&v)? {
        Some(image) => upload_image(state, image).await?,
        None => None,
    };
    if let Some(url) = &uploaded {
        update.image_url = Some(Some(url.clone()));
    } else if remove_image {
        update.image_url = Some(None);
    }

    match state.backend.update_item(id, &update).await {
        Ok(item) => {
            if update.image_url.is_some() {
                if let Some(old) = previous_image.filter(|old| item.image_url.as_ref() != Some(old)) {
                    discard_image(state, &old).await;
                }
            }
            info!(item_id = id, "Item updated");
            refresh_after_mutation(state).await;
            serde_json::to_value(item).map_err(|e| e.to_string())
        }
        Err(e) => {
            if let Some(url) = uploaded {
                discard_image(state, &url).await;
            }
            Err(format!("Gagal memperbarui barang: {e}"))
        }
    }
}

pub async fn inventory_delete_item(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let id = payload_id(payload.as_ref(), &["id", "itemId", "item_id"]).ok_or("Missing item id")?;
    let image = state.catalog.get(id).and_then(|i| i.image_url);

    state
        .backend
        .delete_item(id)
        .await
        .map_err(|e| format!("Gagal menghapus barang: {e}"))?;
    if let Some(url) = image {
        discard_image(state, &url).await;
    }

    lock(&state.cart).remove_line(id);
    {
        let mut quick = lock(&state.quick_stock);
        if quick.as_ref().is_some_and(|q| q.item_id() == id) {
            *quick = None;
        }
    }
    info!(item_id = id, "Item removed");
    refresh_after_mutation(state).await;
    Ok(json!({ "success": true, "id": id }))
}
