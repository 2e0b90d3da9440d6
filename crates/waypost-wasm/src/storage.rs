//! `localStorage`-backed key/value store.

use wasm_bindgen::JsValue;

use waypost_types::{KeyValueStore, StorageError, StorageResult};

/// [`KeyValueStore`] over `window.localStorage`.
///
/// The storage handle is looked up on every call instead of being held, so
/// the store itself carries no JS object and can be shared freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    /// True when the page exposes `localStorage` (it may be disabled).
    pub fn is_available() -> bool {
        handle().is_ok()
    }
}

fn handle() -> StorageResult<web_sys::Storage> {
    let window =
        web_sys::window().ok_or_else(|| StorageError::Unavailable("no window object".into()))?;
    window
        .local_storage()
        .map_err(|e| StorageError::Unavailable(describe(&e)))?
        .ok_or_else(|| StorageError::Unavailable("localStorage is disabled".into()))
}

pub(crate) fn describe(value: &JsValue) -> String {
    value
        .as_string()
        .unwrap_or_else(|| format!("{:?}", value))
}

impl KeyValueStore for LocalStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        handle()?
            .get_item(key)
            .map_err(|e| StorageError::Other(describe(&e)))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        // Quota errors surface here
        handle()?
            .set_item(key, value)
            .map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                reason: describe(&e),
            })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        handle()?
            .remove_item(key)
            .map_err(|e| StorageError::Other(describe(&e)))
    }
}
