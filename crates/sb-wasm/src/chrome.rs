//! `chrome.*` backed implementations of the core platform traits.

use async_trait::async_trait;
use js_sys::Promise;
use sb_core::{Clock, RuleId, RuleTable, RuleTableError, RuleUpdate, Scope, StateStore, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "sync"], js_name = get)]
    fn sync_get(keys: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "sync"], js_name = set)]
    fn sync_set(items: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = get)]
    fn local_get(keys: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = set)]
    fn local_set(items: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "declarativeNetRequest"], js_name = getDynamicRules)]
    fn get_dynamic_rules() -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "declarativeNetRequest"], js_name = updateDynamicRules)]
    fn update_dynamic_rules(options: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "runtime"], js_name = sendMessage)]
    fn send_message(message: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "alarms"], js_name = create)]
    fn alarms_create(name: &str, info: &JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = getURL)]
    fn get_url(path: &str) -> String;
}

// =============================================================================
// JS <-> JSON
// =============================================================================

/// Best human-readable text for a thrown value or rejection.
pub fn js_error_message(err: &JsValue) -> String {
    if let Some(message) = err.as_string() {
        return message;
    }
    if let Some(error) = err.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{:?}", err)
}

pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    js_sys::JSON::parse(&text)
}

pub fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, String> {
    if value.is_undefined() {
        return serde_json::from_value(Value::Null).map_err(|e| e.to_string());
    }
    let text = js_sys::JSON::stringify(value).map_err(|e| js_error_message(&e))?;
    let text = text.as_string().ok_or_else(|| "value is not JSON-serializable".to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

async fn settle(promise: Result<Promise, JsValue>) -> Result<JsValue, JsValue> {
    JsFuture::from(promise?).await
}

/// `chrome.runtime.getURL("")`, the extension's base URL.
pub fn extension_base_url() -> String {
    get_url("")
}

/// `chrome.alarms.create(name, { periodInMinutes })`
pub fn create_alarm(name: &str, period_minutes: u32) -> Result<(), JsValue> {
    let info = js_sys::Object::new();
    js_sys::Reflect::set(&info, &"periodInMinutes".into(), &JsValue::from(period_minutes))?;
    alarms_create(name, &info).map(|_| ())
}

/// Fire a message at the background and wait for its response.
pub async fn send_runtime_message<T: Serialize>(message: &T) -> Result<JsValue, JsValue> {
    settle(send_message(&to_js(message)?)).await
}

// =============================================================================
// Platform implementations
// =============================================================================

/// `chrome.storage.{sync,local}`
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeStorage;

fn backend_error(scope: Scope, message: String) -> StorageError {
    StorageError::Backend { scope, message }
}

#[async_trait(?Send)]
impl StateStore for ChromeStorage {
    async fn get(&self, scope: Scope, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let keys = to_js(keys).map_err(|e| backend_error(scope, js_error_message(&e)))?;
        let request = match scope {
            Scope::Sync => sync_get(&keys),
            Scope::Local => local_get(&keys),
        };
        let items = settle(request)
            .await
            .map_err(|e| backend_error(scope, js_error_message(&e)))?;
        from_js(&items).map_err(|message| backend_error(scope, message))
    }

    async fn set(&self, scope: Scope, items: Map<String, Value>) -> Result<(), StorageError> {
        let items = to_js(&items).map_err(|e| backend_error(scope, js_error_message(&e)))?;
        let request = match scope {
            Scope::Sync => sync_set(&items),
            Scope::Local => local_set(&items),
        };
        settle(request)
            .await
            .map(|_| ())
            .map_err(|e| backend_error(scope, js_error_message(&e)))
    }
}

/// Only the id matters when clearing the table; other rule fields are
/// whatever the browser reports.
#[derive(Deserialize)]
struct InstalledRule {
    id: RuleId,
}

/// `chrome.declarativeNetRequest` dynamic rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeRuleTable;

#[async_trait(?Send)]
impl RuleTable for ChromeRuleTable {
    async fn dynamic_rule_ids(&self) -> Result<Vec<RuleId>, RuleTableError> {
        let rules = settle(get_dynamic_rules())
            .await
            .map_err(|e| RuleTableError::Backend(js_error_message(&e)))?;
        let rules: Vec<InstalledRule> = from_js(&rules).map_err(RuleTableError::Backend)?;
        Ok(rules.into_iter().map(|rule| rule.id).collect())
    }

    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), RuleTableError> {
        let options = to_js(&update).map_err(|e| RuleTableError::Backend(js_error_message(&e)))?;
        settle(update_dynamic_rules(&options))
            .await
            .map(|_| ())
            .map_err(|e| RuleTableError::Backend(js_error_message(&e)))
    }
}

/// `Date.now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsClock;

impl Clock for JsClock {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}

/// Local calendar date as `YYYY-MM-DD`, the key the block total resets on.
pub fn today() -> String {
    let date = js_sys::Date::new_0();
    format!(
        "{:04}-{:02}-{:02}",
        date.get_full_year(),
        date.get_month() + 1,
        date.get_date()
    )
}

/// UTC date as `YYYY-MM-DD`, the key per-site visit counts are filed under.
pub fn utc_today() -> String {
    let iso = String::from(js_sys::Date::new_0().to_iso_string());
    iso.get(..10).unwrap_or(&iso).to_string()
}
