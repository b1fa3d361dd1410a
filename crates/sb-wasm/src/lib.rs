//! WebAssembly bindings for ShameBlock
//!
//! The background service worker forwards its `chrome.*` events here:
//!
//! ```js
//! // start() registers the cleanup alarm each time the worker loads.
//! chrome.runtime.onInstalled.addListener(() => wasm.on_installed());
//! chrome.storage.onChanged.addListener((changes, area) => wasm.on_storage_changed(changes, area));
//! chrome.alarms.onAlarm.addListener((alarm) => wasm.on_alarm(alarm.name));
//! chrome.runtime.onMessage.addListener((msg, _sender, reply) => {
//!   wasm.on_message(msg).then(reply);
//!   return true;
//! });
//! ```
//!
//! The popup and block page use the remaining exports, which only touch
//! storage and let the background reconcile.

mod chrome;
mod logger;

use std::fmt::Display;
use std::rc::Rc;

use log::{debug, warn};
use sb_compiler::{optimize_domains, parse_block_list as parse_list};
use sb_core::config::{CLEANUP_ALARM_NAME, CLEANUP_ALARM_PERIOD_MINUTES};
use sb_core::whitelist::{active_bypasses, format_time_remaining as format_remaining};
use sb_core::{Clock, Message, Reconciler, RuleOptions, Scope, Storage, Trigger};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::chrome::{ChromeRuleTable, ChromeStorage, JsClock};

type BackgroundReconciler = Reconciler<ChromeStorage, ChromeRuleTable, JsClock>;

thread_local! {
    static RECONCILER: Rc<BackgroundReconciler> = Rc::new(
        Reconciler::new(ChromeStorage, ChromeRuleTable, JsClock)
            .with_rule_options(RuleOptions::for_extension(&chrome::extension_base_url())),
    );
}

fn reconciler() -> Rc<BackgroundReconciler> {
    RECONCILER.with(Rc::clone)
}

fn storage() -> Storage<ChromeStorage> {
    Storage::new(ChromeStorage)
}

fn js_err(err: impl Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn set_field(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

// Ask the background to reconcile now instead of waiting on storage.onChanged.
async fn notify_background() {
    if let Err(err) = chrome::send_runtime_message(&Message::update_rules()).await {
        debug!("updateRules message not delivered: {}", chrome::js_error_message(&err));
    }
}

#[wasm_bindgen(start)]
pub fn start() {
    logger::init(log::LevelFilter::Info);
    register_cleanup_alarm();
}

/// Create (or replace) the periodic whitelist cleanup alarm. Chrome can drop
/// alarms across browser restarts, so this runs on every worker load.
#[wasm_bindgen]
pub fn register_cleanup_alarm() {
    if let Err(err) = chrome::create_alarm(CLEANUP_ALARM_NAME, CLEANUP_ALARM_PERIOD_MINUTES) {
        warn!("Failed to create cleanup alarm: {}", chrome::js_error_message(&err));
    }
}

#[wasm_bindgen]
pub fn set_log_level(level: &str) {
    logger::init(logger::parse_level(level));
}

// =============================================================================
// Background events
// =============================================================================

#[wasm_bindgen]
pub fn cleanup_alarm_name() -> String {
    CLEANUP_ALARM_NAME.to_string()
}

#[wasm_bindgen]
pub fn cleanup_alarm_period_minutes() -> u32 {
    CLEANUP_ALARM_PERIOD_MINUTES
}

#[wasm_bindgen]
pub fn is_updating() -> bool {
    reconciler().is_updating()
}

/// `runtime.onInstalled`: seed defaults on first install, then reconcile.
#[wasm_bindgen]
pub async fn on_installed() {
    reconciler().handle(&Trigger::Installed).await;
}

/// `storage.onChanged`
#[wasm_bindgen]
pub async fn on_storage_changed(changes: JsValue, area_name: String) {
    let Some(scope) = Scope::from_area(&area_name) else {
        return;
    };

    let keys: Vec<String> = match changes.dyn_ref::<js_sys::Object>() {
        Some(changes) => js_sys::Object::keys(changes)
            .iter()
            .filter_map(|key| key.as_string())
            .collect(),
        None => return,
    };

    reconciler().handle(&Trigger::StorageChanged { scope, keys }).await;
}

/// `alarms.onAlarm`
#[wasm_bindgen]
pub async fn on_alarm(name: String) {
    reconciler().handle(&Trigger::Alarm(name)).await;
}

/// `runtime.onMessage`. Resolves to `{ success: true }` for `updateRules`
/// and to `undefined` for anything else.
#[wasm_bindgen]
pub async fn on_message(message: JsValue) -> Result<JsValue, JsValue> {
    let Ok(message) = chrome::from_js::<Message>(&message) else {
        return Ok(JsValue::UNDEFINED);
    };

    match reconciler().handle_message(&message).await {
        Some(response) => chrome::to_js(&response),
        None => Ok(JsValue::UNDEFINED),
    }
}

// =============================================================================
// Popup
// =============================================================================

/// `{ blockedSites, isEnabled, bypasses: [{ site, expiresAt, remaining }] }`
#[wasm_bindgen]
pub async fn get_state() -> Result<JsValue, JsValue> {
    let storage = storage();
    let state = storage.sync_state().await.map_err(js_err)?;
    let whitelist = storage.temp_whitelist().await.map_err(js_err)?;
    let now = JsClock.now_ms();

    let bypasses = js_sys::Array::new();
    for (site, expires_at) in active_bypasses(&whitelist, now) {
        let entry = js_sys::Object::new();
        set_field(&entry, "site", &JsValue::from_str(&site));
        set_field(&entry, "expiresAt", &JsValue::from_f64(expires_at as f64));
        set_field(&entry, "remaining", &JsValue::from_str(&format_remaining(expires_at, now)));
        bypasses.push(&entry);
    }

    let result = js_sys::Object::new();
    set_field(&result, "blockedSites", &chrome::to_js(&state.blocked_sites)?);
    set_field(&result, "isEnabled", &JsValue::from_bool(state.is_enabled));
    set_field(&result, "bypasses", &bypasses);
    Ok(result.into())
}

/// Add a site typed by the user (`https://www.Reddit.com/r/all` is stored as
/// `reddit.com`). Resolves to `false` if it was already listed.
#[wasm_bindgen]
pub async fn add_site(input: String) -> Result<bool, JsValue> {
    let site = sb_core::url::normalize_site(&input)
        .filter(|site| sb_core::url::is_valid_domain(site))
        .ok_or_else(|| JsValue::from_str("Please enter a valid domain"))?;
    let added = storage().add_site(&site).await.map_err(js_err)?;
    if added {
        notify_background().await;
    }
    Ok(added)
}

#[wasm_bindgen]
pub async fn remove_site(site: String) -> Result<(), JsValue> {
    storage().remove_site(&site).await.map_err(js_err)?;
    notify_background().await;
    Ok(())
}

#[wasm_bindgen]
pub async fn set_enabled(enabled: bool) -> Result<(), JsValue> {
    storage().set_enabled(enabled).await.map_err(js_err)?;
    notify_background().await;
    Ok(())
}

/// Restore the default block list, re-enable blocking and drop every bypass.
#[wasm_bindgen]
pub async fn reset_to_defaults() -> Result<(), JsValue> {
    let defaults = sb_core::config::default_blocked_sites();
    storage().reset_to_defaults(&defaults).await.map_err(js_err)?;
    notify_background().await;
    Ok(())
}

/// Parse pasted block list text and add every new domain. Resolves to the
/// number of domains added.
#[wasm_bindgen]
pub async fn import_block_list(text: String) -> Result<u32, JsValue> {
    let mut domains = parse_list(&text);
    optimize_domains(&mut domains);

    let added = storage().add_sites(&domains).await.map_err(js_err)?;
    if added > 0 {
        notify_background().await;
    }
    Ok(added as u32)
}

/// Domains a block list text would add, without storing anything.
#[wasm_bindgen]
pub fn parse_block_list(text: &str) -> Result<JsValue, JsValue> {
    let mut domains = parse_list(text);
    optimize_domains(&mut domains);
    chrome::to_js(&domains)
}

#[wasm_bindgen]
pub fn normalize_site(input: &str) -> Option<String> {
    sb_core::url::normalize_site(input)
}

#[wasm_bindgen]
pub fn format_time_remaining(expires_at: f64) -> String {
    format_remaining(expires_at as u64, JsClock.now_ms())
}

// =============================================================================
// Block page
// =============================================================================

/// "Unblock for 30 minutes". Resolves to the expiry in epoch milliseconds.
#[wasm_bindgen]
pub async fn grant_bypass(site: String) -> Result<f64, JsValue> {
    let expires_at = storage()
        .grant_bypass(&site, JsClock.now_ms())
        .await
        .map_err(js_err)?;
    notify_background().await;
    Ok(expires_at as f64)
}

/// "Block Now"
#[wasm_bindgen]
pub async fn revoke_bypass(site: String) -> Result<bool, JsValue> {
    let revoked = storage().revoke_bypass(&site).await.map_err(js_err)?;
    if revoked {
        notify_background().await;
    }
    Ok(revoked)
}

/// Count a block page view. Resolves to `{ total, lastDate, todayCount }`.
#[wasm_bindgen]
pub async fn record_block() -> Result<JsValue, JsValue> {
    let stats = storage().record_block(&chrome::today()).await.map_err(js_err)?;
    chrome::to_js(&stats)
}

/// Count a visit to `site`'s block page. Resolves to today's count.
#[wasm_bindgen]
pub async fn record_visit(site: String) -> Result<u32, JsValue> {
    storage()
        .record_visit(&site, &chrome::utc_today())
        .await
        .map_err(js_err)
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use sb_core::MessageResponse;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_message_through_js() {
        let js = chrome::to_js(&Message::update_rules()).unwrap();
        let back: Message = chrome::from_js(&js).unwrap();
        assert!(back.is_update_rules());
    }

    #[wasm_bindgen_test]
    fn test_response_shape() {
        let js = chrome::to_js(&MessageResponse { success: true }).unwrap();
        let success = js_sys::Reflect::get(&js, &"success".into()).unwrap();
        assert_eq!(success.as_bool(), Some(true));
    }

    #[wasm_bindgen_test]
    fn test_parse_block_list_export() {
        let domains: Vec<String> = chrome::from_js(&parse_block_list("0.0.0.0 x.com\nm.x.com\n").unwrap()).unwrap();
        assert_eq!(domains, vec!["x.com"]);
    }

    #[wasm_bindgen_test]
    fn test_normalize_site_export() {
        assert_eq!(normalize_site("https://www.Reddit.com/r/all"), Some("reddit.com".to_string()));
        assert_eq!(normalize_site("   "), None);
    }

    #[wasm_bindgen_test]
    fn test_register_cleanup_alarm_creates_periodic_alarm() {
        js_sys::eval(
            "globalThis.chrome = { alarms: { create: (name, info) => { \
                globalThis.createdAlarm = [name, info.periodInMinutes]; } } };",
        )
        .unwrap();

        register_cleanup_alarm();

        let created = js_sys::eval("globalThis.createdAlarm").unwrap();
        let created: (String, u32) = chrome::from_js(&created).unwrap();
        assert_eq!(created, (CLEANUP_ALARM_NAME.to_string(), CLEANUP_ALARM_PERIOD_MINUTES));
    }

    #[wasm_bindgen_test]
    fn test_visit_day_is_utc_iso_date() {
        let day = chrome::utc_today();
        let iso = String::from(js_sys::Date::new_0().to_iso_string());
        assert_eq!(day.len(), 10);
        assert_eq!(&iso[..10], day);
    }

    #[wasm_bindgen_test]
    fn test_expired_countdown() {
        assert_eq!(format_time_remaining(0.0), "Expiring soon...");
    }
}
