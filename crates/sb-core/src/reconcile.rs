//! Reconciliation orchestrator
//!
//! [`Reconciler::reconcile`] is the only code path that writes the rule
//! table. A pass reads the synced and local state, prunes expired bypasses
//! (persisting the pruned whitelist), compiles the still-blocked domains and
//! replaces the installed rules.
//!
//! # Update lock
//!
//! ```text
//!   IDLE ──try_acquire──► UPDATING ──guard dropped──► IDLE
//!    ▲                       │
//!    └──── trigger while UPDATING: dropped (Skipped), never queued
//! ```
//!
//! Triggers carry no data the pass needs, so a dropped trigger loses nothing
//! as long as the running pass or a later trigger re-reads state.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{
    default_blocked_sites, BLOCKED_SITES_KEY, CLEANUP_ALARM_NAME, IS_ENABLED_KEY, TEMP_WHITELIST_KEY,
};
use crate::error::ReconcileError;
use crate::rule_table::{install_rules, InstallReport, RuleTable};
use crate::rules::{compile_rules, RuleOptions};
use crate::storage::{Scope, StateStore, Storage};
use crate::types::{Message, MessageResponse};
use crate::whitelist::{cleanup_expired, dedupe, filter_active};

// =============================================================================
// Update lock
// =============================================================================

/// At-most-one-in-flight guard. Acquisition never waits.
#[derive(Debug, Default)]
pub struct UpdateLock {
    busy: AtomicBool,
}

impl UpdateLock {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Enter the critical section, or `None` if a pass already holds it.
    pub fn try_acquire(&self) -> Option<UpdateGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| UpdateGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the [`UpdateLock`] when dropped, on every exit path.
#[derive(Debug)]
pub struct UpdateGuard<'a> {
    lock: &'a UpdateLock,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}

// =============================================================================
// Triggers
// =============================================================================

/// Event that may call for a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `runtime.onInstalled`
    Installed,
    /// `storage.onChanged` with the changed keys of one area
    StorageChanged { scope: Scope, keys: Vec<String> },
    /// `alarms.onAlarm`
    Alarm(String),
    /// `runtime.onMessage`
    Message(Message),
}

impl Trigger {
    /// Whether this event should start a pass at all.
    pub fn requires_reconcile(&self) -> bool {
        match self {
            Trigger::Installed => true,
            Trigger::StorageChanged { scope, keys } => keys.iter().any(|key| affects_rules(*scope, key)),
            Trigger::Alarm(name) => name == CLEANUP_ALARM_NAME,
            Trigger::Message(message) => message.is_update_rules(),
        }
    }
}

/// Keys whose change can alter the installed rule set.
pub fn affects_rules(scope: Scope, key: &str) -> bool {
    match scope {
        Scope::Sync => key == BLOCKED_SITES_KEY || key == IS_ENABLED_KEY,
        Scope::Local => key == TEMP_WHITELIST_KEY,
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Summary of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Domains that ended up with rules
    pub blocked_domains: usize,
    /// Expired whitelist entries removed from storage
    pub whitelist_pruned: usize,
    pub install: InstallReport,
}

/// Result of asking for a pass.
#[derive(Debug)]
pub enum PassOutcome {
    Applied(PassReport),
    /// Another pass held the lock; nothing was done.
    Skipped,
    /// The pass aborted; the rule table may be stale or empty until the next
    /// trigger.
    Failed(ReconcileError),
}

impl PassOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PassOutcome::Applied(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PassOutcome::Skipped)
    }

    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Applied(report) => Some(report),
            _ => None,
        }
    }
}

/// Owns the store, the rule table and the update lock.
pub struct Reconciler<S, T, C = SystemClock> {
    storage: Storage<S>,
    table: T,
    clock: C,
    options: RuleOptions,
    default_sites: Vec<String>,
    lock: UpdateLock,
}

impl<S, T, C> Reconciler<S, T, C>
where
    S: StateStore,
    T: RuleTable,
    C: Clock,
{
    pub fn new(store: S, table: T, clock: C) -> Self {
        Self {
            storage: Storage::new(store),
            table,
            clock,
            options: RuleOptions::default(),
            default_sites: default_blocked_sites(),
            lock: UpdateLock::new(),
        }
    }

    pub fn with_rule_options(mut self, options: RuleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn storage(&self) -> &Storage<S> {
        &self.storage
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_updating(&self) -> bool {
        self.lock.is_held()
    }

    /// Run one pass unless one is already running. Never returns an error:
    /// failures are logged and reported in the outcome.
    pub async fn reconcile(&self) -> PassOutcome {
        let Some(_guard) = self.lock.try_acquire() else {
            debug!("Update already in progress, skipping");
            return PassOutcome::Skipped;
        };

        match self.run_pass().await {
            Ok(report) => {
                info!(
                    "Blocking rules updated: {} domains, {} rules installed, {} expired bypasses pruned",
                    report.blocked_domains, report.install.added, report.whitelist_pruned
                );
                PassOutcome::Applied(report)
            }
            Err(err) => {
                warn!("Error updating blocking rules: {}", err);
                PassOutcome::Failed(err)
            }
        }
    }

    async fn run_pass(&self) -> Result<PassReport, ReconcileError> {
        let state = self.storage.sync_state().await?;
        let whitelist = self.storage.temp_whitelist().await?;

        let cleaned = cleanup_expired(&whitelist, self.clock.now_ms());
        let whitelist_pruned = whitelist.len() - cleaned.len();
        if !cleaned.same_domains(&whitelist) {
            self.storage.save_temp_whitelist(&cleaned).await?;
        }

        let active = filter_active(&state.blocked_sites, &cleaned);
        let unique = dedupe(&active);

        let (blocked_domains, target) = if state.is_enabled {
            (unique.len(), compile_rules(&unique, &self.options))
        } else {
            (0, Vec::new())
        };

        let install = install_rules(&self.table, target).await?;

        Ok(PassReport {
            blocked_domains,
            whitelist_pruned,
            install,
        })
    }

    /// Dispatch an event. Returns `None` when the event is not one the
    /// orchestrator reacts to.
    pub async fn handle(&self, trigger: &Trigger) -> Option<PassOutcome> {
        if !trigger.requires_reconcile() {
            return None;
        }

        if *trigger == Trigger::Installed {
            match self.storage.initialize(&self.default_sites).await {
                Ok(true) => info!("Seeded default block list ({} sites)", self.default_sites.len()),
                Ok(false) => {}
                Err(err) => warn!("Failed to seed default block list: {}", err),
            }
        }

        Some(self.reconcile().await)
    }

    /// `runtime.onMessage` handler. `updateRules` is acknowledged with
    /// `{ success: true }` once the pass has finished, whatever its outcome;
    /// any other action gets no response.
    pub async fn handle_message(&self, message: &Message) -> Option<MessageResponse> {
        self.handle(&Trigger::Message(message.clone())).await?;
        Some(MessageResponse { success: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RuleTableError;
    use crate::rule_table::{MemoryRuleTable, RuleUpdate};
    use crate::storage::MemoryStore;
    use crate::types::RuleId;
    use async_trait::async_trait;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000_000;

    type TestReconciler = Reconciler<MemoryStore, MemoryRuleTable, ManualClock>;

    fn reconciler(blocked: &[&str], enabled: bool, whitelist: serde_json::Value) -> TestReconciler {
        let store = MemoryStore::new()
            .with_value(Scope::Sync, BLOCKED_SITES_KEY, json!(blocked))
            .with_value(Scope::Sync, IS_ENABLED_KEY, json!(enabled))
            .with_value(Scope::Local, TEMP_WHITELIST_KEY, whitelist);
        Reconciler::new(store, MemoryRuleTable::new(), ManualClock::new(NOW))
    }

    fn filters(table: &MemoryRuleTable) -> Vec<String> {
        table
            .rules()
            .iter()
            .filter_map(|rule| rule.url_filter().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_blocks_listed_domain() {
        let r = reconciler(&["x.com"], true, json!({}));
        let outcome = r.reconcile().await;

        assert!(outcome.is_applied());
        assert_eq!(r.table().rule_ids(), vec![1, 2]);
        assert_eq!(filters(r.table()), vec!["*://x.com/*", "*://*.x.com/*"]);
    }

    #[tokio::test]
    async fn test_whitelisted_domain_not_blocked() {
        let r = reconciler(&["x.com"], true, json!({ "x.com": NOW + 60_000 }));
        r.reconcile().await;

        assert!(r.table().rule_ids().is_empty());
        // Nothing expired, so the whitelist is not rewritten
        assert!(r.storage().store().writes().is_empty());
    }

    #[tokio::test]
    async fn test_expired_whitelist_pruned_and_blocked_again() {
        let r = reconciler(&["x.com"], true, json!({ "x.com": NOW - 1 }));
        let outcome = r.reconcile().await;

        assert_eq!(outcome.report().map(|rep| rep.whitelist_pruned), Some(1));
        assert_eq!(
            r.storage().store().value(Scope::Local, TEMP_WHITELIST_KEY),
            Some(json!({}))
        );
        assert_eq!(r.table().rule_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_bypass_expires_between_passes() {
        let r = reconciler(&["x.com", "y.com"], true, json!({ "x.com": NOW + 1_000 }));
        r.reconcile().await;
        assert_eq!(filters(r.table()), vec!["*://y.com/*", "*://*.y.com/*"]);

        r.clock().advance(1_000);
        r.reconcile().await;
        assert_eq!(r.table().rule_ids(), vec![1, 2, 3, 4]);
        assert_eq!(filters(r.table())[0], "*://x.com/*");
    }

    #[tokio::test]
    async fn test_disabled_installs_nothing() {
        let r = reconciler(&["x.com", "y.com"], false, json!({ "x.com": NOW - 1 }));
        r.table()
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: Vec::new(),
                add_rules: crate::rules::compile_rules(&["old.com".to_string()], &RuleOptions::default()),
            })
            .await
            .unwrap();

        let outcome = r.reconcile().await;
        assert!(r.table().rule_ids().is_empty());
        assert_eq!(outcome.report().map(|rep| rep.install.removed), Some(2));
    }

    #[tokio::test]
    async fn test_duplicate_sites_get_one_rule_pair() {
        let r = reconciler(&["x.com", "x.com", "y.com"], true, json!({}));
        r.reconcile().await;
        assert_eq!(r.table().rule_ids(), vec![1, 2, 3, 4]);
    }

    // Expiry 0 is stored but falsy: the site stays blocked and, being
    // expired, the entry is pruned.
    #[tokio::test]
    async fn test_zero_expiry_does_not_bypass() {
        let r = reconciler(&["x.com"], true, json!({ "x.com": 0 }));
        r.reconcile().await;
        assert_eq!(r.table().rule_ids(), vec![1, 2]);
        assert_eq!(
            r.storage().store().value(Scope::Local, TEMP_WHITELIST_KEY),
            Some(json!({}))
        );
    }

    #[tokio::test]
    async fn test_missing_state_installs_nothing() {
        let r = Reconciler::new(MemoryStore::new(), MemoryRuleTable::new(), ManualClock::new(NOW));
        let outcome = r.reconcile().await;
        assert_eq!(outcome.report().map(|rep| rep.blocked_domains), Some(0));
        assert_eq!(r.table().update_calls(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_releases_lock() {
        let r = reconciler(&["x.com"], true, json!({}));
        r.storage().store().set_fail_reads(true);

        let outcome = r.reconcile().await;
        assert!(matches!(outcome, PassOutcome::Failed(ReconcileError::Storage(_))));
        assert!(!r.is_updating());

        r.storage().store().set_fail_reads(false);
        assert!(r.reconcile().await.is_applied());
        assert_eq!(r.table().rule_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_rule_table_failure_surfaces() {
        let r = reconciler(&["x.com"], true, json!({}));
        r.table().fail_next_update(RuleTableError::Backend("quota".to_string()));

        let outcome = r.reconcile().await;
        assert!(matches!(outcome, PassOutcome::Failed(ReconcileError::RuleTable(_))));
        assert!(!r.is_updating());
    }

    #[tokio::test]
    async fn test_whitelist_write_failure_aborts_before_install() {
        let r = reconciler(&["x.com"], true, json!({ "x.com": NOW - 1 }));
        r.storage().store().set_fail_writes(true);

        assert!(matches!(r.reconcile().await, PassOutcome::Failed(_)));
        assert_eq!(r.table().update_calls(), 0);
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let lock = UpdateLock::new();
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    /// Suspends once before reading the table so a second pass can start
    /// while the first is mid-flight.
    struct YieldingTable(MemoryRuleTable);

    #[async_trait(?Send)]
    impl RuleTable for YieldingTable {
        async fn dynamic_rule_ids(&self) -> Result<Vec<RuleId>, RuleTableError> {
            tokio::task::yield_now().await;
            self.0.dynamic_rule_ids().await
        }

        async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), RuleTableError> {
            self.0.update_dynamic_rules(update).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_triggers_run_one_pass() {
        let store = MemoryStore::new().with_value(Scope::Sync, BLOCKED_SITES_KEY, json!(["x.com"]));
        let r = Reconciler::new(store, YieldingTable(MemoryRuleTable::new()), ManualClock::new(NOW));

        let (first, second) = tokio::join!(r.reconcile(), r.reconcile());

        assert!(first.is_applied());
        assert!(second.is_skipped());
        assert_eq!(r.table().0.add_calls(), 1);

        // Lock released once the first pass finished
        assert!(r.reconcile().await.is_applied());
        assert_eq!(r.table().0.add_calls(), 2);
    }

    #[tokio::test]
    async fn test_install_trigger_seeds_defaults() {
        let r = Reconciler::new(MemoryStore::new(), MemoryRuleTable::new(), ManualClock::new(NOW));
        let outcome = r.handle(&Trigger::Installed).await;

        assert!(outcome.map_or(false, |o| o.is_applied()));
        assert_eq!(r.table().rule_ids().len(), 24);
        assert_eq!(r.storage().blocked_sites().await.unwrap(), default_blocked_sites());
    }

    #[tokio::test]
    async fn test_install_trigger_keeps_existing_list() {
        let r = reconciler(&["mine.com"], true, json!({}));
        r.handle(&Trigger::Installed).await;
        assert_eq!(r.table().rule_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_trigger_filtering() {
        let r = reconciler(&["x.com"], true, json!({}));

        let ignored = [
            Trigger::StorageChanged { scope: Scope::Local, keys: vec!["blockStats".into()] },
            Trigger::StorageChanged { scope: Scope::Local, keys: vec![BLOCKED_SITES_KEY.into()] },
            Trigger::StorageChanged { scope: Scope::Sync, keys: vec![TEMP_WHITELIST_KEY.into()] },
            Trigger::Alarm("other".into()),
            Trigger::Message(Message { action: "ping".into() }),
        ];
        for trigger in &ignored {
            assert!(r.handle(trigger).await.is_none(), "{:?}", trigger);
        }
        assert_eq!(r.table().update_calls(), 0);

        let accepted = [
            Trigger::StorageChanged { scope: Scope::Sync, keys: vec![IS_ENABLED_KEY.into()] },
            Trigger::StorageChanged {
                scope: Scope::Local,
                keys: vec!["dailySiteVisits".into(), TEMP_WHITELIST_KEY.into()],
            },
            Trigger::Alarm(CLEANUP_ALARM_NAME.into()),
        ];
        for trigger in &accepted {
            assert!(r.handle(trigger).await.is_some(), "{:?}", trigger);
        }
    }

    #[tokio::test]
    async fn test_update_rules_message_acknowledged() {
        let r = reconciler(&["x.com"], true, json!({}));
        assert_eq!(
            r.handle_message(&Message::update_rules()).await,
            Some(MessageResponse { success: true })
        );
        assert_eq!(r.table().rule_ids(), vec![1, 2]);

        r.storage().store().set_fail_reads(true);
        assert_eq!(
            r.handle_message(&Message::update_rules()).await,
            Some(MessageResponse { success: true })
        );
        assert_eq!(r.handle_message(&Message { action: "noop".into() }).await, None);
    }
}
