//! Platform rule table access
//!
//! The browser owns the installed rules; this module only knows how to read
//! their ids and how to swap the whole set for a new one.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::MAX_DYNAMIC_RULES;
use crate::error::RuleTableError;
use crate::types::{Rule, RuleActionType, RuleId};

/// Argument of `declarativeNetRequest.updateDynamicRules`. Removals are
/// applied before additions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_rule_ids: Vec<RuleId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_rules: Vec<Rule>,
}

/// The browser's dynamic rule table.
#[async_trait(?Send)]
pub trait RuleTable {
    /// Ids of every installed dynamic rule.
    async fn dynamic_rule_ids(&self) -> Result<Vec<RuleId>, RuleTableError>;

    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), RuleTableError>;
}

/// What [`install_rules`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub removed: usize,
    pub added: usize,
}

/// Replace every installed rule with `rules`.
///
/// Two separate updates: remove all current ids, then add the new set. Each
/// is skipped when it would be empty. If the second update fails the table is
/// left empty, which unblocks rather than double-blocks.
pub async fn install_rules<T>(table: &T, rules: Vec<Rule>) -> Result<InstallReport, RuleTableError>
where
    T: RuleTable + ?Sized,
{
    let existing_ids = table.dynamic_rule_ids().await?;
    let mut report = InstallReport::default();

    if !existing_ids.is_empty() {
        report.removed = existing_ids.len();
        table
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: existing_ids,
                add_rules: Vec::new(),
            })
            .await?;
    }

    if !rules.is_empty() {
        report.added = rules.len();
        table
            .update_dynamic_rules(RuleUpdate {
                remove_rule_ids: Vec::new(),
                add_rules: rules,
            })
            .await?;
    }

    debug!("Rule table replaced: removed {}, added {}", report.removed, report.added);
    Ok(report)
}

// =============================================================================
// In-memory rule table
// =============================================================================

/// [`RuleTable`] kept in memory, validating updates the way the browser does:
/// ids must be positive and unique, filters non-empty ASCII, redirects must
/// carry a target, and the table has a rule cap. A rejected update changes
/// nothing.
#[derive(Debug)]
pub struct MemoryRuleTable {
    rules: Mutex<BTreeMap<RuleId, Rule>>,
    limit: usize,
    update_calls: AtomicUsize,
    add_calls: AtomicUsize,
    fail_next: Mutex<Option<RuleTableError>>,
}

impl Default for MemoryRuleTable {
    fn default() -> Self {
        Self::with_limit(MAX_DYNAMIC_RULES)
    }
}

impl MemoryRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            rules: Mutex::new(BTreeMap::new()),
            limit,
            update_calls: AtomicUsize::new(0),
            add_calls: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
        }
    }

    /// Installed rules ordered by id.
    pub fn rules(&self) -> Vec<Rule> {
        self.lock_rules().values().cloned().collect()
    }

    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.lock_rules().keys().copied().collect()
    }

    /// Number of `update_dynamic_rules` calls, accepted or not.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Number of update calls that carried rules to add.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Make the next update fail with `error` without touching the table.
    pub fn fail_next_update(&self, error: RuleTableError) {
        *self.fail_next.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
    }

    fn lock_rules(&self) -> std::sync::MutexGuard<'_, BTreeMap<RuleId, Rule>> {
        self.rules.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn validate(rule: &Rule) -> Result<(), RuleTableError> {
        if rule.id == 0 {
            return Err(RuleTableError::Rejected {
                id: rule.id,
                reason: "rule id must be at least 1".to_string(),
            });
        }

        match rule.url_filter() {
            Some(filter) if !filter.is_empty() && filter.is_ascii() => {}
            _ => {
                return Err(RuleTableError::Rejected {
                    id: rule.id,
                    reason: "urlFilter must be a non-empty ASCII string".to_string(),
                })
            }
        }

        if rule.action.kind == RuleActionType::Redirect && rule.redirect_url().map_or(true, str::is_empty) {
            return Err(RuleTableError::Rejected {
                id: rule.id,
                reason: "redirect rule without a target".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait(?Send)]
impl RuleTable for MemoryRuleTable {
    async fn dynamic_rule_ids(&self) -> Result<Vec<RuleId>, RuleTableError> {
        Ok(self.rule_ids())
    }

    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), RuleTableError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if !update.add_rules.is_empty() {
            self.add_calls.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(error) = self.fail_next.lock().unwrap_or_else(|p| p.into_inner()).take() {
            return Err(error);
        }

        let mut next = self.lock_rules().clone();
        for id in &update.remove_rule_ids {
            next.remove(id);
        }

        let mut batch_ids = HashSet::with_capacity(update.add_rules.len());
        for rule in &update.add_rules {
            Self::validate(rule)?;
            if !batch_ids.insert(rule.id) || next.contains_key(&rule.id) {
                return Err(RuleTableError::DuplicateId(rule.id));
            }
        }

        let requested = next.len() + update.add_rules.len();
        if requested > self.limit {
            return Err(RuleTableError::QuotaExceeded {
                requested,
                limit: self.limit,
            });
        }

        for rule in update.add_rules {
            next.insert(rule.id, rule);
        }
        *self.lock_rules() = next;
        Ok(())
    }
}
