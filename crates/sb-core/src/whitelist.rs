//! Temporary whitelist reconciliation
//!
//! Pure functions only: nothing here reads the clock or touches storage. The
//! orchestrator decides when the result of [`cleanup_expired`] is worth
//! persisting.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::MINUTE_MS;

/// Domain -> absolute expiry in epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TempWhitelist(#[ts(type = "Record<string, number>")] BTreeMap<String, u64>);

impl TempWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, site: impl Into<String>, expires_at: u64) -> Option<u64> {
        self.0.insert(site.into(), expires_at)
    }

    pub fn remove(&mut self, site: &str) -> Option<u64> {
        self.0.remove(site)
    }

    pub fn get(&self, site: &str) -> Option<u64> {
        self.0.get(site).copied()
    }

    /// Whether `site` suppresses blocking. An expiry of `0` does not count:
    /// the entry is present but falsy.
    pub fn is_whitelisted(&self, site: &str) -> bool {
        matches!(self.0.get(site), Some(&expiry) if expiry != 0)
    }

    /// True when both maps hold exactly the same domains, whatever the expiries.
    pub fn same_domains(&self, other: &TempWhitelist) -> bool {
        self.0.len() == other.0.len() && self.0.keys().eq(other.0.keys())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(site, &expiry)| (site.as_str(), expiry))
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for TempWhitelist {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(site, expiry)| (site.into(), expiry)).collect())
    }
}

/// Entries whose expiry is strictly after `now`.
pub fn cleanup_expired(whitelist: &TempWhitelist, now: u64) -> TempWhitelist {
    whitelist
        .iter()
        .filter(|&(_, expiry)| expiry > now)
        .collect()
}

/// `blocked` minus every domain that is a truthy key of `whitelist`.
pub fn filter_active(blocked: &[String], whitelist: &TempWhitelist) -> Vec<String> {
    blocked
        .iter()
        .filter(|site| !whitelist.is_whitelisted(site))
        .cloned()
        .collect()
}

/// Drop repeated domains, keeping the first occurrence of each.
pub fn dedupe(domains: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(domains.len());
    domains
        .iter()
        .filter(|site| seen.insert(site.as_str()))
        .cloned()
        .collect()
}

/// Bypasses still running at `now`, soonest to expire first.
pub fn active_bypasses(whitelist: &TempWhitelist, now: u64) -> Vec<(String, u64)> {
    let mut active: Vec<(String, u64)> = whitelist
        .iter()
        .filter(|&(_, expiry)| expiry > now)
        .map(|(site, expiry)| (site.to_string(), expiry))
        .collect();
    active.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    active
}

fn pluralize(count: u64, singular: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}s", count, singular)
    }
}

/// Countdown text shown next to a bypassed site: "5 minutes", "2 hours",
/// "2h 30m". Minutes round up.
pub fn format_time_remaining(expires_at: u64, now: u64) -> String {
    if expires_at <= now {
        return "Expiring soon...".to_string();
    }

    let remaining = expires_at - now;
    let minutes = remaining.div_ceil(MINUTE_MS);
    if minutes < 60 {
        return pluralize(minutes, "minute");
    }

    let hours = minutes / 60;
    let mins = minutes % 60;
    if mins == 0 {
        return pluralize(hours, "hour");
    }

    format!("{}h {}m", hours, mins)
}
