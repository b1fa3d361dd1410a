//! Block counters kept by the block page.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::{BLOCK_STATS_KEY, DAILY_SITE_VISITS_KEY};
use crate::error::StorageError;
use crate::storage::{Scope, StateStore, Storage};

/// Running block totals, with a per-day counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BlockStats {
    pub total: u32,
    pub last_date: String,
    pub today_count: u32,
}

impl BlockStats {
    pub fn new(today: &str) -> Self {
        Self {
            total: 0,
            last_date: today.to_string(),
            today_count: 0,
        }
    }

    /// Count one block. The daily counter restarts when `today` differs from
    /// the last recorded date.
    pub fn record(&mut self, today: &str) {
        if self.last_date != today {
            self.today_count = 0;
            self.last_date = today.to_string();
        }
        self.total += 1;
        self.today_count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SiteVisits {
    pub count: u32,
    /// `YYYY-MM-DD`
    pub date: String,
}

/// Domain -> today's visits to its block page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DailySiteVisits(BTreeMap<String, SiteVisits>);

impl DailySiteVisits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, site: &str) -> Option<&SiteVisits> {
        self.0.get(site)
    }

    /// Count one visit to `site` and return today's total for it.
    pub fn record(&mut self, site: &str, today: &str) -> u32 {
        match self.0.get_mut(site) {
            Some(visits) if visits.date == today => {
                visits.count += 1;
                visits.count
            }
            _ => {
                self.0.insert(
                    site.to_string(),
                    SiteVisits {
                        count: 1,
                        date: today.to_string(),
                    },
                );
                1
            }
        }
    }
}

impl<S: StateStore> Storage<S> {
    pub async fn block_stats(&self) -> Result<Option<BlockStats>, StorageError> {
        self.read(Scope::Local, BLOCK_STATS_KEY).await
    }

    pub async fn daily_site_visits(&self) -> Result<DailySiteVisits, StorageError> {
        Ok(self.read(Scope::Local, DAILY_SITE_VISITS_KEY).await?.unwrap_or_default())
    }

    /// Read-modify-write of `blockStats`.
    pub async fn record_block(&self, today: &str) -> Result<BlockStats, StorageError> {
        let mut stats = self.block_stats().await?.unwrap_or_else(|| BlockStats::new(today));
        stats.record(today);
        self.write(Scope::Local, BLOCK_STATS_KEY, &stats).await?;
        Ok(stats)
    }

    /// Read-modify-write of `dailySiteVisits`; returns today's count for `site`.
    pub async fn record_visit(&self, site: &str, today: &str) -> Result<u32, StorageError> {
        let mut visits = self.daily_site_visits().await?;
        let count = visits.record(site, today);
        self.write(Scope::Local, DAILY_SITE_VISITS_KEY, &visits).await?;
        Ok(count)
    }
}
