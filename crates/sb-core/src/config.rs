//! Storage keys, defaults and timing constants shared by every context of the
//! extension (background, popup, block page).

/// Sites blocked out of the box. Seeded on first install and on reset.
pub const DEFAULT_BLOCKED_SITES: [&str; 12] = [
    "reddit.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "youtube.com",
    "tiktok.com",
    "linkedin.com",
    "twitch.tv",
    "netflix.com",
    "9gag.com",
    "buzzfeed.com",
];

// =============================================================================
// Storage keys
// =============================================================================

/// Synced scope: `string[]`
pub const BLOCKED_SITES_KEY: &str = "blockedSites";
/// Synced scope: `boolean`
pub const IS_ENABLED_KEY: &str = "isEnabled";
/// Local scope: `{ [domain]: expiryEpochMs }`
pub const TEMP_WHITELIST_KEY: &str = "tempWhitelist";
/// Local scope: `{ total, lastDate, todayCount }`
pub const BLOCK_STATS_KEY: &str = "blockStats";
/// Local scope: `{ [domain]: { count, date } }`
pub const DAILY_SITE_VISITS_KEY: &str = "dailySiteVisits";

// =============================================================================
// Timing
// =============================================================================

/// Alarm that forces a reconciliation so expired bypasses get cleaned up
/// even when nobody touches the popup.
pub const CLEANUP_ALARM_NAME: &str = "cleanupWhitelist";
pub const CLEANUP_ALARM_PERIOD_MINUTES: u32 = 5;

pub const MINUTE_MS: u64 = 60 * 1000;

/// How long finishing the shame ritual unblocks a site.
pub const BYPASS_DURATION_MS: u64 = 30 * MINUTE_MS;

// =============================================================================
// Rules
// =============================================================================

/// Extension page every blocked navigation is redirected to.
pub const BLOCK_PAGE_PATH: &str = "blocked.html";

/// Query parameter carrying the blocked domain.
pub const BLOCK_PAGE_SITE_PARAM: &str = "site";

pub const DEFAULT_RULE_PRIORITY: u32 = 1;

/// Chrome's cap on dynamic rules (`MAX_NUMBER_OF_DYNAMIC_RULES`).
pub const MAX_DYNAMIC_RULES: usize = 30_000;

/// Message action the popup sends after mutating state.
pub const UPDATE_RULES_ACTION: &str = "updateRules";

/// Owned copy of [`DEFAULT_BLOCKED_SITES`].
pub fn default_blocked_sites() -> Vec<String> {
    DEFAULT_BLOCKED_SITES.iter().map(|s| s.to_string()).collect()
}
