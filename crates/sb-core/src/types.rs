//! Core type definitions for ShameBlock
//!
//! Rule records map one-to-one onto `chrome.declarativeNetRequest.Rule`, so
//! they serialize straight into the JSON the browser accepts.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;

use crate::config::UPDATE_RULES_ACTION;

/// Declarative rule identifier. The platform requires ids >= 1.
pub type RuleId = u32;

// =============================================================================
// Rule Actions
// =============================================================================

/// Action the browser takes when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleActionType {
    /// Cancel the request
    Block,
    /// Redirect to `RuleAction::redirect`
    Redirect,
    /// Exempt the request from lower-priority rules
    Allow,
    /// Rewrite http to https
    UpgradeScheme,
    /// Exempt the whole frame hierarchy
    AllowAllRequests,
}

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u16 {
        const MAIN_FRAME = 1 << 0;   // top-level document
        const SUB_FRAME = 1 << 1;    // iframe/frame
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const WEBTRANSPORT = 1 << 12;
        const WEBBUNDLE = 1 << 13;
        const OTHER = 1 << 14;

        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUB_FRAME.bits();
    }
}

const RESOURCE_TYPE_NAMES: [(ResourceType, &str); 15] = [
    (ResourceType::MAIN_FRAME, "main_frame"),
    (ResourceType::SUB_FRAME, "sub_frame"),
    (ResourceType::STYLESHEET, "stylesheet"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::FONT, "font"),
    (ResourceType::OBJECT, "object"),
    (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceType::PING, "ping"),
    (ResourceType::CSP_REPORT, "csp_report"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::WEBSOCKET, "websocket"),
    (ResourceType::WEBTRANSPORT, "webtransport"),
    (ResourceType::WEBBUNDLE, "webbundle"),
    (ResourceType::OTHER, "other"),
];

impl ResourceType {
    /// Parse from browser resource type string.
    pub fn from_dnr_name(s: &str) -> Option<Self> {
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(ty, _)| *ty)
    }

    /// Browser names of every type in the mask, in platform order.
    pub fn names(self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(ty, _)| self.contains(*ty))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        let mut mask = ResourceType::empty();
        for name in &names {
            mask |= ResourceType::from_dnr_name(name)
                .ok_or_else(|| D::Error::custom(format!("unknown resource type '{}'", name)))?;
        }
        Ok(mask)
    }
}

// =============================================================================
// Rules
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: RuleActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    /// `*://host/*` style filter. Required by everything this crate emits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default = "ResourceType::empty", skip_serializing_if = "ResourceType::is_empty")]
    pub resource_types: ResourceType,
}

/// One declarative rule as installed in the browser's dynamic rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl Rule {
    /// Redirect target, if this is a redirect rule.
    pub fn redirect_url(&self) -> Option<&str> {
        self.action.redirect.as_ref().map(|r| r.url.as_str())
    }

    pub fn url_filter(&self) -> Option<&str> {
        self.condition.url_filter.as_deref()
    }
}

// =============================================================================
// Cross-context messages
// =============================================================================

/// Request sent from the popup / block page to the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Message {
    pub action: String,
}

impl Message {
    pub fn update_rules() -> Self {
        Self { action: UPDATE_RULES_ACTION.to_string() }
    }

    pub fn is_update_rules(&self) -> bool {
        self.action == UPDATE_RULES_ACTION
    }
}

/// Acknowledgement sent back once the requested work is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MessageResponse {
    pub success: bool,
}
