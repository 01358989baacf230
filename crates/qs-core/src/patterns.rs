//! Pattern Registry
//!
//! Static, hand-curated rule tables. The built-in tables are the
//! process-lifetime default; a [`RuleTable`] can also be loaded from JSON so
//! the matching strategy can be swapped without touching interception code.
//! False negatives are expected and harmless.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FilterError;
use crate::matcher::Matcher;
use crate::types::SelectorAction;

// =============================================================================
// Built-in Tables
// =============================================================================

/// Keys carrying ad payloads, matched exactly at any depth.
pub const AD_KEYS: &[&str] = &[
    "adPlacements",
    "adSlots",
    "playerAds",
    "adBreakHeartbeatParams",
];

/// Wrapper-qualified variants of [`AD_KEYS`] for the player response shape.
pub const PLAYER_RESPONSE_AD_PATHS: &[&str] = &[
    "playerResponse.adPlacements",
    "playerResponse.playerAds",
    "playerResponse.adSlots",
];

/// Streaming URL removed from `playerResponse.streamingData`.
pub const PLAYER_RESPONSE_STREAMING_PATH: &[&str] =
    &["playerResponse", "streamingData", "serverAbrStreamingUrl"];

/// Substrings whose presence anywhere in a URL blocks it.
pub const NETWORK_BLOCK_PATTERNS: &[&str] = &[
    "youtube.com/pagead/",
    "youtube.com/ptracking",
    "youtube.com/api/stats/ads",
    "youtube.com/api/stats/atr",
    "youtube.com/youtubei/v1/player/ad_break",
    "youtube.com/get_midroll_",
    "googlesyndication.com",
    "googleads.g.doubleclick.net",
    "doubleclick.net",
    "google.com/pagead/",
    "googleadservices.com",
    "googletagmanager.com",
    "googletagservices.com",
    "/pagead/",
    "/ad_break",
    "/get_midroll_",
    "initplayback?source=youtube",
];

/// Prune regexes, each with an optional exclusion substring that must not
/// follow the match (the DRM license endpoint shares the `/player` prefix).
pub const PRUNE_URL_PATTERNS: &[(&str, Option<&str>)] = &[
    (r"playlist\?list=", None),
    (r"/player", Some("get_drm_license")),
    (r"watch\?[tv]=", None),
    (r"get_watch\?", None),
    (r"/next\?", None),
    (r"music\.youtube\.com", None),
];

/// Ad node selectors.
pub const AD_SELECTORS: &[(&str, SelectorAction)] = &[
    ("#offer-module", SelectorAction::ALL),
    ("#promotion-shelf", SelectorAction::ALL),
    ("#description-inner > ytd-merch-shelf-renderer", SelectorAction::ALL),
    ("ytd-rich-item-renderer:has(> #content > ytd-ad-slot-renderer)", SelectorAction::ALL),
    ("ytd-ad-slot-renderer", SelectorAction::ALL),
    ("ytd-banner-promo-renderer", SelectorAction::ALL),
    (".ytd-player-legacy-desktop-watch-ads-renderer", SelectorAction::ALL),
    // Ad detection reads the module's children, so it is only hidden
    (".ytp-ad-module", SelectorAction::HIDE),
    (".ytp-ad-overlay-container", SelectorAction::ALL),
    (".ytp-ad-text-overlay", SelectorAction::ALL),
    (".ytp-ad-skip-button-container", SelectorAction::HIDE),
    ("ytmusic-promoted-sparkles-web-renderer", SelectorAction::ALL),
    ("ytmusic-statement-banner-renderer", SelectorAction::ALL),
    ("ytmusic-mealbar-promo-renderer", SelectorAction::ALL),
    // The player bar itself must survive
    (".ytmusic-player-bar[is-ad]", SelectorAction::HIDE),
    ("tp-yt-paper-dialog:has(ytmusic-survey-renderer)", SelectorAction::ALL),
];

/// Skip buttons, in priority order.
pub const SKIP_BUTTON_SELECTORS: &[&str] = &[
    ".ytp-ad-skip-button",
    ".ytp-ad-skip-button-modern",
    ".ytp-skip-ad-button",
    "button.ytp-ad-skip-button",
    ".ytp-ad-skip-button-slot button",
];

/// The "are you still there" prompt.
pub const IDLE_PROMPT_SELECTOR: &str = "ytmusic-you-there-renderer";
/// Dismiss control inside the idle prompt.
pub const IDLE_PROMPT_BUTTON_SELECTOR: &str = "button";
/// Container clicked to close popups opened without user activity.
pub const POPUP_CONTAINER_SELECTOR: &str = "ytmusic-popup-container";
/// Node name reported by popup-opened events for the idle prompt.
pub const IDLE_PROMPT_NODE_NAME: &str = "YTMUSIC-YOU-THERE-RENDERER";

/// Player container id and the classes probed inside it.
pub const PLAYER_CONTAINER_ID: &str = "movie_player";
pub const PLAYER_VIDEO_CLASS: &str = "video-stream";
pub const PLAYER_AD_MODULE_CLASS: &str = "ytp-ad-module";

/// Global holding the player response embedded in the initial page.
pub const INITIAL_PLAYER_RESPONSE_GLOBAL: &str = "ytInitialPlayerResponse";

/// Globals fixed to a benign value before the page script runs.
pub const GLOBAL_CONSTANTS: &[(&str, i64)] = &[("google_ad_status", 1)];

/// Late-binding ad data paths pinned to an always-undefined getter.
pub const PINNED_AD_PATHS: &[&str] = &[
    "ytInitialPlayerResponse.adPlacements",
    "ytInitialPlayerResponse.adSlots",
    "ytInitialPlayerResponse.playerAds",
    "playerResponse.adPlacements",
];

// =============================================================================
// Rule Table (serializable form)
// =============================================================================

/// A selector paired with its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub query: String,
    pub action: SelectorAction,
}

/// Source form of a prune rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneSpec {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<String>,
}

/// A global fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConstant {
    pub path: String,
    pub value: Value,
}

/// The full rule table in source form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTable {
    pub ad_keys: Vec<String>,
    #[serde(default)]
    pub player_response_ad_paths: Vec<String>,
    pub block: Vec<String>,
    pub prune: Vec<PruneSpec>,
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub skip_buttons: Vec<String>,
    #[serde(default)]
    pub global_constants: Vec<GlobalConstant>,
    #[serde(default)]
    pub pinned_paths: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RuleTable {
    /// The compiled-in tables.
    pub fn builtin() -> Self {
        Self {
            ad_keys: owned(AD_KEYS),
            player_response_ad_paths: owned(PLAYER_RESPONSE_AD_PATHS),
            block: owned(NETWORK_BLOCK_PATTERNS),
            prune: PRUNE_URL_PATTERNS
                .iter()
                .map(|(pattern, unless)| PruneSpec {
                    pattern: pattern.to_string(),
                    unless: unless.map(str::to_string),
                })
                .collect(),
            selectors: AD_SELECTORS
                .iter()
                .map(|(query, action)| Selector {
                    query: query.to_string(),
                    action: *action,
                })
                .collect(),
            skip_buttons: owned(SKIP_BUTTON_SELECTORS),
            global_constants: GLOBAL_CONSTANTS
                .iter()
                .map(|(path, value)| GlobalConstant {
                    path: path.to_string(),
                    value: Value::from(*value),
                })
                .collect(),
            pinned_paths: owned(PINNED_AD_PATHS),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, FilterError> {
        serde_json::from_str(text).map_err(|e| FilterError::Rules(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, FilterError> {
        serde_json::to_string_pretty(self).map_err(|e| FilterError::Rules(e.to_string()))
    }

    /// Selectors carrying the given action.
    pub fn selectors_with(&self, action: SelectorAction) -> impl Iterator<Item = &str> {
        self.selectors
            .iter()
            .filter(move |s| s.action.contains(action))
            .map(|s| s.query.as_str())
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// =============================================================================
// Pattern Registry (compiled form)
// =============================================================================

/// Compiled rule tables, shared read-only by every layer.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    table: RuleTable,
    matcher: Matcher,
}

impl PatternRegistry {
    /// Compile the built-in tables. A built-in regex that fails to compile is
    /// dropped with a warning rather than taking the engine down.
    pub fn builtin() -> Self {
        let table = RuleTable::builtin();
        let matcher = Matcher::new_lenient(&table);
        Self { table, matcher }
    }

    /// Compile an externally supplied table. Every regex must be valid.
    pub fn from_table(table: RuleTable) -> Result<Self, FilterError> {
        let matcher = Matcher::new(&table)?;
        Ok(Self { table, matcher })
    }

    pub fn from_json(text: &str) -> Result<Self, FilterError> {
        Self::from_table(RuleTable::from_json(text)?)
    }

    #[inline]
    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    #[inline]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    #[inline]
    pub fn ad_keys(&self) -> &[String] {
        &self.table.ad_keys
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_regexes_compile() {
        let table = RuleTable::builtin();
        let registry = PatternRegistry::from_table(table.clone()).unwrap();
        assert_eq!(registry.matcher().prune_rule_count(), table.prune.len());
    }

    #[test]
    fn test_player_response_paths_cover_ad_keys() {
        for path in PLAYER_RESPONSE_AD_PATHS {
            let (wrapper, key) = path.split_once('.').unwrap();
            assert_eq!(wrapper, "playerResponse");
            assert!(AD_KEYS.contains(&key));
        }
    }

    #[test]
    fn test_json_roundtrip_of_builtin() {
        let table = RuleTable::builtin();
        let text = table.to_json_pretty().unwrap();
        assert_eq!(RuleTable::from_json(&text).unwrap(), table);
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut table = RuleTable::builtin();
        table.prune.push(PruneSpec {
            pattern: "(unclosed".to_string(),
            unless: None,
        });
        assert!(matches!(
            PatternRegistry::from_table(table),
            Err(FilterError::Rules(_))
        ));
    }

    #[test]
    fn test_selectors_with_action() {
        let table = RuleTable::builtin();
        let removable: Vec<&str> = table.selectors_with(SelectorAction::REMOVE).collect();
        assert!(removable.contains(&"ytd-ad-slot-renderer"));
        assert!(!removable.contains(&".ytp-ad-module"));
        let hidden = table.selectors_with(SelectorAction::HIDE).count();
        assert_eq!(hidden, table.selectors.len());
    }
}
