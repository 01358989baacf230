//! Core type definitions for QuietStream
//!
//! These types are shared by the matcher, the interception gate and the
//! reconciler.

use serde::{Deserialize, Serialize};

// =============================================================================
// URL Classification
// =============================================================================

/// Classification of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlClass {
    /// No rule matched - the request is untouched
    Pass,
    /// Block rule - answer with a synthetic empty success
    Block,
    /// Prune rule - let the request through and sanitize its JSON body
    Prune,
}

impl UrlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Block => "block",
            Self::Prune => "prune",
        }
    }
}

/// Result of classifying a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The final classification
    pub class: UrlClass,
    /// Index of the rule that decided, within its own table (for logging)
    pub rule_index: i32,
}

impl Default for MatchResult {
    fn default() -> Self {
        Self {
            class: UrlClass::Pass,
            rule_index: -1,
        }
    }
}

// =============================================================================
// Selector Actions
// =============================================================================

bitflags::bitflags! {
    /// What the reconciler does with nodes matching a selector.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SelectorAction: u8 {
        /// Hidden through the injected stylesheet
        const HIDE = 1 << 0;
        /// Detached from the document on every sweep
        const REMOVE = 1 << 1;
        /// Both
        const ALL = Self::HIDE.bits() | Self::REMOVE.bits();
    }
}

impl Serialize for SelectorAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let name = if *self == Self::ALL {
            "hide+remove"
        } else if self.contains(Self::REMOVE) {
            "remove"
        } else {
            "hide"
        };
        serializer.serialize_str(name)
    }
}

impl<'de> Deserialize<'de> for SelectorAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let mut action = Self::empty();
        for part in raw.split('+') {
            match part.trim() {
                "hide" => action |= Self::HIDE,
                "remove" => action |= Self::REMOVE,
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "unknown selector action '{other}'"
                    )))
                }
            }
        }
        Ok(action)
    }
}

// =============================================================================
// Player State
// =============================================================================

/// Derived player state. Recomputed on every check and never stored.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAdState {
    NoAd,
    AdPlaying { src: String, duration: f64 },
}
