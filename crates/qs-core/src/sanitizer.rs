//! Response Sanitizer
//!
//! Pure functions over freshly parsed response trees. Parsed JSON never holds
//! back-references, so the recursion needs no cycle protection.

use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::error::FilterError;
use crate::patterns::{PatternRegistry, PLAYER_RESPONSE_STREAMING_PATH};

/// Strips ad-bearing keys from response trees.
#[derive(Debug, Clone, Copy)]
pub struct Sanitizer<'a> {
    ad_keys: &'a [String],
    wrapper_paths: &'a [String],
}

impl<'a> Sanitizer<'a> {
    pub fn new(registry: &'a PatternRegistry) -> Self {
        let table = registry.table();
        Self {
            ad_keys: &table.ad_keys,
            wrapper_paths: &table.player_response_ad_paths,
        }
    }

    /// Return a pruned tree. Non-object input comes back unchanged.
    pub fn sanitize(&self, mut tree: Value) -> Value {
        self.sanitize_in_place(&mut tree);
        tree
    }

    /// Prune a tree in place and return the number of removed entries.
    pub fn sanitize_in_place(&self, tree: &mut Value) -> usize {
        match tree {
            Value::Object(map) => self.sanitize_object(map),
            Value::Array(items) => items.iter_mut().map(|item| self.sanitize_in_place(item)).sum(),
            _ => 0,
        }
    }

    fn sanitize_object(&self, map: &mut Map<String, Value>) -> usize {
        let before = map.len();
        map.retain(|key, _| !self.ad_keys.iter().any(|ad| ad == key));
        let mut removed = before - map.len();

        for path in self.wrapper_paths {
            let segments: Vec<&str> = path.split('.').collect();
            removed += usize::from(remove_path(map, &segments));
        }
        removed += usize::from(remove_path(map, PLAYER_RESPONSE_STREAMING_PATH));

        for value in map.values_mut() {
            removed += self.sanitize_in_place(value);
        }
        removed
    }

    /// Sanitize a serialized body.
    ///
    /// Returns the input untouched when it is valid JSON but holds no ad keys
    /// or is not a container, and an error when it does not parse. Callers
    /// treat the error as "deliver the original".
    pub fn sanitize_text<'t>(&self, text: &'t str) -> Result<Cow<'t, str>, FilterError> {
        if text.trim().is_empty() {
            return Ok(Cow::Borrowed(text));
        }
        let mut tree: Value = serde_json::from_str(text)?;
        if !tree.is_object() && !tree.is_array() {
            return Ok(Cow::Borrowed(text));
        }
        let removed = self.sanitize_in_place(&mut tree);
        if removed == 0 {
            return Ok(Cow::Borrowed(text));
        }
        log::debug!("sanitized response body: {} ad entries removed", removed);
        Ok(Cow::Owned(serde_json::to_string(&tree)?))
    }

    /// Ad keys present and non-empty at the top of an object.
    pub fn ad_bearing_keys(&self, tree: &Value) -> Vec<&'a str> {
        let Some(map) = tree.as_object() else {
            return Vec::new();
        };
        self.ad_keys
            .iter()
            .filter(|key| map.get(key.as_str()).is_some_and(is_truthy))
            .map(String::as_str)
            .collect()
    }
}

fn remove_path(map: &mut Map<String, Value>, segments: &[&str]) -> bool {
    match segments {
        [] => false,
        [last] => {
            // retain keeps the remaining keys in their original order
            let before = map.len();
            map.retain(|key, _| key != last);
            map.len() != before
        }
        [head, rest @ ..] => match map.get_mut(*head) {
            Some(Value::Object(inner)) => remove_path(inner, rest),
            _ => false,
        },
    }
}

/// JavaScript truthiness for a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// =============================================================================
// Player Skip Triggers
// =============================================================================

/// Layout ids of the exit-skip triggers declared by a player response's ad slots.
pub fn skip_trigger_layout_ids(player_response: &Value) -> Vec<String> {
    let Some(slots) = player_response.get("adSlots").and_then(Value::as_array) else {
        return Vec::new();
    };

    slots
        .iter()
        .filter_map(|slot| {
            slot.pointer(
                "/adSlotRenderer/fulfillmentContent/fulfilledLayout\
                 /playerBytesAdLayoutRenderer/layoutExitSkipTriggers",
            )
            .and_then(Value::as_array)
        })
        .flatten()
        .filter_map(|trigger| {
            trigger
                .pointer("/skipRequestedTrigger/triggeringLayoutId")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

// =============================================================================
// Outgoing Serialization
// =============================================================================

const CLIENT_SCREEN_WATCH: &str = r#""clientScreen":"WATCH""#;
const CLIENT_SCREEN_ADUNIT: &str = r#""clientScreen":"ADUNIT""#;
const SHARE_MARKER: &str = r#"isWebNativeShareAvailable":true}}"#;
const SHARE_MARKER_WITH_SCREEN: &str =
    r#"isWebNativeShareAvailable":true},"clientScreen":"ADUNIT"}"#;

/// Rewrite the client screen of an outgoing serialized payload to the ad-unit
/// screen. Narrow on purpose: only the two literal shapes below are touched.
pub fn rewrite_client_screen(serialized: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(serialized);
    if out.contains(CLIENT_SCREEN_WATCH) {
        out = Cow::Owned(out.replace(CLIENT_SCREEN_WATCH, CLIENT_SCREEN_ADUNIT));
    }
    if out.contains(SHARE_MARKER) {
        out = Cow::Owned(out.replacen(SHARE_MARKER, SHARE_MARKER_WITH_SCREEN, 1));
    }
    out
}
