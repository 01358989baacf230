//! Error taxonomy
//!
//! None of these ever reach the page. Each is caught at the smallest scope
//! and turned into the fail-open path by the caller.

/// Error type for engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// Malformed response body.
    #[error("Failed to parse response body: {0}")]
    Parse(String),
    /// A selector is not supported by the host's query engine.
    #[error("Selector '{selector}' failed: {reason}")]
    Selector { selector: String, reason: String },
    /// The host lacks an observer API we need.
    #[error("Failed to attach {kind} observer: {reason}")]
    ObserverAttach { kind: &'static str, reason: String },
    /// A global property is non-configurable and cannot be redefined.
    #[error("Failed to define property '{path}': {reason}")]
    PropertyDefine { path: String, reason: String },
    /// The real transfer failed before a response was available.
    #[error("Transport error: {0}")]
    Transport(String),
    /// An externally supplied rule table is invalid.
    #[error("Invalid rule table: {0}")]
    Rules(String),
}

impl FilterError {
    pub fn selector(selector: &str, reason: impl Into<String>) -> Self {
        Self::Selector {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }

    pub fn property(path: &str, reason: impl Into<String>) -> Self {
        Self::PropertyDefine {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
