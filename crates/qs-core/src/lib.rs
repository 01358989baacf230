//! QuietStream Core Library
//!
//! This crate provides the host-independent filtering engine for the QuietStream
//! media-player content filter. It never touches a real browser: everything the
//! engine needs from the page is expressed through the [`dom::DocumentHost`],
//! [`dom::MediaHandle`] and [`navigation::PageGlobals`] traits, and everything it
//! needs from the network through [`intercept::Transport`].
//!
//! # Architecture
//!
//! The engine is evaluated leaf-first:
//!
//! 1. The pattern registry holds the hand-curated rule tables (ad keys, block
//!    substrings, prune regexes, CSS selectors).
//! 2. The matcher and sanitizer classify URLs and strip ad keys from parsed
//!    response trees.
//! 3. The interception gate decides, per outbound request, whether to answer
//!    with a synthetic empty success, rewrite the body, or stay out of the way.
//! 4. The reconciler hides and removes ad nodes and fast-forwards ad playback.
//! 5. The navigation coordinator owns the session state and re-arms everything
//!    on single-page-app transitions.
//!
//! Every failure is fail-open: on error the original page behavior wins.
//!
//! # Modules
//!
//! - `config`: tunable intervals and identifiers
//! - `error`: error taxonomy
//! - `patterns`: built-in rule tables and the serializable rule-table format
//! - `matcher`: compiled URL rules and classification
//! - `sanitizer`: response tree pruning
//! - `intercept`: promise-style and event-style interception gate
//! - `dom`: DOM reconciliation over an abstract document
//! - `observer`: mutation batch decisions and media observer bookkeeping
//! - `schedule`: check-loop timer switching and timer shortening
//! - `navigation`: navigation events, session state and the coordinator
//! - `media`: media commands, now-playing tracking and user activity
//! - `url`: allocation-free URL helpers
//! - `types`: shared type definitions

pub mod config;
pub mod dom;
pub mod error;
pub mod intercept;
pub mod matcher;
pub mod media;
pub mod navigation;
pub mod observer;
pub mod patterns;
pub mod sanitizer;
pub mod schedule;
pub mod types;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::EngineConfig;
pub use dom::{DocumentHost, MediaHandle, Reconciler};
pub use error::FilterError;
pub use intercept::{HttpRequest, HttpResponse, Interceptor, Transport};
pub use matcher::{Matcher, UrlRule};
pub use navigation::{Coordinator, NavigationEvent, PageGlobals, SessionState};
pub use patterns::{PatternRegistry, RuleTable};
pub use sanitizer::Sanitizer;
pub use types::{MatchResult, PlayerAdState, SelectorAction, UrlClass};
