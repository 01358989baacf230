//! Network Interception Gate
//!
//! Every outbound request is classified before its result reaches the caller.
//! Two delivery models are covered:
//!
//! - promise style: one request, one resolved response ([`Interceptor::fetch`])
//! - event style: a request object whose ready-state callback fires several
//!   times ([`Interceptor::plan_xhr`] and [`compose_ready_state_handler`])
//!
//! Block answers with a synthetic `{}` / 200 without touching the network.
//! Prune lets the transfer run and swaps the body for a sanitized copy before
//! the caller can read it. Any failure on the prune path delivers the original.

use std::borrow::Cow;
use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::FilterError;
use crate::patterns::PatternRegistry;
use crate::sanitizer::Sanitizer;
use crate::types::UrlClass;

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Body of every synthetic response.
pub const SYNTHETIC_BODY: &str = "{}";

impl HttpResponse {
    /// The stand-in delivered for blocked requests.
    pub fn synthetic_empty() -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: SYNTHETIC_BODY.as_bytes().to_vec(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The real network primitive being wrapped.
#[async_trait(?Send)]
pub trait Transport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FilterError>;
}

// =============================================================================
// Interceptor
// =============================================================================

/// Counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptStats {
    pub blocked: u32,
    pub pruned: u32,
    pub prune_failures: u32,
    pub passed: u32,
}

/// The classification gate shared by every wrapped primitive.
#[derive(Debug)]
pub struct Interceptor {
    registry: Rc<PatternRegistry>,
    stats: Cell<InterceptStats>,
}

impl Interceptor {
    pub fn new(registry: Rc<PatternRegistry>) -> Self {
        Self {
            registry,
            stats: Cell::new(InterceptStats::default()),
        }
    }

    pub fn stats(&self) -> InterceptStats {
        self.stats.get()
    }

    fn bump(&self, f: impl FnOnce(&mut InterceptStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Synchronous classification gate.
    pub fn classify(&self, url: &str) -> UrlClass {
        let class = self.registry.matcher().classify(url);
        match class {
            UrlClass::Block => self.bump(|s| s.blocked += 1),
            UrlClass::Pass => self.bump(|s| s.passed += 1),
            UrlClass::Prune => {}
        }
        class
    }

    /// Sanitize a body; `None` means "deliver the original as is".
    pub fn prune_text<'t>(&self, text: &'t str) -> Option<Cow<'t, str>> {
        match Sanitizer::new(&self.registry).sanitize_text(text) {
            Ok(Cow::Borrowed(_)) => None,
            Ok(owned) => {
                self.bump(|s| s.pruned += 1);
                Some(owned)
            }
            Err(e) => {
                self.bump(|s| s.prune_failures += 1);
                log::debug!("prune skipped: {}", e);
                None
            }
        }
    }

    /// Rewrite a successful response's body, keeping status and headers.
    pub fn prune_response(&self, mut response: HttpResponse) -> HttpResponse {
        if !response.is_success() {
            return response;
        }
        let text = match std::str::from_utf8(&response.body) {
            Ok(text) => text,
            Err(e) => {
                self.bump(|s| s.prune_failures += 1);
                log::debug!("prune skipped, body is not utf-8: {}", e);
                return response;
            }
        };
        if let Some(clean) = self.prune_text(text) {
            response.body = clean.into_owned().into_bytes();
        }
        response
    }

    /// Promise-style interception around a transport.
    pub async fn fetch<T>(&self, transport: &T, request: HttpRequest) -> Result<HttpResponse, FilterError>
    where
        T: Transport + ?Sized,
    {
        match self.classify(&request.url) {
            UrlClass::Block => Ok(HttpResponse::synthetic_empty()),
            UrlClass::Pass => transport.send(request).await,
            UrlClass::Prune => {
                let response = transport.send(request).await?;
                Ok(self.prune_response(response))
            }
        }
    }

    /// Decide how an event-style request is handled at send time.
    /// Whether a URL's body will be sanitized. Leaves the stats untouched.
    pub fn prunes(&self, url: &str) -> bool {
        self.registry.matcher().match_url(url).class == UrlClass::Prune
    }

    pub fn plan_xhr(&self, url: Option<&str>) -> XhrPlan {
        match url.map(|u| self.classify(u)) {
            Some(UrlClass::Block) => XhrPlan::Synthetic(HttpResponse::synthetic_empty()),
            Some(UrlClass::Prune) => XhrPlan::PruneOnComplete,
            Some(UrlClass::Pass) | None => XhrPlan::Untouched,
        }
    }
}

// =============================================================================
// Event-style Requests
// =============================================================================

/// Events dispatched, in order, on a blocked event-style request.
pub const SYNTHETIC_XHR_EVENTS: &[&str] = &["readystatechange", "load", "loadend"];

/// What to do with an event-style request at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrPlan {
    /// Do not send; expose this response and dispatch [`SYNTHETIC_XHR_EVENTS`].
    Synthetic(HttpResponse),
    /// Send, and rewrite the body on the terminal transition.
    PruneOnComplete,
    /// Send unmodified.
    Untouched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl From<u16> for ReadyState {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unsent,
            1 => Self::Opened,
            2 => Self::HeadersReceived,
            3 => Self::Loading,
            _ => Self::Done,
        }
    }
}

/// The caller-visible view of an event-style request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhrState {
    pub ready_state: ReadyState,
    pub status: u16,
    pub response_text: String,
    /// Set once the body has been replaced by a sanitized copy.
    pub rewritten: bool,
}

impl XhrState {
    pub fn new(ready_state: ReadyState, status: u16, response_text: impl Into<String>) -> Self {
        Self {
            ready_state,
            status,
            response_text: response_text.into(),
            rewritten: false,
        }
    }
}

pub type ReadyStateHandler = Box<dyn FnMut(&mut XhrState)>;

/// Build the ready-state handler installed on a prune-classified request.
///
/// The sanitize step runs on the first `Done` transition with a 2xx status
/// and never again; the displaced handler, if any, runs after it on every
/// transition and therefore only ever sees the sanitized body.
pub fn compose_ready_state_handler(
    interceptor: Rc<Interceptor>,
    mut previous: Option<ReadyStateHandler>,
) -> ReadyStateHandler {
    let mut completed = false;
    Box::new(move |state: &mut XhrState| {
        if !completed && state.ready_state == ReadyState::Done {
            completed = true;
            if (200..300).contains(&state.status) {
                if let Some(clean) = interceptor.prune_text(&state.response_text) {
                    state.response_text = clean.into_owned();
                    state.rewritten = true;
                }
            }
        }
        if let Some(prev) = previous.as_mut() {
            prev(state);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeTransport {
        response: Result<HttpResponse, FilterError>,
        calls: Cell<u32>,
    }

    impl FakeTransport {
        fn ok(body: &str) -> Self {
            Self {
                response: Ok(HttpResponse {
                    status: 200,
                    status_text: "OK".to_string(),
                    headers: vec![("X-Upstream".to_string(), "1".to_string())],
                    body: body.as_bytes().to_vec(),
                }),
                calls: Cell::new(0),
            }
        }
    }

    #[async_trait(?Send)]
    impl Transport for FakeTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, FilterError> {
            self.calls.set(self.calls.get() + 1);
            self.response.clone()
        }
    }

    fn interceptor() -> Rc<Interceptor> {
        Rc::new(Interceptor::new(Rc::new(PatternRegistry::builtin())))
    }

    #[tokio::test]
    async fn test_block_returns_synthetic_without_transfer() {
        let transport = FakeTransport::ok(r#"{"ad":true}"#);
        let response = interceptor()
            .fetch(&transport, HttpRequest::get("https://www.youtube.com/pagead/foo"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{}");
        assert_eq!(transport.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_prune_sanitizes_body_and_keeps_headers() {
        let transport = FakeTransport::ok(r#"{"adPlacements":[1,2],"videoId":"abc"}"#);
        let response = interceptor()
            .fetch(&transport, HttpRequest::get("https://www.youtube.com/watch?v=abc"))
            .await
            .unwrap();
        assert_eq!(String::from_utf8(response.body.clone()).unwrap(), r#"{"videoId":"abc"}"#);
        assert_eq!(response.header("x-upstream"), Some("1"));
        assert_eq!(response.status_text, "OK");
    }

    #[tokio::test]
    async fn test_pass_is_byte_identical() {
        let body = "\u{89}PNG not json at all";
        let transport = FakeTransport::ok(body);
        let response = interceptor()
            .fetch(&transport, HttpRequest::get("https://www.gstatic.com/static/logo.png"))
            .await
            .unwrap();
        assert_eq!(response.body, body.as_bytes());
        assert_eq!(transport.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_prune_fails_open_on_malformed_body() {
        let transport = FakeTransport::ok("{\"adSlots\": [");
        let gate = interceptor();
        let response = gate
            .fetch(&transport, HttpRequest::get("https://www.youtube.com/youtubei/v1/next?x=1"))
            .await
            .unwrap();
        assert_eq!(response.body, b"{\"adSlots\": [");
        assert_eq!(gate.stats().prune_failures, 1);
    }

    #[tokio::test]
    async fn test_prune_propagates_transport_error_unchanged() {
        let transport = FakeTransport {
            response: Err(FilterError::Transport("reset".to_string())),
            calls: Cell::new(0),
        };
        let result = interceptor()
            .fetch(&transport, HttpRequest::get("https://www.youtube.com/watch?v=abc"))
            .await;
        assert_eq!(result, Err(FilterError::Transport("reset".to_string())));
    }

    #[test]
    fn test_prune_skips_error_status() {
        let response = HttpResponse {
            status: 500,
            status_text: "Server Error".to_string(),
            headers: Vec::new(),
            body: br#"{"adSlots":[]}"#.to_vec(),
        };
        assert_eq!(interceptor().prune_response(response.clone()), response);
    }

    #[test]
    fn test_plan_xhr() {
        let gate = interceptor();
        assert!(matches!(
            gate.plan_xhr(Some("https://googleads.g.doubleclick.net/x")),
            XhrPlan::Synthetic(ref r) if r.body == b"{}"
        ));
        assert_eq!(gate.plan_xhr(Some("/youtubei/v1/player?k=1")), XhrPlan::PruneOnComplete);
        assert_eq!(gate.plan_xhr(Some("https://example.com/a.css")), XhrPlan::Untouched);
        assert_eq!(gate.plan_xhr(None), XhrPlan::Untouched);
    }

    #[test]
    fn test_prunes_does_not_count() {
        let gate = interceptor();
        assert!(gate.prunes("/youtubei/v1/next?prettyPrint=false"));
        assert!(!gate.prunes("https://www.youtube.com/pagead/x"));
        assert!(!gate.prunes("https://example.com/a.css"));
        assert_eq!(gate.stats(), InterceptStats::default());
    }

    #[test]
    fn test_ready_state_handler_composes_and_fires_once() {
        let seen: Rc<RefCell<Vec<(ReadyState, String)>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_prev = Rc::clone(&seen);
        let previous: ReadyStateHandler = Box::new(move |state: &mut XhrState| {
            seen_prev
                .borrow_mut()
                .push((state.ready_state, state.response_text.clone()));
        });

        let mut handler = compose_ready_state_handler(interceptor(), Some(previous));

        let mut state = XhrState::new(ReadyState::Loading, 200, "");
        handler(&mut state);

        state.ready_state = ReadyState::Done;
        state.response_text = r#"{"playerAds":[1],"title":"t"}"#.to_string();
        handler(&mut state);
        assert!(state.rewritten);

        // A second terminal callback must not re-run the rewrite
        state.response_text = r#"{"playerAds":[2]}"#.to_string();
        state.rewritten = false;
        handler(&mut state);
        assert!(!state.rewritten);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, ReadyState::Loading);
        assert_eq!(seen[1].1, r#"{"title":"t"}"#);
    }

    #[test]
    fn test_ready_state_handler_without_previous() {
        let mut handler = compose_ready_state_handler(interceptor(), None);
        let mut state = XhrState::new(ReadyState::Done, 404, r#"{"adSlots":[]}"#);
        handler(&mut state);
        assert!(!state.rewritten);
        assert_eq!(state.response_text, r#"{"adSlots":[]}"#);
    }
}
