//! The live document behind the engine's host traits.

use js_sys::{Array, Function, Object, Reflect};
use qs_core::dom::{DocumentHost, MediaHandle, PlayerProbe};
use qs_core::media::{MediaSessionSource, SessionMetadata};
use qs_core::patterns::{PLAYER_AD_MODULE_CLASS, PLAYER_CONTAINER_ID, PLAYER_VIDEO_CLASS};
use qs_core::schedule::Timers;
use qs_core::{FilterError, PageGlobals};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, HtmlMediaElement, Window};

use crate::patch::{define_undefined_accessor, define_value, js_error_string};

// =============================================================================
// Media
// =============================================================================

#[derive(Debug, Clone)]
pub struct WebMedia(pub HtmlMediaElement);

impl MediaHandle for WebMedia {
    fn src(&self) -> String {
        self.0.src()
    }

    fn duration(&self) -> f64 {
        self.0.duration()
    }

    fn current_time(&self) -> f64 {
        self.0.current_time()
    }

    fn set_current_time(&self, secs: f64) {
        self.0.set_current_time(secs);
    }

    fn playback_rate(&self) -> f64 {
        self.0.playback_rate()
    }

    fn set_playback_rate(&self, rate: f64) {
        self.0.set_playback_rate(rate);
    }

    fn is_paused(&self) -> bool {
        self.0.paused()
    }

    fn ready_state(&self) -> u16 {
        self.0.ready_state()
    }

    fn pause(&self) {
        if let Err(e) = self.0.pause() {
            log::debug!("pause failed: {}", js_error_string(&e));
        }
    }
}

// =============================================================================
// Page
// =============================================================================

pub struct WebPage {
    window: Window,
    document: Document,
}

impl WebPage {
    pub fn new() -> Option<Self> {
        let window = web_sys::window()?;
        let document = window.document()?;
        Some(Self { window, document })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The player API object: `getPlayer()` when exposed, else the element.
    fn player_api(&self) -> Option<JsValue> {
        let element: JsValue = self.document.get_element_by_id(PLAYER_CONTAINER_ID)?.into();
        let inner = call_method(&element, "getPlayer", &Array::new()).filter(|v| v.is_truthy());
        Some(inner.unwrap_or(element))
    }

    /// Resolve a dotted path from the global object, optionally creating
    /// missing intermediate objects.
    fn resolve(&self, path: &str, create: bool) -> Option<(JsValue, String)> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?.to_string();
        let mut current: JsValue = self.window.clone().into();
        for segment in segments {
            let key = JsValue::from_str(segment);
            let next = Reflect::get(&current, &key).ok().filter(|v| v.is_object());
            current = match next {
                Some(next) => next,
                None if create => {
                    let fresh: JsValue = Object::new().into();
                    if define_value(&current, segment, &fresh, true, true).is_err() {
                        let _ = Reflect::set(&current, &key, &fresh);
                    }
                    fresh
                }
                None => return None,
            };
        }
        Some((current, last))
    }
}

fn call_method(target: &JsValue, name: &str, args: &Array) -> Option<JsValue> {
    let method = Reflect::get(target, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()?;
    match Reflect::apply(&method, target, args) {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("{}() threw: {}", name, js_error_string(&e));
            None
        }
    }
}

/// Plain JSON conversion; maps become objects.
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> JsValue {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .unwrap_or(JsValue::UNDEFINED)
}

impl DocumentHost for WebPage {
    type Element = Element;
    type Media = WebMedia;

    fn query_all(&self, selector: &str) -> Result<Vec<Element>, FilterError> {
        let nodes = self
            .document
            .query_selector_all(selector)
            .map_err(|e| FilterError::selector(selector, js_error_string(&e)))?;
        Ok((0..nodes.length())
            .filter_map(|i| nodes.get(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect())
    }

    fn query_first(&self, selector: &str) -> Result<Option<Element>, FilterError> {
        self.document
            .query_selector(selector)
            .map_err(|e| FilterError::selector(selector, js_error_string(&e)))
    }

    fn query_within(&self, root: &Element, selector: &str) -> Result<Option<Element>, FilterError> {
        root.query_selector(selector)
            .map_err(|e| FilterError::selector(selector, js_error_string(&e)))
    }

    fn upsert_style(&self, id: &str, css: &str) -> Result<bool, FilterError> {
        if let Some(existing) = self.document.get_element_by_id(id) {
            if existing.text_content().as_deref() != Some(css) {
                existing.set_text_content(Some(css));
            }
            return Ok(false);
        }
        let attach_error = |e: JsValue| FilterError::ObserverAttach {
            kind: "style",
            reason: js_error_string(&e),
        };
        let style = self.document.create_element("style").map_err(attach_error)?;
        style.set_id(id);
        style.set_text_content(Some(css));
        let parent: Element = match self.document.head() {
            Some(head) => head.into(),
            None => self.document.document_element().ok_or_else(|| FilterError::ObserverAttach {
                kind: "style",
                reason: "document has no root element".to_string(),
            })?,
        };
        parent.append_child(&style).map_err(attach_error)?;
        Ok(true)
    }

    fn detach(&self, element: &Element) {
        element.remove();
    }

    fn is_visible(&self, element: &Element) -> bool {
        if let Some(visible) = call_method(element, "checkVisibility", &Array::new()) {
            return visible.is_truthy();
        }
        element
            .dyn_ref::<HtmlElement>()
            .map_or(true, |html| html.offset_parent().is_some())
    }

    fn click(&self, element: &Element) {
        if let Some(html) = element.dyn_ref::<HtmlElement>() {
            html.click();
        }
    }

    fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        element.get_attribute(name)
    }

    fn set_attribute(&self, element: &Element, name: &str, value: &str) {
        if let Err(e) = element.set_attribute(name, value) {
            log::debug!("set_attribute {}: {}", name, js_error_string(&e));
        }
    }

    fn text_content(&self, element: &Element) -> Option<String> {
        element.text_content()
    }

    fn as_media(&self, element: &Element) -> Option<WebMedia> {
        element.dyn_ref::<HtmlMediaElement>().cloned().map(WebMedia)
    }

    fn player_probe(&self) -> Option<PlayerProbe<WebMedia>> {
        let player = self.document.get_element_by_id(PLAYER_CONTAINER_ID)?;
        let media = player
            .get_elements_by_class_name(PLAYER_VIDEO_CLASS)
            .item(0)
            .and_then(|element| element.dyn_into::<HtmlMediaElement>().ok())
            .map(WebMedia);
        let ad_module_children = player
            .get_elements_by_class_name(PLAYER_AD_MODULE_CLASS)
            .item(0)
            .map_or(0, |module| module.child_element_count());
        Some(PlayerProbe {
            media,
            ad_module_children,
        })
    }
}

impl PageGlobals for WebPage {
    fn define_constant(&self, path: &str, value: &Value) -> Result<(), FilterError> {
        let (owner, key) = self
            .resolve(path, true)
            .ok_or_else(|| FilterError::property(path, "unresolvable path"))?;
        define_value(&owner, &key, &to_js(value), false, false)
    }

    fn pin_undefined(&self, path: &str) -> Result<(), FilterError> {
        let (owner, key) = self
            .resolve(path, true)
            .ok_or_else(|| FilterError::property(path, "unresolvable path"))?;
        define_undefined_accessor(&owner, &key)
    }

    fn assign(&self, path: &str, value: Option<&Value>) {
        let Some((owner, key)) = self.resolve(path, true) else {
            return;
        };
        let value = value.map_or(JsValue::UNDEFINED, to_js);
        if let Err(e) = Reflect::set(&owner, &JsValue::from_str(&key), &value) {
            log::debug!("assign {}: {}", path, js_error_string(&e));
        }
    }

    fn truthy_keys(&self, path: &str, candidates: &[String]) -> Vec<String> {
        let Some((owner, key)) = self.resolve(path, false) else {
            return Vec::new();
        };
        let Some(target) = Reflect::get(&owner, &JsValue::from_str(&key))
            .ok()
            .filter(|v| v.is_object())
        else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|candidate| {
                Reflect::get(&target, &JsValue::from_str(candidate))
                    .map(|v| v.is_truthy())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn clear_key(&self, path: &str, key: &str) {
        let Some((owner, last)) = self.resolve(path, false) else {
            return;
        };
        if let Ok(target) = Reflect::get(&owner, &JsValue::from_str(&last)) {
            if target.is_object() {
                let _ = Reflect::set(&target, &JsValue::from_str(key), &JsValue::UNDEFINED);
            }
        }
    }

    fn player_response(&self) -> Option<Value> {
        let response = call_method(&self.player_api()?, "getPlayerResponse", &Array::new())?;
        let slots = Reflect::get(&response, &JsValue::from_str("adSlots"))
            .ok()
            .filter(|v| v.is_object())?;
        let slots: Value = serde_wasm_bindgen::from_value(slots)
            .map_err(|e| log::debug!("adSlots not convertible: {}", e))
            .ok()?;
        Some(serde_json::json!({ "adSlots": slots }))
    }

    fn ad_ux_clicked(&self, kind: &str, layout_id: &str) -> bool {
        let Some(api) = self.player_api() else {
            return false;
        };
        let args = Array::of2(&JsValue::from_str(kind), &JsValue::from_str(layout_id));
        call_method(&api, "onAdUxClicked", &args).is_some()
    }
}

impl MediaSessionSource for WebPage {
    fn session_metadata(&self) -> Option<SessionMetadata> {
        let navigator: JsValue = self.window.navigator().into();
        let session = Reflect::get(&navigator, &JsValue::from_str("mediaSession"))
            .ok()
            .filter(|v| v.is_object())?;
        let metadata = Reflect::get(&session, &JsValue::from_str("metadata"))
            .ok()
            .filter(|v| v.is_object())?;
        let text = |target: &JsValue, name: &str| {
            Reflect::get(target, &JsValue::from_str(name))
                .ok()
                .and_then(|v| v.as_string())
        };
        let artwork_url = Reflect::get(&metadata, &JsValue::from_str("artwork"))
            .ok()
            .and_then(|artwork| Reflect::get_u32(&artwork, 0).ok())
            .filter(|first| first.is_object())
            .and_then(|first| text(&first, "src"));
        Some(SessionMetadata {
            title: text(&metadata, "title"),
            artist: text(&metadata, "artist"),
            album: text(&metadata, "album"),
            artwork_url,
        })
    }
}

// =============================================================================
// Timers
// =============================================================================

/// `setInterval` with a fixed callback.
pub struct WebTimers {
    window: Window,
    tick: Function,
}

impl WebTimers {
    pub fn new(window: Window, tick: impl FnMut() + 'static) -> Self {
        let tick = Closure::<dyn FnMut()>::new(tick).into_js_value().unchecked_into();
        Self { window, tick }
    }
}

impl Timers for WebTimers {
    type Handle = i32;

    fn start_interval(&self, period_ms: u32) -> Result<i32, FilterError> {
        self.window
            .set_interval_with_callback_and_timeout_and_arguments_0(&self.tick, period_ms as i32)
            .map_err(|e| FilterError::ObserverAttach {
                kind: "interval",
                reason: js_error_string(&e),
            })
    }

    fn cancel(&self, handle: i32) {
        self.window.clear_interval_with_handle(handle);
    }
}

/// Run `callback` once after `delay_ms`.
pub fn defer(window: &Window, delay_ms: u32, callback: impl FnOnce() + 'static) {
    let callback = Closure::once_into_js(callback);
    if let Err(e) = window.set_timeout_with_callback_and_timeout_and_arguments_0(
        callback.unchecked_ref(),
        delay_ms as i32,
    ) {
        log::warn!("deferred call dropped: {}", js_error_string(&e));
    }
}
