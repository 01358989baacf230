//! Observers and media watching
//!
//! One structural observer on the body, one attribute observer per media
//! element, play/pause listeners that switch the check loop, and a slow
//! rescan for media elements the app replaced wholesale.

use js_sys::{Array, Function, Reflect};
use qs_core::observer::{src_changed, AddedNode, MutationBatch, MutationRecord};
use qs_core::schedule::Timers;
use qs_core::FilterError;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, MutationObserver, MutationObserverInit, Node};

use crate::page::WebTimers;
use crate::patch::{call_original, define_value, install_apply_trap, js_error_string};
use crate::{runtime, Runtime};

/// Own property marking a media element whose `pause` is guarded.
const PAUSE_GUARD_PROPERTY: &str = "__quietstreamPauseGuard";

pub fn install(rt: &Runtime) {
    match rt.page.document().body() {
        Some(body) => attach_structural(&body),
        None => {
            let on_ready = Closure::once_into_js(|| {
                if let Some(rt) = runtime() {
                    if let Some(body) = rt.page.document().body() {
                        attach_structural(&body);
                    }
                }
            });
            let _ = rt
                .page
                .document()
                .add_event_listener_with_callback("DOMContentLoaded", on_ready.unchecked_ref());
        }
    }
    start_media_scan(rt);
}

fn attach_structural(body: &Node) {
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    let result = observe(body, &init, "structural", |records| {
        let Some(rt) = runtime() else {
            return;
        };
        let batch = to_batch(&records);
        rt.with_coordinator(|c| c.on_mutations(&rt.page, batch));
    });
    if let Err(e) = result {
        log::warn!("{}; relying on the check loop", e);
    }
}

fn observe(
    target: &Node,
    init: &MutationObserverInit,
    kind: &'static str,
    mut on_batch: impl FnMut(Array) + 'static,
) -> Result<(), FilterError> {
    let attach_error = |e: JsValue| FilterError::ObserverAttach {
        kind,
        reason: js_error_string(&e),
    };
    let callback = Closure::<dyn FnMut(Array, JsValue)>::new(move |records: Array, _| on_batch(records))
        .into_js_value();
    let observer = MutationObserver::new(callback.unchecked_ref()).map_err(attach_error)?;
    observer.observe_with_options(target, init).map_err(attach_error)
}

/// Source of an inserted embed: the resolved property, else the attribute.
fn embed_src(element: &Element) -> Option<String> {
    Reflect::get(element, &JsValue::from_str("src"))
        .ok()
        .and_then(|v| v.as_string())
        .filter(|s| !s.is_empty())
        .or_else(|| element.get_attribute("src"))
}

fn to_batch(records: &Array) -> MutationBatch<Element> {
    let records = records
        .iter()
        .map(|record| {
            let record: web_sys::MutationRecord = record.unchecked_into();
            let nodes = record.added_nodes();
            let added = (0..nodes.length())
                .filter_map(|i| nodes.get(i))
                .filter_map(|node| node.dyn_into::<Element>().ok())
                .map(|element| AddedNode {
                    tag: element.tag_name(),
                    src: embed_src(&element),
                    handle: element,
                })
                .collect();
            MutationRecord {
                added,
                attribute_name: record.attribute_name(),
            }
        })
        .collect();
    MutationBatch { records }
}

// =============================================================================
// Media Elements
// =============================================================================

fn start_media_scan(rt: &Runtime) {
    scan_and_watch(rt);
    let timers = WebTimers::new(rt.page.window().clone(), || {
        if let Some(rt) = runtime() {
            scan_and_watch(&rt);
        }
    });
    if let Err(e) = timers.start_interval(rt.config.media_scan_interval_ms) {
        log::warn!("media rescan disabled: {}", e);
    }
}

fn scan_and_watch(rt: &Runtime) {
    let fresh = rt.with_coordinator(|c| c.scan_media(&rt.page)).unwrap_or_default();
    for element in &fresh {
        watch_media(element);
    }
}

/// Attach the src observer, play/pause listeners and pause guard to a media
/// element that was just claimed for monitoring.
pub fn watch_media(element: &Element) {
    let result = observe(element, &media_observer_init(), "media", |records| {
        let Some(rt) = runtime() else {
            return;
        };
        if src_changed(&to_batch(&records)) {
            rt.recheck();
        }
    });
    if let Err(e) = result {
        log::debug!("{}", e);
    }

    listen(element, "play", || {
        if let Some(rt) = runtime() {
            rt.with_coordinator(|c| c.on_play(&rt.check_timers));
        }
    });
    listen(element, "pause", || {
        if let Some(rt) = runtime() {
            rt.with_coordinator(|c| c.on_pause(&rt.page, &rt.check_timers));
        }
    });

    guard_pause(element);
}

/// Only `src` changes reach the media observer.
fn media_observer_init() -> MutationObserverInit {
    let init = MutationObserverInit::new();
    init.set_attributes(true);
    init.set_attribute_filter(&Array::of1(&JsValue::from_str("src")));
    init
}

fn listen(target: &Element, event: &str, mut handler: impl FnMut() + 'static) {
    let callback = Closure::<dyn FnMut(JsValue)>::new(move |_| handler()).into_js_value();
    if let Err(e) = target.add_event_listener_with_callback(event, callback.unchecked_ref()) {
        log::debug!("{} listener: {}", event, js_error_string(&e));
    }
}

/// Honor `pause()` only shortly after user input, so the app cannot stop
/// playback on its own.
fn guard_pause(media: &Element) {
    if Reflect::has(media, &JsValue::from_str(PAUSE_GUARD_PROPERTY)).unwrap_or(false) {
        return;
    }
    let trap = Box::new(|target: Function, this: JsValue, args: Array| {
        let allowed = runtime().map_or(true, |rt| rt.pause_allowed());
        if allowed {
            call_original(&target, &this, &args)
        } else {
            log::debug!("pause without user activity ignored");
            Ok(JsValue::UNDEFINED)
        }
    });
    match install_apply_trap(media, "pause", trap) {
        Ok(()) => {
            let _ = define_value(media, PAUSE_GUARD_PROPERTY, &JsValue::TRUE, false, false);
        }
        Err(e) => log::debug!("pause guard: {}", e),
    }
}
