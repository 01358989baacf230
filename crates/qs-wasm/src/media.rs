//! Host shell integration
//!
//! The media command entry point, media-session action handlers, the
//! now-playing feed pushed over the host bridge, and the user-activity
//! tracking behind the idle-pause blocker.

use js_sys::{Function, Reflect};
use qs_core::media::{
    execute_named, extract_now_playing, extract_playback_state, PlaybackState, MEDIA_SESSION_ACTIONS,
};
use qs_core::patterns::POPUP_CONTAINER_SELECTOR;
use qs_core::schedule::Timers;
use qs_core::DocumentHost;
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::CustomEvent;

use crate::page::{to_js, WebTimers};
use crate::patch::js_error_string;
use crate::{now_ms, runtime, Runtime};

/// Global bridge object injected by the host webview.
const BRIDGE_GLOBAL: &str = "flutter_inappwebview";
const METADATA_HANDLER: &str = "metadataUpdate";
const PLAYBACK_STATE_HANDLER: &str = "playbackStateUpdate";

pub fn install(rt: &Runtime) {
    install_command_global(rt);
    install_session_handlers(rt);
    install_activity_tracking(rt);
    start_now_playing(rt);
}

/// Run a named media command. Issuing a command counts as user activity.
pub fn execute(command: &str) -> bool {
    let Some(rt) = runtime() else {
        return false;
    };
    rt.record_activity();
    execute_named(command, &rt.page)
}

fn install_command_global(rt: &Runtime) {
    let entry = Closure::<dyn Fn(JsValue) -> bool>::new(|command: JsValue| {
        command.as_string().is_some_and(|name| execute(&name))
    })
    .into_js_value();
    if let Err(e) = Reflect::set(rt.page.window(), &JsValue::from_str("executeMediaCommand"), &entry) {
        log::warn!("executeMediaCommand not exposed: {}", js_error_string(&e));
    }
}

fn install_session_handlers(rt: &Runtime) {
    let navigator: JsValue = rt.page.window().navigator().into();
    let Some(session) = Reflect::get(&navigator, &JsValue::from_str("mediaSession"))
        .ok()
        .filter(|v| v.is_object())
    else {
        return;
    };
    let Some(set_handler) = Reflect::get(&session, &JsValue::from_str("setActionHandler"))
        .ok()
        .and_then(|f| f.dyn_into::<Function>().ok())
    else {
        return;
    };

    for (action, command) in MEDIA_SESSION_ACTIONS {
        let command = *command;
        let handler = Closure::<dyn Fn()>::new(move || {
            if let Some(rt) = runtime() {
                rt.record_activity();
                qs_core::media::execute(command, &rt.page);
            }
        })
        .into_js_value();
        // Unsupported actions throw.
        if let Err(e) = set_handler.call2(&session, &JsValue::from_str(action), &handler) {
            log::debug!("media session action {}: {}", action, js_error_string(&e));
        }
    }
}

// =============================================================================
// Activity
// =============================================================================

fn install_activity_tracking(rt: &Runtime) {
    let document = rt.page.document();
    let record = Closure::<dyn Fn(JsValue)>::new(|_| {
        if let Some(rt) = runtime() {
            rt.record_activity();
        }
    })
    .into_js_value();
    for event in ["mousedown", "keydown"] {
        if let Err(e) = document.add_event_listener_with_callback(event, record.unchecked_ref()) {
            log::debug!("{} listener: {}", event, js_error_string(&e));
        }
    }

    let on_popup = Closure::<dyn Fn(JsValue)>::new(|event: JsValue| {
        let Some(rt) = runtime() else {
            return;
        };
        let node_name = event
            .dyn_ref::<CustomEvent>()
            .map(|e| e.detail())
            .and_then(|detail| Reflect::get(&detail, &JsValue::from_str("nodeName")).ok())
            .and_then(|name| name.as_string())
            .unwrap_or_default();
        let dismiss = rt
            .activity
            .get()
            .should_dismiss_popup(&node_name, now_ms(), rt.config.activity_window_ms);
        if !dismiss {
            return;
        }
        match rt.page.query_first(POPUP_CONTAINER_SELECTOR) {
            Ok(Some(container)) => {
                log::debug!("dismissing idle prompt");
                rt.page.click(&container);
            }
            Ok(None) => {}
            Err(e) => log::debug!("{}", e),
        }
    })
    .into_js_value();
    if let Err(e) = document.add_event_listener_with_callback("yt-popup-opened", on_popup.unchecked_ref()) {
        log::debug!("yt-popup-opened listener: {}", js_error_string(&e));
    }
}

// =============================================================================
// Now Playing
// =============================================================================

#[derive(Serialize)]
struct StatePayload {
    state: PlaybackState,
}

fn start_now_playing(rt: &Runtime) {
    poll_now_playing(rt);
    let timers = WebTimers::new(rt.page.window().clone(), || {
        if let Some(rt) = runtime() {
            poll_now_playing(&rt);
        }
    });
    if let Err(e) = timers.start_interval(rt.config.idle_check_interval_ms) {
        log::warn!("now-playing feed disabled: {}", e);
    }
}

fn poll_now_playing(rt: &Runtime) {
    let metadata = extract_now_playing(&rt.page);
    let state = extract_playback_state(&rt.page);
    let Some(update) = rt.with_coordinator(|c| c.session_mut().now_playing.observe(metadata, state)) else {
        return;
    };
    if let Some(metadata) = &update.metadata {
        call_bridge(rt, METADATA_HANDLER, &to_js(metadata));
    }
    if let Some(state) = update.state {
        call_bridge(rt, PLAYBACK_STATE_HANDLER, &to_js(&StatePayload { state }));
    }
}

fn call_bridge(rt: &Runtime, handler: &str, payload: &JsValue) {
    let Some(bridge) = Reflect::get(rt.page.window(), &JsValue::from_str(BRIDGE_GLOBAL))
        .ok()
        .filter(|v| v.is_object())
    else {
        return;
    };
    let call = Reflect::get(&bridge, &JsValue::from_str("callHandler"))
        .ok()
        .and_then(|f| f.dyn_into::<Function>().ok());
    if let Some(call) = call {
        if let Err(e) = call.call2(&bridge, &JsValue::from_str(handler), payload) {
            log::debug!("bridge {}: {}", handler, js_error_string(&e));
        }
    }
}
