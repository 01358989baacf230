//! Navigation hooks
//!
//! History API calls reset after a short settle delay; navigation events
//! reset immediately.

use js_sys::{Array, Function, Reflect};
use qs_core::navigation::WINDOW_EVENTS;
use qs_core::NavigationEvent;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::observe::watch_media;
use crate::page::defer;
use crate::patch::{call_original, install_apply_trap, js_error_string};
use crate::{runtime, Runtime};

pub fn install(rt: &Runtime) {
    let window = rt.page.window();

    match window.history() {
        Ok(history) => {
            for (method, event) in [
                ("pushState", NavigationEvent::PushState),
                ("replaceState", NavigationEvent::ReplaceState),
            ] {
                let trap = Box::new(move |target: Function, this: JsValue, args: Array| {
                    let result = call_original(&target, &this, &args)?;
                    on_navigation(event);
                    Ok(result)
                });
                if let Err(e) = install_apply_trap(&history, method, trap) {
                    log::warn!("history.{} left unwrapped: {}", method, e);
                }
            }
        }
        Err(e) => log::warn!("no history object: {}", js_error_string(&e)),
    }

    // The Navigation API is not available everywhere.
    if let Ok(navigation) = Reflect::get(window, &JsValue::from_str("navigation")) {
        if navigation.is_object() {
            let add = Reflect::get(&navigation, &JsValue::from_str("addEventListener"))
                .ok()
                .and_then(|f| f.dyn_into::<Function>().ok());
            if let Some(add) = add {
                let _ = add.call2(&navigation, &JsValue::from_str("navigate"), &listener(NavigationEvent::Navigate));
            }
        }
    }

    for (name, event) in WINDOW_EVENTS {
        if let Err(e) = window.add_event_listener_with_callback(name, listener(*event).unchecked_ref()) {
            log::debug!("{} listener: {}", name, js_error_string(&e));
        }
    }

    let document = rt.page.document();
    if document.ready_state() == "loading" {
        let ready = listener(NavigationEvent::DocumentReady);
        if let Err(e) = document.add_event_listener_with_callback("DOMContentLoaded", ready.unchecked_ref()) {
            log::debug!("DOMContentLoaded listener: {}", js_error_string(&e));
        }
    } else {
        on_navigation(NavigationEvent::DocumentReady);
    }
}

fn listener(event: NavigationEvent) -> JsValue {
    Closure::<dyn FnMut(JsValue)>::new(move |_| on_navigation(event)).into_js_value()
}

fn on_navigation(event: NavigationEvent) {
    let Some(rt) = runtime() else {
        return;
    };
    match event.settle_delay_ms(&rt.config) {
        Some(delay) => defer(rt.page.window(), delay, move || reset(event)),
        None => reset(event),
    }
}

fn reset(event: NavigationEvent) {
    let Some(rt) = runtime() else {
        return;
    };
    let Some(reset) = rt.with_coordinator(|c| c.reset(&rt.page)) else {
        return;
    };
    log::debug!("reset after {:?}: {:?}", event, reset.sweep);
    for element in &reset.media_to_watch {
        watch_media(element);
    }
}
