//! Network primitive wrappers
//!
//! `fetch`, `XMLHttpRequest`, `JSON.stringify` and `setTimeout` are each
//! replaced by a proxy that consults the interception gate and then
//! delegates to the original.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Promise, Reflect};
use qs_core::intercept::{
    compose_ready_state_handler, HttpResponse, ReadyState, ReadyStateHandler, XhrPlan, XhrState,
    SYNTHETIC_XHR_EVENTS,
};
use qs_core::sanitizer::rewrite_client_screen;
use qs_core::schedule::shorten_timer_delay;
use qs_core::{FilterError, Interceptor, UrlClass};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};
use web_sys::{Event, EventTarget, Headers, Response, ResponseInit, Window};

use crate::page::defer;
use crate::patch::{call_original, define_value, install_apply_trap, js_error_string};

/// Own property recording the URL passed to `open`.
const XHR_URL_PROPERTY: &str = "__quietstreamUrl";

/// Own property marking a request whose completion listener is registered.
const XHR_LISTENER_PROPERTY: &str = "__quietstreamListener";

/// Install every network wrapper. Each one fails independently.
pub fn install(window: &Window, interceptor: &Rc<Interceptor>) {
    let results = [
        ("fetch", install_fetch(window, interceptor)),
        ("XMLHttpRequest", install_xhr(window, interceptor)),
        ("JSON.stringify", install_stringify()),
        ("setTimeout", install_set_timeout(window)),
    ];
    for (name, result) in results {
        match result {
            Ok(()) => log::debug!("wrapped {}", name),
            Err(e) => log::warn!("{} left unwrapped: {}", name, e),
        }
    }
}

// =============================================================================
// fetch
// =============================================================================

/// URL of a fetch input: a string, a `Request`, or anything with `href`/`url`.
fn request_url(input: &JsValue) -> Option<String> {
    if let Some(url) = input.as_string() {
        return Some(url);
    }
    if let Some(request) = input.dyn_ref::<web_sys::Request>() {
        return Some(request.url());
    }
    ["href", "url"]
        .iter()
        .find_map(|key| Reflect::get(input, &JsValue::from_str(key)).ok()?.as_string())
}

fn synthetic_response(template: &HttpResponse) -> Result<Response, JsValue> {
    let headers = Headers::new()?;
    for (name, value) in &template.headers {
        headers.append(name, value)?;
    }
    let init = ResponseInit::new();
    init.set_status(template.status);
    init.set_status_text(&template.status_text);
    init.set_headers(&headers);
    let body = String::from_utf8_lossy(&template.body);
    Response::new_with_opt_str_and_init(Some(&*body), &init)
}

/// Replace a successful response by one with a sanitized body. Any failure
/// hands back the original.
async fn prune_fetch_response(interceptor: Rc<Interceptor>, response: Response) -> Response {
    if !response.ok() {
        return response;
    }
    let text = match response.clone().and_then(|copy| copy.text()) {
        Ok(promise) => JsFuture::from(promise).await,
        Err(e) => Err(e),
    };
    let Some(text) = text.ok().and_then(|t| t.as_string()) else {
        return response;
    };
    let Some(clean) = interceptor.prune_text(&text) else {
        return response;
    };

    let init = ResponseInit::new();
    init.set_status(response.status());
    init.set_status_text(&response.status_text());
    init.set_headers(&response.headers());
    match Response::new_with_opt_str_and_init(Some(&*clean), &init) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            log::debug!("rewritten response rejected: {}", js_error_string(&e));
            response
        }
    }
}

fn install_fetch(window: &Window, interceptor: &Rc<Interceptor>) -> Result<(), FilterError> {
    let interceptor = Rc::clone(interceptor);
    install_apply_trap(
        window,
        "fetch",
        Box::new(move |target: Function, this: JsValue, args: Array| {
            let class = request_url(&args.get(0))
                .map_or(UrlClass::Pass, |url| interceptor.classify(&url));
            match class {
                UrlClass::Pass => call_original(&target, &this, &args),
                UrlClass::Block => {
                    let response = synthetic_response(&HttpResponse::synthetic_empty())?;
                    Ok(Promise::resolve(&response).into())
                }
                UrlClass::Prune => {
                    let pending: Promise = call_original(&target, &this, &args)?.unchecked_into();
                    let interceptor = Rc::clone(&interceptor);
                    Ok(future_to_promise(async move {
                        let response: Response = JsFuture::from(pending).await?.unchecked_into();
                        Ok(prune_fetch_response(interceptor, response).await.into())
                    })
                    .into())
                }
            }
        }),
    )
}

// =============================================================================
// XMLHttpRequest
// =============================================================================

fn xhr_prototype(window: &Window) -> Result<JsValue, FilterError> {
    let constructor = Reflect::get(window, &JsValue::from_str("XMLHttpRequest"))
        .ok()
        .filter(|v| v.is_function())
        .ok_or_else(|| FilterError::property("XMLHttpRequest", "not available"))?;
    Reflect::get(&constructor, &JsValue::from_str("prototype"))
        .map_err(|e| FilterError::property("XMLHttpRequest.prototype", js_error_string(&e)))
}

fn install_xhr(window: &Window, interceptor: &Rc<Interceptor>) -> Result<(), FilterError> {
    let prototype = xhr_prototype(window)?;

    let gate = Rc::clone(interceptor);
    install_apply_trap(
        &prototype,
        "open",
        Box::new(move |target: Function, this: JsValue, args: Array| {
            let url = request_url(&args.get(1));
            let recorded = url.as_deref().map_or(JsValue::NULL, JsValue::from_str);
            let _ = Reflect::set(&this, &JsValue::from_str(XHR_URL_PROPERTY), &recorded);
            let opened = call_original(&target, &this, &args)?;
            if url.is_some_and(|u| gate.prunes(&u)) {
                listen_for_completion(&this, Rc::clone(&gate));
            }
            Ok(opened)
        }),
    )?;

    let interceptor = Rc::clone(interceptor);
    let window = window.clone();
    install_apply_trap(
        &prototype,
        "send",
        Box::new(move |target: Function, this: JsValue, args: Array| {
            let url = Reflect::get(&this, &JsValue::from_str(XHR_URL_PROPERTY))
                .ok()
                .and_then(|v| v.as_string());
            match interceptor.plan_xhr(url.as_deref()) {
                XhrPlan::Untouched => call_original(&target, &this, &args),
                XhrPlan::Synthetic(response) => {
                    complete_synthetically(&window, &this, &response);
                    Ok(JsValue::UNDEFINED)
                }
                XhrPlan::PruneOnComplete => {
                    hook_completion(&this, Rc::clone(&interceptor));
                    call_original(&target, &this, &args)
                }
            }
        }),
    )
}

/// Expose `text` as the request's body through own properties.
fn override_body(xhr: &JsValue, text: &str) {
    let text = JsValue::from_str(text);
    for key in ["responseText", "response"] {
        if let Err(e) = define_value(xhr, key, &text, true, true) {
            log::debug!("{}", e);
        }
    }
}

/// Answer a blocked request without sending it.
fn complete_synthetically(window: &Window, xhr: &JsValue, response: &HttpResponse) {
    let body = String::from_utf8_lossy(&response.body).into_owned();
    let fields = [
        ("readyState", JsValue::from(ReadyState::Done as u8)),
        ("status", JsValue::from(response.status)),
        ("statusText", JsValue::from_str(&response.status_text)),
    ];
    for (key, value) in &fields {
        if let Err(e) = define_value(xhr, key, value, false, true) {
            log::debug!("{}", e);
        }
    }
    override_body(xhr, &body);

    let target: EventTarget = xhr.clone().unchecked_into();
    defer(window, 0, move || {
        for name in SYNTHETIC_XHR_EVENTS {
            match Event::new(name) {
                Ok(event) => {
                    let _ = target.dispatch_event(&event);
                }
                Err(e) => log::debug!("event {}: {}", name, js_error_string(&e)),
            }
        }
    });
}

/// Sanitize the body from a `readystatechange` listener registered at
/// `open`, ahead of any listener the page adds afterwards.
fn listen_for_completion(xhr: &JsValue, interceptor: Rc<Interceptor>) {
    if Reflect::has(xhr, &JsValue::from_str(XHR_LISTENER_PROPERTY)).unwrap_or(false) {
        return;
    }
    let Some(target) = xhr.dyn_ref::<EventTarget>() else {
        return;
    };

    let apply: ReadyStateHandler = {
        let xhr = xhr.clone();
        Box::new(move |state: &mut XhrState| {
            if state.rewritten {
                override_body(&xhr, &state.response_text);
            }
        })
    };
    let mut handler = compose_ready_state_handler(interceptor, Some(apply));
    let source = xhr.clone();
    let on_change = Closure::<dyn FnMut(JsValue)>::new(move |_| {
        let mut state = read_state(&source);
        handler(&mut state);
    })
    .into_js_value();

    match target.add_event_listener_with_callback("readystatechange", on_change.unchecked_ref()) {
        Ok(()) => {
            let _ = define_value(xhr, XHR_LISTENER_PROPERTY, &JsValue::TRUE, false, true);
        }
        Err(e) => log::debug!("readystatechange listener: {}", js_error_string(&e)),
    }
}

/// Install a ready-state handler that sanitizes the body once, then runs
/// whatever handler it displaced with the original event. Covers an
/// `onreadystatechange` assigned before `open`, whose slot precedes the
/// listener added there.
fn hook_completion(xhr: &JsValue, interceptor: Rc<Interceptor>) {
    let key = JsValue::from_str("onreadystatechange");
    let displaced = Reflect::get(xhr, &key)
        .ok()
        .and_then(|v| v.dyn_into::<Function>().ok());
    let event: Rc<RefCell<JsValue>> = Rc::new(RefCell::new(JsValue::UNDEFINED));

    let previous: ReadyStateHandler = {
        let xhr = xhr.clone();
        let event = Rc::clone(&event);
        let mut applied = false;
        Box::new(move |state: &mut XhrState| {
            if state.rewritten && !applied {
                applied = true;
                override_body(&xhr, &state.response_text);
            }
            if let Some(handler) = &displaced {
                if let Err(e) = handler.call1(&xhr, &event.borrow()) {
                    log::debug!("displaced handler threw: {}", js_error_string(&e));
                }
            }
        })
    };
    let mut handler = compose_ready_state_handler(interceptor, Some(previous));

    let source = xhr.clone();
    let on_change = Closure::<dyn FnMut(JsValue)>::new(move |e: JsValue| {
        *event.borrow_mut() = e;
        let mut state = read_state(&source);
        handler(&mut state);
    });
    let _ = Reflect::set(xhr, &key, &on_change.into_js_value());
}

fn read_state(xhr: &JsValue) -> XhrState {
    let number = |key: &str| {
        Reflect::get(xhr, &JsValue::from_str(key))
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };
    let ready_state = ReadyState::from(number("readyState") as u16);
    // responseText throws for non-text response types
    let text = if ready_state == ReadyState::Done {
        Reflect::get(xhr, &JsValue::from_str("responseText"))
            .ok()
            .and_then(|v| v.as_string())
            .unwrap_or_default()
    } else {
        String::new()
    };
    XhrState::new(ready_state, number("status") as u16, text)
}

// =============================================================================
// JSON.stringify / setTimeout
// =============================================================================

fn install_stringify() -> Result<(), FilterError> {
    let json: JsValue = Reflect::get(&js_sys::global(), &JsValue::from_str("JSON"))
        .map_err(|e| FilterError::property("JSON", js_error_string(&e)))?;
    install_apply_trap(
        &json,
        "stringify",
        Box::new(|target: Function, this: JsValue, args: Array| {
            let result = call_original(&target, &this, &args)?;
            Ok(match result.as_string() {
                Some(text) => match rewrite_client_screen(&text) {
                    std::borrow::Cow::Owned(rewritten) => JsValue::from_str(&rewritten),
                    std::borrow::Cow::Borrowed(_) => result,
                },
                None => result,
            })
        }),
    )
}

fn install_set_timeout(window: &Window) -> Result<(), FilterError> {
    install_apply_trap(
        window,
        "setTimeout",
        Box::new(|target: Function, this: JsValue, args: Array| {
            if let Some(delay) = args.get(1).as_f64() {
                let callback = args.get(0);
                let source = match callback.dyn_ref::<Function>() {
                    Some(function) => String::from(function.to_string()),
                    None => callback.as_string().unwrap_or_default(),
                };
                let shortened = shorten_timer_delay(delay, &source);
                if shortened != delay {
                    args.set(1, JsValue::from_f64(shortened));
                }
            }
            call_original(&target, &this, &args)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_request_url_forms() {
        assert_eq!(request_url(&JsValue::from_str("/pagead/x")).as_deref(), Some("/pagead/x"));
        let like_url = js_sys::Object::new();
        Reflect::set(&like_url, &"href".into(), &"https://a/b".into()).unwrap();
        assert_eq!(request_url(&like_url.into()).as_deref(), Some("https://a/b"));
        assert_eq!(request_url(&JsValue::UNDEFINED), None);
    }

    #[wasm_bindgen_test]
    fn test_read_state_skips_body_before_done() {
        let xhr = js_sys::Object::new();
        Reflect::set(&xhr, &"readyState".into(), &3.into()).unwrap();
        Reflect::set(&xhr, &"status".into(), &200.into()).unwrap();
        Reflect::set(&xhr, &"responseText".into(), &"{\"adSlots\":[]}".into()).unwrap();
        let state = read_state(&xhr.into());
        assert_eq!(state.ready_state, ReadyState::Loading);
        assert_eq!(state.response_text, "");
    }

    #[wasm_bindgen_test]
    fn test_completion_listener_runs_before_page_listeners() {
        let registry = Rc::new(qs_core::PatternRegistry::builtin());
        let interceptor = Rc::new(Interceptor::new(registry));
        let xhr: JsValue = EventTarget::new().unwrap().into();
        Reflect::set(&xhr, &"readyState".into(), &4.into()).unwrap();
        Reflect::set(&xhr, &"status".into(), &200.into()).unwrap();
        Reflect::set(&xhr, &"responseText".into(), &r#"{"adSlots":[1],"videoDetails":{}}"#.into()).unwrap();

        listen_for_completion(&xhr, Rc::clone(&interceptor));
        listen_for_completion(&xhr, interceptor);
        let page = Function::new_with_args("e", "this.seen = this.responseText");
        let target: &EventTarget = xhr.unchecked_ref();
        target.add_event_listener_with_callback("readystatechange", &page).unwrap();
        target.dispatch_event(&Event::new("readystatechange").unwrap()).unwrap();

        let seen = Reflect::get(&xhr, &"seen".into()).unwrap().as_string().unwrap();
        assert_eq!(seen, r#"{"videoDetails":{}}"#);
        assert_eq!(Reflect::get(&xhr, &XHR_LISTENER_PROPERTY.into()).unwrap(), JsValue::TRUE);
    }

    #[wasm_bindgen_test]
    fn test_override_body() {
        let xhr: JsValue = js_sys::Object::new().into();
        override_body(&xhr, "{}");
        assert_eq!(
            Reflect::get(&xhr, &"responseText".into()).unwrap().as_string().as_deref(),
            Some("{}")
        );
    }
}
