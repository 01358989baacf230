//! WebAssembly bindings for QuietStream
//!
//! Loaded once per page context, before the page's own scripts. `init`
//! wraps the network primitives, applies the startup overrides, injects the
//! suppression stylesheet and arms the observers, timers and navigation
//! hooks that keep the page reconciled.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::Reflect;
use qs_core::media::ActivityTracker;
use qs_core::patterns::RuleTable;
use qs_core::{Coordinator, EngineConfig, Interceptor, PatternRegistry};
use serde::Deserialize;
use wasm_bindgen::prelude::*;

mod logger;
mod media;
mod navigation;
mod network;
mod observe;
mod page;
mod patch;

use page::{WebPage, WebTimers};

// =============================================================================
// Runtime
// =============================================================================

/// Everything installed in the page. Callbacks reach it through
/// [`runtime`], never through captured references.
pub(crate) struct Runtime {
    pub config: Rc<EngineConfig>,
    pub registry: Rc<PatternRegistry>,
    pub interceptor: Rc<Interceptor>,
    pub page: WebPage,
    /// Drives the dominant check loop.
    pub check_timers: WebTimers,
    pub coordinator: RefCell<Coordinator<i32>>,
    pub activity: Cell<ActivityTracker>,
}

impl Runtime {
    /// Run `f` against the coordinator unless a callback further up the
    /// stack already holds it.
    pub fn with_coordinator<R>(&self, f: impl FnOnce(&mut Coordinator<i32>) -> R) -> Option<R> {
        match self.coordinator.try_borrow_mut() {
            Ok(mut coordinator) => Some(f(&mut coordinator)),
            Err(_) => {
                log::debug!("coordinator busy; skipping");
                None
            }
        }
    }

    pub fn recheck(&self) {
        self.with_coordinator(|c| c.recheck(&self.page));
    }

    pub fn record_activity(&self) {
        let mut activity = self.activity.get();
        activity.record(now_ms());
        self.activity.set(activity);
    }

    pub fn pause_allowed(&self) -> bool {
        self.activity
            .get()
            .allows_pause(now_ms(), self.config.activity_window_ms)
    }
}

#[inline]
pub(crate) fn now_ms() -> f64 {
    js_sys::Date::now()
}

thread_local! {
    static RUNTIME: RefCell<Option<Rc<Runtime>>> = const { RefCell::new(None) };
}

pub(crate) fn runtime() -> Option<Rc<Runtime>> {
    RUNTIME.with(|slot| slot.borrow().clone())
}

// =============================================================================
// Exports
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InitOptions {
    config: EngineConfig,
    rules: Option<RuleTable>,
}

fn parse_options(options: JsValue) -> InitOptions {
    if options.is_undefined() || options.is_null() {
        return InitOptions::default();
    }
    serde_wasm_bindgen::from_value(options).unwrap_or_else(|e| {
        log::warn!("invalid options, using defaults: {}", e);
        InitOptions::default()
    })
}

fn build_registry(rules: Option<RuleTable>) -> PatternRegistry {
    match rules.map(PatternRegistry::from_table) {
        Some(Ok(registry)) => registry,
        Some(Err(e)) => {
            log::warn!("{}; using built-in rules", e);
            PatternRegistry::builtin()
        }
        None => PatternRegistry::builtin(),
    }
}

#[wasm_bindgen]
pub fn init(options: JsValue) -> Result<JsValue, JsValue> {
    if runtime().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }

    let InitOptions { config, rules } = parse_options(options);
    logger::install(config.level_filter());

    let page = WebPage::new().ok_or_else(|| JsValue::from_str("No window or document"))?;
    let config = Rc::new(config);
    let registry = Rc::new(build_registry(rules));
    let interceptor = Rc::new(Interceptor::new(Rc::clone(&registry)));
    let check_timers = WebTimers::new(page.window().clone(), || {
        if let Some(rt) = runtime() {
            rt.recheck();
        }
    });
    let rt = Rc::new(Runtime {
        coordinator: RefCell::new(Coordinator::new(Rc::clone(&registry), Rc::clone(&config))),
        activity: Cell::new(ActivityTracker::new(now_ms())),
        config,
        registry,
        interceptor,
        page,
        check_timers,
    });
    RUNTIME.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&rt)));

    network::install(rt.page.window(), &rt.interceptor);
    rt.with_coordinator(|c| {
        c.startup(&rt.page);
        if let Err(e) = c.reconciler().apply_style_suppression(&rt.page) {
            log::warn!("style suppression deferred: {}", e);
        }
    });
    observe::install(&rt);
    navigation::install(&rt);
    media::install(&rt);
    rt.with_coordinator(|c| c.start_loop(&rt.check_timers));

    let result = js_sys::Object::new();
    let table = rt.registry.table();
    let _ = Reflect::set(&result, &"initialized".into(), &JsValue::TRUE);
    let _ = Reflect::set(&result, &"blockRules".into(), &JsValue::from(table.block.len() as u32));
    let _ = Reflect::set(&result, &"pruneRules".into(), &JsValue::from(table.prune.len() as u32));
    let _ = Reflect::set(&result, &"selectors".into(), &JsValue::from(table.selectors.len() as u32));
    log::info!("installed");
    Ok(result.into())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    runtime().is_some()
}

/// Classify a URL against the installed (or built-in) rules.
#[wasm_bindgen]
pub fn classify_url(url: &str) -> String {
    match runtime() {
        Some(rt) => rt.registry.matcher().classify(url).as_str().to_string(),
        None => PatternRegistry::builtin().matcher().classify(url).as_str().to_string(),
    }
}

#[wasm_bindgen]
pub fn get_stats() -> JsValue {
    let result = js_sys::Object::new();
    if let Some(rt) = runtime() {
        let stats = rt.interceptor.stats();
        let _ = Reflect::set(&result, &"blocked".into(), &JsValue::from(stats.blocked));
        let _ = Reflect::set(&result, &"pruned".into(), &JsValue::from(stats.pruned));
        let _ = Reflect::set(&result, &"pruneFailures".into(), &JsValue::from(stats.prune_failures));
        let _ = Reflect::set(&result, &"passed".into(), &JsValue::from(stats.passed));
        let navigations = rt.with_coordinator(|c| c.session().navigations).unwrap_or(0);
        let _ = Reflect::set(&result, &"navigations".into(), &JsValue::from(navigations));
    }
    result.into()
}

/// Media command entry point for platform media-key integrations. Also
/// installed as `window.executeMediaCommand`.
#[wasm_bindgen(js_name = executeMediaCommand)]
pub fn execute_media_command(command: &str) -> bool {
    media::execute(command)
}
