//! Navigation Coordinator
//!
//! Single-page-app transitions bring ad content back without a page load.
//! The coordinator owns the session state, resets it on every transition,
//! and drives the reconciler from observers, timers and navigation events.

use std::rc::Rc;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::dom::{DocumentHost, Reconciler, SkipMemo, SweepReport};
use crate::error::FilterError;
use crate::media::NowPlayingTracker;
use crate::observer::{should_recheck, unmonitored_media, MutationBatch};
use crate::patterns::{PatternRegistry, RuleTable};
use crate::schedule::{CheckLoop, LoopMode, Timers};

// =============================================================================
// Page Globals
// =============================================================================

/// Access to the page's global object graph. Paths are dot-separated from
/// the global scope.
pub trait PageGlobals {
    /// Fix a global to a read-only value.
    fn define_constant(&self, path: &str, value: &Value) -> Result<(), FilterError>;
    /// Replace a property with an always-undefined getter and a no-op setter,
    /// creating intermediate objects as needed.
    fn pin_undefined(&self, path: &str) -> Result<(), FilterError>;
    /// Plain assignment; `None` assigns undefined.
    fn assign(&self, path: &str, value: Option<&Value>);
    /// Candidate keys holding a truthy value on the object at `path`.
    fn truthy_keys(&self, path: &str, candidates: &[String]) -> Vec<String>;
    /// Set `path.key` to undefined.
    fn clear_key(&self, path: &str, key: &str);
    /// The live player's response, as far as its ad slots go.
    fn player_response(&self) -> Option<Value>;
    /// Invoke the player's ad UX hook. Returns whether the hook exists.
    fn ad_ux_clicked(&self, kind: &str, layout_id: &str) -> bool;
}

/// Outcome of the one-time startup overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub constants_defined: usize,
    pub pinned: usize,
    /// Overrides that fell back to plain assignment.
    pub assigned: usize,
}

/// Fix the ad status flag and neutralize late-binding ad data paths. A
/// property that cannot be redefined is assigned instead.
pub fn apply_startup_overrides<G: PageGlobals>(globals: &G, table: &RuleTable) -> StartupReport {
    let mut report = StartupReport::default();

    for constant in &table.global_constants {
        match globals.define_constant(&constant.path, &constant.value) {
            Ok(()) => report.constants_defined += 1,
            Err(e) => {
                log::debug!("{}; assigning instead", e);
                globals.assign(&constant.path, Some(&constant.value));
                report.assigned += 1;
            }
        }
    }

    for path in &table.pinned_paths {
        match globals.pin_undefined(path) {
            Ok(()) => report.pinned += 1,
            Err(e) => {
                log::debug!("{}; assigning instead", e);
                globals.assign(path, None);
                report.assigned += 1;
            }
        }
    }

    report
}

// =============================================================================
// Navigation Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationEvent {
    /// `history.pushState`
    PushState,
    /// `history.replaceState`
    ReplaceState,
    /// Platform `navigate` event
    Navigate,
    /// Legacy back/forward
    PopState,
    /// The app's own "navigation finished" event
    NavigateFinish,
    /// Initial document ready
    DocumentReady,
}

/// Event names listened for on the window, with their meaning.
pub const WINDOW_EVENTS: &[(&str, NavigationEvent)] = &[
    ("yt-navigate-finish", NavigationEvent::NavigateFinish),
    ("popstate", NavigationEvent::PopState),
];

impl NavigationEvent {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "navigate" => Some(Self::Navigate),
            "popstate" => Some(Self::PopState),
            "yt-navigate-finish" => Some(Self::NavigateFinish),
            "DOMContentLoaded" => Some(Self::DocumentReady),
            _ => None,
        }
    }

    /// History API calls wait for the new page's DOM to settle; events
    /// fire once the app is already there.
    pub fn settle_delay_ms(self, config: &EngineConfig) -> Option<u32> {
        match self {
            Self::PushState | Self::ReplaceState => Some(config.history_settle_delay_ms),
            _ => None,
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// All mutable state of one page session. `T` is the host's timer handle.
#[derive(Debug)]
pub struct SessionState<T> {
    pub skip: SkipMemo,
    pub now_playing: NowPlayingTracker,
    pub check_loop: CheckLoop<T>,
    pub navigations: u32,
}

impl<T> Default for SessionState<T> {
    fn default() -> Self {
        Self {
            skip: SkipMemo::default(),
            now_playing: NowPlayingTracker::default(),
            check_loop: CheckLoop::default(),
            navigations: 0,
        }
    }
}

impl<T> SessionState<T> {
    /// Reset everything per-navigation. The running check loop survives so
    /// its timer is never orphaned; a pending playback-rate restore survives
    /// so the next ad-free check still undoes a skip.
    pub fn reset(&mut self) {
        let check_loop = std::mem::take(&mut self.check_loop);
        let restore_rate = self.skip.restore_rate.take();
        let navigations = self.navigations + 1;
        *self = Self {
            skip: SkipMemo {
                restore_rate,
                ..SkipMemo::default()
            },
            check_loop,
            navigations,
            ..Self::default()
        };
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Result of a navigation reset.
#[derive(Debug)]
pub struct NavigationReset<E> {
    pub sweep: SweepReport,
    /// Media elements that need a source observer attached.
    pub media_to_watch: Vec<E>,
}

pub struct Coordinator<T> {
    registry: Rc<PatternRegistry>,
    config: Rc<EngineConfig>,
    reconciler: Reconciler,
    session: SessionState<T>,
    started: bool,
}

impl<T> Coordinator<T> {
    pub fn new(registry: Rc<PatternRegistry>, config: Rc<EngineConfig>) -> Self {
        let reconciler = Reconciler::new(Rc::clone(&registry), Rc::clone(&config));
        Self {
            registry,
            config,
            reconciler,
            session: SessionState::default(),
            started: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn session(&self) -> &SessionState<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState<T> {
        &mut self.session
    }

    /// Apply the startup overrides. Only the first call has an effect.
    pub fn startup<G: PageGlobals>(&mut self, globals: &G) -> Option<StartupReport> {
        if self.started {
            return None;
        }
        self.started = true;
        let report = apply_startup_overrides(globals, self.registry.table());
        log::debug!("startup overrides: {:?}", report);
        Some(report)
    }

    /// Full reset after a transition. The skip memo is forgotten, the initial
    /// player response stripped, and new media elements returned for watching.
    pub fn reset<P>(&mut self, page: &P) -> NavigationReset<P::Element>
    where
        P: DocumentHost + PageGlobals,
    {
        self.session.reset();
        self.reconciler.strip_initial_player_response(page);
        let sweep = self.recheck(page);
        NavigationReset {
            sweep,
            media_to_watch: self.scan_media(page),
        }
    }

    /// One reconciliation sweep against the current session.
    pub fn recheck<P>(&mut self, page: &P) -> SweepReport
    where
        P: DocumentHost + PageGlobals,
    {
        self.reconciler.run_cycle(page, &mut self.session.skip)
    }

    /// Handle a structural mutation batch. Blocked embeds are detached first;
    /// a sweep follows when anything was added.
    pub fn on_mutations<P>(&mut self, page: &P, batch: MutationBatch<P::Element>) -> Option<SweepReport>
    where
        P: DocumentHost + PageGlobals,
    {
        if !should_recheck(&batch) {
            return None;
        }
        let added = batch.into_added();
        self.reconciler.remove_blocked_embeds(page, &added);
        Some(self.recheck(page))
    }

    /// Media elements that still need a source observer.
    pub fn scan_media<P: DocumentHost>(&self, page: &P) -> Vec<P::Element> {
        unmonitored_media(page, &self.config.monitored_marker)
    }

    /// Start the idle check loop if nothing runs yet.
    pub fn start_loop<S>(&mut self, timers: &S) -> bool
    where
        S: Timers<Handle = T>,
    {
        if self.session.check_loop.is_running() {
            return false;
        }
        self.session
            .check_loop
            .switch_to(LoopMode::Idle, timers, &self.config)
    }

    /// Media started playing: tighten the loop.
    pub fn on_play<S>(&mut self, timers: &S) -> bool
    where
        S: Timers<Handle = T>,
    {
        self.session
            .check_loop
            .switch_to(LoopMode::Playing, timers, &self.config)
    }

    /// Media paused: relax the loop and look for the idle prompt once.
    pub fn on_pause<P, S>(&mut self, page: &P, timers: &S) -> bool
    where
        P: DocumentHost,
        S: Timers<Handle = T>,
    {
        self.session
            .check_loop
            .switch_to(LoopMode::Idle, timers, &self.config);
        self.reconciler.dismiss_idle_prompt(page)
    }
}
