//! DOM Reconciliation
//!
//! Hides ad nodes through one injected stylesheet, detaches them as a
//! backstop, and fast-forwards ad playback. Every operation here is
//! idempotent: the periodic loop and the mutation observer may race freely.

use std::rc::Rc;

use crate::config::EngineConfig;
use crate::error::FilterError;
use crate::navigation::PageGlobals;
use crate::observer::{is_embed_tag, AddedNode};
use crate::patterns::{
    PatternRegistry, IDLE_PROMPT_BUTTON_SELECTOR, IDLE_PROMPT_SELECTOR,
    INITIAL_PLAYER_RESPONSE_GLOBAL,
};
use crate::sanitizer::skip_trigger_layout_ids;
use crate::types::{PlayerAdState, SelectorAction};

// =============================================================================
// Host Abstractions
// =============================================================================

/// A playable media element.
pub trait MediaHandle {
    fn src(&self) -> String;
    fn duration(&self) -> f64;
    fn current_time(&self) -> f64;
    fn set_current_time(&self, secs: f64);
    fn playback_rate(&self) -> f64;
    fn set_playback_rate(&self, rate: f64);
    fn is_paused(&self) -> bool;
    fn ready_state(&self) -> u16;
    fn pause(&self);
}

/// What the host sees inside the player container.
#[derive(Debug, Clone)]
pub struct PlayerProbe<M> {
    /// First playable media element of the player, if any.
    pub media: Option<M>,
    /// Child count of the first ad module, 0 when absent.
    pub ad_module_children: u32,
}

/// The document as seen by the reconciler.
pub trait DocumentHost {
    type Element: Clone;
    type Media: MediaHandle;

    fn query_all(&self, selector: &str) -> Result<Vec<Self::Element>, FilterError>;

    fn query_first(&self, selector: &str) -> Result<Option<Self::Element>, FilterError> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    fn query_within(
        &self,
        root: &Self::Element,
        selector: &str,
    ) -> Result<Option<Self::Element>, FilterError>;

    /// Create the stylesheet node with this id, or refresh its text.
    /// Returns true when a node was created.
    fn upsert_style(&self, id: &str, css: &str) -> Result<bool, FilterError>;

    fn detach(&self, element: &Self::Element);
    fn is_visible(&self, element: &Self::Element) -> bool;
    fn click(&self, element: &Self::Element);
    fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;
    fn set_attribute(&self, element: &Self::Element, name: &str, value: &str);
    fn text_content(&self, element: &Self::Element) -> Option<String>;
    fn as_media(&self, element: &Self::Element) -> Option<Self::Media>;
    fn player_probe(&self) -> Option<PlayerProbe<Self::Media>>;
}

/// Derive the ad state from a probe: an ad plays when the ad module has
/// children and the player holds a media element with a source.
pub fn derive_ad_state<M: MediaHandle>(probe: &PlayerProbe<M>) -> PlayerAdState {
    match &probe.media {
        Some(media) if probe.ad_module_children > 0 => {
            let src = media.src();
            if src.is_empty() {
                PlayerAdState::NoAd
            } else {
                PlayerAdState::AdPlaying {
                    src,
                    duration: media.duration(),
                }
            }
        }
        _ => PlayerAdState::NoAd,
    }
}

// =============================================================================
// Skip Memo
// =============================================================================

/// Per-navigation memory of the last fast-forwarded ad.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipMemo {
    pub last_skipped_src: Option<String>,
    /// Rate to restore once the ad is gone.
    pub restore_rate: Option<f64>,
}

/// What one reconciliation sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub style_created: bool,
    pub removed: usize,
    pub stripped_keys: usize,
    pub skip_clicked: bool,
    pub fast_forwarded: bool,
    pub triggers_fired: usize,
    pub prompt_dismissed: bool,
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct Reconciler {
    registry: Rc<PatternRegistry>,
    config: Rc<EngineConfig>,
    stylesheet: String,
}

impl Reconciler {
    pub fn new(registry: Rc<PatternRegistry>, config: Rc<EngineConfig>) -> Self {
        let stylesheet = build_stylesheet(registry.table().selectors_with(SelectorAction::HIDE));
        Self {
            registry,
            config,
            stylesheet,
        }
    }

    pub fn stylesheet(&self) -> &str {
        &self.stylesheet
    }

    /// Inject or refresh the single suppression stylesheet.
    pub fn apply_style_suppression<H: DocumentHost>(&self, host: &H) -> Result<bool, FilterError> {
        host.upsert_style(&self.config.style_element_id, &self.stylesheet)
    }

    /// Detach every node matching a remove-action selector. A selector the
    /// host cannot evaluate is skipped.
    pub fn sweep_remove<H: DocumentHost>(&self, host: &H) -> usize {
        let mut removed = 0;
        for selector in self.registry.table().selectors_with(SelectorAction::REMOVE) {
            match host.query_all(selector) {
                Ok(nodes) => {
                    for node in &nodes {
                        host.detach(node);
                    }
                    removed += nodes.len();
                }
                Err(e) => log::debug!("{}", e),
            }
        }
        if removed > 0 {
            log::debug!("removed {} ad nodes", removed);
        }
        removed
    }

    /// Fast-forward an ad that is playing right now, once per ad asset.
    pub fn check_and_skip<H: DocumentHost>(&self, host: &H, memo: &mut SkipMemo) -> bool {
        let Some(probe) = host.player_probe() else {
            return false;
        };

        match derive_ad_state(&probe) {
            PlayerAdState::NoAd => {
                if let (Some(rate), Some(media)) = (memo.restore_rate, probe.media.as_ref()) {
                    media.set_playback_rate(rate);
                    memo.restore_rate = None;
                }
                false
            }
            PlayerAdState::AdPlaying { src, duration } => {
                if !duration.is_finite() || memo.last_skipped_src.as_deref() == Some(src.as_str()) {
                    return false;
                }
                let Some(media) = probe.media.as_ref() else {
                    return false;
                };
                if memo.restore_rate.is_none() {
                    memo.restore_rate = Some(media.playback_rate());
                }
                media.set_current_time((duration - self.config.skip_epsilon_secs).max(0.0));
                media.set_playback_rate(self.config.skip_playback_rate);
                log::debug!("fast-forwarded ad of {:.1}s", duration);
                memo.last_skipped_src = Some(src);
                true
            }
        }
    }

    /// Click the first visible skip button, in priority order.
    pub fn click_skip_control<H: DocumentHost>(&self, host: &H) -> bool {
        for selector in &self.registry.table().skip_buttons {
            match host.query_first(selector) {
                Ok(Some(button)) if host.is_visible(&button) => {
                    host.click(&button);
                    log::debug!("clicked skip control {}", selector);
                    return true;
                }
                Ok(_) => {}
                Err(e) => log::debug!("{}", e),
            }
        }
        false
    }

    /// Dismiss a visible "are you still there" prompt.
    pub fn dismiss_idle_prompt<H: DocumentHost>(&self, host: &H) -> bool {
        let prompt = match host.query_first(IDLE_PROMPT_SELECTOR) {
            Ok(Some(prompt)) if host.is_visible(&prompt) => prompt,
            Ok(_) => return false,
            Err(e) => {
                log::debug!("{}", e);
                return false;
            }
        };
        match host.query_within(&prompt, IDLE_PROMPT_BUTTON_SELECTOR) {
            Ok(Some(button)) => {
                host.click(&button);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::debug!("{}", e);
                false
            }
        }
    }

    /// Ask the player to honor every exit-skip trigger of its ad slots.
    pub fn trigger_player_skips<G: PageGlobals>(&self, globals: &G) -> usize {
        let Some(response) = globals.player_response() else {
            return 0;
        };
        skip_trigger_layout_ids(&response)
            .iter()
            .filter(|layout_id| globals.ad_ux_clicked("skip-button", layout_id))
            .count()
    }

    /// Clear ad data the initial page embedded before interception existed.
    pub fn strip_initial_player_response<G: PageGlobals>(&self, globals: &G) -> usize {
        let keys = globals.truthy_keys(INITIAL_PLAYER_RESPONSE_GLOBAL, self.registry.ad_keys());
        for key in &keys {
            globals.clear_key(INITIAL_PLAYER_RESPONSE_GLOBAL, key);
        }
        keys.len()
    }

    /// Detach freshly inserted scripts and frames whose source is blocked.
    pub fn remove_blocked_embeds<H: DocumentHost>(
        &self,
        host: &H,
        added: &[AddedNode<H::Element>],
    ) -> usize {
        let matcher = self.registry.matcher();
        let mut removed = 0;
        for node in added {
            if !is_embed_tag(&node.tag) {
                continue;
            }
            if node.src.as_deref().is_some_and(|src| matcher.is_blocked_embed(src)) {
                host.detach(&node.handle);
                removed += 1;
            }
        }
        removed
    }

    /// One full reconciliation sweep.
    pub fn run_cycle<P>(&self, page: &P, memo: &mut SkipMemo) -> SweepReport
    where
        P: DocumentHost + PageGlobals,
    {
        let style_created = self.apply_style_suppression(page).unwrap_or_else(|e| {
            log::warn!("style suppression unavailable: {}", e);
            false
        });
        SweepReport {
            style_created,
            removed: self.sweep_remove(page),
            stripped_keys: self.strip_initial_player_response(page),
            skip_clicked: self.click_skip_control(page),
            fast_forwarded: self.check_and_skip(page, memo),
            triggers_fired: self.trigger_player_skips(page),
            prompt_dismissed: self.dismiss_idle_prompt(page),
        }
    }
}

/// Rule text for hidden selectors, each layered against partial resets.
pub fn build_stylesheet<'a>(selectors: impl Iterator<Item = &'a str>) -> String {
    selectors
        .map(|selector| {
            format!(
                "{selector} {{ display: none !important; visibility: hidden !important; \
                 height: 0 !important; width: 0 !important; }}"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
