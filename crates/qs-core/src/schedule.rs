//! Check-loop scheduling
//!
//! One dominant periodic loop backs up the observers: a slow period while
//! idle, a faster one while media plays. Switching periods replaces the timer;
//! loops never stack.

use crate::config::EngineConfig;
use crate::error::FilterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Idle,
    Playing,
}

impl LoopMode {
    pub fn period_ms(self, config: &EngineConfig) -> u32 {
        match self {
            Self::Idle => config.idle_check_interval_ms,
            Self::Playing => config.playing_check_interval_ms,
        }
    }
}

/// Host timer facility. The host owns the callback; the core only decides
/// when a periodic tick starts and stops.
pub trait Timers {
    type Handle;

    fn start_interval(&self, period_ms: u32) -> Result<Self::Handle, FilterError>;
    fn cancel(&self, handle: Self::Handle);
}

/// The single active check loop.
#[derive(Debug)]
pub struct CheckLoop<H> {
    handle: Option<H>,
    mode: Option<LoopMode>,
}

impl<H> Default for CheckLoop<H> {
    fn default() -> Self {
        Self {
            handle: None,
            mode: None,
        }
    }
}

impl<H> CheckLoop<H> {
    pub fn mode(&self) -> Option<LoopMode> {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Run the loop at `mode`'s period. Returns true when a timer was
    /// (re)started, false when that mode was already running.
    pub fn switch_to<T>(&mut self, mode: LoopMode, timers: &T, config: &EngineConfig) -> bool
    where
        T: Timers<Handle = H>,
    {
        if self.mode == Some(mode) && self.handle.is_some() {
            return false;
        }
        self.stop(timers);
        match timers.start_interval(mode.period_ms(config)) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.mode = Some(mode);
                true
            }
            Err(e) => {
                log::warn!("check loop not started: {}", e);
                false
            }
        }
    }

    pub fn stop<T>(&mut self, timers: &T)
    where
        T: Timers<Handle = H>,
    {
        if let Some(handle) = self.handle.take() {
            timers.cancel(handle);
        }
        self.mode = None;
    }
}

// =============================================================================
// Timer Shortening
// =============================================================================

const COUNTDOWN_MIN_MS: f64 = 15000.0;
const COUNTDOWN_MAX_MS: f64 = 20000.0;
const SHORT_CALLBACK_LEN: usize = 50;

/// Collapse ad-countdown waits: delays in the countdown window whose callback
/// is native or tiny are scaled down a thousandfold.
pub fn shorten_timer_delay(delay_ms: f64, callback_source: &str) -> f64 {
    if !(COUNTDOWN_MIN_MS..=COUNTDOWN_MAX_MS).contains(&delay_ms) {
        return delay_ms;
    }
    if callback_source.contains("[native code]") || callback_source.len() < SHORT_CALLBACK_LEN {
        (delay_ms * 0.001).floor()
    } else {
        delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTimers;

    #[test]
    fn test_switch_replaces_instead_of_stacking() {
        let timers = FakeTimers::default();
        let config = EngineConfig::default();
        let mut check_loop = CheckLoop::default();

        assert!(check_loop.switch_to(LoopMode::Idle, &timers, &config));
        assert!(!check_loop.switch_to(LoopMode::Idle, &timers, &config));
        assert!(check_loop.switch_to(LoopMode::Playing, &timers, &config));
        assert!(check_loop.switch_to(LoopMode::Idle, &timers, &config));

        assert_eq!(timers.active(), vec![(3, 1000)]);
        assert_eq!(timers.started(), vec![1000, 500, 1000]);
        assert_eq!(check_loop.mode(), Some(LoopMode::Idle));
    }

    #[test]
    fn test_stop_clears() {
        let timers = FakeTimers::default();
        let config = EngineConfig::default();
        let mut check_loop = CheckLoop::default();
        check_loop.switch_to(LoopMode::Playing, &timers, &config);
        check_loop.stop(&timers);
        assert!(!check_loop.is_running());
        assert!(timers.active().is_empty());
    }

    #[test]
    fn test_failed_start_leaves_loop_stopped() {
        let timers = FakeTimers::default();
        timers.fail_next();
        let mut check_loop = CheckLoop::default();
        assert!(!check_loop.switch_to(LoopMode::Idle, &timers, &EngineConfig::default()));
        assert_eq!(check_loop.mode(), None);
    }

    #[test]
    fn test_shorten_timer_delay() {
        assert_eq!(shorten_timer_delay(15000.0, "function () { [native code] }"), 15.0);
        assert_eq!(shorten_timer_delay(20000.0, "() => f()"), 20.0);
        assert_eq!(shorten_timer_delay(17500.0, &"x".repeat(80)), 17500.0);
        assert_eq!(shorten_timer_delay(14999.0, ""), 14999.0);
        assert_eq!(shorten_timer_delay(20001.0, ""), 20001.0);
    }
}
