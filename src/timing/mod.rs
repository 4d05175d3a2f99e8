//! Timing primitives
//!
//! All waiting in the bot goes through a [`Waiter`], which scales wait units
//! by the configured multiplier and sleeps on an injectable [`Clock`]. Tests
//! swap in a clock that records sleeps instead of blocking.
//!
//! The advisory pause flag lives here too. It is polled between steps and
//! never interrupts an in-flight tap or capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Global pause flag, toggled from outside the control thread
static PAUSED: AtomicBool = AtomicBool::new(false);

/// Request that the control loop suspend at its next checkpoint
pub fn pause() {
    if !PAUSED.swap(true, Ordering::SeqCst) {
        log::info!("Pausing!");
    }
}

/// Let a paused control loop continue
pub fn resume() {
    if PAUSED.swap(false, Ordering::SeqCst) {
        log::info!("Resuming");
    }
}

/// Flip the pause flag, returning the new value
pub fn toggle_pause() -> bool {
    if is_paused() {
        resume();
        false
    } else {
        pause();
        true
    }
}

/// Check whether a pause has been requested
pub fn is_paused() -> bool {
    PAUSED.load(Ordering::SeqCst)
}

/// Source of blocking sleeps
pub trait Clock: Send + Sync {
    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Clock backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Scales wait units (seconds) by the loading multiplier and sleeps on a clock
#[derive(Clone)]
pub struct Waiter {
    clock: Arc<dyn Clock>,
    multiplier: f32,
    pause_poll: f32,
}

impl Waiter {
    /// Create a waiter; a non-positive multiplier falls back to 1.0
    pub fn new(clock: Arc<dyn Clock>, multiplier: f32) -> Self {
        Self {
            clock,
            multiplier: if multiplier > 0.0 { multiplier } else { 1.0 },
            pause_poll: 1.0,
        }
    }

    /// Set how long to sleep between pause-flag polls
    pub fn with_pause_poll(mut self, seconds: f32) -> Self {
        self.pause_poll = seconds.max(0.0);
        self
    }

    /// Wait `seconds` wait units
    pub fn wait(&self, seconds: f32) {
        self.clock.sleep(self.scaled(seconds));
    }

    /// Duration a wait of `seconds` units actually takes
    pub fn scaled(&self, seconds: f32) -> Duration {
        Duration::from_secs_f32((seconds * self.multiplier).max(0.0))
    }

    /// Get the configured multiplier
    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    /// Block while the pause flag is set
    ///
    /// Returns true if the caller was held at least once.
    pub fn hold_while_paused(&self) -> bool {
        let mut held = false;
        while is_paused() {
            held = true;
            self.wait(self.pause_poll);
        }
        if held {
            log::info!("Resumed after pause");
        }
        held
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("multiplier", &self.multiplier)
            .field("pause_poll", &self.pause_poll)
            .finish()
    }
}
