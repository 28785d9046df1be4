//! Gesture disambiguation
//!
//! Turns raw button edges and wheel deltas into a small event vocabulary:
//! short press, long press, and dampened rotation steps.
//!
//! Long-press detection relies only on token comparison. `button_down`
//! hands out a [`PressToken`]; the caller arms a one-shot timer and feeds the
//! token back through [`GestureDisambiguator::long_press_elapsed`] when it
//! fires. Every down and every up advances the sequence, so a timer that
//! fires late (or after the release) is simply ignored. No timer is ever
//! cancelled.

use std::time::{Duration, Instant};

/// Wheel input separated by more than this starts a new rotation.
pub const WHEEL_RESET_WINDOW: Duration = Duration::from_millis(750);

/// Disambiguated user action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Press,
    LongPress,
    /// Signed number of dampened steps (positive = clockwise)
    Rotate(i32),
}

/// Identifies one button-down for long-press matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PressToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressState {
    Idle,
    Pressed(PressToken),
    /// Held past the timeout; the release is swallowed.
    LongPressFired,
}

/// Press/long-press state machine for one physical button
#[derive(Debug)]
pub struct PressTracker {
    sequence: u64,
    state: PressState,
}

impl Default for PressTracker {
    fn default() -> Self {
        Self {
            sequence: 0,
            state: PressState::Idle,
        }
    }
}

impl PressTracker {
    pub fn state(&self) -> PressState {
        self.state
    }

    /// Button went down. Returns the token the long-press timer must carry.
    pub fn button_down(&mut self) -> PressToken {
        self.sequence += 1;
        let token = PressToken(self.sequence);
        self.state = PressState::Pressed(token);
        token
    }

    /// The long-press timer for `token` fired.
    pub fn long_press_elapsed(&mut self, token: PressToken) -> Option<Gesture> {
        if token.0 != self.sequence {
            return None;
        }
        match self.state {
            PressState::Pressed(current) if current == token => {
                self.state = PressState::LongPressFired;
                Some(Gesture::LongPress)
            }
            _ => None,
        }
    }

    /// Button came up. Emits a short press unless the long press already fired.
    pub fn button_up(&mut self) -> Option<Gesture> {
        self.sequence += 1;
        let previous = std::mem::replace(&mut self.state, PressState::Idle);
        match previous {
            PressState::Pressed(_) => Some(Gesture::Press),
            // Release after a long press, or a stray release with no down
            PressState::LongPressFired | PressState::Idle => None,
        }
    }

    /// Forget any in-flight press and invalidate outstanding timers.
    pub fn reset(&mut self) {
        self.sequence += 1;
        self.state = PressState::Idle;
    }
}

/// Coalesces noisy wheel deltas into whole dampened steps
#[derive(Debug, Default)]
pub struct WheelAccumulator {
    last_update: Option<Instant>,
    accumulated: i64,
}

impl WheelAccumulator {
    pub fn accumulated(&self) -> i64 {
        self.accumulated
    }

    /// Feed one raw delta. Returns the step count when at least one whole
    /// step (`dampener` ticks) has accumulated; the remainder is retained.
    pub fn push(&mut self, delta: i32, now: Instant, dampener: i64) -> Option<i32> {
        let continuing = self
            .last_update
            .is_some_and(|last| now.saturating_duration_since(last) <= WHEEL_RESET_WINDOW);
        self.accumulated = if continuing {
            self.accumulated + i64::from(delta)
        } else {
            i64::from(delta)
        };
        self.last_update = Some(now);

        let dampener = dampener.max(1);
        // Integer division truncates toward zero in both directions.
        let steps = self.accumulated / dampener;
        if steps == 0 {
            return None;
        }
        self.accumulated -= steps * dampener;
        Some(steps.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    pub fn reset(&mut self) {
        self.last_update = None;
        self.accumulated = 0;
    }
}

/// Per-device gesture state: one button, one wheel
#[derive(Debug, Default)]
pub struct GestureDisambiguator {
    press: PressTracker,
    wheel: WheelAccumulator,
}

impl GestureDisambiguator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press_state(&self) -> PressState {
        self.press.state()
    }

    pub fn button_down(&mut self) -> PressToken {
        self.press.button_down()
    }

    pub fn long_press_elapsed(&mut self, token: PressToken) -> Option<Gesture> {
        self.press.long_press_elapsed(token)
    }

    pub fn button_up(&mut self) -> Option<Gesture> {
        self.press.button_up()
    }

    pub fn wheel(&mut self, delta: i32, now: Instant, dampener: i64) -> Option<Gesture> {
        self.wheel.push(delta, now, dampener).map(Gesture::Rotate)
    }

    /// Drop all transient state (device went away).
    pub fn reset(&mut self) {
        self.press.reset();
        self.wheel.reset();
    }
}
