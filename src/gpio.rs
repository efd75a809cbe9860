//! Digital output for the alert and the optional recenter button input.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Active-high output reflecting the alert state.
pub trait AlertOutput {
    fn set(&mut self, on: bool);
}

/// Polled once per tick. Only consulted when the board has a button.
pub trait ButtonInput {
    fn is_pressed(&mut self) -> bool;
}

/// Output that logs level changes instead of driving a pin.
#[derive(Debug, Default)]
pub struct LogOutput {
    level: Option<bool>,
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertOutput for LogOutput {
    fn set(&mut self, on: bool) {
        if self.level != Some(on) {
            log::info!("Alert output {}", if on { "HIGH" } else { "LOW" });
            self.level = Some(on);
        }
    }
}

/// Output level shared with an observer.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput {
    level: Arc<AtomicBool>,
}

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

impl AlertOutput for SharedOutput {
    fn set(&mut self, on: bool) {
        self.level.store(on, Ordering::Relaxed);
    }
}

/// Board without a button.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoButton;

impl ButtonInput for NoButton {
    fn is_pressed(&mut self) -> bool {
        false
    }
}

/// Replays a fixed sequence of levels, one per poll, then holds the last.
#[derive(Debug, Default, Clone)]
pub struct ScriptedButton {
    levels: VecDeque<bool>,
    last: bool,
}

impl ScriptedButton {
    pub fn new(levels: impl IntoIterator<Item = bool>) -> Self {
        Self {
            levels: levels.into_iter().collect(),
            last: false,
        }
    }

    /// Press for `held` polls after `idle` released polls, then release.
    pub fn press(idle: usize, held: usize) -> Self {
        let levels = std::iter::repeat(false)
            .take(idle)
            .chain(std::iter::repeat(true).take(held))
            .chain(std::iter::once(false));
        Self::new(levels)
    }
}

impl ButtonInput for ScriptedButton {
    fn is_pressed(&mut self) -> bool {
        if let Some(level) = self.levels.pop_front() {
            self.last = level;
        }
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_press() {
        let mut b = ScriptedButton::press(1, 2);
        let polled: Vec<bool> = (0..6).map(|_| b.is_pressed()).collect();
        assert_eq!(polled, vec![false, true, true, false, false, false]);
    }

    #[test]
    fn test_shared_output_is_observable() {
        let out = SharedOutput::new();
        let mut pin = out.clone();
        pin.set(true);
        assert!(out.is_on());
        pin.set(false);
        assert!(!out.is_on());
    }
}
