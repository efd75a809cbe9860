//! Hold-timer state machine for the haptic alert output.

use crate::protocol::AlertFrame;

/// Output state driven from received alert commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
    pub active: bool,
    pub intensity: u8,
    /// Absolute time in ms before which the alert cannot be switched off.
    pub hold_until_ms: u64,
}

/// Inactive until an on-command arrives; stays active at least until the
/// requested hold elapses. Off-commands received during the hold are ignored.
#[derive(Debug, Clone, Default)]
pub struct AlertStateMachine {
    state: AlertState,
}

impl AlertStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Apply one decoded command addressed to this node.
    pub fn on_command(&mut self, cmd: &AlertFrame, now_ms: u64) {
        if cmd.alert_on {
            let was_active = self.state.active;
            self.state = AlertState {
                active: true,
                intensity: cmd.intensity,
                hold_until_ms: now_ms.saturating_add(cmd.hold_ms as u64),
            };
            if !was_active {
                log::info!("Alert on: intensity={} hold={}ms", cmd.intensity, cmd.hold_ms);
            }
        } else if now_ms >= self.state.hold_until_ms {
            self.deactivate();
        } else {
            log::debug!(
                "Alert off ignored, hold runs {}ms more",
                self.state.hold_until_ms - now_ms
            );
        }
    }

    /// Time-driven transition back to inactive.
    pub fn expire(&mut self, now_ms: u64) {
        if self.state.active && now_ms >= self.state.hold_until_ms {
            self.deactivate();
        }
    }

    /// One tick: optional command first, then expiry. Returns the output level.
    pub fn update(&mut self, cmd: Option<&AlertFrame>, now_ms: u64) -> bool {
        if let Some(cmd) = cmd {
            self.on_command(cmd, now_ms);
        }
        self.expire(now_ms);
        self.state.active
    }

    fn deactivate(&mut self) {
        if self.state.active {
            log::info!("Alert off");
        }
        self.state.active = false;
        self.state.intensity = 0;
    }
}
