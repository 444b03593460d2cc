/*!
 # Configuration

 Timing constants for the EC protocol and the user-selectable suspend mode.
 The delays are settling times required by real firmware; lowering them is
 only meant for tests against [`crate::MockBus`].
*/

use std::str::FromStr;
use std::time::Duration;

use crate::charge::ChargeBehavior;
use crate::Error;

/// What happens to the LEDs while the system sleeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendMode {
    /// Hand control back to firmware; LEDs blink and show charging
    #[default]
    Oem,
    /// Keep control and leave the current color on
    Keep,
    /// Keep control with the LEDs off
    Off,
}

impl SuspendMode {
    pub const ALL: [SuspendMode; 3] = [SuspendMode::Oem, SuspendMode::Keep, SuspendMode::Off];

    pub fn as_str(self) -> &'static str {
        match self {
            SuspendMode::Oem => "oem",
            SuspendMode::Keep => "keep",
            SuspendMode::Off => "off",
        }
    }

    /// Lists every mode with the active one bracketed, e.g. `[oem] keep off`
    pub fn listing(self) -> String {
        Self::ALL
            .iter()
            .map(|&mode| {
                if mode == self {
                    format!("[{}]", mode.as_str())
                } else {
                    mode.as_str().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for SuspendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuspendMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == text)
            .ok_or_else(|| Error::InvalidConfigValue {
                kind: "suspend_mode",
                value: s.to_string(),
            })
    }
}

/// Platform configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// How long to wait for the EC lock before a transaction is abandoned
    pub lock_timeout: Duration,
    /// Settle time between the write and hold commits on legacy controllers
    pub legacy_write_delay: Duration,
    /// Settle time after each write on the LED microcontroller
    pub write_delay: Duration,
    /// Shortest sleep of an idle writer task
    pub writer_idle_min: Duration,
    /// Longest sleep of an idle writer task
    pub writer_idle_max: Duration,
    /// Time firmware gets to observe a control change on suspend and resume
    pub settle_delay: Duration,
    /// How often the charge task looks for a new charge behaviour
    pub charge_poll_interval: Duration,
    pub suspend_mode: SuspendMode,
    /// Charge behaviour applied once the charge task starts
    pub charge_behavior: ChargeBehavior,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(500),
            legacy_write_delay: Duration::from_millis(2),
            write_delay: Duration::from_millis(1),
            writer_idle_min: Duration::from_millis(10),
            writer_idle_max: Duration::from_millis(20),
            settle_delay: Duration::from_millis(100),
            charge_poll_interval: Duration::from_secs(30),
            suspend_mode: SuspendMode::Oem,
            charge_behavior: ChargeBehavior::Auto,
        }
    }
}
