//! Multicolor LED endpoint.
//!
//! Mirrors a Linux multicolor LED class device: one brightness scaled against
//! per-channel intensities. Setters only publish into the writer mailbox and
//! never touch hardware.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::color::Rgb;
use crate::writer::ColorMailbox;

/// The chassis LED seen by the rest of the system
pub struct MulticolorLed {
    brightness: AtomicU8,
    intensity: RwLock<[u8; 3]>,
    mailbox: Arc<ColorMailbox>,
}

impl MulticolorLed {
    pub const NAME: &'static str = "multicolor:chassis";
    pub const MAX_BRIGHTNESS: u8 = 255;

    /// Starts dark, with brightness and every intensity at zero
    pub fn new(mailbox: Arc<ColorMailbox>) -> Self {
        Self {
            brightness: AtomicU8::new(0),
            intensity: RwLock::new([0; 3]),
            mailbox,
        }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn max_brightness(&self) -> u8 {
        Self::MAX_BRIGHTNESS
    }

    /// Sets the brightness and publishes the resulting color
    pub fn set_brightness(&self, brightness: u8) {
        // held across the publish so the last color out matches the last
        // brightness and intensity stored
        let intensity = self.intensity.write();
        self.brightness.store(brightness, Ordering::Relaxed);
        self.publish(brightness, *intensity);
    }

    /// Sets the per-channel intensities and republishes at the current
    /// brightness
    pub fn set_multi_intensity(&self, intensity: [u8; 3]) {
        let mut current = self.intensity.write();
        *current = intensity;
        self.publish(self.brightness(), intensity);
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn multi_intensity(&self) -> [u8; 3] {
        *self.intensity.read()
    }

    fn publish(&self, brightness: u8, intensity: [u8; 3]) {
        let max = u16::from(Self::MAX_BRIGHTNESS);
        let color =
            Rgb::from_channels(intensity.map(|i| (u16::from(brightness) * u16::from(i) / max) as u8));
        debug!("{} -> {}", Self::NAME, color);
        self.mailbox.publish(color);
    }
}
