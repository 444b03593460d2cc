/*!
 # AYANEO Platform LED Controller Library

 A Rust library for driving the chassis RGB LEDs (and, where the embedded
 controller firmware allows it, the bypass-charge switch) of AYANEO x86
 handhelds. Supports the legacy ACPI-controlled boards (AIR, AIR Pro, AIR 1S,
 AYANEO 2/2S, GEEK/GEEK 1S, KUN, AIR Plus Mendocino) and the boards with a
 dedicated LED microcontroller (AIR Plus, Slide).

 ## Features

 * Exclusive LED control hand-off between firmware and the host
 * Static RGB color with per-model brightness calibration
 * Non-blocking color updates drained by a background writer task
 * Suspend modes (oem, keep, off) and resume restore
 * Bypass charging on supported firmware

 ## Example

 ```rust,no_run
 use ayaneo_platform::*;
 use std::sync::Arc;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let board = BoardIdentity::from_sysfs()?;
     let bus = Arc::new(DevPortBus::open()?);
     let platform = Platform::probe(&board, bus, PlatformConfig::default()).await?;

     // Returns immediately, the writer task pushes the color to the EC
     platform.led().set_multi_intensity([255, 0, 0]);
     platform.led().set_brightness(200);

     platform.shutdown().await?;
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the AYANEO platform library
#[derive(Error, Debug)]
pub enum Error {
    /// The platform-wide EC lock was not acquired within the timeout
    #[error("EC lock not acquired within {0:?}")]
    TransportBusy(std::time::Duration),

    /// A raw port or EC register access failed
    #[error("EC transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    /// The board has no protocol table entry
    #[error("Unsupported board: {vendor} {name}")]
    UnsupportedModel {
        /// DMI board vendor
        vendor: String,
        /// DMI board name
        name: String,
    },

    /// A configuration value was not one of the accepted values
    #[error("Invalid {kind} value: {value:?}")]
    InvalidConfigValue {
        /// Which setting was written
        kind: &'static str,
        /// The rejected input
        value: String,
    },

    /// A background task panicked while it was being stopped
    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

pub mod charge;
pub mod color;
pub mod config;
pub mod driver;
pub mod led;
pub mod mock;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod transport;
pub mod writer;

// Re-export key types
pub use charge::{ChargeBehavior, ChargeControl};
pub use color::Rgb;
pub use config::{PlatformConfig, SuspendMode};
pub use driver::{CommandDriver, ControlState};
pub use led::MulticolorLed;
pub use mock::{BusOp, MockBus};
pub use model::{BoardIdentity, Family, Model};
pub use platform::Platform;
pub use protocol::ProtocolEntry;
pub use transport::{DevPortBus, EcBus, EcLock, Register, Transport};
