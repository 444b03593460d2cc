/*!
 # LED command driver

 Composes EC transactions into the multi-step LED controller commands. The
 two controller families share the command set but differ in how a single
 value is written and in what "on" has to re-arm; [`LedProtocol`] captures
 that difference and [`CommandDriver`] builds everything else on top.

 Commands are best effort: a failed step is logged and skipped, and the
 writer task's next pass re-sends the full state.
*/

use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, instrument, trace, warn};

use crate::color::{self, Rgb};
use crate::config::PlatformConfig;
use crate::model::Family;
use crate::protocol::*;
use crate::transport::{Register, Transport};
use crate::Result;

/// Who is driving the LEDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Device default, firmware animations active
    Firmware,
    /// Held by the driver, static color driven
    DriverActive,
    /// Explicitly handed back to firmware by the driver
    DriverReleased,
}

/// Family-specific LED controller primitives
#[async_trait]
pub trait LedProtocol: Send + Sync {
    /// Writes one position of a group, including any commit and settle delay
    async fn set(&self, group: Group, pos: u8, value: u8) -> Result<()>;

    /// Takes the LEDs away from firmware
    async fn hold(&self) -> Result<()>;

    /// Hands the LEDs back to firmware
    async fn release(&self) -> Result<()>;

    /// Writes a list of (group, position, value) steps, skipping failures
    async fn run(&self, steps: &[(Group, u8, u8)]) {
        for &(group, pos, value) in steps {
            if let Err(e) = self.set(group, pos, value).await {
                warn!(
                    "LED write {:?}[{:#04x}] = {:#04x} failed: {}",
                    group, pos, value, e
                );
            }
        }
    }

    /// Ends a command sequence
    async fn close(&self) {
        self.run(&[(Group::LeftRight, 0x00, 0x00)]).await;
    }

    /// Enables output for both rings
    async fn on(&self) {
        self.run(&[
            (Group::Left, CMD_ENABLE_ADDR, CMD_ENABLE_ON),
            (Group::Right, CMD_ENABLE_ADDR, CMD_ENABLE_ON),
        ])
        .await;
        self.close().await;
    }

    async fn off(&self) {
        self.run(&[
            (Group::Left, CMD_ENABLE_ADDR, CMD_ENABLE_OFF),
            (Group::Right, CMD_ENABLE_ADDR, CMD_ENABLE_OFF),
        ])
        .await;
        self.close().await;
    }

    /// Reverts the controller to its power-on defaults
    async fn reset(&self) {
        self.run(&[
            (Group::Left, CMD_ENABLE_ADDR, CMD_ENABLE_RESET),
            (Group::Right, CMD_ENABLE_ADDR, CMD_ENABLE_RESET),
        ])
        .await;
        self.close().await;
    }
}

/// Controller embedded in or behind the ACPI EC
pub struct LegacyProtocol {
    transport: Transport,
    write_delay: Duration,
}

impl LegacyProtocol {
    pub fn new(transport: Transport, write_delay: Duration) -> Self {
        Self {
            transport,
            write_delay,
        }
    }
}

#[async_trait]
impl LedProtocol for LegacyProtocol {
    async fn set(&self, group: Group, pos: u8, value: u8) -> Result<()> {
        trace!("legacy set {:?}[{:#04x}] = {:#04x}", group, pos, value);
        self.transport
            .write_direct_batch(&[
                (LED_PWM_CONTROL, group.code()),
                (LED_POS, pos),
                (LED_BRIGHTNESS, value),
                (LED_MODE_REG, LED_MODE_WRITE),
            ])
            .await?;

        time::sleep(self.write_delay).await;

        self.transport
            .write(Register::Direct(LED_MODE_REG), LED_MODE_HOLD)
            .await
    }

    async fn hold(&self) -> Result<()> {
        self.transport
            .write(Register::Direct(LED_MODE_REG), LED_MODE_HOLD)
            .await
    }

    async fn release(&self) -> Result<()> {
        self.transport
            .write(Register::Direct(LED_MODE_REG), LED_MODE_RELEASE)
            .await
    }
}

/// Dedicated LED microcontroller reached through EC RAM
pub struct ModernProtocol {
    transport: Transport,
    write_delay: Duration,
}

impl ModernProtocol {
    pub fn new(transport: Transport, write_delay: Duration) -> Self {
        Self {
            transport,
            write_delay,
        }
    }
}

#[async_trait]
impl LedProtocol for ModernProtocol {
    async fn set(&self, group: Group, pos: u8, value: u8) -> Result<()> {
        let (base, close) = match group {
            Group::Left => (MC_ADDR_LEFT, MC_CLOSE_LEFT),
            _ => (MC_ADDR_RIGHT, MC_CLOSE_RIGHT),
        };
        trace!("modern set {:?}[{:#04x}] = {:#04x}", group, pos, value);

        self.transport
            .write(Register::Ram(base.wrapping_add(pos)), value)
            .await?;
        self.transport
            .write(Register::Ram(close), MC_CLOSE_VALUE)
            .await?;

        time::sleep(self.write_delay).await;
        Ok(())
    }

    async fn hold(&self) -> Result<()> {
        self.transport
            .write(Register::Ram(MC_MODE_ADDR), MC_MODE_HOLD)
            .await?;
        self.close().await;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.transport
            .write(Register::Ram(MC_MODE_ADDR), MC_MODE_RELEASE)
            .await
    }

    /// Also disables the firmware animation, fade and per-sector modes and
    /// arms the watchdog so firmware does not reassert its default pattern.
    async fn on(&self) {
        let mut steps = vec![
            (Group::Left, CMD_ENABLE_ADDR, CMD_ENABLE_ON),
            (Group::Right, CMD_ENABLE_ADDR, CMD_ENABLE_ON),
            (Group::Left, CMD_PATTERN_ADDR, CMD_PATTERN_OFF),
            (Group::Right, CMD_PATTERN_ADDR, CMD_PATTERN_OFF),
            (Group::Left, CMD_FADE_ADDR, CMD_FADE_OFF),
            (Group::Right, CMD_FADE_ADDR, CMD_FADE_OFF),
        ];
        for sector in CMD_SECTOR_ADDRS {
            steps.push((Group::Left, sector, CMD_SECTOR_RGB));
            steps.push((Group::Right, sector, CMD_SECTOR_RGB));
        }
        steps.push((Group::Left, CMD_WATCHDOG_ADDR, CMD_WATCHDOG_ON));
        steps.push((Group::Right, CMD_WATCHDOG_ADDR, CMD_WATCHDOG_ON));

        self.run(&steps).await;
        self.close().await;
    }
}

/// Drives one model's LED controller
pub struct CommandDriver {
    entry: &'static ProtocolEntry,
    protocol: Box<dyn LedProtocol>,
    state: RwLock<ControlState>,
}

impl CommandDriver {
    /// Creates a driver speaking the model family's protocol
    pub fn new(entry: &'static ProtocolEntry, transport: Transport, config: &PlatformConfig) -> Self {
        let protocol: Box<dyn LedProtocol> = match entry.family {
            Family::Legacy => Box::new(LegacyProtocol::new(transport, config.legacy_write_delay)),
            Family::Modern => Box::new(ModernProtocol::new(transport, config.write_delay)),
        };
        Self::with_protocol(entry, protocol)
    }

    pub fn with_protocol(entry: &'static ProtocolEntry, protocol: Box<dyn LedProtocol>) -> Self {
        Self {
            entry,
            protocol,
            state: RwLock::new(ControlState::Firmware),
        }
    }

    pub fn entry(&self) -> &'static ProtocolEntry {
        self.entry
    }

    pub fn control_state(&self) -> ControlState {
        *self.state.read()
    }

    /// Holds the LEDs, resets the controller and turns output off
    #[instrument(skip(self), fields(model = %self.entry.model))]
    pub async fn take_control(&self) {
        debug!("Taking LED control");
        if let Err(e) = self.protocol.hold().await {
            warn!("Hold command failed: {}", e);
        }
        self.protocol.reset().await;
        self.protocol.off().await;

        *self.state.write() = ControlState::DriverActive;
        info!("LED control taken");
    }

    /// Resets the controller and hands the LEDs back to firmware
    #[instrument(skip(self), fields(model = %self.entry.model))]
    pub async fn release_control(&self) {
        debug!("Releasing LED control");
        self.protocol.reset().await;
        if let Err(e) = self.protocol.release().await {
            warn!("Release command failed: {}", e);
        }

        *self.state.write() = ControlState::DriverReleased;
        info!("LED control released to firmware");
    }

    /// Pushes one color to every zone of the model
    #[instrument(skip(self), fields(model = %self.entry.model))]
    pub async fn apply_color(&self, color: Rgb) {
        let zones = color::zone_colors(color, self.entry);
        debug!("Applying {} as {:?}", color, zones);

        self.protocol.on().await;
        self.intensity(Group::Left, zones.left, self.entry.left_zones)
            .await;
        self.intensity(Group::Right, zones.right, self.entry.right_zones)
            .await;
        if let (Some(button), Some(map)) = (zones.button, self.entry.button_zones) {
            self.intensity(Group::Button, button, map).await;
        }
    }

    async fn intensity(&self, group: Group, color: Rgb, zones: ZoneMap) {
        let mut steps = Vec::with_capacity(zones.len() * 3);
        for write in color::zone_writes(color, zones) {
            for (i, value) in write.color.channels().into_iter().enumerate() {
                steps.push((group, write.zone + i as u8, value));
            }
        }
        self.protocol.run(&steps).await;
        self.protocol.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;
    use crate::model::Model;
    use crate::protocol;
    use crate::transport::EcBus;
    use crate::Error;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records primitive calls; the driver-level sequencing is what's tested
    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LedProtocol for Recorder {
        async fn set(&self, group: Group, pos: u8, value: u8) -> Result<()> {
            self.calls
                .lock()
                .push(format!("set {:?} {} {}", group, pos, value));
            Ok(())
        }

        async fn hold(&self) -> Result<()> {
            self.calls.lock().push("hold".into());
            Ok(())
        }

        async fn release(&self) -> Result<()> {
            self.calls.lock().push("release".into());
            Ok(())
        }
    }

    fn fast_config() -> PlatformConfig {
        PlatformConfig {
            write_delay: Duration::ZERO,
            legacy_write_delay: Duration::ZERO,
            ..PlatformConfig::default()
        }
    }

    fn modern_driver(bus: &Arc<MockBus>) -> CommandDriver {
        let transport = Transport::new(bus.clone(), Duration::from_millis(50));
        CommandDriver::new(protocol::lookup(Model::Slide).unwrap(), transport, &fast_config())
    }

    /// RAM writes addressed to the left ring's color positions
    fn left_zone_writes(bus: &MockBus) -> Vec<(u8, u8)> {
        bus.ram_writes()
            .into_iter()
            .filter(|&(offset, _)| (MC_ADDR_LEFT + 3..=MC_ADDR_LEFT + 14).contains(&offset))
            .collect()
    }

    #[tokio::test]
    async fn modern_red_writes_zones_in_ascending_order() {
        let bus = Arc::new(MockBus::new());
        let driver = modern_driver(&bus);

        driver.apply_color(Rgb::new(255, 0, 0)).await;

        let red = color::calibrate(Rgb::new(255, 0, 0), &[BASE_SCALE]).r;
        let expected: Vec<(u8, u8)> = [3u8, 6, 9, 12]
            .iter()
            .flat_map(|&z| {
                [
                    (MC_ADDR_LEFT + z, red),
                    (MC_ADDR_LEFT + z + 1, 0),
                    (MC_ADDR_LEFT + z + 2, 0),
                ]
            })
            .collect();
        assert_eq!(left_zone_writes(&bus), expected);

        // one "on" sequence: a single watchdog arm per ring
        let watchdog = bus
            .ram_writes()
            .iter()
            .filter(|&&w| w == (MC_ADDR_LEFT + CMD_WATCHDOG_ADDR, CMD_WATCHDOG_ON))
            .count();
        assert_eq!(watchdog, 1);
    }

    #[tokio::test]
    async fn modern_set_writes_value_then_close() {
        let bus = Arc::new(MockBus::new());
        let driver = modern_driver(&bus);

        driver
            .protocol
            .set(Group::Right, CMD_ENABLE_ADDR, CMD_ENABLE_OFF)
            .await
            .unwrap();

        assert_eq!(
            bus.ram_writes(),
            vec![
                (MC_ADDR_RIGHT + CMD_ENABLE_ADDR, CMD_ENABLE_OFF),
                (MC_CLOSE_RIGHT, MC_CLOSE_VALUE)
            ]
        );
    }

    #[tokio::test]
    async fn apply_sequence_per_group() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let driver = CommandDriver::with_protocol(
            protocol::lookup(Model::Ayaneo2).unwrap(),
            Box::new(recorder),
        );

        driver.apply_color(Rgb::new(255, 0, 0)).await;

        let calls = calls.lock().clone();
        // on (2 enables + close), then 12 writes + close per ring
        assert_eq!(calls.len(), 3 + 13 + 13);
        assert_eq!(calls[0], "set Left 2 177");
        assert_eq!(calls[2], "set LeftRight 0 0");
        assert_eq!(calls[3], "set Left 3 192");
        assert_eq!(calls[4], "set Left 4 0");
        assert_eq!(calls[14], "set Left 14 0");
        assert_eq!(calls[15], "set LeftRight 0 0");
        assert_eq!(calls[16], "set Right 3 192");
        assert_eq!(calls[28], "set LeftRight 0 0");
    }

    #[tokio::test]
    async fn kun_remaps_channels_and_writes_button() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let driver =
            CommandDriver::with_protocol(protocol::lookup(Model::Kun).unwrap(), Box::new(recorder));

        driver.apply_color(Rgb::new(255, 0, 0)).await;

        let calls = calls.lock().clone();
        // zone 3 is wired G, R, B
        assert_eq!(calls[3], "set Left 3 0");
        assert_eq!(calls[4], "set Left 4 192");
        // button zone 12 is wired B, R, G
        let button: Vec<&String> = calls.iter().filter(|c| c.contains("Button")).collect();
        assert_eq!(button, vec!["set Button 12 0", "set Button 13 192", "set Button 14 0"]);
        assert_eq!(calls.last().unwrap(), "set LeftRight 0 0");
    }

    #[tokio::test]
    async fn take_and_release_update_control_state() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let driver = CommandDriver::with_protocol(
            protocol::lookup(Model::Geek).unwrap(),
            Box::new(recorder),
        );
        assert_eq!(driver.control_state(), ControlState::Firmware);

        driver.take_control().await;
        assert_eq!(driver.control_state(), ControlState::DriverActive);
        {
            let calls = calls.lock();
            assert_eq!(calls[0], "hold");
            assert_eq!(calls[1], format!("set Left {} {}", CMD_ENABLE_ADDR, CMD_ENABLE_RESET));
            assert_eq!(calls[4], format!("set Left {} {}", CMD_ENABLE_ADDR, CMD_ENABLE_OFF));
        }

        calls.lock().clear();
        driver.release_control().await;
        assert_eq!(driver.control_state(), ControlState::DriverReleased);
        assert_eq!(calls.lock().last().unwrap(), "release");
    }

    #[tokio::test]
    async fn legacy_set_commits_then_holds() {
        let bus = Arc::new(MockBus::new());
        let transport = Transport::new(bus.clone(), Duration::from_millis(50));
        let legacy = LegacyProtocol::new(transport, Duration::ZERO);

        legacy.set(Group::Left, 3, 0x80).await.unwrap();

        assert_eq!(
            bus.ec_writes(),
            vec![
                (LED_PWM_CONTROL, 0x01),
                (LED_POS, 3),
                (LED_BRIGHTNESS, 0x80),
                (LED_MODE_REG, LED_MODE_WRITE),
                (LED_MODE_REG, LED_MODE_HOLD),
            ]
        );
    }

    #[tokio::test]
    async fn failed_steps_are_skipped_not_retried() {
        let bus = Arc::new(MockBus::new());
        let transport = Transport::new(bus.clone(), Duration::from_millis(50));
        let driver = CommandDriver::new(
            protocol::lookup(Model::Ayaneo2).unwrap(),
            transport,
            &fast_config(),
        );

        // the first write of the first step fails, everything after runs
        bus.fail_next(1);
        driver.apply_color(Rgb::new(0, 0, 255)).await;

        let writes = bus.ec_writes();
        // 29 steps of 5 writes, minus the aborted step
        assert_eq!(writes.len(), 28 * 5);
        assert_eq!(
            writes[0],
            (LED_PWM_CONTROL, Group::Right.code())
        );
    }

    #[tokio::test]
    async fn busy_lock_skips_the_step() {
        let bus = Arc::new(MockBus::new());
        let legacy = LegacyProtocol::new(
            Transport::new(bus.clone(), Duration::from_millis(5)),
            Duration::ZERO,
        );

        let held = bus.lock().acquire(Duration::from_secs(1)).await.unwrap();
        let err = legacy.set(Group::Left, 3, 1).await.unwrap_err();
        drop(held);

        assert!(matches!(err, Error::TransportBusy(_)));
        assert!(bus.ops().is_empty());
    }
}
