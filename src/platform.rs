/*!
 # Platform lifecycle

 [`Platform`] ties one board together: it resolves the model, owns the
 shared EC transport, and starts and stops the writer and charge tasks
 around probe, suspend, resume and shutdown. Hardware is only touched by the
 control hand-off steps here and by the background tasks.
*/

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, instrument};

use crate::charge::{self, ChargeBehavior, ChargeControl, ChargeTask};
use crate::config::{PlatformConfig, SuspendMode};
use crate::driver::{CommandDriver, ControlState};
use crate::led::MulticolorLed;
use crate::model::{BoardIdentity, Model};
use crate::protocol::{self, ProtocolEntry};
use crate::transport::{EcBus, Transport};
use crate::writer::{ColorMailbox, WriterTask};
use crate::{Error, Result};

#[derive(Default)]
struct Tasks {
    writer: Option<WriterTask>,
    charge: Option<ChargeTask>,
}

/// A probed AYANEO board
pub struct Platform {
    entry: &'static ProtocolEntry,
    transport: Transport,
    driver: Arc<CommandDriver>,
    mailbox: Arc<ColorMailbox>,
    led: MulticolorLed,
    charge: Arc<ChargeControl>,
    bypass_available: bool,
    suspend_mode: RwLock<SuspendMode>,
    config: PlatformConfig,
    tasks: Mutex<Tasks>,
}

impl Platform {
    /// Identifies the board, takes LED control and starts the background
    /// tasks.
    ///
    /// Unsupported boards fail before any hardware access.
    #[instrument(skip(bus, config), fields(board = %board.name))]
    pub async fn probe(board: &BoardIdentity, bus: Arc<dyn EcBus>, config: PlatformConfig) -> Result<Self> {
        let model = Model::from_board(board)?;
        let entry = protocol::lookup(model).ok_or_else(|| Error::UnsupportedModel {
            vendor: board.vendor.clone(),
            name: board.name.clone(),
        })?;
        info!("Detected {} ({:?} controller)", model, entry.family);

        let transport = Transport::new(bus, config.lock_timeout);
        let driver = Arc::new(CommandDriver::new(entry, transport.clone(), &config));
        driver.take_control().await;

        let bypass_available = match &entry.bypass {
            Some(spec) => charge::bypass_available(&transport, spec).await,
            None => false,
        };

        let mailbox = Arc::new(ColorMailbox::new());
        let platform = Self {
            entry,
            transport,
            driver,
            led: MulticolorLed::new(mailbox.clone()),
            mailbox,
            charge: Arc::new(ChargeControl::new(config.charge_behavior)),
            bypass_available,
            suspend_mode: RwLock::new(config.suspend_mode),
            config,
            tasks: Mutex::new(Tasks::default()),
        };
        platform.start_tasks().await;

        Ok(platform)
    }

    pub fn model(&self) -> Model {
        self.entry.model
    }

    pub fn entry(&self) -> &'static ProtocolEntry {
        self.entry
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// The LED endpoint
    pub fn led(&self) -> &MulticolorLed {
        &self.led
    }

    /// Charge behaviour requests; only acted on when bypass is available
    pub fn charge(&self) -> &ChargeControl {
        &self.charge
    }

    /// Whether the EC firmware supports bypass charging
    pub fn bypass_available(&self) -> bool {
        self.bypass_available
    }

    pub fn control_state(&self) -> ControlState {
        self.driver.control_state()
    }

    /// Color updates not yet written to hardware
    pub fn pending_updates(&self) -> u32 {
        self.mailbox.pending()
    }

    pub fn suspend_mode(&self) -> SuspendMode {
        *self.suspend_mode.read()
    }

    pub fn set_suspend_mode(&self, mode: SuspendMode) {
        *self.suspend_mode.write() = mode;
    }

    /// Parses and stores a suspend mode; invalid text changes nothing
    pub fn set_suspend_mode_str(&self, text: &str) -> Result<SuspendMode> {
        let mode = text.parse()?;
        self.set_suspend_mode(mode);
        Ok(mode)
    }

    /// All suspend modes with the active one bracketed
    pub fn suspend_mode_listing(&self) -> String {
        self.suspend_mode().listing()
    }

    /// Records a charge behaviour request
    pub fn set_charge_behavior(&self, behavior: ChargeBehavior) {
        self.charge.set(behavior);
    }

    /// Stops the writer, applies the suspend mode, then stops the charge
    /// task. A writer that fails to join does not keep the mode from being
    /// applied; its error is returned afterwards.
    #[instrument(skip(self))]
    pub async fn suspend(&self) -> Result<()> {
        let mode = self.suspend_mode();
        let mut tasks = self.tasks.lock().await;
        let writer = match tasks.writer.take() {
            Some(writer) => writer.stop().await,
            None => Ok(()),
        };

        match mode {
            SuspendMode::Oem => self.driver.release_control().await,
            SuspendMode::Keep => debug!("Leaving LEDs as they are"),
            SuspendMode::Off => self.driver.take_control().await,
        }
        time::sleep(self.config.settle_delay).await;

        let charge = match tasks.charge.take() {
            Some(charge) => charge.stop().await,
            None => Ok(()),
        };
        info!("Suspended with mode {}", mode);
        writer.and(charge)
    }

    /// Retakes control and restarts the tasks, reapplying the last color.
    ///
    /// Tasks still running are stopped first so the hand-off never races the
    /// writer.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<()> {
        let stopped = self.stop_tasks().await;
        self.driver.take_control().await;
        self.mailbox.mark_pending();
        time::sleep(self.config.settle_delay).await;
        self.start_tasks().await;
        info!("Resumed");
        stopped
    }

    /// Stops both tasks and hands the LEDs back to firmware
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let stopped = self.stop_tasks().await;
        self.driver.release_control().await;
        info!("Shut down");
        stopped
    }

    /// Stops both tasks but leaves the LEDs under driver control, so the
    /// last color stays lit after the process exits
    pub async fn detach(&self) -> Result<()> {
        self.stop_tasks().await
    }

    /// Waits until the writer has drained every pending update. Returns
    /// immediately when the writer is not running.
    pub async fn flush(&self) {
        loop {
            if self.mailbox.pending() == 0 || self.tasks.lock().await.writer.is_none() {
                return;
            }
            time::sleep(self.config.writer_idle_min).await;
        }
    }

    async fn start_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.writer.is_none() {
            tasks.writer = Some(WriterTask::spawn(
                self.driver.clone(),
                self.mailbox.clone(),
                (self.config.writer_idle_min, self.config.writer_idle_max),
            ));
        }
        match self.entry.bypass {
            Some(spec) if self.bypass_available && tasks.charge.is_none() => {
                tasks.charge = Some(ChargeTask::spawn(
                    self.transport.clone(),
                    spec,
                    self.charge.clone(),
                    self.config.charge_poll_interval,
                ));
            }
            _ => {}
        }
    }

    async fn stop_tasks(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let (writer, charge) = (tasks.writer.take(), tasks.charge.take());
        let (writer, charge) = futures::join!(
            async {
                match writer {
                    Some(writer) => writer.stop().await,
                    None => Ok(()),
                }
            },
            async {
                match charge {
                    Some(charge) => charge.stop().await,
                    None => Ok(()),
                }
            }
        );
        writer.and(charge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LedProtocol;
    use crate::mock::MockBus;
    use crate::protocol::Group;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Panics on the first zone write, so a running writer dies mid-apply
    struct FaultyZones {
        calls: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LedProtocol for FaultyZones {
        async fn set(&self, group: Group, pos: u8, value: u8) -> Result<()> {
            assert!(pos != 3, "zone write");
            self.calls.lock().push(format!("set {:?} {} {}", group, pos, value));
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

    fn platform(protocol: Box<dyn LedProtocol>) -> Platform {
        let entry = protocol::lookup(Model::Geek).unwrap();
        let config = PlatformConfig {
            writer_idle_min: Duration::from_millis(1),
            writer_idle_max: Duration::from_millis(2),
            settle_delay: Duration::from_millis(1),
            ..PlatformConfig::default()
        };
        let mailbox = Arc::new(ColorMailbox::new());
        Platform {
            entry,
            transport: Transport::new(Arc::new(MockBus::new()), config.lock_timeout),
            driver: Arc::new(CommandDriver::with_protocol(entry, protocol)),
            led: MulticolorLed::new(mailbox.clone()),
            mailbox,
            charge: Arc::new(ChargeControl::default()),
            bypass_available: false,
            suspend_mode: RwLock::new(SuspendMode::Off),
            config,
            tasks: Mutex::new(Tasks::default()),
        }
    }

    #[tokio::test]
    async fn suspend_applies_mode_even_if_writer_failed() {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let platform = platform(Box::new(FaultyZones {
            calls: calls.clone(),
        }));
        platform.start_tasks().await;

        platform.led().set_multi_intensity([255, 255, 255]);
        platform.led().set_brightness(255);
        tokio::time::sleep(Duration::from_millis(30)).await;
        calls.lock().clear();

        let result = platform.suspend().await;

        assert!(matches!(result, Err(Error::TaskJoin(_))));
        assert_eq!(calls.lock().first().map(String::as_str), Some("hold"));
        assert_eq!(platform.control_state(), ControlState::DriverActive);
        assert!(platform.tasks.lock().await.writer.is_none());
    }
}
