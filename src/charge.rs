/*!
 # Bypass charging

 Some boards can power the system from the charger without charging the
 battery. The switch is a single EC byte, only safe to touch on firmware at or
 above a per-model version. [`ChargeTask`] polls the requested
 [`ChargeBehavior`] and writes the switch when it changes.
*/

use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::protocol::{BypassSpec, BYPASS_CHARGE_CLOSE, BYPASS_CHARGE_OPEN};
use crate::transport::Transport;
use crate::writer::{stop_pair, StopHandle, StopSignal};
use crate::{Error, Result};

/// Requested charging behaviour while on external power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeBehavior {
    /// Charge the battery normally
    #[default]
    Auto,
    /// Run from the charger and leave the battery alone
    Inhibit,
}

impl ChargeBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            ChargeBehavior::Auto => "auto",
            ChargeBehavior::Inhibit => "inhibit-charge",
        }
    }
}

impl std::fmt::Display for ChargeBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChargeBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "auto" => Ok(ChargeBehavior::Auto),
            "inhibit-charge" | "inhibit" => Ok(ChargeBehavior::Inhibit),
            _ => Err(Error::InvalidConfigValue {
                kind: "charge_behaviour",
                value: s.to_string(),
            }),
        }
    }
}

/// Requested and last applied charge behaviour
#[derive(Debug, Default)]
pub struct ChargeControl {
    behavior: RwLock<ChargeBehavior>,
    applied: RwLock<Option<ChargeBehavior>>,
}

impl ChargeControl {
    pub fn new(behavior: ChargeBehavior) -> Self {
        Self {
            behavior: RwLock::new(behavior),
            applied: RwLock::new(None),
        }
    }

    pub fn get(&self) -> ChargeBehavior {
        *self.behavior.read()
    }

    /// Records a new request; the charge task picks it up on its next poll
    pub fn set(&self, behavior: ChargeBehavior) {
        *self.behavior.write() = behavior;
    }

    /// Parses and records a textual request. Invalid text leaves the current
    /// request untouched.
    pub fn set_str(&self, text: &str) -> Result<ChargeBehavior> {
        let behavior = text.parse()?;
        self.set(behavior);
        Ok(behavior)
    }

    /// What the hardware was last successfully set to, if anything
    pub fn applied(&self) -> Option<ChargeBehavior> {
        *self.applied.read()
    }
}

/// Checks the EC firmware version against the model's minimum.
///
/// An unreadable version counts as unsupported.
#[instrument(skip_all)]
pub async fn bypass_available(transport: &Transport, spec: &BypassSpec) -> bool {
    let mut version = [0u8; 5];
    for (i, byte) in version.iter_mut().enumerate() {
        match transport.read(spec.version.offset(i as u8)).await {
            Ok(value) => *byte = value,
            Err(e) => {
                warn!("Could not read EC version: {}", e);
                return false;
            }
        }
    }

    let available = version >= spec.min_version;
    info!(
        "EC firmware {:02x?}, bypass charging {}",
        version,
        if available { "available" } else { "unavailable" }
    );
    available
}

/// Writes the bypass switch for `behavior`
pub async fn apply(transport: &Transport, spec: &BypassSpec, behavior: ChargeBehavior) -> Result<()> {
    let value = match behavior {
        ChargeBehavior::Inhibit => BYPASS_CHARGE_OPEN,
        ChargeBehavior::Auto => BYPASS_CHARGE_CLOSE,
    };
    transport.write(spec.control, value).await
}

/// Background task that keeps the bypass switch in line with
/// [`ChargeControl`]
pub struct ChargeTask {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl ChargeTask {
    pub fn spawn(
        transport: Transport,
        spec: BypassSpec,
        control: Arc<ChargeControl>,
        interval: Duration,
    ) -> Self {
        let (stop, signal) = stop_pair();
        let handle = tokio::spawn(Self::run(transport, spec, control, interval, signal));
        Self { stop, handle }
    }

    pub async fn stop(self) -> Result<()> {
        self.stop.request();
        self.handle.await?;
        Ok(())
    }

    async fn run(
        transport: Transport,
        spec: BypassSpec,
        control: Arc<ChargeControl>,
        interval: Duration,
        mut stop: StopSignal,
    ) {
        info!("Charge task started");
        // the hardware state is unknown after a (re)start
        let mut applied = None;

        while !stop.is_stopped() {
            let wanted = control.get();
            if applied != Some(wanted) {
                match apply(&transport, &spec, wanted).await {
                    Ok(()) => {
                        debug!("Charge behaviour set to {}", wanted);
                        applied = Some(wanted);
                        *control.applied.write() = applied;
                    }
                    Err(e) => warn!("Setting charge behaviour {} failed: {}", wanted, e),
                }
            }
            stop.sleep(interval).await;
        }

        info!("Charge task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;
    use crate::protocol::{BYPASS_CHARGE_CONTROL, EC_VERSION_BASE};
    use crate::transport::Register;

    const SPEC: BypassSpec = BypassSpec {
        version: Register::Direct(EC_VERSION_BASE),
        min_version: [0x08, 0x04, 0x00, 0x00, 0x2a],
        control: Register::Direct(BYPASS_CHARGE_CONTROL),
    };

    fn setup() -> (Arc<MockBus>, Transport) {
        let bus = Arc::new(MockBus::new());
        let transport = Transport::new(bus.clone(), Duration::from_millis(50));
        (bus, transport)
    }

    fn set_version(bus: &MockBus, version: [u8; 5]) {
        for (i, byte) in version.into_iter().enumerate() {
            bus.set_ec(EC_VERSION_BASE + i as u8, byte);
        }
    }

    #[test]
    fn parses_behaviour_text() {
        assert_eq!("auto\n".parse::<ChargeBehavior>().unwrap(), ChargeBehavior::Auto);
        assert_eq!("inhibit-charge".parse::<ChargeBehavior>().unwrap(), ChargeBehavior::Inhibit);
        assert_eq!("inhibit".parse::<ChargeBehavior>().unwrap(), ChargeBehavior::Inhibit);
        assert_eq!(ChargeBehavior::Inhibit.to_string(), "inhibit-charge");
    }

    #[test]
    fn invalid_text_keeps_request() {
        let control = ChargeControl::new(ChargeBehavior::Inhibit);
        assert!(matches!(
            control.set_str("force-discharge"),
            Err(Error::InvalidConfigValue { kind: "charge_behaviour", .. })
        ));
        assert_eq!(control.get(), ChargeBehavior::Inhibit);
    }

    #[tokio::test]
    async fn version_gate_compares_bytes_in_order() {
        let (bus, transport) = setup();

        set_version(&bus, [0x08, 0x04, 0x00, 0x00, 0x2a]);
        assert!(bypass_available(&transport, &SPEC).await);

        set_version(&bus, [0x08, 0x05, 0x00, 0x00, 0x00]);
        assert!(bypass_available(&transport, &SPEC).await);

        set_version(&bus, [0x08, 0x04, 0x00, 0x00, 0x29]);
        assert!(!bypass_available(&transport, &SPEC).await);
    }

    #[tokio::test]
    async fn unreadable_version_is_unsupported() {
        let (bus, transport) = setup();
        set_version(&bus, [0xff; 5]);
        bus.fail_next(1);

        assert!(!bypass_available(&transport, &SPEC).await);
    }

    #[tokio::test]
    async fn task_writes_only_on_change() {
        let (bus, transport) = setup();
        let control = Arc::new(ChargeControl::new(ChargeBehavior::Inhibit));

        let task = ChargeTask::spawn(transport, SPEC, control.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(bus.ec_writes(), vec![(BYPASS_CHARGE_CONTROL, BYPASS_CHARGE_OPEN)]);
        assert_eq!(control.applied(), Some(ChargeBehavior::Inhibit));

        control.set(ChargeBehavior::Auto);
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.stop().await.unwrap();

        assert_eq!(
            bus.ec_writes(),
            vec![
                (BYPASS_CHARGE_CONTROL, BYPASS_CHARGE_OPEN),
                (BYPASS_CHARGE_CONTROL, BYPASS_CHARGE_CLOSE)
            ]
        );
    }

    #[tokio::test]
    async fn failed_write_is_retried_next_poll() {
        let (bus, transport) = setup();
        let control = Arc::new(ChargeControl::new(ChargeBehavior::Inhibit));

        bus.fail_next(1);
        let task = ChargeTask::spawn(transport, SPEC, control.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.stop().await.unwrap();

        assert_eq!(bus.ec_writes(), vec![(BYPASS_CHARGE_CONTROL, BYPASS_CHARGE_OPEN)]);
        assert_eq!(control.applied(), Some(ChargeBehavior::Inhibit));
    }

    #[tokio::test]
    async fn dead_bus_is_retried_until_it_recovers() {
        let (bus, transport) = setup();
        let control = Arc::new(ChargeControl::new(ChargeBehavior::Inhibit));

        bus.fail_after(0);
        let task = ChargeTask::spawn(transport, SPEC, control.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bus.ec_writes().is_empty());
        assert_eq!(control.applied(), None);

        bus.heal();
        tokio::time::sleep(Duration::from_millis(30)).await;
        task.stop().await.unwrap();

        assert_eq!(bus.ec_writes(), vec![(BYPASS_CHARGE_CONTROL, BYPASS_CHARGE_OPEN)]);
        assert_eq!(control.applied(), Some(ChargeBehavior::Inhibit));
    }
}
