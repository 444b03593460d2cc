/*!
 # Background LED writer

 The LED endpoint publishes colors into a [`ColorMailbox`] and returns
 immediately; the [`WriterTask`] drains it and performs the slow EC sequence.
 Updates coalesce: only the newest color is written, and the pending counter
 is reduced by exactly the number of requests the drained snapshot covered.
*/

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace};

use crate::color::Rgb;
use crate::driver::CommandDriver;
use crate::Result;

#[derive(Debug, Default)]
struct MailboxState {
    color: Rgb,
    pending: u32,
}

/// Latest-value-wins handoff between the LED setter and the writer task
#[derive(Debug, Default)]
pub struct ColorMailbox {
    state: RwLock<MailboxState>,
}

impl ColorMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the color and counts one more pending update
    pub fn publish(&self, color: Rgb) {
        let mut state = self.state.write();
        state.color = color;
        state.pending = state.pending.saturating_add(1);
    }

    /// Requests a rewrite of the current color
    pub fn mark_pending(&self) {
        let mut state = self.state.write();
        state.pending = state.pending.saturating_add(1);
    }

    /// The color and pending count, if anything is pending
    pub fn snapshot(&self) -> Option<(Rgb, u32)> {
        let state = self.state.read();
        (state.pending > 0).then_some((state.color, state.pending))
    }

    /// Retires the `count` updates a snapshot covered. Requests published
    /// since then stay pending.
    pub fn complete(&self, count: u32) {
        let mut state = self.state.write();
        state.pending = state.pending.saturating_sub(count);
    }

    pub fn pending(&self) -> u32 {
        self.state.read().pending
    }

    /// The last published color
    pub fn color(&self) -> Rgb {
        self.state.read().color
    }
}

/// Requests a cooperative stop of a background task
pub(crate) struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub(crate) fn request(&self) {
        // the task may already be gone
        let _ = self.tx.send(true);
    }
}

/// Observed by a background task at iteration boundaries
pub(crate) struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Sleeps for `duration`, waking early if a stop is requested
    pub(crate) async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            _ = time::sleep(duration) => {}
            _ = self.rx.changed() => {}
        }
    }
}

pub(crate) fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// A random sleep between `min` and `max` so the writer does not poll in
/// lockstep with firmware
fn idle_interval(min: Duration, max: Duration) -> Duration {
    let span = max.saturating_sub(min).as_micros() as u64;
    if span == 0 {
        return min;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    min + Duration::from_micros(seed % (span + 1))
}

/// The background task that owns LED hardware writes
pub struct WriterTask {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl WriterTask {
    pub fn spawn(
        driver: Arc<CommandDriver>,
        mailbox: Arc<ColorMailbox>,
        idle: (Duration, Duration),
    ) -> Self {
        let (stop, signal) = stop_pair();
        let handle = tokio::spawn(Self::run(driver, mailbox, idle, signal));
        Self { stop, handle }
    }

    /// Stops the task after its current iteration and waits for it
    pub async fn stop(self) -> Result<()> {
        self.stop.request();
        self.handle.await?;
        Ok(())
    }

    async fn run(
        driver: Arc<CommandDriver>,
        mailbox: Arc<ColorMailbox>,
        (idle_min, idle_max): (Duration, Duration),
        mut stop: StopSignal,
    ) {
        info!("Writer task started");

        while !stop.is_stopped() {
            match mailbox.snapshot() {
                Some((color, count)) => {
                    trace!("Draining {} pending update(s)", count);
                    driver.apply_color(color).await;
                    mailbox.complete(count);
                    debug!("Applied {}", color);
                }
                None => stop.sleep(idle_interval(idle_min, idle_max)).await,
            }
        }

        info!("Writer task stopped");
    }
}
