/*!
 # Embedded controller transport

 Single-byte reads and writes to the embedded controller, either through the
 published EC register space or through the indexed RAM window behind the
 super-I/O address/data port pair. Every transaction runs while holding the
 platform-wide [`EcLock`].
*/

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{self, Instant};
use tracing::{debug, instrument, trace};

use crate::{Error, Result};

/// Super-I/O index port
pub const EC_ADDR_PORT: u16 = 0x4e;
/// Super-I/O data port
pub const EC_DATA_PORT: u16 = 0x4f;
/// RAM page holding the LED microcontroller registers
pub const EC_RAM_PAGE: u8 = 0xd1;

const WINDOW_INDEX: u8 = 0x2e;
const WINDOW_DATA: u8 = 0x2f;
const WINDOW_PAGE: u8 = 0x11;
const WINDOW_OFFSET: u8 = 0x10;
const WINDOW_VALUE: u8 = 0x12;

const FLOCK_RETRY: Duration = Duration::from_millis(1);

/// Raw access to the I/O ports and EC register space.
///
/// Implementations perform exactly one hardware access per call and never
/// lock themselves; [`Transport`] takes the bus's [`EcLock`] around every
/// transaction.
pub trait EcBus: Send + Sync {
    /// The lock every client of this bus shares
    fn lock(&self) -> &EcLock;
    /// Writes one byte to an I/O port
    fn outb(&self, port: u16, value: u8) -> io::Result<()>;
    /// Reads one byte from an I/O port
    fn inb(&self, port: u16) -> io::Result<u8>;
    /// Reads a published EC register
    fn ec_read(&self, register: u8) -> io::Result<u8>;
    /// Writes a published EC register
    fn ec_write(&self, register: u8, value: u8) -> io::Result<()>;
}

/// Linux bus backed by `/dev/port` and the `ec_sys` debugfs file.
pub struct DevPortBus {
    port: File,
    ec: File,
    lock: EcLock,
}

impl DevPortBus {
    /// Port I/O character device
    pub const PORT_PATH: &'static str = "/dev/port";
    /// EC register space exposed by `ec_sys` (needs `write_support=1`)
    pub const EC_PATH: &'static str = "/sys/kernel/debug/ec/ec0/io";

    /// Opens the default device files and lock file
    pub fn open() -> Result<Self> {
        Self::open_paths(Self::PORT_PATH, Self::EC_PATH, EcLock::LOCK_PATH)
    }

    /// Opens the bus from explicit paths
    pub fn open_paths(
        port: impl AsRef<Path>,
        ec: impl AsRef<Path>,
        lock: impl AsRef<Path>,
    ) -> Result<Self> {
        let port = OpenOptions::new().read(true).write(true).open(port)?;
        let ec = OpenOptions::new().read(true).write(true).open(ec)?;
        let lock = EcLock::with_file(lock)?;
        debug!("Opened EC bus");
        Ok(Self { port, ec, lock })
    }
}

impl EcBus for DevPortBus {
    fn lock(&self) -> &EcLock {
        &self.lock
    }

    fn outb(&self, port: u16, value: u8) -> io::Result<()> {
        self.port.write_all_at(&[value], u64::from(port))
    }

    fn inb(&self, port: u16) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.port.read_exact_at(&mut buf, u64::from(port))?;
        Ok(buf[0])
    }

    fn ec_read(&self, register: u8) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.ec.read_exact_at(&mut buf, u64::from(register))?;
        Ok(buf[0])
    }

    fn ec_write(&self, register: u8, value: u8) -> io::Result<()> {
        self.ec.write_all_at(&[value], u64::from(register))
    }
}

/// Address of one EC byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Published EC register number
    Direct(u8),
    /// Index into the LED RAM page, reached through the port window
    Ram(u8),
}

impl Register {
    /// The register `n` bytes further in the same address space
    pub fn offset(self, n: u8) -> Register {
        match self {
            Register::Direct(reg) => Register::Direct(reg.wrapping_add(n)),
            Register::Ram(index) => Register::Ram(index.wrapping_add(n)),
        }
    }
}

/// Platform-wide lock guarding every EC transaction.
///
/// Each bus owns one. Tasks in this process queue on a semaphore; other
/// processes are excluded by an advisory `flock` on a lock file, when the
/// lock has one.
pub struct EcLock {
    /// Only one transaction may run at a time in this process
    semaphore: Semaphore,
    file: Option<File>,
}

/// Held for the duration of one transaction
#[derive(Debug)]
pub struct EcGuard<'a> {
    _permit: SemaphorePermit<'a>,
    _flock: Option<Flock<File>>,
}

impl EcLock {
    /// Lock file shared by every process driving the EC
    pub const LOCK_PATH: &'static str = "/run/lock/ayaneo-ec.lock";

    /// A lock that only excludes tasks of this process
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
            file: None,
        }
    }

    /// A lock that also excludes other processes locking `path`
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            semaphore: Semaphore::new(1),
            file: Some(file),
        })
    }

    /// Acquires the lock, failing with [`Error::TransportBusy`] once
    /// `timeout` has passed.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self, timeout: Duration) -> Result<EcGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let permit = match time::timeout_at(deadline, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return Err(Error::TransportBusy(timeout)),
        };

        let flock = match &self.file {
            Some(file) => Some(Self::flock(file, deadline, timeout).await?),
            None => None,
        };

        Ok(EcGuard {
            _permit: permit,
            _flock: flock,
        })
    }

    async fn flock(file: &File, deadline: Instant, timeout: Duration) -> Result<Flock<File>> {
        let mut handle = file.try_clone()?;
        loop {
            match Flock::lock(handle, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => return Ok(flock),
                Err((file, errno)) if errno == Errno::EWOULDBLOCK => {
                    if Instant::now() >= deadline {
                        return Err(Error::TransportBusy(timeout));
                    }
                    trace!("EC lock held by another process");
                    handle = file;
                    time::sleep(FLOCK_RETRY).await;
                }
                Err((_, errno)) => return Err(io::Error::from(errno).into()),
            }
        }
    }
}

impl Default for EcLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Port writes that select a byte in the LED RAM page. The twelfth step, the
/// data port access itself, is up to the caller.
fn window_select(index: u8) -> [(u16, u8); 11] {
    [
        (EC_ADDR_PORT, WINDOW_INDEX),
        (EC_DATA_PORT, WINDOW_PAGE),
        (EC_ADDR_PORT, WINDOW_DATA),
        (EC_DATA_PORT, EC_RAM_PAGE),
        (EC_ADDR_PORT, WINDOW_INDEX),
        (EC_DATA_PORT, WINDOW_OFFSET),
        (EC_ADDR_PORT, WINDOW_DATA),
        (EC_DATA_PORT, index),
        (EC_ADDR_PORT, WINDOW_INDEX),
        (EC_DATA_PORT, WINDOW_VALUE),
        (EC_ADDR_PORT, WINDOW_DATA),
    ]
}

/// Serialized byte-level access to the embedded controller.
///
/// Never retries: a busy lock or failed access is returned to the caller,
/// which decides whether to skip the step.
#[derive(Clone)]
pub struct Transport {
    bus: Arc<dyn EcBus>,
    /// How long a transaction waits for the bus lock
    timeout: Duration,
}

impl Transport {
    pub fn new(bus: Arc<dyn EcBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Reads one byte
    #[instrument(skip(self), level = "trace")]
    pub async fn read(&self, register: Register) -> Result<u8> {
        let _guard = self.bus.lock().acquire(self.timeout).await?;
        let value = match register {
            Register::Direct(reg) => self.bus.ec_read(reg)?,
            Register::Ram(index) => {
                self.select_ram(index)?;
                self.bus.inb(EC_DATA_PORT)?
            }
        };
        trace!("Read {:#04x}", value);
        Ok(value)
    }

    /// Writes one byte
    #[instrument(skip(self), level = "trace")]
    pub async fn write(&self, register: Register, value: u8) -> Result<()> {
        let _guard = self.bus.lock().acquire(self.timeout).await?;
        match register {
            Register::Direct(reg) => self.bus.ec_write(reg, value)?,
            Register::Ram(index) => {
                self.select_ram(index)?;
                self.bus.outb(EC_DATA_PORT, value)?;
            }
        }
        Ok(())
    }

    /// Writes several published registers in order under one lock
    /// acquisition. Stops at the first failed write.
    #[instrument(skip(self), level = "trace")]
    pub async fn write_direct_batch(&self, writes: &[(u8, u8)]) -> Result<()> {
        let _guard = self.bus.lock().acquire(self.timeout).await?;
        for &(reg, value) in writes {
            self.bus.ec_write(reg, value)?;
        }
        Ok(())
    }

    fn select_ram(&self, index: u8) -> io::Result<()> {
        for (port, value) in window_select(index) {
            self.bus.outb(port, value)?;
        }
        Ok(())
    }
}
