//! Recording bus for testing and dry runs.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crate::transport::{EcBus, EcLock, EC_ADDR_PORT, EC_DATA_PORT, EC_RAM_PAGE};

/// One raw bus access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Outb { port: u16, value: u8 },
    Inb { port: u16 },
    EcRead { register: u8 },
    EcWrite { register: u8, value: u8 },
}

impl std::fmt::Display for BusOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusOp::Outb { port, value } => write!(f, "outb {:#04x} -> port {:#04x}", value, port),
            BusOp::Inb { port } => write!(f, "inb port {:#04x}", port),
            BusOp::EcRead { register } => write!(f, "ec_read {:#04x}", register),
            BusOp::EcWrite { register, value } => {
                write!(f, "ec_write {:#04x} -> reg {:#04x}", value, register)
            }
        }
    }
}

#[derive(Default)]
struct MockState {
    ops: Vec<BusOp>,
    ec: HashMap<u8, u8>,
    ram: HashMap<u16, u8>,
    /// Completed RAM writes as (page << 8 | offset, value)
    ram_log: Vec<(u16, u8)>,
    // super-I/O window emulation
    selected: u8,
    window_reg: u8,
    page: u8,
    offset: u8,
    fail_next: usize,
    fail_after: Option<usize>,
}

impl MockState {
    fn should_fail(&mut self) -> bool {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        match self.fail_after.as_mut() {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }

    fn ram_addr(&self) -> u16 {
        u16::from(self.page) << 8 | u16::from(self.offset)
    }
}

/// An [`EcBus`] that emulates the EC register file and RAM window in memory
/// and records every access.
///
/// # Example
///
/// ```
/// use ayaneo_platform::{BusOp, EcBus, MockBus};
///
/// let bus = MockBus::new();
/// bus.ec_write(0xbf, 0xfe).unwrap();
/// assert_eq!(bus.ops(), vec![BusOp::EcWrite { register: 0xbf, value: 0xfe }]);
/// ```
#[derive(Default)]
pub struct MockBus {
    state: Mutex<MockState>,
    latency: Duration,
    /// In-process only; tests never touch the system lock file
    lock: EcLock,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus where every access takes `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Snapshot of every successful access so far
    pub fn ops(&self) -> Vec<BusOp> {
        self.state.lock().ops.clone()
    }

    /// Clears the access log, keeping register contents
    pub fn clear_ops(&self) {
        let mut state = self.state.lock();
        state.ops.clear();
        state.ram_log.clear();
    }

    /// Successful writes to published EC registers, in order
    pub fn ec_writes(&self) -> Vec<(u8, u8)> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match *op {
                BusOp::EcWrite { register, value } => Some((register, value)),
                _ => None,
            })
            .collect()
    }

    /// Completed writes into the LED RAM page as (offset, value), in order
    pub fn ram_writes(&self) -> Vec<(u8, u8)> {
        self.state
            .lock()
            .ram_log
            .iter()
            .filter(|(addr, _)| (addr >> 8) as u8 == EC_RAM_PAGE)
            .map(|&(addr, value)| ((addr & 0xff) as u8, value))
            .collect()
    }

    /// Number of hardware writes of either kind
    pub fn write_count(&self) -> usize {
        self.state
            .lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BusOp::Outb { .. } | BusOp::EcWrite { .. }))
            .count()
    }

    pub fn ec(&self, register: u8) -> u8 {
        self.state.lock().ec.get(&register).copied().unwrap_or(0)
    }

    pub fn set_ec(&self, register: u8, value: u8) {
        self.state.lock().ec.insert(register, value);
    }

    /// Reads a byte of the LED RAM page
    pub fn ram(&self, offset: u8) -> u8 {
        let addr = u16::from(EC_RAM_PAGE) << 8 | u16::from(offset);
        self.state.lock().ram.get(&addr).copied().unwrap_or(0)
    }

    pub fn set_ram(&self, offset: u8, value: u8) {
        let addr = u16::from(EC_RAM_PAGE) << 8 | u16::from(offset);
        self.state.lock().ram.insert(addr, value);
    }

    /// Fails the next `count` accesses
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Lets `count` more accesses succeed, then fails every access
    pub fn fail_after(&self, count: usize) {
        self.state.lock().fail_after = Some(count);
    }

    /// Stops injecting failures
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_next = 0;
        state.fail_after = None;
    }

    fn access<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> io::Result<T> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let mut state = self.state.lock();
        if state.should_fail() {
            return Err(io::Error::other("injected bus failure"));
        }
        Ok(f(&mut state))
    }
}

impl EcBus for MockBus {
    fn lock(&self) -> &EcLock {
        &self.lock
    }

    fn outb(&self, port: u16, value: u8) -> io::Result<()> {
        self.access(|state| {
            state.ops.push(BusOp::Outb { port, value });
            match port {
                EC_ADDR_PORT => state.selected = value,
                EC_DATA_PORT if state.selected == 0x2e => state.window_reg = value,
                EC_DATA_PORT if state.selected == 0x2f => match state.window_reg {
                    0x11 => state.page = value,
                    0x10 => state.offset = value,
                    0x12 => {
                        let addr = state.ram_addr();
                        state.ram.insert(addr, value);
                        state.ram_log.push((addr, value));
                    }
                    _ => {}
                },
                _ => {}
            }
        })
    }

    fn inb(&self, port: u16) -> io::Result<u8> {
        self.access(|state| {
            state.ops.push(BusOp::Inb { port });
            if port == EC_DATA_PORT && state.selected == 0x2f && state.window_reg == 0x12 {
                let addr = state.ram_addr();
                state.ram.get(&addr).copied().unwrap_or(0)
            } else {
                0xff
            }
        })
    }

    fn ec_read(&self, register: u8) -> io::Result<u8> {
        self.access(|state| {
            state.ops.push(BusOp::EcRead { register });
            state.ec.get(&register).copied().unwrap_or(0)
        })
    }

    fn ec_write(&self, register: u8, value: u8) -> io::Result<()> {
        self.access(|state| {
            state.ops.push(BusOp::EcWrite { register, value });
            state.ec.insert(register, value);
        })
    }
}
