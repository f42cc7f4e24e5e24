//! Deterministic in-memory backends for tests and `sim` mode runs.
//!
//! The gpio and spi backends share a virtual microsecond clock and an
//! ordered event trace. Delays advance the clock by their nominal
//! duration; transfers advance it by the time the bytes occupy on the
//! wire at the active transaction's bit rate, so timing capture and
//! throughput are reproducible down to the microsecond.

use crate::traits::{
    BitstreamFile, FileEntry, Filesystem, FsUsage, GpioBackend, HalError, Level, SpiBackend,
    SpiPins, TransferProfile,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Nominal capacity reported for the in-memory store.
const SIM_STORE_BYTES: u64 = 2 * 1024 * 1024;

/// One recorded pin or bus event, in program order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    DirOutput { pin: u8 },
    PinWrite { pin: u8, level: Level, at_us: u64 },
    DelayMs(u64),
    DelayUs(u64),
    TransactionBegin { bit_rate_hz: u32 },
    Transfer { len: usize },
    TransactionEnd,
}

#[derive(Default)]
struct Shared {
    clock_us: u64,
    trace: Vec<TraceEvent>,
    wire: Vec<u8>,
}

fn lock(shared: &Arc<Mutex<Shared>>) -> MutexGuard<'_, Shared> {
    shared.lock().expect("sim trace lock poisoned")
}

/// Wire a gpio, spi, and filesystem backend to one shared clock and
/// trace, and hand back a probe for inspecting them after the backends
/// have been moved into a flasher.
pub fn rig() -> (SimGpio, SimSpi, SimFs, SimProbe) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        SimGpio {
            shared: Arc::clone(&shared),
            outputs: HashSet::new(),
        },
        SimSpi {
            shared: Arc::clone(&shared),
            bound: None,
            started: false,
            active: None,
            fail_start: false,
            fail_transfer: false,
        },
        SimFs::new(),
        SimProbe { shared },
    )
}

pub struct SimGpio {
    shared: Arc<Mutex<Shared>>,
    outputs: HashSet<u8>,
}

impl SimGpio {
    pub fn is_output(&self, pin: u8) -> bool {
        self.outputs.contains(&pin)
    }
}

impl GpioBackend for SimGpio {
    fn set_output(&mut self, pin: u8) {
        self.outputs.insert(pin);
        lock(&self.shared).trace.push(TraceEvent::DirOutput { pin });
    }

    fn write(&mut self, pin: u8, level: Level) {
        let mut shared = lock(&self.shared);
        let at_us = shared.clock_us;
        shared.trace.push(TraceEvent::PinWrite { pin, level, at_us });
    }

    fn delay_ms(&mut self, ms: u64) {
        let mut shared = lock(&self.shared);
        shared.clock_us += ms * 1_000;
        shared.trace.push(TraceEvent::DelayMs(ms));
    }

    fn delay_us(&mut self, us: u64) {
        let mut shared = lock(&self.shared);
        shared.clock_us += us;
        shared.trace.push(TraceEvent::DelayUs(us));
    }

    fn now_ms(&self) -> u64 {
        lock(&self.shared).clock_us / 1_000
    }
}

pub struct SimSpi {
    shared: Arc<Mutex<Shared>>,
    bound: Option<SpiPins>,
    started: bool,
    active: Option<TransferProfile>,
    fail_start: bool,
    fail_transfer: bool,
}

impl SimSpi {
    /// Make the next `start` call refuse, as a peripheral that fails to
    /// come up would.
    pub fn fail_start(&mut self) {
        self.fail_start = true;
    }

    /// Make every transfer report a bus fault.
    pub fn fail_transfer(&mut self) {
        self.fail_transfer = true;
    }

    pub fn bound_pins(&self) -> Option<SpiPins> {
        self.bound
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl SpiBackend for SimSpi {
    fn bind(&mut self, pins: &SpiPins) {
        self.bound = Some(*pins);
    }

    fn start(&mut self) -> Result<(), HalError> {
        if self.fail_start {
            return Err(HalError::BusError("peripheral refused to start".into()));
        }
        self.started = true;
        Ok(())
    }

    fn begin_transaction(&mut self, profile: &TransferProfile) {
        self.active = Some(*profile);
        lock(&self.shared).trace.push(TraceEvent::TransactionBegin {
            bit_rate_hz: profile.bit_rate_hz,
        });
    }

    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError> {
        if self.fail_transfer {
            return Err(HalError::BusError("transfer fault injected".into()));
        }
        let bit_rate_hz = self.active.map(|p| p.bit_rate_hz).unwrap_or(0);
        let mut shared = lock(&self.shared);
        shared.wire.extend_from_slice(buf);
        shared.trace.push(TraceEvent::Transfer { len: buf.len() });
        if bit_rate_hz > 0 {
            shared.clock_us += buf.len() as u64 * 8 * 1_000_000 / u64::from(bit_rate_hz);
        }
        Ok(())
    }

    fn end_transaction(&mut self) {
        self.active = None;
        lock(&self.shared).trace.push(TraceEvent::TransactionEnd);
    }
}

/// In-memory bitstream store with injectable refusals.
#[derive(Default)]
pub struct SimFs {
    files: HashMap<String, Vec<u8>>,
    mounted: bool,
    fail_mount: bool,
    refuse_open: HashSet<String>,
    refuse_remove: HashSet<String>,
}

impl SimFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        self.files.insert(path.to_string(), data.into());
    }

    pub fn fail_mount(&mut self) {
        self.fail_mount = true;
    }

    /// The path stays listed but refuses to open.
    pub fn refuse_open(&mut self, path: &str) {
        self.refuse_open.insert(path.to_string());
    }

    pub fn refuse_remove(&mut self, path: &str) {
        self.refuse_remove.insert(path.to_string());
    }
}

impl Filesystem for SimFs {
    fn mount(&mut self) -> Result<(), HalError> {
        if self.fail_mount {
            return Err(HalError::FsError("mount failed".into()));
        }
        self.mounted = true;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn BitstreamFile>, HalError> {
        if !self.mounted {
            return Err(HalError::FsError("not mounted".into()));
        }
        if self.refuse_open.contains(path) {
            return Err(HalError::FsError(format!("{path}: open refused")));
        }
        let data = self
            .files
            .get(path)
            .ok_or_else(|| HalError::FsError(format!("{path}: not found")))?;
        Ok(Box::new(SimFile {
            data: data.clone(),
            pos: 0,
        }))
    }

    fn remove(&mut self, path: &str) -> Result<(), HalError> {
        if !self.mounted {
            return Err(HalError::FsError("not mounted".into()));
        }
        if self.refuse_remove.contains(path) {
            return Err(HalError::FsError(format!("{path}: remove refused")));
        }
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| HalError::FsError(format!("{path}: not found")))
    }

    fn entries(&self) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = self
            .files
            .iter()
            .map(|(name, data)| FileEntry {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    fn usage(&self) -> FsUsage {
        FsUsage {
            total_bytes: SIM_STORE_BYTES,
            used_bytes: self.files.values().map(|d| d.len() as u64).sum(),
        }
    }
}

struct SimFile {
    data: Vec<u8>,
    pos: usize,
}

impl BitstreamFile for SimFile {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Read-only view of the shared clock, trace, and wire capture.
pub struct SimProbe {
    shared: Arc<Mutex<Shared>>,
}

impl SimProbe {
    pub fn events(&self) -> Vec<TraceEvent> {
        lock(&self.shared).trace.clone()
    }

    /// Every byte driven out over MOSI, in wire order.
    pub fn wire(&self) -> Vec<u8> {
        lock(&self.shared).wire.clone()
    }

    pub fn transfer_lens(&self) -> Vec<usize> {
        lock(&self.shared)
            .trace
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Transfer { len } => Some(*len),
                _ => None,
            })
            .collect()
    }

    pub fn transaction_count(&self) -> usize {
        lock(&self.shared)
            .trace
            .iter()
            .filter(|e| matches!(e, TraceEvent::TransactionBegin { .. }))
            .count()
    }

    pub fn pin_writes(&self, pin: u8) -> Vec<(Level, u64)> {
        lock(&self.shared)
            .trace
            .iter()
            .filter_map(|e| match e {
                TraceEvent::PinWrite {
                    pin: p,
                    level,
                    at_us,
                } if *p == pin => Some((*level, *at_us)),
                _ => None,
            })
            .collect()
    }

    pub fn last_level(&self, pin: u8) -> Option<Level> {
        self.pin_writes(pin).last().map(|(level, _)| *level)
    }

    pub fn now_ms(&self) -> u64 {
        lock(&self.shared).clock_us / 1_000
    }
}
