use thiserror::Error;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("bus error: {0}")]
    BusError(String),
    #[error("filesystem error: {0}")]
    FsError(String),
}

/// Logic level driven onto a GPIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// SPI shift direction. The FPGA configuration port accepts MSB-first only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

/// SPI clock polarity/phase. Mode 0 is CPOL=0, CPHA=0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

/// The four pins routed to the SPI peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub sck: u8,
    pub mosi: u8,
    pub miso: u8,
    pub ss: u8,
}

/// SPI transaction descriptor: clock rate, shift order, clock mode.
///
/// Held by value in the bus controller and reused for every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProfile {
    pub bit_rate_hz: u32,
    pub bit_order: BitOrder,
    pub mode: SpiMode,
}

/// One directory entry in the bitstream store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

/// Global filesystem usage report.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

pub trait GpioBackend: Send {
    fn set_output(&mut self, pin: u8);
    fn write(&mut self, pin: u8, level: Level);
    fn delay_ms(&mut self, ms: u64);
    fn delay_us(&mut self, us: u64);
    /// Monotonic millisecond timestamp used for the timing capture.
    fn now_ms(&self) -> u64;
}

pub trait SpiBackend: Send {
    /// Route the clock and data pins to the peripheral.
    fn bind(&mut self, pins: &SpiPins);
    fn start(&mut self) -> Result<(), HalError>;
    fn begin_transaction(&mut self, profile: &TransferProfile);
    /// Full-duplex transfer of the whole buffer. Read-back bytes are
    /// clocked into `buf` in place; the configuration flow discards them.
    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError>;
    fn end_transaction(&mut self);
}

pub trait BitstreamFile: Send {
    fn size(&self) -> u64;
    /// Read up to `buf.len()` bytes. Returns 0 at end of file; backend
    /// read errors are logged by the backend and reported as 0.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

pub trait Filesystem: Send {
    fn mount(&mut self) -> Result<(), HalError>;
    fn exists(&self, path: &str) -> bool;
    fn open(&mut self, path: &str) -> Result<Box<dyn BitstreamFile>, HalError>;
    fn remove(&mut self, path: &str) -> Result<(), HalError>;
    fn entries(&self) -> Vec<FileEntry>;
    fn usage(&self) -> FsUsage;
}

impl GpioBackend for Box<dyn GpioBackend> {
    fn set_output(&mut self, pin: u8) {
        (**self).set_output(pin)
    }
    fn write(&mut self, pin: u8, level: Level) {
        (**self).write(pin, level)
    }
    fn delay_ms(&mut self, ms: u64) {
        (**self).delay_ms(ms)
    }
    fn delay_us(&mut self, us: u64) {
        (**self).delay_us(us)
    }
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

impl SpiBackend for Box<dyn SpiBackend> {
    fn bind(&mut self, pins: &SpiPins) {
        (**self).bind(pins)
    }
    fn start(&mut self) -> Result<(), HalError> {
        (**self).start()
    }
    fn begin_transaction(&mut self, profile: &TransferProfile) {
        (**self).begin_transaction(profile)
    }
    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError> {
        (**self).transfer(buf)
    }
    fn end_transaction(&mut self) {
        (**self).end_transaction()
    }
}

impl Filesystem for Box<dyn Filesystem> {
    fn mount(&mut self) -> Result<(), HalError> {
        (**self).mount()
    }
    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }
    fn open(&mut self, path: &str) -> Result<Box<dyn BitstreamFile>, HalError> {
        (**self).open(path)
    }
    fn remove(&mut self, path: &str) -> Result<(), HalError> {
        (**self).remove(path)
    }
    fn entries(&self) -> Vec<FileEntry> {
        (**self).entries()
    }
    fn usage(&self) -> FsUsage {
        (**self).usage()
    }
}
