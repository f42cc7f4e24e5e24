//! Host-side backends.
//!
//! `HostFs` keeps bitstreams as plain files under a root directory.
//! `HostGpio` and `HostSpi` drive real pins through the Raspberry Pi
//! GPIO and SPI0 peripherals via rppal; the SPI routing requested by
//! `bind` is advisory there, since the Pi muxes the bus onto fixed pins.

use fpgaflash_hal::traits::{
    BitOrder, BitstreamFile, FileEntry, Filesystem, FsUsage, GpioBackend, HalError, Level,
    SpiBackend, SpiMode, SpiPins, TransferProfile,
};
use log::{debug, warn};
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Bitstream store rooted at a host directory. Paths like
/// `/led_blink.bin` resolve beneath the root.
pub struct HostFs {
    root: PathBuf,
    mounted: bool,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: false,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Filesystem for HostFs {
    fn mount(&mut self) -> Result<(), HalError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| HalError::FsError(format!("{}: {e}", self.root.display())))?;
        self.mounted = true;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn BitstreamFile>, HalError> {
        if !self.mounted {
            return Err(HalError::FsError("store not mounted".into()));
        }
        let resolved = self.resolve(path);
        let file = fs::File::open(&resolved)
            .map_err(|e| HalError::FsError(format!("{}: {e}", resolved.display())))?;
        let size = file
            .metadata()
            .map_err(|e| HalError::FsError(format!("{}: {e}", resolved.display())))?
            .len();
        Ok(Box::new(HostFile { file, size }))
    }

    fn remove(&mut self, path: &str) -> Result<(), HalError> {
        let resolved = self.resolve(path);
        fs::remove_file(&resolved)
            .map_err(|e| HalError::FsError(format!("{}: {e}", resolved.display())))
    }

    fn entries(&self) -> Vec<FileEntry> {
        let mut entries = Vec::new();
        let Ok(dir) = fs::read_dir(&self.root) else {
            return entries;
        };
        for item in dir.flatten() {
            let Ok(meta) = item.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            entries.push(FileEntry {
                name: format!("/{}", item.file_name().to_string_lossy()),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// The host store has no fixed capacity; the report tracks the bytes
    /// currently stored.
    fn usage(&self) -> FsUsage {
        let used: u64 = self.entries().iter().map(|e| e.size).sum();
        FsUsage {
            total_bytes: used,
            used_bytes: used,
        }
    }
}

struct HostFile {
    file: fs::File,
    size: u64,
}

impl BitstreamFile for HostFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.file.read(buf) {
            Ok(n) => n,
            Err(e) => {
                warn!("bitstream read failed, treating as end of file: {e}");
                0
            }
        }
    }
}

/// GPIO backend over the Pi's gpiomem interface. Pins are claimed as
/// outputs on first use and held for the backend's lifetime.
pub struct HostGpio {
    chip: Gpio,
    pins: HashMap<u8, OutputPin>,
    epoch: Instant,
}

impl HostGpio {
    pub fn new() -> Result<Self, HalError> {
        let chip = Gpio::new().map_err(|e| HalError::DeviceNotFound(format!("gpio: {e}")))?;
        Ok(Self {
            chip,
            pins: HashMap::new(),
            epoch: Instant::now(),
        })
    }

    fn claim(&mut self, pin: u8) {
        if self.pins.contains_key(&pin) {
            return;
        }
        match self.chip.get(pin) {
            Ok(claimed) => {
                self.pins.insert(pin, claimed.into_output());
            }
            Err(e) => warn!("failed to claim GPIO {pin}: {e}"),
        }
    }
}

impl GpioBackend for HostGpio {
    fn set_output(&mut self, pin: u8) {
        self.claim(pin);
    }

    fn write(&mut self, pin: u8, level: Level) {
        self.claim(pin);
        if let Some(out) = self.pins.get_mut(&pin) {
            match level {
                Level::High => out.set_high(),
                Level::Low => out.set_low(),
            }
        }
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn delay_us(&mut self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// SPI backend over the Pi's SPI0 peripheral. The device is opened per
/// transaction with the profile's clock rate and mode.
pub struct HostSpi {
    spi: Option<Spi>,
}

impl HostSpi {
    pub fn new() -> Self {
        Self { spi: None }
    }

    fn open(profile: &TransferProfile) -> Result<Spi, HalError> {
        if profile.bit_order != BitOrder::MsbFirst {
            warn!("SPI0 shifts MSB-first; requested LSB-first order ignored");
        }
        let mode = match profile.mode {
            SpiMode::Mode0 => Mode::Mode0,
            SpiMode::Mode1 => Mode::Mode1,
            SpiMode::Mode2 => Mode::Mode2,
            SpiMode::Mode3 => Mode::Mode3,
        };
        Spi::new(Bus::Spi0, SlaveSelect::Ss0, profile.bit_rate_hz, mode)
            .map_err(|e| HalError::BusError(format!("spi0: {e}")))
    }
}

impl Default for HostSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiBackend for HostSpi {
    fn bind(&mut self, pins: &SpiPins) {
        // SPI0 is hard-muxed; record the request for diagnostics only.
        debug!(
            "spi routing requested: sck={} mosi={} miso={} ss={}",
            pins.sck, pins.mosi, pins.miso, pins.ss
        );
    }

    fn start(&mut self) -> Result<(), HalError> {
        // Probe the peripheral now so a refusal surfaces at
        // initialization rather than mid-flash.
        Self::open(&TransferProfile {
            bit_rate_hz: 1_000_000,
            bit_order: BitOrder::MsbFirst,
            mode: SpiMode::Mode0,
        })
        .map(|_| ())
    }

    fn begin_transaction(&mut self, profile: &TransferProfile) {
        match Self::open(profile) {
            Ok(spi) => self.spi = Some(spi),
            Err(e) => warn!("failed to open SPI transaction: {e}"),
        }
    }

    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), HalError> {
        let Some(spi) = self.spi.as_mut() else {
            return Err(HalError::BusError("no active transaction".into()));
        };
        let tx = buf.to_vec();
        spi.transfer(buf, &tx)
            .map(|_| ())
            .map_err(|e| HalError::BusError(format!("transfer: {e}")))
    }

    fn end_transaction(&mut self) {
        self.spi = None;
    }
}
