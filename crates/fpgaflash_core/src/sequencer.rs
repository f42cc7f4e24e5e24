use fpgaflash_hal::config::FlasherConfig;
use fpgaflash_hal::traits::{
    FileEntry, Filesystem, FsUsage, GpioBackend, HalError, Level, SpiBackend,
};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::bus::BusController;

/// Settle window between the reset sub-sequence and the configuration
/// start pulse.
const CONFIG_SETTLE_MS: u64 = 500;
/// Width of the slave-select assert pulse.
const SS_PULSE_US: u64 = 2_000;
/// Dwell on either side of the rail release during reset.
const RESET_DWELL_MS: u64 = 100;
/// Post-stream window for the FPGA to latch before the summary.
const LATCH_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("SPI peripheral failed to start: {0}")]
    BusInit(#[source] HalError),
    #[error("filesystem mount failed: {0}")]
    FsMount(#[source] HalError),
    #[error("bitstream not found: {0}")]
    FileMissing(String),
    #[error("failed to open bitstream {0}: {1}")]
    FileOpen(String, #[source] HalError),
    #[error("bus transfer failed: {0}")]
    BusTransfer(#[source] HalError),
    #[error("failed to delete {0}: {1}")]
    Delete(String, #[source] HalError),
}

/// Timing captured at the tail of the most recent completed flash.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlashStats {
    pub last_flash_time_ms: u64,
    pub transfer_rate_kbps: f64,
}

/// Orchestrates the FPGA reset pulse, streams a bitstream file through
/// the bus controller in chunks, and records wall-clock duration and
/// derived throughput.
pub struct Flasher<G, S, F> {
    bus: BusController<G, S>,
    fs: F,
    stats: FlashStats,
}

impl<G: GpioBackend, S: SpiBackend, F: Filesystem> Flasher<G, S, F> {
    pub fn new(gpio: G, spi: S, fs: F, config: &FlasherConfig) -> Self {
        Self {
            bus: BusController::new(gpio, spi, config.pins, config.spi.profile()),
            fs,
            stats: FlashStats::default(),
        }
    }

    /// Park the rails, start the SPI peripheral, and mount the store.
    pub fn initialize(&mut self) -> Result<(), FlashError> {
        self.bus.initialize().map_err(|e| {
            error!("SPI peripheral failed to start: {e}");
            FlashError::BusInit(e)
        })?;
        self.fs.mount().map_err(|e| {
            error!("filesystem mount failed: {e}");
            FlashError::FsMount(e)
        })?;
        info!("flasher initialized");
        Ok(())
    }

    /// Drive the FPGA into its unconfigured state and release the rails.
    ///
    /// Holds ss, enable, and power low together, then releases enable
    /// before power and dwells again so the rails stabilize before the
    /// FPGA samples its configuration mode.
    pub fn reset(&mut self) {
        let pins = self.bus.pins();
        self.bus.drive(pins.ss, Level::Low);
        self.bus.drive(pins.enable, Level::Low);
        self.bus.drive(pins.power, Level::Low);
        self.bus.delay_ms(RESET_DWELL_MS);
        self.bus.drive(pins.enable, Level::High);
        self.bus.drive(pins.power, Level::High);
        self.bus.delay_ms(RESET_DWELL_MS);
    }

    /// Stream the bitstream at `path` into the configuration port in
    /// chunks of up to `chunk_size` bytes.
    ///
    /// The FPGA is reset before the file checks, so a missing file still
    /// costs a reset pulse; callers that want to avoid that can pre-check
    /// with [`Flasher::file_exists`]. Statistics are updated only when
    /// the whole stream completes.
    pub fn flash(&mut self, path: &str, chunk_size: usize) -> Result<(), FlashError> {
        debug_assert!(chunk_size > 0);

        self.reset();
        info!("flashing {path}");

        if !self.fs.exists(path) {
            error!("bitstream not found: {path}");
            return Err(FlashError::FileMissing(path.to_string()));
        }
        let mut file = match self.fs.open(path) {
            Ok(file) => file,
            Err(e) => {
                error!("failed to open bitstream {path}: {e}");
                return Err(FlashError::FileOpen(path.to_string(), e));
            }
        };
        info!("bitstream size: {} bytes", file.size());

        // Let the FPGA settle into its configuration-accept state.
        self.bus.delay_ms(CONFIG_SETTLE_MS);

        // Assert the slave-mode configuration start.
        let pins = self.bus.pins();
        self.bus.drive(pins.ss, Level::High);
        self.bus.delay_us(SS_PULSE_US);
        self.bus.drive(pins.ss, Level::Low);

        let mut buffer = vec![0u8; chunk_size];
        let mut total: u64 = 0;
        let started = self.bus.now_ms();

        let streamed: Result<(), HalError> = self.bus.with_transaction(|spi| {
            loop {
                let n = file.read(&mut buffer);
                if n == 0 {
                    break;
                }
                spi.transfer(&mut buffer[..n])?;
                total += n as u64;
                debug!("streamed chunk of {n} bytes");
            }
            Ok(())
        });

        let elapsed = self.bus.now_ms().saturating_sub(started);
        self.bus.drive(pins.ss, Level::High);
        drop(buffer);
        drop(file);

        if let Err(e) = streamed {
            error!("bus transfer failed: {e}");
            return Err(FlashError::BusTransfer(e));
        }

        self.stats = FlashStats {
            last_flash_time_ms: elapsed,
            transfer_rate_kbps: if elapsed > 0 {
                total as f64 * 1000.0 / elapsed as f64 / 1024.0
            } else {
                0.0
            },
        };

        // Latch window before the summary is reported.
        self.bus.delay_ms(LATCH_MS);

        info!(
            "FPGA programming done: {total} bytes in {elapsed} ms ({:.2} KB/s)",
            self.stats.transfer_rate_kbps
        );
        Ok(())
    }

    /// Elapsed milliseconds of the most recent completed flash, 0 if none.
    pub fn last_flash_time(&self) -> u64 {
        self.stats.last_flash_time_ms
    }

    /// Throughput of the most recent completed flash in KB/s, 0 if none.
    pub fn transfer_rate(&self) -> f64 {
        self.stats.transfer_rate_kbps
    }

    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.fs.exists(path)
    }

    /// Size of a stored bitstream, or 0 if it is absent or unopenable.
    pub fn file_size(&mut self, path: &str) -> u64 {
        if !self.fs.exists(path) {
            return 0;
        }
        match self.fs.open(path) {
            Ok(file) => file.size(),
            Err(e) => {
                warn!("failed to open {path} for size query: {e}");
                0
            }
        }
    }

    /// List the stored bitstreams, one log line per entry.
    pub fn list_files(&self) -> Vec<FileEntry> {
        let entries = self.fs.entries();
        if entries.is_empty() {
            info!("bitstream store is empty");
        }
        for entry in &entries {
            info!("  {} - {} bytes", entry.name, entry.size);
        }
        entries
    }

    pub fn delete_file(&mut self, path: &str) -> Result<(), FlashError> {
        if !self.fs.exists(path) {
            warn!("delete requested for missing file: {path}");
            return Err(FlashError::Delete(
                path.to_string(),
                HalError::FsError("not found".into()),
            ));
        }
        match self.fs.remove(path) {
            Ok(()) => {
                info!("deleted {path}");
                Ok(())
            }
            Err(e) => {
                error!("failed to delete {path}: {e}");
                Err(FlashError::Delete(path.to_string(), e))
            }
        }
    }

    /// Usage report for the bitstream store, logged as total/used/free.
    pub fn fs_usage(&self) -> FsUsage {
        let usage = self.fs.usage();
        info!(
            "store: {} KB total, {} KB used, {} KB free",
            usage.total_bytes / 1024,
            usage.used_bytes / 1024,
            usage.total_bytes.saturating_sub(usage.used_bytes) / 1024
        );
        usage
    }

    /// Log the timing of the most recent flash.
    pub fn log_stats(&self) {
        info!(
            "last flash: {} ms, {:.2} KB/s",
            self.stats.last_flash_time_ms, self.stats.transfer_rate_kbps
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpgaflash_hal::sim::{self, SimFs, SimGpio, SimSpi};

    fn flasher_with(files: &[(&str, Vec<u8>)]) -> (Flasher<SimGpio, SimSpi, SimFs>, sim::SimProbe)
    {
        let (gpio, spi, mut fs, probe) = sim::rig();
        for (path, data) in files {
            fs.insert(path, data.clone());
        }
        let mut flasher = Flasher::new(gpio, spi, fs, &FlasherConfig::default());
        flasher.initialize().unwrap();
        (flasher, probe)
    }

    #[test]
    fn bus_init_refusal_surfaces_as_bus_init() {
        let (gpio, mut spi, fs, _probe) = sim::rig();
        spi.fail_start();
        let mut flasher = Flasher::new(gpio, spi, fs, &FlasherConfig::default());
        assert!(matches!(
            flasher.initialize(),
            Err(FlashError::BusInit(_))
        ));
    }

    #[test]
    fn mount_refusal_surfaces_as_fs_mount() {
        let (gpio, spi, mut fs, _probe) = sim::rig();
        fs.fail_mount();
        let mut flasher = Flasher::new(gpio, spi, fs, &FlasherConfig::default());
        assert!(matches!(
            flasher.initialize(),
            Err(FlashError::FsMount(_))
        ));
    }

    #[test]
    fn unopenable_file_surfaces_as_file_open() {
        let (gpio, spi, mut fs, probe) = sim::rig();
        fs.insert("/locked.bin", vec![0u8; 16]);
        fs.refuse_open("/locked.bin");
        let mut flasher = Flasher::new(gpio, spi, fs, &FlasherConfig::default());
        flasher.initialize().unwrap();

        assert!(matches!(
            flasher.flash("/locked.bin", 8),
            Err(FlashError::FileOpen(_, _))
        ));
        assert_eq!(probe.transaction_count(), 0);
    }

    #[test]
    fn transfer_fault_surfaces_as_bus_transfer_with_ss_restored() {
        let (gpio, mut spi, mut fs, probe) = sim::rig();
        spi.fail_transfer();
        fs.insert("/x.bin", vec![0u8; 32]);
        let mut flasher = Flasher::new(gpio, spi, fs, &FlasherConfig::default());
        flasher.initialize().unwrap();

        assert!(matches!(
            flasher.flash("/x.bin", 16),
            Err(FlashError::BusTransfer(_))
        ));
        // Transaction was closed and ss parked high on the error path.
        let ss = fpgaflash_hal::config::PinConfig::default().ss;
        assert_eq!(probe.last_level(ss), Some(Level::High));
        assert_eq!(flasher.last_flash_time(), 0);
    }

    #[test]
    fn delete_of_missing_file_is_an_error() {
        let (mut flasher, _probe) = flasher_with(&[]);
        assert!(matches!(
            flasher.delete_file("/absent.bin"),
            Err(FlashError::Delete(_, _))
        ));
    }

    #[test]
    fn delete_removes_the_entry() {
        let (mut flasher, _probe) = flasher_with(&[("/a.bin", vec![1, 2, 3])]);
        flasher.delete_file("/a.bin").unwrap();
        assert!(!flasher.file_exists("/a.bin"));
        assert_eq!(flasher.file_size("/a.bin"), 0);
    }

    #[test]
    fn file_size_reports_stored_length() {
        let (mut flasher, _probe) = flasher_with(&[("/a.bin", vec![0u8; 123])]);
        assert_eq!(flasher.file_size("/a.bin"), 123);
        assert_eq!(flasher.file_size("/missing.bin"), 0);
    }

    #[test]
    fn list_files_is_sorted_by_name() {
        let (flasher, _probe) =
            flasher_with(&[("/b.bin", vec![0u8; 2]), ("/a.bin", vec![0u8; 1])]);
        let entries = flasher.list_files();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "/a.bin");
        assert_eq!(entries[1].name, "/b.bin");
    }
}
