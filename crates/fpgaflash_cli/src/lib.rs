//! Flasher setup and backend selection.
//!
//! Reads a TOML setup file, resolves the backend mode, and builds an
//! initialized flasher over boxed backends.
//!
//! Supported modes:
//! - `sim`: deterministic in-memory backends (dry runs, CI)
//! - `host`: std::fs bitstream store with Raspberry Pi GPIO/SPI

use fpgaflash_core::sequencer::{FlashError, Flasher};
use fpgaflash_hal::config::FlasherConfig;
use fpgaflash_hal::sim;
use fpgaflash_hal::traits::{Filesystem, GpioBackend, HalError, SpiBackend};
use fpgaflash_host::{HostFs, HostGpio, HostSpi};
use serde::Deserialize;

/// Top-level setup, deserialized from TOML.
#[derive(Debug, Deserialize)]
pub struct FlasherSetup {
    pub mode: ModeConfig,
    #[serde(flatten)]
    pub flasher: FlasherConfig,
    #[serde(default)]
    pub host: Option<HostSection>,
}

#[derive(Debug, Deserialize)]
pub struct ModeConfig {
    #[serde(rename = "type")]
    pub mode_type: String,
}

#[derive(Debug, Deserialize)]
pub struct HostSection {
    #[serde(default = "default_fs_root")]
    pub fs_root: String,
}

fn default_fs_root() -> String {
    "/var/lib/fpgaflash".to_string()
}

/// Parsed mode selection.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMode {
    Sim,
    Host { fs_root: String },
}

impl FlasherSetup {
    /// Parse from TOML string.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Parse from TOML file path.
    pub fn from_file(path: &str) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::ConfigError(format!("{path}: {e}")))?;
        Self::from_toml(&content).map_err(|e| CliError::ConfigError(e.to_string()))
    }

    /// Resolve the mode from the setup.
    pub fn backend_mode(&self) -> Result<BackendMode, CliError> {
        match self.mode.mode_type.as_str() {
            "sim" => Ok(BackendMode::Sim),
            "host" => {
                let fs_root = self
                    .host
                    .as_ref()
                    .map(|h| h.fs_root.clone())
                    .unwrap_or_else(default_fs_root);
                Ok(BackendMode::Host { fs_root })
            }
            other => Err(CliError::ConfigError(format!("unknown mode type: {other}"))),
        }
    }
}

pub type BoxedFlasher = Flasher<Box<dyn GpioBackend>, Box<dyn SpiBackend>, Box<dyn Filesystem>>;

/// Build and initialize a flasher for the configured mode.
pub fn create_flasher(setup: &FlasherSetup) -> Result<BoxedFlasher, CliError> {
    if setup.flasher.flash.chunk_size == 0 {
        return Err(CliError::ConfigError(
            "flash.chunk_size must be greater than zero".into(),
        ));
    }

    let (gpio, spi, fs): (
        Box<dyn GpioBackend>,
        Box<dyn SpiBackend>,
        Box<dyn Filesystem>,
    ) = match setup.backend_mode()? {
        BackendMode::Sim => {
            let (gpio, spi, fs, _probe) = sim::rig();
            (Box::new(gpio), Box::new(spi), Box::new(fs))
        }
        BackendMode::Host { fs_root } => (
            Box::new(HostGpio::new()?),
            Box::new(HostSpi::new()),
            Box::new(HostFs::new(fs_root)),
        ),
    };

    let mut flasher = Flasher::new(gpio, spi, fs, &setup.flasher);
    flasher.initialize()?;
    Ok(flasher)
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config error: {0}")]
    ConfigError(String),
    #[error("HAL error: {0}")]
    HalError(#[from] HalError),
    #[error(transparent)]
    FlashError(#[from] FlashError),
}
