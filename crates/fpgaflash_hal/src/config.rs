use serde::Deserialize;

use crate::traits::{BitOrder, SpiMode, SpiPins, TransferProfile};

/// GPIO assignments for the six configuration-port lines.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PinConfig {
    #[serde(default = "default_enable_pin")]
    pub enable: u8,
    #[serde(default = "default_power_pin")]
    pub power: u8,
    #[serde(default = "default_ss_pin")]
    pub ss: u8,
    #[serde(default = "default_sck_pin")]
    pub sck: u8,
    #[serde(default = "default_mosi_pin")]
    pub mosi: u8,
    #[serde(default = "default_miso_pin")]
    pub miso: u8,
}

fn default_enable_pin() -> u8 {
    13
}
fn default_power_pin() -> u8 {
    12
}
fn default_ss_pin() -> u8 {
    1
}
fn default_sck_pin() -> u8 {
    2
}
fn default_mosi_pin() -> u8 {
    3
}
fn default_miso_pin() -> u8 {
    0
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            enable: default_enable_pin(),
            power: default_power_pin(),
            ss: default_ss_pin(),
            sck: default_sck_pin(),
            mosi: default_mosi_pin(),
            miso: default_miso_pin(),
        }
    }
}

impl PinConfig {
    /// The subset of pins routed to the SPI peripheral.
    pub fn spi_pins(&self) -> SpiPins {
        SpiPins {
            sck: self.sck,
            mosi: self.mosi,
            miso: self.miso,
            ss: self.ss,
        }
    }
}

/// SPI clock configuration. Bit order and clock mode are fixed by the
/// FPGA configuration port (MSB-first, mode 0).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SpiConfig {
    #[serde(default = "default_bit_rate_hz")]
    pub bit_rate_hz: u32,
}

fn default_bit_rate_hz() -> u32 {
    1_600_000
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bit_rate_hz: default_bit_rate_hz(),
        }
    }
}

impl SpiConfig {
    pub fn profile(&self) -> TransferProfile {
        TransferProfile {
            bit_rate_hz: self.bit_rate_hz,
            bit_order: BitOrder::MsbFirst,
            mode: SpiMode::Mode0,
        }
    }
}

/// Streaming parameters for the flash loop.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FlashConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    46_408
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Full hardware configuration: pin map, SPI clock, streaming chunk.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FlasherConfig {
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub spi: SpiConfig,
    #[serde(default)]
    pub flash: FlashConfig,
}

impl FlasherConfig {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
