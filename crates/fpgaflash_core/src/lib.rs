//! FPGA configuration core.
//!
//! `bus` owns the six configuration-port GPIOs and the SPI transaction
//! descriptor; `sequencer` turns a bitstream path into a configuration
//! event with the required electrical timing and records throughput
//! statistics for the run.

pub mod bus;
pub mod sequencer;

pub use bus::BusController;
pub use sequencer::{FlashError, FlashStats, Flasher};
