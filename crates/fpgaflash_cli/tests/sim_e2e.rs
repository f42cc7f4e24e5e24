//! End-to-end sim-mode test.
//!
//! Parses a full TOML setup, wires a flasher over the sim rig with the
//! parsed hardware configuration, and verifies the whole pipeline:
//! TOML -> config -> sequencer -> recorded wire traffic and statistics.

use fpgaflash_cli::{BackendMode, FlasherSetup};
use fpgaflash_core::sequencer::Flasher;
use fpgaflash_hal::sim::{self, TraceEvent};
use fpgaflash_hal::traits::Level;

const SETUP: &str = r#"
[mode]
type = "sim"

[pins]
enable = 21
power = 20
ss = 17
sck = 11
mosi = 10
miso = 9

[spi]
bit_rate_hz = 800000

[flash]
chunk_size = 4096
"#;

#[test]
fn toml_setup_drives_a_full_flash() {
    let setup = FlasherSetup::from_toml(SETUP).unwrap();
    assert_eq!(setup.backend_mode().unwrap(), BackendMode::Sim);

    let bitstream: Vec<u8> = (0..10_000).map(|i| (i % 239) as u8).collect();
    let (gpio, spi, mut fs, probe) = sim::rig();
    fs.insert("/blinky.bin", bitstream.clone());

    let mut flasher = Flasher::new(gpio, spi, fs, &setup.flasher);
    flasher.initialize().unwrap();
    flasher
        .flash("/blinky.bin", setup.flasher.flash.chunk_size)
        .unwrap();

    // The configured pins carry the protocol, not the defaults.
    assert_eq!(probe.last_level(17), Some(Level::High));
    assert!(!probe.pin_writes(21).is_empty());
    assert!(!probe.pin_writes(20).is_empty());
    assert!(probe.pin_writes(1).is_empty());

    // Chunk layout follows the configured size: 4096 * 2 + 1808.
    assert_eq!(probe.transfer_lens(), vec![4_096, 4_096, 1_808]);
    assert_eq!(probe.wire(), bitstream);

    // The transaction carries the configured bit rate.
    assert!(probe.events().iter().any(|e| matches!(
        e,
        TraceEvent::TransactionBegin { bit_rate_hz: 800_000 }
    )));

    // 10000 bytes at 800 kHz occupy 100 ms of wire time.
    assert_eq!(flasher.last_flash_time(), 100);
    let expected_rate = 10_000.0 * 1000.0 / 100.0 / 1024.0;
    assert!((flasher.transfer_rate() - expected_rate).abs() < 1e-3);
}

#[test]
fn factory_built_sim_flasher_reports_missing_bitstreams() {
    let setup = FlasherSetup::from_toml(SETUP).unwrap();
    let mut flasher = fpgaflash_cli::create_flasher(&setup).unwrap();

    assert!(flasher.flash("/absent.bin", 4_096).is_err());
    assert!(flasher.list_files().is_empty());
    assert_eq!(flasher.fs_usage().used_bytes, 0);
}
