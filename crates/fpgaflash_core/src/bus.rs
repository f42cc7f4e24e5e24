use fpgaflash_hal::config::PinConfig;
use fpgaflash_hal::traits::{GpioBackend, HalError, Level, SpiBackend, TransferProfile};

/// Owns the six configuration-port GPIOs and the SPI transaction profile.
///
/// Slave-select idles high; it is only driven low inside the assert pulse
/// and the transaction window managed by the sequencer.
pub struct BusController<G, S> {
    gpio: G,
    spi: S,
    pins: PinConfig,
    profile: TransferProfile,
}

impl<G: GpioBackend, S: SpiBackend> BusController<G, S> {
    pub fn new(gpio: G, spi: S, pins: PinConfig, profile: TransferProfile) -> Self {
        Self {
            gpio,
            spi,
            pins,
            profile,
        }
    }

    /// Configure the output rails, park them, and start the SPI peripheral.
    ///
    /// Parked state: ss high, enable low, power low.
    pub fn initialize(&mut self) -> Result<(), HalError> {
        self.gpio.set_output(self.pins.enable);
        self.gpio.set_output(self.pins.power);
        self.gpio.set_output(self.pins.ss);

        self.gpio.write(self.pins.ss, Level::High);
        self.gpio.write(self.pins.enable, Level::Low);
        self.gpio.write(self.pins.power, Level::Low);

        self.spi.bind(&self.pins.spi_pins());
        self.spi.start()
    }

    pub fn drive(&mut self, pin: u8, level: Level) {
        self.gpio.write(pin, level);
    }

    pub fn delay_ms(&mut self, ms: u64) {
        self.gpio.delay_ms(ms);
    }

    pub fn delay_us(&mut self, us: u64) {
        self.gpio.delay_us(us);
    }

    pub fn now_ms(&self) -> u64 {
        self.gpio.now_ms()
    }

    pub fn pins(&self) -> PinConfig {
        self.pins
    }

    /// Scoped bus acquisition: begin a transaction with the stored
    /// profile, run `body` with the transfer primitive, and end the
    /// transaction on every exit path before handing back the body's
    /// value.
    pub fn with_transaction<R>(&mut self, body: impl FnOnce(&mut S) -> R) -> R {
        self.spi.begin_transaction(&self.profile);
        let out = body(&mut self.spi);
        self.spi.end_transaction();
        out
    }
}
