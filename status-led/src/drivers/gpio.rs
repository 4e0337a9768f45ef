//! On/off indicator LEDs connected to GPIO outputs.

use embedded_hal::digital::OutputPin;

use crate::indicator::Led;

use super::IndicatorDriver;

pub struct GpioIndicatorDriver<P: OutputPin> {
    pins: [P; 4],
    active_low: bool,
}

impl<P: OutputPin> GpioIndicatorDriver<P> {
    /// Create a driver from the status LED pin followed by the three battery LED pins, in that
    /// order. If the LEDs are wired to light up when the pin is driven low, set `active_low`.
    pub fn new(pins: [P; 4], active_low: bool) -> Self {
        Self { pins, active_low }
    }

    /// Give back the pins, in the order they were passed to [`GpioIndicatorDriver::new`].
    pub fn release(self) -> [P; 4] {
        self.pins
    }
}

impl<P: OutputPin> IndicatorDriver for GpioIndicatorDriver<P> {
    type DriverError = P::Error;

    async fn write(&mut self, led: Led, level: u8) -> Result<(), Self::DriverError> {
        let pin = &mut self.pins[led as usize];

        if (level > 0) != self.active_low {
            pin.set_high()
        } else {
            pin.set_low()
        }
    }
}
