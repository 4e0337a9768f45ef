//! Dimmable indicator LEDs driven by PWM channels.

use embedded_hal::pwm::SetDutyCycle;

use crate::indicator::scenes::FULL;
use crate::indicator::Led;

use super::IndicatorDriver;

pub struct PwmIndicatorDriver<P: SetDutyCycle> {
    channels: [P; 4],
}

impl<P: SetDutyCycle> PwmIndicatorDriver<P> {
    /// Create a driver from the status LED channel followed by the three battery LED channels,
    /// in that order.
    pub fn new(channels: [P; 4]) -> Self {
        Self { channels }
    }

    pub fn release(self) -> [P; 4] {
        self.channels
    }
}

impl<P: SetDutyCycle> IndicatorDriver for PwmIndicatorDriver<P> {
    type DriverError = P::Error;

    async fn write(&mut self, led: Led, level: u8) -> Result<(), Self::DriverError> {
        self.channels[led as usize].set_duty_cycle_percent(level.min(FULL))
    }
}
