//! Drivers for the indicator LEDs.
//!
//! [`IndicatorDriver`] is the only trait the [`indicator_task`](crate::indicator_task) needs.
//! Built-in implementations cover plain GPIO outputs ([`gpio`]) and PWM channels ([`pwm`]).

use core::fmt::Debug;

use crate::indicator::Led;

pub mod gpio;
pub mod pwm;

/// A trait that a driver must implement in order to drive the indicator LEDs.
pub trait IndicatorDriver {
    /// The type of error that the driver will return if [`IndicatorDriver::write`] fails.
    type DriverError: Debug;

    /// Set `led` to `level`, a brightness between 0 and 100. Drivers for on/off outputs should
    /// treat any non-zero level as "on".
    async fn write(&mut self, led: Led, level: u8) -> Result<(), Self::DriverError>;
}
