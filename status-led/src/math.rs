use core::f32::consts::PI;

use crate::indicator::scenes::FULL;

// Bhaskara I's approximation for the sin formula
pub fn sin(r: f32) -> f32 {
    if r < 0.0 {
        return sin(-r) * -1.0;
    }
    let rad: f32 = r % (2.0 * PI);
    if rad > PI {
        sin(rad - PI) * -1.0
    } else {
        (16.0 * rad * (PI - rad)) / (5.0 * PI * PI - 4.0 * rad * (PI - rad))
    }
}

/// Brightness (0-100) of step `step` out of `steps` in an eased fade-in. The curve follows the
/// first quarter of a sine wave, so early steps rise faster than the last few.
pub fn fade_level(step: u32, steps: u32) -> u8 {
    if steps == 0 || step >= steps {
        return FULL;
    }

    let x = step as f32 / steps as f32;
    let level = sin(x * PI / 2.0) * FULL as f32 + 0.5;

    if level >= FULL as f32 {
        FULL
    } else if level <= 0.0 {
        0
    } else {
        level as u8
    }
}
