//! Short LED sequences played by the [`Coordinator`](super::Coordinator).
//!
//! A [`Scene`] is a bounded list of [`Step`]s. Each step sets a [`Frame`] and holds it for a
//! fixed time. Scenes never sleep; the coordinator schedules the next step as a deadline.

use bitflags::bitflags;
use embassy_time::Duration;

use crate::math::fade_level;

use super::{IndicatorConfig, OutputKind};

/// Brightness level of a fully lit LED.
pub const FULL: u8 = 100;

/// Battery level above which two battery LEDs are lit.
pub const TWO_LED_THRESHOLD: u8 = 40;

/// Battery level above which all three battery LEDs are lit.
pub const THREE_LED_THRESHOLD: u8 = 80;

/// Number of steps used for a single fade on PWM outputs.
const FADE_STEPS: u32 = 5;

/// One of the indicator LEDs driven by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum Led {
    Status = 0,
    Battery1 = 1,
    Battery2 = 2,
    Battery3 = 3,
}

impl Led {
    pub const ALL: [Led; 4] = [Led::Status, Led::Battery1, Led::Battery2, Led::Battery3];

    pub const fn mask(self) -> LedMask {
        match self {
            Led::Status => LedMask::STATUS,
            Led::Battery1 => LedMask::BATTERY_1,
            Led::Battery2 => LedMask::BATTERY_2,
            Led::Battery3 => LedMask::BATTERY_3,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// A set of indicator LEDs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LedMask: u8 {
        const STATUS = 0b0001;
        const BATTERY_1 = 0b0010;
        const BATTERY_2 = 0b0100;
        const BATTERY_3 = 0b1000;
    }
}

impl LedMask {
    /// The lowest `count` battery LEDs. Counts above 3 saturate.
    pub const fn battery_tier(count: usize) -> Self {
        match count {
            0 => LedMask::empty(),
            1 => LedMask::BATTERY_1,
            2 => LedMask::BATTERY_1.union(LedMask::BATTERY_2),
            _ => LedMask::BATTERY_1
                .union(LedMask::BATTERY_2)
                .union(LedMask::BATTERY_3),
        }
    }
}

/// Brightness of every indicator LED at one point in time. Binary outputs treat any non-zero
/// level as "on".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    levels: [u8; 4],
}

impl Frame {
    pub const OFF: Frame = Frame { levels: [0; 4] };

    /// All LEDs in `mask` at full brightness, everything else off.
    pub const fn solid(mask: LedMask) -> Self {
        Self::uniform(mask, FULL)
    }

    /// All LEDs in `mask` at `level`, everything else off.
    pub const fn uniform(mask: LedMask, level: u8) -> Self {
        let mut levels = [0; 4];
        let mut i = 0;
        while i < Led::ALL.len() {
            if mask.contains(Led::ALL[i].mask()) {
                levels[i] = level;
            }
            i += 1;
        }
        Self { levels }
    }

    pub fn with(mut self, led: Led, level: u8) -> Self {
        self.levels[led.index()] = level.min(FULL);
        self
    }

    pub fn level(&self, led: Led) -> u8 {
        self.levels[led.index()]
    }

    /// LEDs with a non-zero level.
    pub fn lit(&self) -> LedMask {
        Led::ALL
            .iter()
            .filter(|led| self.level(**led) > 0)
            .fold(LedMask::empty(), |mask, led| mask | led.mask())
    }

    pub fn is_off(&self) -> bool {
        self.lit().is_empty()
    }
}

/// A frame and how long it stays on the LEDs before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub frame: Frame,
    pub hold: Duration,
}

impl Step {
    const fn new(frame: Frame, hold: Duration) -> Self {
        Self { frame, hold }
    }

    const fn last(frame: Frame) -> Self {
        Self::new(frame, Duration::from_ticks(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Scene {
    /// Confirms a BLE profile switch. Profiles 0-2 light battery LEDs up to the profile's slot,
    /// other profiles flash the status LED.
    ProfileFlash { index: u8 },

    /// Single status LED blink while the keyboard is still looking for a host.
    ConnectionBlink,

    /// Shows the battery level on the battery LEDs for a fixed dwell time. Low levels blink the
    /// first LED instead.
    BatteryReadout { level: u8 },

    /// One cycle of the charging animation: the current tier is shown, then the top LED drops
    /// out. A full battery stays lit.
    ChargingStep { level: u8 },

    /// Plays when USB power appears: every LED fades in one after the other, then all fade out.
    UsbSweep,
}

impl Scene {
    /// The `n`th step of this scene, or `None` once the scene is over.
    pub fn step(&self, n: usize, config: &IndicatorConfig) -> Option<Step> {
        let timings = &config.timings;

        match *self {
            Scene::ProfileFlash { index } => {
                let frame = match index {
                    0..=2 => Frame::solid(LedMask::battery_tier(index as usize + 1)),
                    _ => Frame::solid(LedMask::STATUS),
                };
                flash(n, frame, millis(timings.profile_blink_ms))
            }
            Scene::ConnectionBlink => flash(
                n,
                Frame::solid(LedMask::STATUS),
                millis(timings.conn_blink_ms),
            ),
            Scene::BatteryReadout { level } => {
                let show = millis(timings.battery_show_ms);

                match battery_tiers(level, config.low_battery_threshold) {
                    Some(count) => flash(n, Frame::solid(LedMask::battery_tier(count)), show),
                    None => {
                        let blink = millis(timings.battery_blink_ms);
                        let blinks = timings.battery_blink_count as usize * 2;

                        if n < blinks {
                            let frame = if n % 2 == 0 {
                                Frame::solid(LedMask::BATTERY_1)
                            } else {
                                Frame::OFF
                            };
                            Some(Step::new(frame, blink))
                        } else if n == blinks {
                            // The LEDs are already dark, but the readout keeps the slot for the
                            // same dwell time as a solid readout.
                            Some(Step::new(Frame::OFF, show))
                        } else {
                            None
                        }
                    }
                }
            }
            Scene::ChargingStep { level } => {
                let count = charging_tiers(level);

                if level >= FULL {
                    return (n == 0).then(|| Step::last(Frame::solid(LedMask::battery_tier(3))));
                }

                match n {
                    0 => Some(Step::new(
                        Frame::solid(LedMask::battery_tier(count)),
                        millis(timings.charging_show_ms),
                    )),
                    1 => Some(Step::last(Frame::solid(LedMask::battery_tier(count - 1)))),
                    _ => None,
                }
            }
            Scene::UsbSweep => {
                let steps = match config.output {
                    OutputKind::Binary => 1,
                    OutputKind::Pwm => FADE_STEPS,
                };
                let hold = Duration::from_millis(timings.sweep_fade_ms as u64 / steps as u64);
                let fade_in_steps = Led::ALL.len() * steps as usize;

                if n < fade_in_steps {
                    let current = n / steps as usize;
                    let step = (n % steps as usize) as u32 + 1;

                    let frame = Led::ALL
                        .iter()
                        .take(current)
                        .fold(Frame::OFF, |frame, led| frame.with(*led, FULL))
                        .with(Led::ALL[current], fade_level(step, steps));

                    Some(Step::new(frame, hold))
                } else if n < fade_in_steps + steps as usize {
                    let step = steps - 1 - (n - fade_in_steps) as u32;
                    let all = LedMask::all();

                    Some(Step::new(Frame::uniform(all, fade_level(step, steps)), hold))
                } else {
                    None
                }
            }
        }
    }

    /// Total time the scene occupies the LEDs.
    pub fn duration(&self, config: &IndicatorConfig) -> Duration {
        let mut total = Duration::from_ticks(0);
        let mut n = 0;
        while let Some(step) = self.step(n, config) {
            total += step.hold;
            n += 1;
        }
        total
    }
}

/// Number of battery LEDs lit by a readout of `level`, or `None` if the level is low enough
/// that the first LED should blink instead.
pub fn battery_tiers(level: u8, low_threshold: u8) -> Option<usize> {
    if level <= low_threshold {
        None
    } else if level > THREE_LED_THRESHOLD {
        Some(3)
    } else if level > TWO_LED_THRESHOLD {
        Some(2)
    } else {
        Some(1)
    }
}

/// Number of battery LEDs lit by the charging animation at `level`.
pub fn charging_tiers(level: u8) -> usize {
    if level < TWO_LED_THRESHOLD {
        1
    } else if level < THREE_LED_THRESHOLD {
        2
    } else {
        3
    }
}

fn flash(n: usize, frame: Frame, hold: Duration) -> Option<Step> {
    match n {
        0 => Some(Step::new(frame, hold)),
        1 => Some(Step::last(Frame::OFF)),
        _ => None,
    }
}

fn millis(ms: u16) -> Duration {
    Duration::from_millis(ms as u64)
}
