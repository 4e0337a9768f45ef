//! Battery and connection status LEDs for split keyboards.
//!
//! Keyboards implement [`IndicatorDevice`] and run [`indicator_task`] with an
//! [`IndicatorDriver`](drivers::IndicatorDriver) and a [`StatusSource`]. The rest of the firmware
//! reports state changes by sending [`Notification`]s to the device's notification channel.

#![no_std]

use defmt::{debug, error, warn, Debug2Format};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};

pub use embassy_sync;
pub use embedded_hal;

pub mod drivers;
pub mod indicator;
mod math;
pub mod status;

use crate::drivers::IndicatorDriver;
use crate::indicator::{Coordinator, Frame, IndicatorConfig, Led, LedMask, Notification};
use crate::status::StatusSource;

pub type RawMutex = CriticalSectionRawMutex;

/// A trait that keyboards must implement to use the status indicators.
pub trait IndicatorDevice {
    /// Behaviour of the indicators. See [`IndicatorConfig`] for the available options.
    const CONFIG: IndicatorConfig = IndicatorConfig::default();

    /// Get a reference to a channel that receives [`Notification`]s from other tasks.
    ///
    /// Event listeners should send to this channel and carry on propagating the event. Messages
    /// should only be received by the [`indicator_task`].
    #[inline(always)]
    fn get_notification_channel() -> &'static Channel<RawMutex, Notification, 4> {
        static INDICATOR_NOTIFICATION_CHANNEL: Channel<RawMutex, Notification, 4> =
            Channel::new();

        &INDICATOR_NOTIFICATION_CHANNEL
    }
}

/// How soon a failed LED write is attempted again.
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Turns every LED off. LEDs that fail are reported through `on_error` and returned as the
/// inert set, which is never written again.
async fn configure_leds<R: IndicatorDriver>(
    driver: &mut R,
    mut on_error: impl FnMut(Led, R::DriverError),
) -> LedMask {
    let mut inert = LedMask::empty();
    for led in Led::ALL {
        if let Err(err) = driver.write(led, 0).await {
            on_error(led, err);
            inert |= led.mask();
        }
    }
    inert
}

/// Writes every LED whose level in `target` differs from `written`, skipping inert LEDs.
/// `written` only follows successful writes. Returns `false` if any write failed, in which case
/// the frame should be flushed again later.
async fn flush_frame<R: IndicatorDriver>(
    driver: &mut R,
    target: Frame,
    written: &mut Frame,
    inert: LedMask,
    mut on_error: impl FnMut(Led, R::DriverError),
) -> bool {
    let mut complete = true;
    for led in Led::ALL {
        let level = target.level(led);
        if inert.contains(led.mask()) || written.level(led) == level {
            continue;
        }

        match driver.write(led, level).await {
            Ok(()) => *written = written.with(led, level),
            Err(err) => {
                complete = false;
                on_error(led, err);
            }
        }
    }
    complete
}

/// Drives the indicator LEDs for the lifetime of the device.
///
/// Wrap this in an `#[embassy_executor::task]` in your keyboard crate:
///
/// ```rust,ignore
/// #[embassy_executor::task]
/// async fn indicators(driver: GpioIndicatorDriver<Output<'static>>) {
///     indicator_task(MyKeyboard, driver, &STATUS).await
/// }
/// ```
pub async fn indicator_task<D: IndicatorDevice, R: IndicatorDriver, S: StatusSource>(
    _k: D,
    mut driver: R,
    status: &S,
) -> ! {
    let channel = D::get_notification_channel();
    let mut coordinator = Coordinator::new(D::CONFIG);

    let inert = configure_leds(&mut driver, |led, err| {
        warn!(
            "[INDICATOR] Could not configure the {} LED, it will stay off: {}",
            led,
            Debug2Format(&err)
        );
    })
    .await;
    let mut written = Frame::OFF;
    let mut target = Frame::OFF;
    let mut flushed = true;

    coordinator.start(Instant::now(), status);

    loop {
        if let Some(frame) = coordinator.take_frame() {
            target = frame;
            flushed = false;
        }

        if !flushed {
            flushed = flush_frame(&mut driver, target, &mut written, inert, |led, err| {
                error!(
                    "[INDICATOR] Couldn't update the {} LED: {}",
                    led,
                    Debug2Format(&err)
                );
            })
            .await;
        }

        let retry_write = (!flushed).then(|| Instant::now() + WRITE_RETRY_INTERVAL);
        let deadline = [coordinator.next_deadline(), retry_write]
            .into_iter()
            .flatten()
            .min();

        let notification = match deadline {
            // Sleep until the next scene step or timer, unless something happens first
            Some(deadline) => match select(Timer::at(deadline), channel.receive()).await {
                Either::First(()) => None,
                Either::Second(notification) => Some(notification),
            },
            None => Some(channel.receive().await),
        };

        match notification {
            Some(notification) => {
                debug!("[INDICATOR] Received {}", notification);
                coordinator.handle(notification, Instant::now(), status);

                // Process notifications until there are no more to process
                while let Ok(notification) = channel.try_receive() {
                    debug!("[INDICATOR] Received {}", notification);
                    coordinator.handle(notification, Instant::now(), status);
                }
            }
            None => coordinator.poll(Instant::now(), status),
        }
    }
}
