//! Coordination of the indicator LEDs.
//!
//! [`Coordinator`] is a synchronous state machine. It is fed [`Notification`]s from the rest of
//! the firmware and polled when its [`next_deadline`](Coordinator::next_deadline) passes. Only one
//! [`Scene`] drives the LEDs at a time; see [`ScenePolicy`] for what happens to requests that
//! arrive while a scene is playing.

use core::mem;

use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use crate::status::{ActivityState, StatusSource, UsbConnState};

pub mod scenes;

pub use self::scenes::{Frame, Led, LedMask, Scene, Step};

/// Kind of hardware behind the indicator LEDs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum OutputKind {
    /// On/off GPIO outputs.
    Binary,
    /// Brightness-controlled outputs (0-100). Enables fades.
    Pwm,
}

/// Which half of a split keyboard the indicators live on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum SplitRole {
    /// Talks to the host. Connected means the active BLE profile is connected, or USB is
    /// connected to a host. USB that is only `Powered` or `Suspended` does not count.
    Central,
    /// Talks to the central half. Connected means the split link is up.
    Peripheral,
}

/// What the scene slot does with a request that arrives while another scene is playing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ScenePolicy {
    /// Keep one pending scene. A newer request replaces an older pending one.
    LastWins,
    /// Reject the request.
    Drop,
}

/// Timing of the LED scenes, in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneTimings {
    pub profile_blink_ms: u16,
    pub conn_blink_ms: u16,
    pub battery_blink_ms: u16,
    pub battery_blink_count: u8,
    pub battery_show_ms: u16,
    pub charging_show_ms: u16,
    /// How often an unavailable battery reading is polled again.
    pub battery_poll_ms: u16,
    /// Length of a single fade in the USB sweep.
    pub sweep_fade_ms: u16,
}

impl SceneTimings {
    pub const fn default() -> Self {
        SceneTimings {
            profile_blink_ms: 180,
            conn_blink_ms: 140,
            battery_blink_ms: 200,
            battery_blink_count: 5,
            battery_show_ms: 1400,
            charging_show_ms: 1000,
            battery_poll_ms: 500,
            sweep_fade_ms: 300,
        }
    }
}

impl Default for SceneTimings {
    fn default() -> Self {
        Self::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorConfig {
    pub output: OutputKind,
    pub role: SplitRole,
    pub scene_policy: ScenePolicy,
    /// Turn every LED off and stop the connection check when the device sleeps or USB is
    /// suspended.
    pub suspend_disables_leds: bool,
    /// Show the battery (or the charging animation, on USB power) when the device goes idle.
    pub idle_shows_battery: bool,
    /// Loop the charging animation while idle on USB power.
    pub charging_animation: bool,
    /// Only blink for a missing connection while the device is active. The check is dropped
    /// when the device is idle and restarted when it becomes active again.
    pub retry_only_when_active: bool,
    /// Start a connection check once the battery readout finishes.
    pub recheck_after_battery: bool,
    pub retry_interval_ms: u32,
    /// Battery levels at or below this blink the first battery LED.
    pub low_battery_threshold: u8,
    pub timings: SceneTimings,
}

impl IndicatorConfig {
    pub const fn default() -> Self {
        IndicatorConfig {
            output: OutputKind::Binary,
            role: SplitRole::Central,
            scene_policy: ScenePolicy::LastWins,
            suspend_disables_leds: true,
            idle_shows_battery: true,
            charging_animation: true,
            retry_only_when_active: true,
            recheck_after_battery: false,
            retry_interval_ms: 4000,
            low_battery_threshold: 20,
            timings: SceneTimings::default(),
        }
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms as u64)
    }

    fn battery_poll(&self) -> Duration {
        Duration::from_millis(self.timings.battery_poll_ms as u64)
    }

    fn charging_period(&self) -> Duration {
        Duration::from_millis(self.timings.charging_show_ms as u64 * 2)
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self::default()
    }
}

/// State changes reported by the rest of the firmware.
///
/// Sending a notification never consumes the underlying event; firmware listeners should keep
/// propagating it to their other subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Notification {
    /// The active BLE profile changed to the given index.
    ProfileChanged(u8),
    ActivityChanged(ActivityState),
    UsbConnChanged(UsbConnState),
    /// The split link to the central half went up or down.
    PeripheralStatusChanged(bool),
}

/// Result of asking the scene slot to play a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum SceneRequest {
    Started,
    Queued,
    Dropped,
}

/// Whether the keyboard is periodically checking for a missing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum RetrySession {
    NotChecking,
    Checking { next: Instant },
}

#[derive(Debug, Clone, Copy)]
struct PlayingScene {
    scene: Scene,
    step: usize,
    until: Instant,
}

pub struct Coordinator {
    config: IndicatorConfig,
    frame: Frame,
    dirty: bool,
    playing: Option<PlayingScene>,
    pending: Option<Scene>,
    retry: RetrySession,
    battery_at: Option<Instant>,
    charging_at: Option<Instant>,
    last_usb: UsbConnState,
    peripheral_connected: bool,
}

impl Coordinator {
    pub const fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            frame: Frame::OFF,
            dirty: false,
            playing: None,
            pending: None,
            retry: RetrySession::NotChecking,
            battery_at: None,
            charging_at: None,
            last_usb: UsbConnState::None,
            peripheral_connected: false,
        }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// The frame that should currently be on the LEDs.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Returns the current frame if it changed since the last call.
    pub fn take_frame(&mut self) -> Option<Frame> {
        mem::take(&mut self.dirty).then_some(self.frame)
    }

    pub fn is_busy(&self) -> bool {
        self.playing.is_some()
    }

    pub fn playing(&self) -> Option<Scene> {
        self.playing.map(|playing| playing.scene)
    }

    pub fn pending(&self) -> Option<Scene> {
        self.pending
    }

    pub fn retry_session(&self) -> RetrySession {
        self.retry
    }

    /// Earliest instant at which [`Coordinator::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let retry = match self.retry {
            RetrySession::Checking { next } => Some(next),
            RetrySession::NotChecking => None,
        };

        [
            self.playing.map(|playing| playing.until),
            retry,
            self.battery_at,
            self.charging_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Power-up: all LEDs off, then the boot battery readout and a first connection check.
    pub fn start(&mut self, now: Instant, status: &impl StatusSource) {
        self.last_usb = status.usb_state();
        self.display_off_all();
        self.battery_at = Some(now);
        self.start_retry(now);
        self.poll(now, status);
    }

    /// Reacts to a notification, then runs anything that is already due.
    pub fn handle(
        &mut self,
        notification: Notification,
        now: Instant,
        status: &impl StatusSource,
    ) {
        match notification {
            Notification::ProfileChanged(index) => self.on_profile_changed(index, now),
            Notification::ActivityChanged(state) => self.on_activity_changed(state, now, status),
            Notification::UsbConnChanged(state) => self.on_usb_conn_changed(state, now),
            Notification::PeripheralStatusChanged(connected) => {
                self.on_peripheral_status_changed(connected, now)
            }
        }

        self.poll(now, status);
    }

    /// Advances the playing scene and fires every deadline that has passed.
    pub fn poll(&mut self, now: Instant, status: &impl StatusSource) {
        self.advance(now);

        if self.battery_at.is_some_and(|at| at <= now) {
            self.battery_at = None;
            self.battery_display_tick(now, status);
        }

        if self.charging_at.is_some_and(|at| at <= now) {
            self.charging_at = None;
            self.charging_tick(now, status);
        }

        if matches!(self.retry, RetrySession::Checking { next } if next <= now) {
            self.connection_retry_tick(now, status);
        }
    }

    /// Turns every LED off and forgets the playing and pending scenes. Deadlines are kept.
    pub fn display_off_all(&mut self) {
        self.playing = None;
        self.pending = None;
        self.frame = Frame::OFF;
        self.dirty = true;
    }

    /// Asks the scene slot to play `scene`.
    pub fn request(&mut self, scene: Scene, now: Instant) -> SceneRequest {
        // A scene whose last step has passed no longer holds the slot
        self.advance(now);

        if self.playing.is_none() {
            self.playing = Some(PlayingScene {
                scene,
                step: 0,
                until: now,
            });
            self.advance(now);
            return SceneRequest::Started;
        }

        match self.config.scene_policy {
            ScenePolicy::LastWins => {
                self.pending = Some(scene);
                SceneRequest::Queued
            }
            ScenePolicy::Drop => SceneRequest::Dropped,
        }
    }

    fn on_profile_changed(&mut self, index: u8, now: Instant) {
        self.request(Scene::ProfileFlash { index }, now);
        self.start_retry(now);
    }

    fn on_activity_changed(
        &mut self,
        state: ActivityState,
        now: Instant,
        status: &impl StatusSource,
    ) {
        match state {
            ActivityState::Active => {
                self.display_off_all();
                self.battery_at = None;
                self.charging_at = None;
                self.start_retry(now);
            }
            ActivityState::Sleep if self.config.suspend_disables_leds => {
                self.display_off_all();
                self.battery_at = None;
                self.charging_at = None;
                self.retry = RetrySession::NotChecking;
            }
            ActivityState::Idle | ActivityState::Sleep => {
                if self.config.idle_shows_battery {
                    if self.config.charging_animation && status.usb_state() != UsbConnState::None
                    {
                        self.charging_at = Some(now);
                    } else {
                        self.battery_at = Some(now);
                    }
                }

                if !self.config.retry_only_when_active {
                    self.start_retry(now);
                }
            }
        }
    }

    fn on_usb_conn_changed(&mut self, state: UsbConnState, now: Instant) {
        let previous = mem::replace(&mut self.last_usb, state);

        if previous == UsbConnState::None && state != UsbConnState::None {
            self.request(Scene::UsbSweep, now);
            return;
        }

        if state == UsbConnState::None && self.charging_at.take().is_some() {
            // The charging animation can leave a full battery lit
            self.display_off_all();
        }

        if state == UsbConnState::Suspended && self.config.suspend_disables_leds {
            self.display_off_all();
        }

        self.start_retry(now + self.config.retry_interval());
    }

    fn on_peripheral_status_changed(&mut self, connected: bool, now: Instant) {
        self.peripheral_connected = connected;

        if !connected && self.config.role == SplitRole::Peripheral {
            self.start_retry(now);
        }
    }

    fn connection_retry_tick(&mut self, now: Instant, status: &impl StatusSource) {
        if self.config.retry_only_when_active && status.activity() != ActivityState::Active {
            self.retry = RetrySession::NotChecking;
            return;
        }

        if self.is_connected(status) {
            self.retry = RetrySession::NotChecking;
            return;
        }

        self.request(Scene::ConnectionBlink, now);
        self.retry = RetrySession::Checking {
            next: now + self.config.retry_interval(),
        };
    }

    fn battery_display_tick(&mut self, now: Instant, status: &impl StatusSource) {
        let Some(level) = status.battery_level() else {
            self.battery_at = Some(now + self.config.battery_poll());
            return;
        };

        let scene = Scene::BatteryReadout { level };
        match self.request(scene, now) {
            SceneRequest::Dropped => self.battery_at = Some(now + self.config.battery_poll()),
            SceneRequest::Started | SceneRequest::Queued => {
                if self.config.recheck_after_battery {
                    self.start_retry(now + scene.duration(&self.config));
                }
            }
        }
    }

    fn charging_tick(&mut self, now: Instant, status: &impl StatusSource) {
        if status.usb_state() == UsbConnState::None || status.activity() == ActivityState::Active
        {
            return;
        }

        match status.battery_level() {
            Some(level) => {
                self.request(Scene::ChargingStep { level }, now);
                self.charging_at = Some(now + self.config.charging_period());
            }
            None => self.charging_at = Some(now + self.config.battery_poll()),
        }
    }

    fn is_connected(&self, status: &impl StatusSource) -> bool {
        match self.config.role {
            SplitRole::Central => {
                status.ble_profile_connected() || status.usb_state() == UsbConnState::Connected
            }
            SplitRole::Peripheral => self.peripheral_connected,
        }
    }

    /// Starts a connection-retry session with its first check at `first_check`, unless one is
    /// already running.
    fn start_retry(&mut self, first_check: Instant) {
        if self.retry == RetrySession::NotChecking {
            self.retry = RetrySession::Checking { next: first_check };
        }
    }

    fn set_frame(&mut self, frame: Frame) {
        if self.frame != frame {
            self.frame = frame;
            self.dirty = true;
        }
    }

    /// Plays every step whose time has come, and starts the pending scene once the slot frees.
    /// Steps are timed from the previous step's deadline, so a late poll catches up instead of
    /// stretching the scene. The pending scene starts no earlier than `now`.
    fn advance(&mut self, now: Instant) {
        while let Some(mut playing) = self.playing {
            if playing.until > now {
                break;
            }

            match playing.scene.step(playing.step, &self.config) {
                Some(step) => {
                    self.set_frame(step.frame);
                    playing.step += 1;
                    playing.until += step.hold;
                    self.playing = Some(playing);
                }
                None => {
                    // A late poll shortens the gap before the pending scene, never the scene
                    self.playing = self.pending.take().map(|scene| PlayingScene {
                        scene,
                        step: 0,
                        until: playing.until.max(now),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::status::StatusSnapshot;

    fn t(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn connected() -> StatusSnapshot {
        StatusSnapshot {
            battery_level: Some(60),
            ble_profile_connected: true,
            usb_state: UsbConnState::None,
            activity: ActivityState::Active,
        }
    }

    fn disconnected() -> StatusSnapshot {
        StatusSnapshot {
            ble_profile_connected: false,
            ..connected()
        }
    }

    /// A coordinator that has finished its boot readout.
    fn booted(config: IndicatorConfig, status: &StatusSnapshot) -> Coordinator {
        let mut coordinator = Coordinator::new(config);
        coordinator.start(t(0), status);
        coordinator.poll(t(10_000), &connected());
        assert!(!coordinator.is_busy());
        assert_eq!(coordinator.retry_session(), RetrySession::NotChecking);
        coordinator
    }

    #[test]
    fn boot_readout_for_every_level() {
        for level in 0..=100u8 {
            let status = StatusSnapshot {
                battery_level: Some(level),
                ..connected()
            };
            let mut coordinator = Coordinator::new(IndicatorConfig::default());
            coordinator.start(t(0), &status);

            let expected = match level {
                0..=20 => LedMask::BATTERY_1,
                21..=40 => LedMask::battery_tier(1),
                41..=80 => LedMask::battery_tier(2),
                _ => LedMask::battery_tier(3),
            };
            assert_eq!(coordinator.frame().lit(), expected, "level {}", level);
            assert_eq!(coordinator.playing(), Some(Scene::BatteryReadout { level }));

            coordinator.poll(t(1400), &status);
            assert!(coordinator.frame().is_off());
            // Low levels are still blinking
            assert_eq!(coordinator.is_busy(), level <= 20, "level {}", level);

            coordinator.poll(t(3400), &status);
            assert!(coordinator.frame().is_off(), "level {}", level);
            assert!(!coordinator.is_busy());
        }
    }

    #[test]
    fn low_battery_blink_timing() {
        let status = StatusSnapshot {
            battery_level: Some(10),
            ..connected()
        };
        let mut coordinator = Coordinator::new(IndicatorConfig::default());
        coordinator.start(t(0), &status);

        for blink in 0..5 {
            coordinator.poll(t(blink * 400), &status);
            assert_eq!(coordinator.frame().lit(), LedMask::BATTERY_1);
            coordinator.poll(t(blink * 400 + 200), &status);
            assert!(coordinator.frame().is_off());
        }

        coordinator.poll(t(3399), &status);
        assert!(coordinator.is_busy());
        coordinator.poll(t(3400), &status);
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn unavailable_battery_is_polled() {
        let mut status = StatusSnapshot {
            battery_level: None,
            ..connected()
        };
        let mut coordinator = Coordinator::new(IndicatorConfig::default());
        coordinator.start(t(0), &status);

        assert!(coordinator.frame().is_off());
        assert!(!coordinator.is_busy());
        assert_eq!(coordinator.next_deadline(), Some(t(500)));

        coordinator.poll(t(500), &status);
        assert!(coordinator.frame().is_off());
        assert_eq!(coordinator.next_deadline(), Some(t(1000)));

        status.battery_level = Some(0);
        coordinator.poll(t(1000), &status);
        assert_eq!(
            coordinator.playing(),
            Some(Scene::BatteryReadout { level: 0 })
        );
        assert_eq!(coordinator.frame().lit(), LedMask::BATTERY_1);
    }

    #[test]
    fn profile_flash_after_unpolled_flash() {
        for policy in [ScenePolicy::LastWins, ScenePolicy::Drop] {
            let config = IndicatorConfig {
                scene_policy: policy,
                ..IndicatorConfig::default()
            };
            let status = connected();
            let mut coordinator = booted(config, &status);

            coordinator.handle(Notification::ProfileChanged(0), t(20_000), &status);
            // The first flash is over by 20_180, but nothing polled in between
            coordinator.handle(Notification::ProfileChanged(2), t(20_500), &status);
            assert_eq!(
                coordinator.playing(),
                Some(Scene::ProfileFlash { index: 2 }),
                "{:?}",
                policy
            );
            assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(3));

            coordinator.poll(t(20_680), &status);
            assert!(coordinator.frame().is_off());
            assert!(!coordinator.is_busy());
        }
    }

    #[test]
    fn late_poll_still_plays_pending_scene() {
        let status = connected();
        let mut coordinator = booted(IndicatorConfig::default(), &status);
        coordinator.request(Scene::ProfileFlash { index: 0 }, t(20_000));
        assert_eq!(
            coordinator.request(Scene::ProfileFlash { index: 1 }, t(20_010)),
            SceneRequest::Queued
        );

        coordinator.poll(t(25_000), &status);
        assert_eq!(
            coordinator.playing(),
            Some(Scene::ProfileFlash { index: 1 })
        );
        assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(2));
        assert_eq!(coordinator.next_deadline(), Some(t(25_180)));

        coordinator.poll(t(25_180), &status);
        assert!(coordinator.frame().is_off());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn config_survives_storage_encoding() {
        let config = IndicatorConfig {
            output: OutputKind::Pwm,
            role: SplitRole::Peripheral,
            scene_policy: ScenePolicy::Drop,
            recheck_after_battery: true,
            retry_interval_ms: 2500,
            timings: SceneTimings {
                sweep_fade_ms: 450,
                ..SceneTimings::default()
            },
            ..IndicatorConfig::default()
        };

        let mut buf = [0u8; 64];
        let encoded = postcard::to_slice(&config, &mut buf).unwrap();
        let decoded: IndicatorConfig = postcard::from_bytes(encoded).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn off_all_is_idempotent() {
        let status = connected();
        let mut coordinator = Coordinator::new(IndicatorConfig::default());
        coordinator.start(t(0), &status);
        assert!(!coordinator.frame().is_off());

        coordinator.display_off_all();
        let once = coordinator.frame();
        assert!(!coordinator.is_busy());
        coordinator.display_off_all();
        assert_eq!(coordinator.frame(), once);
        assert!(once.is_off());
        assert_eq!(coordinator.take_frame(), Some(Frame::OFF));
        assert_eq!(coordinator.take_frame(), None);
    }

    #[test]
    fn profile_flash() {
        let status = connected();
        for index in 0..=2u8 {
            let mut coordinator = booted(IndicatorConfig::default(), &status);
            coordinator.handle(Notification::ProfileChanged(index), t(20_000), &status);
            assert_eq!(
                coordinator.frame().lit(),
                LedMask::battery_tier(index as usize + 1)
            );
            coordinator.poll(t(20_180), &status);
            assert!(coordinator.frame().is_off());
            assert!(!coordinator.is_busy());
        }

        let mut coordinator = booted(IndicatorConfig::default(), &status);
        coordinator.handle(Notification::ProfileChanged(3), t(20_000), &status);
        assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
        coordinator.poll(t(20_180), &status);
        assert!(coordinator.frame().is_off());
    }

    #[test]
    fn profile_change_without_connection_starts_retry() {
        let status = disconnected();
        let mut coordinator = booted(IndicatorConfig::default(), &connected());

        coordinator.handle(Notification::ProfileChanged(1), t(20_000), &status);
        assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(2));
        // The first connection blink waits for the profile flash
        assert_eq!(coordinator.pending(), Some(Scene::ConnectionBlink));
        assert_eq!(
            coordinator.retry_session(),
            RetrySession::Checking { next: t(24_000) }
        );

        coordinator.poll(t(20_180), &status);
        assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
        coordinator.poll(t(20_320), &status);
        assert!(coordinator.frame().is_off());

        for tick in 1..=5 {
            let at = 20_000 + tick * 4000;
            coordinator.poll(t(at), &status);
            assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
            coordinator.poll(t(at + 140), &status);
            assert!(coordinator.frame().is_off());
        }

        // Connection comes back, the next check ends the session without blinking
        coordinator.poll(t(44_000), &connected());
        assert!(coordinator.frame().is_off());
        assert_eq!(coordinator.retry_session(), RetrySession::NotChecking);
        assert_eq!(coordinator.next_deadline(), None);
    }

    #[test]
    fn usb_connection_ends_retry() {
        let mut coordinator = booted(IndicatorConfig::default(), &connected());
        coordinator.handle(Notification::ProfileChanged(4), t(20_000), &disconnected());
        assert!(matches!(
            coordinator.retry_session(),
            RetrySession::Checking { .. }
        ));

        let on_usb = StatusSnapshot {
            usb_state: UsbConnState::Connected,
            ..disconnected()
        };
        coordinator.poll(t(24_000), &on_usb);
        assert_eq!(coordinator.retry_session(), RetrySession::NotChecking);
    }

    #[test]
    fn idle_pauses_retry() {
        let mut coordinator = booted(IndicatorConfig::default(), &connected());
        coordinator.handle(Notification::ProfileChanged(0), t(20_000), &disconnected());

        let idle = StatusSnapshot {
            activity: ActivityState::Idle,
            ..disconnected()
        };
        coordinator.poll(t(24_000), &idle);
        assert_eq!(coordinator.retry_session(), RetrySession::NotChecking);

        coordinator.handle(
            Notification::ActivityChanged(ActivityState::Active),
            t(30_000),
            &disconnected(),
        );
        assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
        assert_eq!(
            coordinator.retry_session(),
            RetrySession::Checking { next: t(34_000) }
        );
    }

    #[test]
    fn usb_power_plays_sweep() {
        let status = StatusSnapshot {
            activity: ActivityState::Idle,
            ..connected()
        };
        let mut coordinator = booted(IndicatorConfig::default(), &connected());

        coordinator.handle(
            Notification::UsbConnChanged(UsbConnState::Powered),
            t(20_000),
            &status,
        );
        assert_eq!(coordinator.playing(), Some(Scene::UsbSweep));

        let mut lit = Vec::new();
        for step in 0..5 {
            coordinator.poll(t(20_000 + step * 300), &status);
            lit.push(coordinator.frame().lit());
        }
        assert_eq!(
            lit,
            [
                LedMask::STATUS,
                LedMask::STATUS | LedMask::BATTERY_1,
                LedMask::STATUS | LedMask::battery_tier(2),
                LedMask::all(),
                LedMask::empty(),
            ]
        );

        coordinator.poll(t(21_500), &status);
        assert!(!coordinator.is_busy());
        assert!(coordinator.frame().is_off());

        // Already powered, no second sweep
        coordinator.handle(
            Notification::UsbConnChanged(UsbConnState::Connected),
            t(30_000),
            &status,
        );
        assert_eq!(coordinator.playing(), None);
    }

    #[test]
    fn unplugging_usb_schedules_retry() {
        let status = disconnected();
        let mut coordinator = booted(IndicatorConfig::default(), &connected());
        coordinator.handle(
            Notification::UsbConnChanged(UsbConnState::Powered),
            t(20_000),
            &connected(),
        );
        coordinator.poll(t(22_000), &connected());

        coordinator.handle(
            Notification::UsbConnChanged(UsbConnState::None),
            t(30_000),
            &status,
        );
        assert_eq!(
            coordinator.retry_session(),
            RetrySession::Checking { next: t(34_000) }
        );
        assert!(coordinator.frame().is_off());

        coordinator.poll(t(34_000), &status);
        assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
    }

    #[test]
    fn drop_policy_rejects_while_busy() {
        let config = IndicatorConfig {
            scene_policy: ScenePolicy::Drop,
            ..IndicatorConfig::default()
        };
        let status = disconnected();
        let mut coordinator = booted(config, &connected());

        coordinator.handle(Notification::ProfileChanged(2), t(20_000), &status);
        assert_eq!(coordinator.pending(), None);
        assert_eq!(
            coordinator.request(Scene::ConnectionBlink, t(20_010)),
            SceneRequest::Dropped
        );

        coordinator.poll(t(20_180), &status);
        assert!(coordinator.frame().is_off());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn last_wins_keeps_newest_request() {
        let mut coordinator = booted(IndicatorConfig::default(), &connected());
        assert_eq!(
            coordinator.request(Scene::ProfileFlash { index: 0 }, t(20_000)),
            SceneRequest::Started
        );
        assert_eq!(
            coordinator.request(Scene::ConnectionBlink, t(20_010)),
            SceneRequest::Queued
        );
        assert_eq!(
            coordinator.request(Scene::ProfileFlash { index: 2 }, t(20_020)),
            SceneRequest::Queued
        );
        assert_eq!(coordinator.pending(), Some(Scene::ProfileFlash { index: 2 }));

        coordinator.poll(t(20_180), &connected());
        assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(3));
        assert_eq!(coordinator.pending(), None);
    }

    #[test]
    fn active_cancels_idle_display() {
        let idle = StatusSnapshot {
            activity: ActivityState::Idle,
            ..connected()
        };
        let mut coordinator = booted(IndicatorConfig::default(), &connected());

        coordinator.handle(
            Notification::ActivityChanged(ActivityState::Idle),
            t(20_000),
            &idle,
        );
        assert_eq!(
            coordinator.playing(),
            Some(Scene::BatteryReadout { level: 60 })
        );
        assert!(!coordinator.frame().is_off());

        coordinator.handle(
            Notification::ActivityChanged(ActivityState::Active),
            t(20_500),
            &connected(),
        );
        assert!(coordinator.frame().is_off());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn charging_animation_while_idle_on_usb() {
        let mut charging = StatusSnapshot {
            usb_state: UsbConnState::Powered,
            activity: ActivityState::Idle,
            battery_level: Some(55),
            ..connected()
        };
        let mut coordinator = booted(IndicatorConfig::default(), &connected());
        coordinator.handle(
            Notification::UsbConnChanged(UsbConnState::Powered),
            t(20_000),
            &charging,
        );
        coordinator.poll(t(22_000), &charging);

        coordinator.handle(
            Notification::ActivityChanged(ActivityState::Idle),
            t(30_000),
            &charging,
        );
        assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(2));
        coordinator.poll(t(31_000), &charging);
        assert_eq!(coordinator.frame().lit(), LedMask::BATTERY_1);
        coordinator.poll(t(32_000), &charging);
        assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(2));

        charging.battery_level = Some(100);
        coordinator.poll(t(34_000), &charging);
        assert_eq!(coordinator.frame().lit(), LedMask::battery_tier(3));
        assert!(!coordinator.is_busy());

        // Unplugging clears the solid display
        let unplugged = StatusSnapshot {
            usb_state: UsbConnState::None,
            ..charging
        };
        coordinator.handle(
            Notification::UsbConnChanged(UsbConnState::None),
            t(35_000),
            &unplugged,
        );
        assert!(coordinator.frame().is_off());
        coordinator.poll(t(36_000), &unplugged);
        assert!(coordinator.frame().is_off());
    }

    #[test]
    fn sleep_turns_everything_off() {
        let mut coordinator = booted(IndicatorConfig::default(), &connected());
        coordinator.handle(Notification::ProfileChanged(1), t(20_000), &disconnected());
        assert!(!coordinator.frame().is_off());

        let asleep = StatusSnapshot {
            activity: ActivityState::Sleep,
            ..disconnected()
        };
        coordinator.handle(
            Notification::ActivityChanged(ActivityState::Sleep),
            t(20_050),
            &asleep,
        );
        assert!(coordinator.frame().is_off());
        assert_eq!(coordinator.retry_session(), RetrySession::NotChecking);
        assert_eq!(coordinator.next_deadline(), None);
    }

    #[test]
    fn peripheral_blinks_until_link_is_up() {
        let config = IndicatorConfig {
            role: SplitRole::Peripheral,
            ..IndicatorConfig::default()
        };
        let status = connected();
        let mut coordinator = Coordinator::new(config);
        coordinator.start(t(0), &status);
        // The split link is down at boot, so the first check queues a blink behind the readout
        assert_eq!(coordinator.pending(), Some(Scene::ConnectionBlink));
        coordinator.poll(t(10_000), &status);

        coordinator.handle(Notification::PeripheralStatusChanged(true), t(10_500), &status);
        coordinator.poll(t(14_000), &status);
        assert_eq!(coordinator.retry_session(), RetrySession::NotChecking);

        coordinator.handle(Notification::PeripheralStatusChanged(false), t(20_000), &status);
        assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
        assert_eq!(
            coordinator.retry_session(),
            RetrySession::Checking { next: t(24_000) }
        );
    }

    #[test]
    fn recheck_after_battery_readout() {
        let config = IndicatorConfig {
            recheck_after_battery: true,
            ..IndicatorConfig::default()
        };
        let status = disconnected();
        let mut coordinator = booted(config, &connected());

        let idle = StatusSnapshot {
            activity: ActivityState::Idle,
            ..connected()
        };
        coordinator.handle(
            Notification::ActivityChanged(ActivityState::Idle),
            t(20_000),
            &idle,
        );
        assert_eq!(
            coordinator.retry_session(),
            RetrySession::Checking { next: t(21_400) }
        );

        coordinator.poll(t(21_400), &status);
        assert_eq!(coordinator.frame().lit(), LedMask::STATUS);
    }
}
