//! Device state queried by the indicator coordinator.
//!
//! The firmware's BLE, USB, battery and activity tasks own this state. They can either implement
//! [`StatusSource`] themselves, or push their updates into a [`SharedStatus`].

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// USB connection state, as reported by the USB stack.
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum UsbConnState {
    /// No USB power.
    None = 0,
    /// VBUS is present, but no host has configured the device (e.g. a wall charger).
    Powered = 1,
    /// The host suspended the bus.
    Suspended = 2,
    /// Enumerated and configured by a host.
    Connected = 3,
}

impl UsbConnState {
    /// Converts a raw state value reported by the USB stack.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }
}

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum ActivityState {
    Active = 0,
    Idle = 1,
    Sleep = 2,
}

impl ActivityState {
    /// Converts a raw state value reported by the activity tracker.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }
}

/// Queries answered by the host firmware.
pub trait StatusSource {
    /// Current battery charge in percent, or `None` if no reading is available yet.
    fn battery_level(&self) -> Option<u8>;

    /// Whether the active BLE profile has a connected host.
    fn ble_profile_connected(&self) -> bool;

    fn usb_state(&self) -> UsbConnState;

    fn activity(&self) -> ActivityState;
}

impl<T: StatusSource> StatusSource for &T {
    fn battery_level(&self) -> Option<u8> {
        (**self).battery_level()
    }

    fn ble_profile_connected(&self) -> bool {
        (**self).ble_profile_connected()
    }

    fn usb_state(&self) -> UsbConnState {
        (**self).usb_state()
    }

    fn activity(&self) -> ActivityState {
        (**self).activity()
    }
}

/// A copy of the device state at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct StatusSnapshot {
    pub battery_level: Option<u8>,
    pub ble_profile_connected: bool,
    pub usb_state: UsbConnState,
    pub activity: ActivityState,
}

impl StatusSnapshot {
    /// State at power-up: no battery reading, nothing connected, active.
    pub const fn default() -> Self {
        StatusSnapshot {
            battery_level: None,
            ble_profile_connected: false,
            usb_state: UsbConnState::None,
            activity: ActivityState::Active,
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::default()
    }
}

impl StatusSource for StatusSnapshot {
    fn battery_level(&self) -> Option<u8> {
        self.battery_level
    }

    fn ble_profile_connected(&self) -> bool {
        self.ble_profile_connected
    }

    fn usb_state(&self) -> UsbConnState {
        self.usb_state
    }

    fn activity(&self) -> ActivityState {
        self.activity
    }
}

/// Device state shared between the tasks that produce it and the indicator task.
pub struct SharedStatus<M: RawMutex> {
    inner: Mutex<M, Cell<StatusSnapshot>>,
}

impl<M: RawMutex> SharedStatus<M> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(StatusSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock(|cell| cell.get())
    }

    pub fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        self.inner.lock(|cell| {
            let mut snapshot = cell.get();
            f(&mut snapshot);
            cell.set(snapshot);
        })
    }

    /// Stores a new battery reading. Levels above 100 are clamped.
    pub fn set_battery_level(&self, level: u8) {
        self.update(|status| status.battery_level = Some(level.min(100)));
    }

    pub fn set_ble_profile_connected(&self, connected: bool) {
        self.update(|status| status.ble_profile_connected = connected);
    }

    pub fn set_usb_state(&self, state: UsbConnState) {
        self.update(|status| status.usb_state = state);
    }

    pub fn set_activity(&self, state: ActivityState) {
        self.update(|status| status.activity = state);
    }
}

impl<M: RawMutex> Default for SharedStatus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> StatusSource for SharedStatus<M> {
    fn battery_level(&self) -> Option<u8> {
        self.snapshot().battery_level
    }

    fn ble_profile_connected(&self) -> bool {
        self.snapshot().ble_profile_connected
    }

    fn usb_state(&self) -> UsbConnState {
        self.snapshot().usb_state
    }

    fn activity(&self) -> ActivityState {
        self.snapshot().activity
    }
}
