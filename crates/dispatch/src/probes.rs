use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Sentinel battery level meaning "simulator or unknown". A device reporting
/// this value always passes the insufficient-battery check.
pub const BATTERY_UNKNOWN: f64 = -1.0;

/// Reports current network reachability.
///
/// Injected into the manager at build time; the pipeline never talks to the
/// platform directly.
pub trait ConnectivityProbe: Send + Sync {
    /// Whether there is currently viable network connectivity.
    fn is_connected(&self) -> bool;
}

/// Reports current battery and power state.
pub trait PowerProbe: Send + Sync {
    /// Battery charge in percent, or [`BATTERY_UNKNOWN`] when the platform
    /// cannot report one.
    fn battery_percent(&self) -> f64;

    /// Whether the OS low-power mode is active.
    fn low_power_mode(&self) -> bool;
}

/// A connectivity probe whose state is toggled by tests or host callbacks.
#[derive(Debug)]
pub struct SimulatedConnectivity {
    connected: AtomicBool,
}

impl SimulatedConnectivity {
    /// Create a probe reporting the given initial state.
    #[must_use]
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    /// A probe that starts connected.
    #[must_use]
    pub fn connected() -> Self {
        Self::new(true)
    }

    /// Update the reported reachability.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for SimulatedConnectivity {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A power probe whose readings are set by tests or host callbacks.
#[derive(Debug)]
pub struct SimulatedPower {
    battery_percent: Mutex<f64>,
    low_power: AtomicBool,
}

impl SimulatedPower {
    /// Create a probe with the given battery level and low-power state.
    #[must_use]
    pub fn new(battery_percent: f64, low_power: bool) -> Self {
        Self {
            battery_percent: Mutex::new(battery_percent),
            low_power: AtomicBool::new(low_power),
        }
    }

    /// A probe reporting a full battery and no low-power mode.
    #[must_use]
    pub fn full() -> Self {
        Self::new(100.0, false)
    }

    /// Update the reported battery level.
    pub fn set_battery_percent(&self, percent: f64) {
        *self.battery_percent.lock() = percent;
    }

    /// Update the reported low-power state.
    pub fn set_low_power(&self, low_power: bool) {
        self.low_power.store(low_power, Ordering::SeqCst);
    }
}

impl PowerProbe for SimulatedPower {
    fn battery_percent(&self) -> f64 {
        *self.battery_percent.lock()
    }

    fn low_power_mode(&self) -> bool {
        self.low_power.load(Ordering::SeqCst)
    }
}
