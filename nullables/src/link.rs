//! Nullable link sensor: readings the test sets programmatically.

use std::sync::atomic::{AtomicU32, Ordering};

use lanmesh_types::{LinkSensor, SIGNAL_LEVELS};

/// Sentinel stored when a reading is unavailable.
const UNAVAILABLE: u32 = u32::MAX;

/// A link sensor whose speed and signal can be changed mid-test.
pub struct NullLink {
    speed_mbps: AtomicU32,
    signal: AtomicU32,
}

impl NullLink {
    pub fn new(speed_mbps: u32, signal: u8) -> Self {
        Self {
            speed_mbps: AtomicU32::new(speed_mbps),
            signal: AtomicU32::new(u32::from(signal.min(SIGNAL_LEVELS))),
        }
    }

    /// A sensor that reports nothing, like a host with no wireless interface.
    pub fn unavailable() -> Self {
        Self {
            speed_mbps: AtomicU32::new(UNAVAILABLE),
            signal: AtomicU32::new(UNAVAILABLE),
        }
    }

    pub fn set_speed(&self, speed_mbps: u32) {
        self.speed_mbps.store(speed_mbps, Ordering::SeqCst);
    }

    pub fn set_signal(&self, signal: u8) {
        self.signal
            .store(u32::from(signal.min(SIGNAL_LEVELS)), Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.speed_mbps.store(UNAVAILABLE, Ordering::SeqCst);
    }
}

impl Default for NullLink {
    fn default() -> Self {
        Self::new(54, SIGNAL_LEVELS)
    }
}

impl LinkSensor for NullLink {
    fn link_speed_mbps(&self) -> Option<u32> {
        match self.speed_mbps.load(Ordering::SeqCst) {
            UNAVAILABLE | 0 => None,
            speed => Some(speed),
        }
    }

    fn signal_strength(&self) -> Option<u8> {
        match self.signal.load(Ordering::SeqCst) {
            UNAVAILABLE => None,
            s => u8::try_from(s).ok(),
        }
    }
}
