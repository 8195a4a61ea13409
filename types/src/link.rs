//! Link quality sensors.
//!
//! Reading the radio's link speed or signal level is platform specific and
//! lives outside the core. [`StaticLink`] reports configured values, which
//! is what wired hosts and tests want.

/// Number of normalized signal-strength levels. Wired links report the top level.
pub const SIGNAL_LEVELS: u8 = 10;

/// Source of link speed and signal strength readings.
pub trait LinkSensor: Send + Sync {
    /// Negotiated link speed in Mbps, `None` when unavailable.
    fn link_speed_mbps(&self) -> Option<u32>;

    /// Normalized signal strength in `0..=SIGNAL_LEVELS`, `None` when unavailable.
    fn signal_strength(&self) -> Option<u8>;
}

/// A sensor that always reports the same readings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticLink {
    speed_mbps: u32,
    signal: u8,
}

impl StaticLink {
    pub fn new(speed_mbps: u32, signal: u8) -> Self {
        Self {
            speed_mbps,
            signal: signal.min(SIGNAL_LEVELS),
        }
    }

    /// A wired link: full signal.
    pub fn wired(speed_mbps: u32) -> Self {
        Self::new(speed_mbps, SIGNAL_LEVELS)
    }
}

impl LinkSensor for StaticLink {
    fn link_speed_mbps(&self) -> Option<u32> {
        (self.speed_mbps > 0).then_some(self.speed_mbps)
    }

    fn signal_strength(&self) -> Option<u8> {
        Some(self.signal)
    }
}
