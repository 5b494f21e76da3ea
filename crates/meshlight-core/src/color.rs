//! Color temperature conversion
//!
//! Converts between mireds, Kelvin and the normalized "vendor level" that
//! some CTL servers expect instead of true Kelvin. All conversions are pure
//! functions of the configured mired range.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lowest lightness level
pub const MIN_LIGHTNESS: u16 = 0;
/// Highest lightness level
pub const MAX_LIGHTNESS: u16 = 65535;
/// Lowest CTL temperature a mesh CTL server accepts, in Kelvin
pub const MIN_KELVIN: u32 = 800;
/// Highest CTL temperature a mesh CTL server accepts, in Kelvin
pub const MAX_KELVIN: u32 = 20000;
/// Default lower mired bound (20000 K)
pub const MIN_MIRED: u32 = 50;
/// Default upper mired bound (800 K)
pub const MAX_MIRED: u32 = 1250;

const MIRED_SCALE: f64 = 1_000_000.0;

/// How a color temperature is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureEncoding {
    /// True Kelvin
    #[default]
    Kelvin,
    /// Node's own Kelvin range stretched onto 800..=20000
    VendorLevel,
}

impl TemperatureEncoding {
    /// Encode a Kelvin value for the CTL temperature field
    pub fn encode(&self, limits: &ColorLimits, kelvin: u32) -> u16 {
        let value = match self {
            Self::Kelvin => limits.clamp_kelvin(kelvin),
            Self::VendorLevel => limits.kelvin_to_vendor_level(kelvin),
        };
        value.min(u16::MAX as u32) as u16
    }

    /// Decode a CTL temperature field back to Kelvin
    pub fn decode(&self, limits: &ColorLimits, value: u16) -> u32 {
        match self {
            Self::Kelvin => value as u32,
            Self::VendorLevel => limits.vendor_level_to_kelvin(value as u32),
        }
    }
}

/// Mired and Kelvin limits of one node, fixed for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorLimits {
    min_mired: u32,
    max_mired: u32,
    min_kelvin: u32,
    max_kelvin: u32,
}

impl ColorLimits {
    /// Derive limits from a configured mired range.
    ///
    /// An inverted range is swapped, the lower bound is raised to at least 1
    /// and the Kelvin range is the reciprocal, bounded by [`MIN_KELVIN`] and
    /// [`MAX_KELVIN`].
    pub fn new(min_mired: u32, max_mired: u32) -> Self {
        let (mut min_mired, mut max_mired) = (min_mired, max_mired);
        if min_mired > max_mired {
            warn!(min_mired, max_mired, "Swapping inverted mired limits");
            std::mem::swap(&mut min_mired, &mut max_mired);
        }
        let min_mired = min_mired.max(1);
        let max_mired = max_mired.max(min_mired);

        let mut min_kelvin = MIN_KELVIN.max((MIRED_SCALE / max_mired as f64) as u32);
        let mut max_kelvin = MAX_KELVIN.min((MIRED_SCALE / min_mired as f64) as u32);
        if min_kelvin > max_kelvin {
            std::mem::swap(&mut min_kelvin, &mut max_kelvin);
        }

        Self {
            min_mired,
            max_mired,
            min_kelvin,
            max_kelvin,
        }
    }

    pub fn mired_range(&self) -> (u32, u32) {
        (self.min_mired, self.max_mired)
    }

    pub fn kelvin_range(&self) -> (u32, u32) {
        (self.min_kelvin, self.max_kelvin)
    }

    pub fn clamp_kelvin(&self, kelvin: u32) -> u32 {
        kelvin.clamp(self.min_kelvin, self.max_kelvin)
    }

    /// Kelvin to mireds; 0 K saturates to the warmest mired value
    pub fn kelvin_to_mireds(&self, kelvin: u32) -> u32 {
        if kelvin == 0 {
            return self.max_mired;
        }
        let mired = (MIRED_SCALE / kelvin as f64).round_ties_even() as u32;
        mired.clamp(self.min_mired, self.max_mired)
    }

    /// Mireds to clamped Kelvin; 0 mired saturates to the coolest Kelvin value
    pub fn mireds_to_kelvin(&self, mired: u32) -> u32 {
        if mired == 0 {
            return self.max_kelvin;
        }
        let kelvin = (1_000_000 / mired).max(1);
        self.clamp_kelvin(kelvin)
    }

    /// Stretch the node's Kelvin range onto [`MIN_KELVIN`]..=[`MAX_KELVIN`]
    pub fn kelvin_to_vendor_level(&self, kelvin: u32) -> u32 {
        if self.max_kelvin == self.min_kelvin {
            return MIN_KELVIN;
        }
        let kelvin = self.clamp_kelvin(kelvin);
        let level = (kelvin - self.min_kelvin) as f64 * (MAX_KELVIN - MIN_KELVIN) as f64
            / (self.max_kelvin - self.min_kelvin) as f64
            + MIN_KELVIN as f64;
        level.round_ties_even() as u32
    }

    /// Inverse of [`Self::kelvin_to_vendor_level`]
    pub fn vendor_level_to_kelvin(&self, level: u32) -> u32 {
        if self.max_kelvin == self.min_kelvin {
            return self.min_kelvin;
        }
        let level = level.clamp(MIN_KELVIN, MAX_KELVIN);
        let kelvin = (level - MIN_KELVIN) as f64 * (self.max_kelvin - self.min_kelvin) as f64
            / (MAX_KELVIN - MIN_KELVIN) as f64
            + self.min_kelvin as f64;
        kelvin.round_ties_even() as u32
    }
}

impl Default for ColorLimits {
    fn default() -> Self {
        Self::new(MIN_MIRED, MAX_MIRED)
    }
}

/// Clamp a requested lightness to the 16-bit range
pub fn clamp_lightness(level: u32) -> u16 {
    level.min(MAX_LIGHTNESS as u32) as u16
}
