//! Display density detection.
//!
//! Runs once when the engine initializes. A display is high density when the
//! reported device pixel ratio exceeds 1, or when the `min-device-pixel-ratio`
//! media query matches at the configured threshold. The result is read-only
//! for the rest of the page session.

use crate::config::DensityConfig;

/// What the host can tell us about the display.
pub trait DisplayProbe {
    /// `window.devicePixelRatio`, when the host exposes it.
    fn device_pixel_ratio(&self) -> Option<f64>;

    /// Whether a `min-device-pixel-ratio: <ratio>` media query matches.
    fn matches_min_pixel_ratio(&self, ratio: f64) -> bool;
}

/// Result of the one-time density probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityState {
    is_high_density: bool,
    device_ratio: Option<f64>,
}

impl DensityState {
    /// Probe the display once.
    pub fn detect<P: DisplayProbe + ?Sized>(probe: &P, config: &DensityConfig) -> Self {
        let device_ratio = probe
            .device_pixel_ratio()
            .filter(|r| r.is_finite() && *r > 0.0);
        let is_high_density = device_ratio.is_some_and(|r| r > 1.0)
            || probe.matches_min_pixel_ratio(config.high_density_query_ratio);
        Self {
            is_high_density,
            device_ratio,
        }
    }

    /// A fixed state, for hosts that already know the answer.
    pub fn fixed(is_high_density: bool, device_ratio: Option<f64>) -> Self {
        Self {
            is_high_density,
            device_ratio,
        }
    }

    pub fn is_high_density(&self) -> bool {
        self.is_high_density
    }

    pub fn device_ratio(&self) -> Option<f64> {
        self.device_ratio
    }
}

impl Default for DensityState {
    fn default() -> Self {
        Self::fixed(false, Some(1.0))
    }
}
