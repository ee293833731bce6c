//! Source selection.
//!
//! All functions here are pure and testable without a document.
//!
//! The container width is scaled by a density multiplier to get the
//! *effective target width*; the chosen source is the narrowest one at least
//! that wide, or the widest available when every source is too small.

use crate::attributes::{Multiplier, SourceSet};
use crate::density::DensityState;
use crate::types::SelectedSource;

/// Resolved multipliers for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multipliers {
    pub standard: f64,
    pub high_density: f64,
}

impl Multipliers {
    /// The multiplier that applies to the detected display.
    pub fn for_display(&self, density: &DensityState) -> f64 {
        if density.is_high_density() {
            self.high_density
        } else {
            self.standard
        }
    }
}

/// Resolve declared multipliers to concrete values.
///
/// - standard: `auto` → 1.0
/// - high density: `auto` → `device_ratio * standard`, or
///   `fallback_ratio * standard` when the device ratio is unknown
/// - an explicit high-density value is scaled by the standard multiplier
///
/// The high-density multiplier is never below the standard one.
///
/// # Examples
/// ```
/// # use ca_images::attributes::Multiplier;
/// # use ca_images::selector::resolve_multipliers;
/// let m = resolve_multipliers(Multiplier::Auto, Multiplier::Auto, Some(2.0), 1.5);
/// assert_eq!((m.standard, m.high_density), (1.0, 2.0));
///
/// let m = resolve_multipliers(Multiplier::Auto, Multiplier::Auto, None, 1.5);
/// assert_eq!(m.high_density, 1.5);
/// ```
pub fn resolve_multipliers(
    standard: Multiplier,
    high_density: Multiplier,
    device_ratio: Option<f64>,
    fallback_ratio: f64,
) -> Multipliers {
    let standard = match standard {
        Multiplier::Auto => 1.0,
        Multiplier::Value(v) => v,
    };
    let high_density = match high_density {
        Multiplier::Auto => device_ratio.unwrap_or(fallback_ratio) * standard,
        Multiplier::Value(v) => v * standard,
    };
    Multipliers {
        standard,
        high_density: high_density.max(standard),
    }
}

/// Pick the narrowest source whose width is at least `target_width * multiplier`.
///
/// An exact width match qualifies. When the target exceeds every source the
/// widest one is returned.
///
/// # Examples
/// ```
/// # use ca_images::attributes::SourceSet;
/// # use ca_images::selector::select;
/// let sources = SourceSet::from_json(r#"{"320":"a","640":"b","1024":"c"}"#).unwrap();
/// assert_eq!(select(&sources, 500.0, 1.0).width, 640);
/// assert_eq!(select(&sources, 2000.0, 1.0).width, 1024);
/// ```
pub fn select(sources: &SourceSet, target_width: f64, multiplier: f64) -> SelectedSource {
    let effective = target_width * multiplier;
    let (width, url) = sources
        .iter()
        .find(|(width, _)| f64::from(*width) >= effective)
        .unwrap_or_else(|| sources.largest());
    SelectedSource {
        width,
        url: url.to_string(),
    }
}

/// Whether replacing `current` with `candidate` is an upgrade.
///
/// Displayed images are only ever swapped for strictly wider sources.
pub fn is_upgrade(current: Option<&SelectedSource>, candidate: &SelectedSource) -> bool {
    match current {
        Some(current) => candidate.width > current.width,
        None => true,
    }
}
