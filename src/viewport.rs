//! Lazy-load evaluation.
//!
//! A container is eligible to load when it overlaps the band from
//! `behind` viewport heights above the scroll position to `ahead` viewport
//! heights below it (1.0 and 1.5 by default), and it is currently rendered.
//! Both band edges are exclusive.
//!
//! ```text
//!   scroll_top - behind*H   ─┐
//!                            │  load band
//!   scroll_top               │
//!   scroll_top + ahead*H    ─┘
//! ```

use crate::config::LazyLoadConfig;

/// Visible window: height and vertical scroll offset, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub height: f64,
    pub scroll_top: f64,
}

/// Layout of a placeholder's container.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerBox {
    /// Offset of the container's top edge from the document top.
    pub top: f64,
    pub height: f64,
    pub width: f64,
    /// Rendered with a non-zero size and not hidden by layout.
    pub visible: bool,
}

/// Process-wide switch that can block lazy loading (e.g. during an animated scroll).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyLoadGate(bool);

impl LazyLoadGate {
    pub fn is_open(&self) -> bool {
        self.0
    }

    pub fn set(&mut self, open: bool) {
        self.0 = open;
    }
}

impl Default for LazyLoadGate {
    fn default() -> Self {
        Self(true)
    }
}

/// Geometry-only check: does the container overlap the load band?
pub fn in_load_band(viewport: &Viewport, container: &ContainerBox, margins: &LazyLoadConfig) -> bool {
    let band_bottom = viewport.scroll_top + margins.ahead_viewports * viewport.height;
    let band_top = viewport.scroll_top - margins.behind_viewports * viewport.height;
    band_bottom > container.top && band_top < container.top + container.height
}

/// Whether a lazy image in `container` should start loading now.
///
/// Always false while the gate is closed.
pub fn should_load(
    gate: LazyLoadGate,
    viewport: &Viewport,
    container: &ContainerBox,
    margins: &LazyLoadConfig,
) -> bool {
    gate.is_open() && container.visible && in_load_band(viewport, container, margins)
}
