//! CLI output formatting.
//!
//! Each command has a `format_*` function returning `Vec<String>` for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.
//!
//! # Output Format
//!
//! ## Select
//!
//! ```text
//! 640 b.jpg
//!     target: 600px × 1 = 600px
//!     candidates: 320 640* 1024
//! ```
//!
//! ## Simulate
//!
//! ```text
//! Display: high density
//! Init: 3 registered, 1 skipped
//!     loaded: 001
//!
//! Steps
//! 001 scroll to 1200
//!     loaded: 002
//! 002 resize all containers to 1000px
//!     upgraded: 001 → 1024px
//!
//! Images
//! 001 lazy_load 1024px c.jpg
//!     displayed: c.jpg (visible)
//! 003 external_trigger 640px b.jpg (pending)
//! ```

use crate::attributes::SourceSet;
use crate::headless::{ImageSummary, SimulationReport, StepOutcome};
use crate::types::{ImageId, SelectedSource};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn id_list(ids: &[ImageId]) -> String {
    ids.iter()
        .map(|id| format_index(id.0 as usize))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Select
// ============================================================================

pub fn format_selection(
    sources: &SourceSet,
    width: f64,
    multiplier: f64,
    selected: &SelectedSource,
) -> Vec<String> {
    let candidates: Vec<String> = sources
        .iter()
        .map(|(w, _)| {
            if w == selected.width {
                format!("{w}*")
            } else {
                w.to_string()
            }
        })
        .collect();
    vec![
        format!("{} {}", selected.width, selected.url),
        format!(
            "{}target: {width}px × {multiplier} = {}px",
            indent(1),
            width * multiplier
        ),
        format!("{}candidates: {}", indent(1), candidates.join(" ")),
    ]
}

pub fn print_selection(sources: &SourceSet, width: f64, multiplier: f64, selected: &SelectedSource) {
    for line in format_selection(sources, width, multiplier, selected) {
        println!("{}", line);
    }
}

// ============================================================================
// Simulate
// ============================================================================

fn step_lines(index: usize, outcome: &StepOutcome) -> Vec<String> {
    let mut lines = vec![format!("{} {}", format_index(index), outcome.step)];
    if !outcome.loaded.is_empty() {
        lines.push(format!("{}loaded: {}", indent(1), id_list(&outcome.loaded)));
    }
    for (id, width) in &outcome.upgraded {
        lines.push(format!(
            "{}upgraded: {} → {width}px",
            indent(1),
            format_index(id.0 as usize)
        ));
    }
    if !outcome.completed.is_empty() {
        lines.push(format!(
            "{}completed: {}",
            indent(1),
            id_list(&outcome.completed)
        ));
    }
    lines
}

fn image_lines(image: &ImageSummary) -> Vec<String> {
    let selection = match (image.width, image.url.as_deref()) {
        (Some(width), Some(url)) => format!(" {width}px {url}"),
        _ => String::new(),
    };
    let state = if image.loaded { "" } else { " (pending)" };
    let mut lines = vec![format!(
        "{} {}{selection}{state}",
        format_index(image.id.0 as usize),
        image.trigger
    )];
    if let Some(src) = &image.displayed {
        let visibility = if image.visible { "visible" } else { "hidden" };
        lines.push(format!("{}displayed: {src} ({visibility})", indent(1)));
    }
    lines
}

pub fn format_simulation(report: &SimulationReport) -> Vec<String> {
    let mut lines = Vec::new();
    let density = if report.high_density {
        "high density"
    } else {
        "standard density"
    };
    lines.push(format!("Display: {density}"));
    lines.push(format!(
        "Init: {} registered, {} skipped",
        report.init.registered.len(),
        report.init.skipped
    ));
    if !report.init.materialized.is_empty() {
        lines.push(format!(
            "{}loaded: {}",
            indent(1),
            id_list(&report.init.materialized)
        ));
    }

    if !report.steps.is_empty() {
        lines.push(String::new());
        lines.push("Steps".to_string());
        for (i, outcome) in report.steps.iter().enumerate() {
            lines.extend(step_lines(i + 1, outcome));
        }
    }

    if !report.images.is_empty() {
        lines.push(String::new());
        lines.push("Images".to_string());
        for image in &report.images {
            lines.extend(image_lines(image));
        }
    }
    lines
}

pub fn print_simulation(report: &SimulationReport) {
    for line in format_simulation(report) {
        println!("{}", line);
    }
}
