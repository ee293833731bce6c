//! Server-side placeholder generation.
//!
//! Produces the `<noscript>` markup the runtime consumes from a directory of
//! pre-rendered size variants. Each variant's intrinsic width becomes its key
//! in `data-srcs`; the smallest variant doubles as the no-script fallback.
//!
//! ```text
//! photos/dawn/
//! ├── dawn-320.jpg     →  {"320": "/img/dawn/dawn-320.jpg",
//! ├── dawn-640.jpg         "640": "/img/dawn/dawn-640.jpg",
//! └── dawn-1280.avif       "1280": "/img/dawn/dawn-1280.avif"}
//! ```

use crate::attributes::{Multiplier, SourceSet};
use crate::types::{ImageId, LoadTrigger};
use log::debug;
use maud::{Markup, html};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

const VARIANT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tif", "tiff", "avif"];

#[derive(Error, Debug)]
pub enum PlaceholderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to read dimensions of {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to parse AVIF {path}: {message}")]
    Avif { path: PathBuf, message: String },
    #[error("no image variants found in {0}")]
    NoVariants(PathBuf),
}

/// Pixel dimensions of an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn is_variant(path: &Path) -> bool {
    VARIANT_EXTENSIONS.contains(&extension(path).as_str())
}

fn identify_avif(path: &Path) -> Result<Dimensions, PlaceholderError> {
    let bytes = std::fs::read(path)?;
    let avif_error = |e: avif_parse::Error| PlaceholderError::Avif {
        path: path.to_path_buf(),
        message: format!("{e:?}"),
    };
    let avif = avif_parse::read_avif(&mut std::io::Cursor::new(&bytes)).map_err(avif_error)?;
    let meta = avif.primary_item_metadata().map_err(avif_error)?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

/// Read an image's dimensions from its header without decoding pixels.
pub fn identify(path: &Path) -> Result<Dimensions, PlaceholderError> {
    if extension(path) == "avif" {
        return identify_avif(path);
    }
    let (width, height) = image::image_dimensions(path).map_err(|source| PlaceholderError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Dimensions { width, height })
}

/// Join a base URL and a relative path with exactly one slash.
fn variant_url(base_url: &str, relative: &Path) -> String {
    let rel: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{}/{}", base_url.trim_end_matches('/'), rel.join("/"))
}

/// Build a source set from every image variant under `dir`.
///
/// Paths are visited in sorted order; when two variants share a width the
/// first one wins.
pub fn collect_variants(dir: &Path, base_url: &str) -> Result<SourceSet, PlaceholderError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() && is_variant(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut sources = BTreeMap::new();
    for path in &paths {
        let width = identify(path)?.width;
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let url = variant_url(base_url, relative);
        if sources.contains_key(&width) {
            debug!("skipping {}: width {width} already provided", path.display());
            continue;
        }
        sources.insert(width, url);
    }
    SourceSet::new(sources).ok_or_else(|| PlaceholderError::NoVariants(dir.to_path_buf()))
}

/// Everything needed to render one placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderMarkup {
    /// Class the runtime scans for.
    pub placeholder_class: String,
    pub id: Option<ImageId>,
    pub sources: SourceSet,
    pub classes: Vec<String>,
    /// Omitted attributes fall back to the runtime's configured defaults.
    pub trigger: Option<LoadTrigger>,
    pub fade: Option<Duration>,
    pub alt: String,
    pub standard: Multiplier,
    pub retina: Multiplier,
}

impl PlaceholderMarkup {
    pub fn new(placeholder_class: impl Into<String>, sources: SourceSet) -> Self {
        Self {
            placeholder_class: placeholder_class.into(),
            id: None,
            sources,
            classes: Vec::new(),
            trigger: None,
            fade: None,
            alt: String::new(),
            standard: Multiplier::Auto,
            retina: Multiplier::Auto,
        }
    }
}

fn explicit(m: Multiplier) -> Option<String> {
    match m {
        Multiplier::Auto => None,
        Multiplier::Value(_) => Some(m.attribute_value()),
    }
}

/// `<noscript>` placeholder with a fallback `<img>` at the smallest source.
pub fn render_placeholder(spec: &PlaceholderMarkup) -> Markup {
    let (_, fallback) = spec.sources.smallest();
    let classes = (!spec.classes.is_empty()).then(|| spec.classes.join(" "));
    html! {
        noscript class=(spec.placeholder_class)
            data-image-id=[spec.id.map(|id| id.to_string())]
            data-srcs=(spec.sources.to_json())
            data-class=[classes]
            data-load-trigger=[spec.trigger.map(LoadTrigger::attribute_value)]
            data-fade-time=[spec.fade.map(|f| f.as_millis().to_string())]
            data-alt=(spec.alt)
            data-standard-display-resolution=[explicit(spec.standard)]
            data-retina-display-resolution=[explicit(spec.retina)] {
            img src=(fallback) alt=(spec.alt);
        }
    }
}
