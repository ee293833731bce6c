//! Declarative image attributes and the external settings object.
//!
//! Placeholders describe their image through `data-*` attributes. A page may
//! also ship an external settings object (JSON) that takes priority for any
//! image id it lists. Both sources are normalized into [`RawAttributes`] (a
//! plain string map) and then parsed once into a strongly typed
//! [`ImageConfig`]. Anything that fails to parse is a malformed-config error
//! for that image alone.
//!
//! ## Attributes
//!
//! | Attribute | Meaning | Default |
//! |---|---|---|
//! | `data-image-id` | Explicit identifier | allocated |
//! | `data-srcs` | JSON object, width → URL | required |
//! | `data-class` | Space-separated class list | none |
//! | `data-load-trigger` | `lazy_load`, `document_ready`, `external_trigger` | settings |
//! | `data-fade-time` | Fade-in duration, integer ms | settings |
//! | `data-alt` | Alt text | empty |
//! | `data-standard-display-resolution` | Multiplier or `auto` | `auto` |
//! | `data-retina-display-resolution` | Multiplier or `auto` | `auto` |

use crate::config::LoadingConfig;
use crate::types::{ImageId, LoadTrigger};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const ATTR_ID: &str = "data-image-id";
pub const ATTR_SOURCES: &str = "data-srcs";
pub const ATTR_CLASS: &str = "data-class";
pub const ATTR_TRIGGER: &str = "data-load-trigger";
pub const ATTR_FADE: &str = "data-fade-time";
pub const ATTR_ALT: &str = "data-alt";
pub const ATTR_STANDARD: &str = "data-standard-display-resolution";
pub const ATTR_RETINA: &str = "data-retina-display-resolution";

/// Every attribute the engine reads from a placeholder, in a stable order.
pub const ALL_ATTRIBUTES: [&str; 8] = [
    ATTR_ID,
    ATTR_SOURCES,
    ATTR_CLASS,
    ATTR_TRIGGER,
    ATTR_FADE,
    ATTR_ALT,
    ATTR_STANDARD,
    ATTR_RETINA,
];

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("missing data-srcs attribute")]
    MissingSources,
    #[error("data-srcs is not a JSON object of width to URL: {0}")]
    InvalidSources(#[from] serde_json::Error),
    #[error("data-srcs contains no sources")]
    EmptySources,
    #[error("source width {0:?} is not a whole number of pixels")]
    InvalidWidth(String),
    #[error("unknown load trigger {0:?}")]
    InvalidTrigger(String),
    #[error("fade time {0:?} is not a whole number of milliseconds")]
    InvalidFadeTime(String),
    #[error("{name} value {value:?} is not a positive number or 'auto'")]
    InvalidMultiplier { name: &'static str, value: String },
    #[error("image id {0:?} is not a non-negative integer")]
    InvalidId(String),
}

/// Attribute name → raw string value, exactly as declared.
pub type RawAttributes = BTreeMap<String, String>;

/// Sources for one image keyed by intrinsic width, ascending and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet(BTreeMap<u32, String>);

impl SourceSet {
    /// Build from width → URL pairs. Returns `None` for an empty set.
    pub fn new(sources: BTreeMap<u32, String>) -> Option<Self> {
        if sources.is_empty() {
            None
        } else {
            Some(Self(sources))
        }
    }

    /// Parse the `data-srcs` JSON object (`{"320": "a.jpg", ...}`).
    pub fn from_json(json: &str) -> Result<Self, AttributeError> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;
        let mut sources = BTreeMap::new();
        for (width, url) in raw {
            let w = width
                .trim()
                .parse::<u32>()
                .map_err(|_| AttributeError::InvalidWidth(width.clone()))?;
            sources.insert(w, url);
        }
        Self::new(sources).ok_or(AttributeError::EmptySources)
    }

    /// Serialize back to the `data-srcs` JSON form.
    pub fn to_json(&self) -> String {
        // Integer keys serialize as quoted strings, in ascending width order
        serde_json::to_string(&self.0).expect("width map always serializes")
    }

    /// Entries in ascending width order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.0.iter().map(|(w, url)| (*w, url.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The narrowest source.
    pub fn smallest(&self) -> (u32, &str) {
        self.iter().next().expect("SourceSet is never empty")
    }

    /// The widest source.
    pub fn largest(&self) -> (u32, &str) {
        self.0
            .iter()
            .next_back()
            .map(|(w, url)| (*w, url.as_str()))
            .expect("SourceSet is never empty")
    }
}

/// A resolution multiplier as declared on the placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Multiplier {
    /// Unset, empty, or `auto`: derive from defaults.
    Auto,
    Value(f64),
}

impl Multiplier {
    /// Parse the attribute `name`; `None` means the attribute is absent.
    pub fn parse(name: &'static str, raw: Option<&str>) -> Result<Self, AttributeError> {
        let Some(raw) = raw.map(str::trim) else {
            return Ok(Multiplier::Auto);
        };
        if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
            return Ok(Multiplier::Auto);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Ok(Multiplier::Value(v)),
            _ => Err(AttributeError::InvalidMultiplier {
                name,
                value: raw.to_string(),
            }),
        }
    }

    /// Attribute form: `auto` or the number.
    pub fn attribute_value(&self) -> String {
        match self {
            Multiplier::Auto => "auto".to_string(),
            Multiplier::Value(v) => v.to_string(),
        }
    }
}

/// Strongly typed per-image configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageConfig {
    pub sources: SourceSet,
    pub classes: Vec<String>,
    pub trigger: LoadTrigger,
    pub fade: Duration,
    pub alt: String,
    pub standard: Multiplier,
    pub retina: Multiplier,
}

impl ImageConfig {
    /// Parse raw attributes, filling gaps from the loading defaults.
    pub fn parse(attrs: &RawAttributes, defaults: &LoadingConfig) -> Result<Self, AttributeError> {
        let get = |name: &str| attrs.get(name).map(String::as_str);

        let sources = match get(ATTR_SOURCES) {
            Some(json) if !json.trim().is_empty() => SourceSet::from_json(json)?,
            _ => return Err(AttributeError::MissingSources),
        };

        let classes = get(ATTR_CLASS)
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let trigger = match get(ATTR_TRIGGER) {
            Some(t) => LoadTrigger::from_attribute(t)
                .ok_or_else(|| AttributeError::InvalidTrigger(t.to_string()))?,
            None => defaults.default_trigger,
        };

        let fade = match get(ATTR_FADE) {
            Some(f) => f
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| AttributeError::InvalidFadeTime(f.to_string()))?,
            None => defaults.default_fade(),
        };

        Ok(Self {
            sources,
            classes,
            trigger,
            fade,
            alt: get(ATTR_ALT).unwrap_or_default().to_string(),
            standard: Multiplier::parse(ATTR_STANDARD, get(ATTR_STANDARD))?,
            retina: Multiplier::parse(ATTR_RETINA, get(ATTR_RETINA))?,
        })
    }
}

/// Read the explicit id attribute, if any.
pub fn parse_id(attrs: &RawAttributes) -> Result<Option<ImageId>, AttributeError> {
    match attrs.get(ATTR_ID).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<ImageId>()
            .map(Some)
            .map_err(|_| AttributeError::InvalidId(raw.to_string())),
    }
}

// =============================================================================
// External settings object
// =============================================================================

/// Settings object supplied by the page host, keyed by image id.
///
/// ```json
/// {
///   "last_image_id": 5,
///   "images_data": {
///     "3": { "attributes": { "data-srcs": {"320": "a.jpg"}, "data-class": ["hero"] } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalSettings {
    /// Highest id the host has assigned; generated ids start above it.
    #[serde(default)]
    pub last_image_id: Option<u32>,
    #[serde(default)]
    pub images_data: BTreeMap<String, ExternalImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalImage {
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ExternalSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Highest id seen: `last_image_id` or any numeric key of `images_data`.
    pub fn highest_id(&self) -> u32 {
        let from_keys = self
            .images_data
            .keys()
            .filter_map(|k| k.parse::<ImageId>().ok())
            .map(|id| id.0)
            .max()
            .unwrap_or(0);
        self.last_image_id.unwrap_or(0).max(from_keys)
    }

    /// Attributes for `id` normalized to strings, if the object lists it.
    pub fn attributes_for(&self, id: ImageId) -> Option<RawAttributes> {
        let image = self
            .images_data
            .iter()
            .find(|(key, _)| key.parse::<ImageId>().ok() == Some(id))
            .map(|(_, image)| image)?;
        Some(
            image
                .attributes
                .iter()
                .filter_map(|(name, value)| normalize_value(value).map(|v| (name.clone(), v)))
                .collect(),
        )
    }
}

/// Flatten a JSON attribute value into its `data-*` string form.
///
/// Arrays become space-separated lists (class lists), objects are re-encoded
/// as JSON (inline `data-srcs`), `null` means "not set".
fn normalize_value(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(normalize_value)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> RawAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // SourceSet
    // =========================================================================

    #[test]
    fn sources_sorted_by_numeric_width() {
        let s = SourceSet::from_json(r#"{"1024":"c","320":"a","640":"b"}"#).unwrap();
        let widths: Vec<u32> = s.iter().map(|(w, _)| w).collect();
        assert_eq!(widths, vec![320, 640, 1024]);
        assert_eq!(s.smallest(), (320, "a"));
        assert_eq!(s.largest(), (1024, "c"));
    }

    #[test]
    fn sources_reject_non_numeric_width() {
        let err = SourceSet::from_json(r#"{"wide":"a"}"#).unwrap_err();
        assert!(matches!(err, AttributeError::InvalidWidth(w) if w == "wide"));
    }

    #[test]
    fn sources_reject_empty_object() {
        assert!(matches!(
            SourceSet::from_json("{}"),
            Err(AttributeError::EmptySources)
        ));
    }

    #[test]
    fn sources_reject_malformed_json() {
        assert!(matches!(
            SourceSet::from_json("{320: a}"),
            Err(AttributeError::InvalidSources(_))
        ));
    }

    #[test]
    fn sources_json_uses_string_keys() {
        let s = SourceSet::from_json(r#"{"640":"b","320":"a"}"#).unwrap();
        let back = SourceSet::from_json(&s.to_json()).unwrap();
        assert_eq!(back, s);
    }

    // =========================================================================
    // ImageConfig::parse
    // =========================================================================

    #[test]
    fn parse_applies_defaults() {
        let config = ImageConfig::parse(
            &attrs(&[(ATTR_SOURCES, r#"{"320":"a"}"#)]),
            &LoadingConfig::default(),
        )
        .unwrap();
        assert_eq!(config.trigger, LoadTrigger::Lazy);
        assert_eq!(config.fade, Duration::from_millis(300));
        assert_eq!(config.alt, "");
        assert!(config.classes.is_empty());
        assert_eq!(config.standard, Multiplier::Auto);
        assert_eq!(config.retina, Multiplier::Auto);
    }

    #[test]
    fn parse_reads_every_attribute() {
        let config = ImageConfig::parse(
            &attrs(&[
                (ATTR_SOURCES, r#"{"320":"a","640":"b"}"#),
                (ATTR_CLASS, "hero  wide"),
                (ATTR_TRIGGER, "external_trigger"),
                (ATTR_FADE, "0"),
                (ATTR_ALT, "A harbour"),
                (ATTR_STANDARD, "1.25"),
                (ATTR_RETINA, "auto"),
            ]),
            &LoadingConfig::default(),
        )
        .unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.classes, vec!["hero", "wide"]);
        assert_eq!(config.trigger, LoadTrigger::External);
        assert_eq!(config.fade, Duration::ZERO);
        assert_eq!(config.alt, "A harbour");
        assert_eq!(config.standard, Multiplier::Value(1.25));
        assert_eq!(config.retina, Multiplier::Auto);
    }

    #[test]
    fn parse_missing_sources_is_error() {
        let err = ImageConfig::parse(&attrs(&[(ATTR_ALT, "x")]), &LoadingConfig::default())
            .unwrap_err();
        assert!(matches!(err, AttributeError::MissingSources));
    }

    #[test]
    fn parse_unknown_trigger_is_error() {
        let err = ImageConfig::parse(
            &attrs(&[(ATTR_SOURCES, r#"{"320":"a"}"#), (ATTR_TRIGGER, "hover")]),
            &LoadingConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AttributeError::InvalidTrigger(t) if t == "hover"));
    }

    #[test]
    fn parse_bad_fade_is_error() {
        let err = ImageConfig::parse(
            &attrs(&[(ATTR_SOURCES, r#"{"320":"a"}"#), (ATTR_FADE, "-5")]),
            &LoadingConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AttributeError::InvalidFadeTime(_)));
    }

    #[test]
    fn parse_rejects_zero_and_nan_multipliers() {
        for bad in ["0", "-1", "NaN", "inf", "big"] {
            let result = ImageConfig::parse(
                &attrs(&[(ATTR_SOURCES, r#"{"320":"a"}"#), (ATTR_STANDARD, bad)]),
                &LoadingConfig::default(),
            );
            assert!(
                matches!(result, Err(AttributeError::InvalidMultiplier { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn parse_id_variants() {
        assert_eq!(parse_id(&attrs(&[])).unwrap(), None);
        assert_eq!(parse_id(&attrs(&[(ATTR_ID, "")])).unwrap(), None);
        assert_eq!(parse_id(&attrs(&[(ATTR_ID, "7")])).unwrap(), Some(ImageId(7)));
        assert!(parse_id(&attrs(&[(ATTR_ID, "seven")])).is_err());
    }

    // =========================================================================
    // ExternalSettings
    // =========================================================================

    const EXTERNAL: &str = r#"{
        "last_image_id": 5,
        "images_data": {
            "3": {
                "attributes": {
                    "data-srcs": {"640": "b.jpg", "320": "a.jpg"},
                    "data-class": ["hero", "full"],
                    "data-fade-time": 0,
                    "data-alt": null
                }
            },
            "4": {
                "attributes": {
                    "data-srcs": "{\"100\": \"t.jpg\"}",
                    "data-load-trigger": "document_ready"
                }
            }
        }
    }"#;

    #[test]
    fn external_highest_id_uses_last_image_id() {
        let ext = ExternalSettings::from_json(EXTERNAL).unwrap();
        assert_eq!(ext.highest_id(), 5);
    }

    #[test]
    fn external_highest_id_considers_keys() {
        let ext = ExternalSettings::from_json(r#"{"images_data": {"9": {}}}"#).unwrap();
        assert_eq!(ext.highest_id(), 9);
    }

    #[test]
    fn external_attributes_normalized() {
        let ext = ExternalSettings::from_json(EXTERNAL).unwrap();
        let a = ext.attributes_for(ImageId(3)).unwrap();
        assert_eq!(a.get(ATTR_CLASS).map(String::as_str), Some("hero full"));
        assert_eq!(a.get(ATTR_FADE).map(String::as_str), Some("0"));
        assert!(!a.contains_key(ATTR_ALT));

        let config = ImageConfig::parse(&a, &LoadingConfig::default()).unwrap();
        assert_eq!(config.sources.smallest(), (320, "a.jpg"));
        assert_eq!(config.fade, Duration::ZERO);
    }

    #[test]
    fn external_srcs_may_be_json_string() {
        let ext = ExternalSettings::from_json(EXTERNAL).unwrap();
        let a = ext.attributes_for(ImageId(4)).unwrap();
        let config = ImageConfig::parse(&a, &LoadingConfig::default()).unwrap();
        assert_eq!(config.sources.largest(), (100, "t.jpg"));
        assert_eq!(config.trigger, LoadTrigger::OnReady);
    }

    #[test]
    fn external_unknown_id_is_none() {
        let ext = ExternalSettings::from_json(EXTERNAL).unwrap();
        assert!(ext.attributes_for(ImageId(42)).is_none());
    }
}
