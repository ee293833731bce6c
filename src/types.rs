//! Shared value types used across the registry, selector, materializer and engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of one placeholder / image pair.
///
/// Either declared on the placeholder (`data-image-id`), declared in the
/// external settings object, or allocated sequentially by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(ImageId)
    }
}

/// The source currently chosen for an image: intrinsic width plus URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSource {
    pub width: u32,
    pub url: String,
}

/// When an image is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTrigger {
    /// Loads once the container scrolls within the load-ahead margin.
    Lazy,
    /// Loads as soon as the engine initializes.
    OnReady,
    /// Loads only when [`Engine::external_load_trigger`](crate::engine::Engine::external_load_trigger) is called.
    External,
}

impl LoadTrigger {
    /// The `data-load-trigger` attribute value for this trigger.
    pub fn attribute_value(self) -> &'static str {
        match self {
            LoadTrigger::Lazy => "lazy_load",
            LoadTrigger::OnReady => "document_ready",
            LoadTrigger::External => "external_trigger",
        }
    }

    /// Parse a `data-load-trigger` attribute value.
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value.trim() {
            "lazy_load" => Some(LoadTrigger::Lazy),
            "document_ready" => Some(LoadTrigger::OnReady),
            "external_trigger" => Some(LoadTrigger::External),
            _ => None,
        }
    }
}

impl fmt::Display for LoadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_parses_trimmed() {
        assert_eq!(" 12 ".parse::<ImageId>().unwrap(), ImageId(12));
        assert!("abc".parse::<ImageId>().is_err());
        assert!("-1".parse::<ImageId>().is_err());
    }

    #[test]
    fn trigger_attribute_names() {
        assert_eq!(LoadTrigger::from_attribute("lazy_load"), Some(LoadTrigger::Lazy));
        assert_eq!(
            LoadTrigger::from_attribute("document_ready"),
            Some(LoadTrigger::OnReady)
        );
        assert_eq!(
            LoadTrigger::from_attribute("external_trigger"),
            Some(LoadTrigger::External)
        );
        assert_eq!(LoadTrigger::from_attribute("on_click"), None);
    }

    #[test]
    fn trigger_display_matches_attribute() {
        for t in [LoadTrigger::Lazy, LoadTrigger::OnReady, LoadTrigger::External] {
            assert_eq!(LoadTrigger::from_attribute(&t.to_string()), Some(t));
        }
    }
}
