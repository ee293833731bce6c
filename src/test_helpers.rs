//! Shared test utilities.
//!
//! Builders for headless placeholders and a fixture loader for the page
//! scripts under `fixtures/pages/`.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let page = HeadlessPage::from_placeholders(vec![lazy(0.0), lazy(2400.0)]);
//! let spec = load_page_fixture("scroll.toml");
//! ```

use std::path::Path;

use crate::attributes::{ATTR_SOURCES, ATTR_TRIGGER};
use crate::headless::{PageSpec, PlaceholderSpec};

/// Source set shared by most tests: 320 / 640 / 1024 → a / b / c.
pub const SOURCES: &str = r#"{"320":"a.jpg","640":"b.jpg","1024":"c.jpg"}"#;

/// Placeholder at `top` in a 600×300 visible container.
pub fn placeholder(top: f64, attrs: &[(&str, &str)]) -> PlaceholderSpec {
    PlaceholderSpec {
        class: None,
        attributes: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        top,
        height: 300.0,
        width: 600.0,
        visible: true,
    }
}

/// Lazy placeholder with [`SOURCES`].
pub fn lazy(top: f64) -> PlaceholderSpec {
    placeholder(top, &[(ATTR_SOURCES, SOURCES), (ATTR_TRIGGER, "lazy_load")])
}

/// Parse `fixtures/pages/<name>`. Panics with the parse error on failure.
pub fn load_page_fixture(name: &str) -> PageSpec {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures/pages")
        .join(name);
    PageSpec::load(&path).unwrap_or_else(|e| panic!("fixture '{name}': {e}"))
}
