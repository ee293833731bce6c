//! # ca-images
//!
//! Contextually aware responsive images. Pages ship `<noscript>` placeholders
//! that declare a set of pre-rendered size variants; this crate decides which
//! variant each image should display, when it should load, and when a live
//! image should be upgraded to a wider one.
//!
//! # Architecture: Headless Engine
//!
//! The engine is UI-agnostic. It never touches a rendering environment
//! directly; a host implements [`host::Document`] and feeds
//! [`host::Signal`]s (page ready, scroll, resize, timer ticks, load and fade
//! completions) into [`engine::Engine::handle`].
//!
//! ```text
//! host ──Signal──► Engine ──► registry / selector / viewport
//!   ▲                │
//!   └──Document ops──┘   insert_after, clone_with_source, replace, fade_in
//! ```
//!
//! Time is passed in with the signals, so debouncing and fades are driven by
//! the host's clock. [`headless::HeadlessPage`] is an in-memory host used by
//! the CLI's `simulate` command and by the tests.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Shared value types: `ImageId`, `SelectedSource`, `LoadTrigger` |
//! | [`attributes`] | `data-*` attribute parsing and the external settings object |
//! | [`config`] | `ca-images.toml` loading, stock defaults, validation |
//! | [`density`] | One-time display density probe |
//! | [`selector`] | Multiplier resolution and best-fit source selection |
//! | [`viewport`] | Lazy-load band and the lazy-load gate |
//! | [`registry`] | Id allocation and per-image records |
//! | [`host`] | `Document` trait, `Signal` events, the image element |
//! | [`materialize`] | Inserting, fading in and swapping image elements |
//! | [`debounce`] | Trailing-edge debouncer for resize events |
//! | [`engine`] | State machine and public API |
//! | [`headless`] | In-memory host, page scripts and `simulate` |
//! | [`placeholder`] | Server-side placeholder markup from variant directories |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Upgrade-Only Swaps
//!
//! Once an image is displayed its source only ever gets wider. Shrinking a
//! container never triggers a download of a smaller variant: the wider image
//! is already in cache and scales down for free. Images that have not loaded
//! yet follow the latest geometry in both directions.
//!
//! ## Typed Config at the Boundary
//!
//! Attributes are strings on the page. They are parsed once, at
//! registration, into [`attributes::ImageConfig`]; everything downstream
//! works with typed values. A placeholder that fails to parse is skipped
//! with a warning and never blocks the others.
//!
//! ## Maud for Markup
//!
//! Placeholder and image markup is produced with [Maud](https://maud.lambda.xyz/),
//! so attribute values are escaped by construction and malformed markup is a
//! build error.

pub mod attributes;
pub mod config;
pub mod debounce;
pub mod density;
pub mod engine;
pub mod headless;
pub mod host;
pub mod materialize;
pub mod output;
pub mod placeholder;
pub mod registry;
pub mod selector;
pub mod types;
pub mod viewport;

#[cfg(test)]
pub(crate) mod test_helpers;
