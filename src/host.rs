//! Host document and signal interfaces.
//!
//! The engine never touches a real rendering environment. A host implements
//! [`Document`] (read placeholders and layout, insert and swap image elements)
//! and feeds [`Signal`]s into [`Engine::handle`](crate::engine::Engine::handle)
//! as page-ready, scroll, resize, timer and load-complete events arrive.
//!
//! The production host is a browser binding; [`HeadlessPage`](crate::headless::HeadlessPage)
//! is an in-memory host used by the CLI and the tests.

use crate::attributes::RawAttributes;
use crate::density::DisplayProbe;
use crate::types::ImageId;
use crate::viewport::{ContainerBox, Viewport};
use maud::{Markup, html};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// The image element the engine asks the host to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageElement {
    pub id: ImageId,
    pub src: String,
    pub alt: String,
    /// Full class list, engine image class first.
    pub classes: Vec<String>,
    /// Inserted hidden; becomes visible when its fade completes.
    pub hidden: bool,
}

impl ImageElement {
    pub fn class_attr(&self) -> String {
        self.classes.join(" ")
    }

    /// HTML for the element.
    pub fn markup(&self) -> Markup {
        html! {
            img class=(self.class_attr())
                src=(self.src)
                alt=(self.alt)
                data-image-id=(self.id.0)
                style=[self.hidden.then_some("display: none;")];
        }
    }
}

/// Abstract document the engine manipulates.
pub trait Document: DisplayProbe {
    /// Opaque reference to a node (placeholder or image element).
    type Handle: Clone + Eq + Hash + Debug;

    /// Placeholders carrying `class`, in document order.
    fn placeholders(&self, class: &str) -> Vec<Self::Handle>;

    /// The placeholder's `data-*` attributes.
    fn attributes(&self, placeholder: &Self::Handle) -> RawAttributes;

    fn set_attribute(&mut self, placeholder: &Self::Handle, name: &str, value: &str);

    /// Layout of the placeholder's parent container.
    fn container(&self, placeholder: &Self::Handle) -> ContainerBox;

    fn viewport(&self) -> Viewport;

    /// Insert `image` directly after `placeholder`. The host starts loading
    /// its source and later reports [`Signal::ImageLoaded`].
    fn insert_after(&mut self, placeholder: &Self::Handle, image: &ImageElement) -> Self::Handle;

    /// Detached copy of `live` with a new source. Loading starts immediately.
    fn clone_with_source(&mut self, live: &Self::Handle, src: &str) -> Self::Handle;

    /// Put `new` where `old` is; `old` leaves the document.
    fn replace(&mut self, old: &Self::Handle, new: &Self::Handle);

    /// Make an element visible at once.
    fn show(&mut self, element: &Self::Handle);

    /// Start fading an element in. The host reports [`Signal::FadeComplete`] when done.
    fn fade_in(&mut self, element: &Self::Handle, duration: Duration);
}

/// Events a host delivers to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<H> {
    /// Page finished loading.
    Ready,
    Scroll,
    /// Window resized at the given instant. Debounced.
    Resize(Instant),
    /// Timer tick; lets a pending debounced resize fire.
    Tick(Instant),
    /// An element's image finished loading.
    ImageLoaded(H),
    /// A fade started with [`Document::fade_in`] finished.
    FadeComplete(H),
}
