//! Turning records into image elements.
//!
//! [`Materializer::materialize`] inserts a hidden `<img>` after the
//! placeholder and marks the record loaded; when the host reports the image
//! loaded it is faded in, and the completion callback runs once the fade ends.
//!
//! [`Materializer::swap`] upgrades a live image: a clone pointing at the wider
//! source loads off-document and replaces the live element when ready. A clone
//! whose width is no longer the record's current selection when it finishes
//! (because a later swap asked for something wider) is discarded.
//!
//! The completion callback belongs to the element [`Materializer::materialize`]
//! inserted and normally runs when that element's fade ends. If a swap clone
//! replaces the element before its own load or fade has been reported, the
//! clone takes over: the callback runs when the clone is shown, and late
//! signals for the detached element are ignored.

use crate::host::{Document, ImageElement};
use crate::registry::Registry;
use crate::selector::is_upgrade;
use crate::types::{ImageId, SelectedSource};
use log::debug;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Callback run when an image has finished fading in.
pub type Completion = Box<dyn FnOnce(ImageId)>;

/// What [`Materializer::materialize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized<H> {
    /// A new element was inserted.
    Inserted(H),
    /// The image was already loaded; the callback ran immediately.
    AlreadyLoaded,
    /// No such image, or it has no selected source yet.
    Skipped,
}

enum PendingLoad {
    Insert {
        id: ImageId,
        fade: Duration,
        on_complete: Option<Completion>,
    },
    Swap {
        id: ImageId,
        width: u32,
    },
}

/// Tracks elements that are loading or fading.
pub struct Materializer<H> {
    image_class: String,
    loads: HashMap<H, PendingLoad>,
    fades: HashMap<H, (ImageId, Option<Completion>)>,
}

impl<H: Clone + Eq + Hash + std::fmt::Debug> Materializer<H> {
    pub fn new(image_class: impl Into<String>) -> Self {
        Self {
            image_class: image_class.into(),
            loads: HashMap::new(),
            fades: HashMap::new(),
        }
    }

    /// Element description for an image's current source.
    pub fn element_for(&self, registry: &Registry<H>, id: ImageId) -> Option<ImageElement> {
        let record = registry.get(id)?;
        let current = record.current()?;
        let classes = std::iter::once(self.image_class.clone())
            .chain(record.classes.iter().cloned())
            .collect();
        Some(ImageElement {
            id,
            src: current.url.clone(),
            alt: record.alt.clone(),
            classes,
            hidden: true,
        })
    }

    /// Insert the image for `id`, or run `on_complete` at once if it is already loaded.
    ///
    /// `fade` overrides the record's own fade duration.
    pub fn materialize<D>(
        &mut self,
        doc: &mut D,
        registry: &mut Registry<H>,
        id: ImageId,
        fade: Option<Duration>,
        on_complete: Option<Completion>,
    ) -> Materialized<H>
    where
        D: Document<Handle = H> + ?Sized,
    {
        let Some(record) = registry.get(id) else {
            return Materialized::Skipped;
        };
        if record.is_loaded() {
            if let Some(callback) = on_complete {
                callback(id);
            }
            return Materialized::AlreadyLoaded;
        }
        let fade = fade.unwrap_or(record.fade);
        let placeholder = record.placeholder.clone();
        let Some(element) = self.element_for(registry, id) else {
            return Materialized::Skipped;
        };

        let handle = doc.insert_after(&placeholder, &element);
        debug!("materialized image {id} from {}", element.src);
        registry.set_element(id, handle.clone());
        registry.mark_loaded(id);
        self.loads.insert(
            handle.clone(),
            PendingLoad::Insert {
                id,
                fade,
                on_complete,
            },
        );
        Materialized::Inserted(handle)
    }

    /// Start swapping the live image for `id` to a wider source.
    ///
    /// Returns false without touching the document unless the image has a
    /// live element and `source` is strictly wider than its current one.
    pub fn swap<D>(
        &mut self,
        doc: &mut D,
        registry: &mut Registry<H>,
        id: ImageId,
        source: SelectedSource,
    ) -> bool
    where
        D: Document<Handle = H> + ?Sized,
    {
        let Some(record) = registry.get(id) else {
            return false;
        };
        let Some(live) = record.element().cloned() else {
            return false;
        };
        if !is_upgrade(record.current(), &source) {
            return false;
        }

        let clone = doc.clone_with_source(&live, &source.url);
        debug!("swapping image {id} up to {}px", source.width);
        self.loads.insert(
            clone,
            PendingLoad::Swap {
                id,
                width: source.width,
            },
        );
        registry.update_selected_source(id, source);
        true
    }

    /// Host reported that `element` finished loading.
    pub fn image_loaded<D>(&mut self, doc: &mut D, registry: &mut Registry<H>, element: &H)
    where
        D: Document<Handle = H> + ?Sized,
    {
        match self.loads.remove(element) {
            Some(PendingLoad::Insert {
                id,
                fade,
                on_complete,
            }) => {
                if fade.is_zero() {
                    doc.show(element);
                    if let Some(callback) = on_complete {
                        callback(id);
                    }
                } else {
                    doc.fade_in(element, fade);
                    self.fades.insert(element.clone(), (id, on_complete));
                }
            }
            Some(PendingLoad::Swap { id, width }) => {
                let Some(record) = registry.get(id) else {
                    return;
                };
                let still_wanted = record.current().is_some_and(|c| c.width == width);
                match record.element().cloned() {
                    Some(live) if still_wanted && &live != element => {
                        doc.replace(&live, element);
                        doc.show(element);
                        registry.set_element(id, element.clone());
                        self.finish_replaced(&live);
                    }
                    _ => debug!("discarding superseded {width}px clone of image {id}"),
                }
            }
            None => {}
        }
    }

    /// Settle bookkeeping for an element a swap just took out of the document.
    fn finish_replaced(&mut self, old: &H) {
        let pending = match self.loads.remove(old) {
            Some(PendingLoad::Insert {
                id, on_complete, ..
            }) => Some((id, on_complete)),
            Some(swap @ PendingLoad::Swap { .. }) => {
                self.loads.insert(old.clone(), swap);
                None
            }
            None => self.fades.remove(old),
        };
        if let Some((id, Some(callback))) = pending {
            debug!("image {id} replaced before its first load finished");
            callback(id);
        }
    }

    /// Host reported that a fade on `element` finished.
    pub fn fade_complete(&mut self, element: &H) {
        if let Some((id, Some(callback))) = self.fades.remove(element) {
            callback(id);
        }
    }

    /// Elements still waiting for their load-complete signal.
    pub fn pending_loads(&self) -> usize {
        self.loads.len()
    }

    /// Elements still fading in.
    pub fn pending_fades(&self) -> usize {
        self.fades.len()
    }
}
