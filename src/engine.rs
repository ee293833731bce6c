//! Orchestration: the per-image state machine and the public API.
//!
//! ```text
//!                 ┌── on_ready ───────────────► Loaded
//!  Registered ────┼── lazy ──► Pending ─(in load band, gate open)──► Loaded
//!                 └── external ► Pending ─(external_load_trigger)──► Loaded
//! ```
//!
//! - **init**: probe display density, register every placeholder, pick an
//!   initial source for each, materialize `on_ready` images, then run one
//!   lazy pass. Idempotent.
//! - **scroll**: lazy pass over pending lazy images (not debounced).
//! - **resize**: debounced; recompute every image's optimal source. Live
//!   images are swapped only for strictly wider sources; images not yet
//!   materialized just have their bookkeeping updated so they load at the
//!   latest geometry.
//!
//! Every failure is local: malformed placeholders are skipped with a warning
//! and unknown ids are ignored.

use crate::attributes::ExternalSettings;
use crate::config::Settings;
use crate::debounce::Debouncer;
use crate::density::DensityState;
use crate::host::{Document, Signal};
use crate::materialize::{Completion, Materialized, Materializer};
use crate::registry::Registry;
use crate::selector::select;
use crate::types::{ImageId, LoadTrigger, SelectedSource};
use crate::viewport::{LazyLoadGate, should_load};
use log::{debug, info, warn};
use std::time::Duration;

/// Shared mutable state, owned by the engine and lent to each component.
#[derive(Debug)]
pub struct Context<H> {
    pub registry: Registry<H>,
    pub density: DensityState,
    pub lazy_gate: LazyLoadGate,
}

impl<H> Default for Context<H> {
    fn default() -> Self {
        Self {
            registry: Registry::default(),
            density: DensityState::default(),
            lazy_gate: LazyLoadGate::default(),
        }
    }
}

/// Outcome of [`Engine::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Ids registered, in document order.
    pub registered: Vec<ImageId>,
    /// Placeholders skipped because of malformed config or duplicate ids.
    pub skipped: usize,
    /// Images materialized during init (on-ready plus the first lazy pass).
    pub materialized: Vec<ImageId>,
}

/// What one resize-style pass did to each image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Live images whose swap to a wider source started.
    pub swapped: Vec<ImageId>,
    /// Images not yet materialized whose selection was refreshed.
    pub refreshed: Vec<ImageId>,
}

pub struct Engine<D: Document> {
    doc: D,
    settings: Settings,
    external: Option<ExternalSettings>,
    ctx: Context<D::Handle>,
    materializer: Materializer<D::Handle>,
    resize: Debouncer,
    initialized: bool,
}

impl<D: Document> Engine<D> {
    pub fn new(doc: D, settings: Settings) -> Self {
        let materializer = Materializer::new(settings.markup.image_class.clone());
        let resize = Debouncer::new(settings.loading.resize_debounce());
        Self {
            doc,
            settings,
            external: None,
            ctx: Context::default(),
            materializer,
            resize,
            initialized: false,
        }
    }

    /// Attach the host's external settings object. Takes effect at [`init`](Self::init).
    pub fn with_external_settings(mut self, external: ExternalSettings) -> Self {
        self.external = Some(external);
        self
    }

    /// Scan placeholders and bring every image to its starting state.
    ///
    /// Does nothing when already initialized or when the page has no placeholders.
    pub fn init(&mut self) -> InitReport {
        if self.initialized {
            return InitReport::default();
        }
        let placeholders = self.doc.placeholders(&self.settings.markup.placeholder_class);
        if placeholders.is_empty() {
            debug!("no placeholders found; nothing to do");
            return InitReport::default();
        }

        self.ctx.density = DensityState::detect(&self.doc, &self.settings.density);
        let highest = self.external.as_ref().map_or(0, ExternalSettings::highest_id);
        self.ctx.registry = Registry::new(highest);
        self.ctx.registry.reserve_declared(&self.doc, &placeholders);

        let mut report = InitReport::default();
        for placeholder in &placeholders {
            match self.ctx.registry.register(
                &mut self.doc,
                placeholder,
                self.external.as_ref(),
                &self.settings,
                &self.ctx.density,
            ) {
                Ok(id) => report.registered.push(id),
                Err(e) => {
                    warn!("skipping placeholder {placeholder:?}: {e}");
                    report.skipped += 1;
                }
            }
        }

        for &id in &report.registered {
            if let Some(source) = self.optimal_source(id) {
                self.ctx.registry.update_selected_source(id, source);
            }
            let on_ready = self
                .ctx
                .registry
                .get(id)
                .is_some_and(|r| r.trigger == LoadTrigger::OnReady);
            if on_ready && self.materialize(id, None, None) {
                report.materialized.push(id);
            }
        }

        self.initialized = true;
        report.materialized.extend(self.lazy_pass());
        info!(
            "initialized {} images ({} skipped, {} materialized)",
            report.registered.len(),
            report.skipped,
            report.materialized.len()
        );
        report
    }

    /// Feed a host event into the state machine.
    pub fn handle(&mut self, signal: Signal<D::Handle>) {
        match signal {
            Signal::Ready => {
                self.init();
            }
            Signal::Scroll => {
                self.lazy_pass();
            }
            Signal::Resize(at) => self.resize.poke(at),
            Signal::Tick(now) => {
                if self.resize.poll(now) {
                    self.update_image_logic();
                }
            }
            Signal::ImageLoaded(element) => {
                self.materializer
                    .image_loaded(&mut self.doc, &mut self.ctx.registry, &element);
            }
            Signal::FadeComplete(element) => self.materializer.fade_complete(&element),
        }
    }

    /// Load an image on demand.
    ///
    /// `fade` overrides the image's fade duration (`None` keeps its own).
    /// When the image is already loaded the callback runs immediately and
    /// nothing is inserted. Unknown ids, or calls before a successful init,
    /// are ignored.
    pub fn external_load_trigger(
        &mut self,
        id: ImageId,
        fade: Option<Duration>,
        on_complete: Option<Completion>,
    ) -> Materialized<D::Handle> {
        if !self.initialized {
            debug!("external trigger for image {id} before init; ignored");
            return Materialized::Skipped;
        }
        if !self.ctx.registry.contains(id) {
            warn!("external trigger for unknown image {id}; ignored");
            return Materialized::Skipped;
        }
        self.materializer.materialize(
            &mut self.doc,
            &mut self.ctx.registry,
            id,
            fade,
            on_complete,
        )
    }

    /// Block or allow lazy loading. Allowing it re-checks pending lazy images at once.
    pub fn allow_lazy_load_trigger(&mut self, allow: bool) -> Vec<ImageId> {
        self.ctx.lazy_gate.set(allow);
        if allow { self.lazy_pass() } else { Vec::new() }
    }

    /// Recompute every image's optimal source and swap live images up.
    ///
    /// Runs automatically after resizes settle; call it directly after
    /// resizing containers programmatically.
    pub fn update_image_logic(&mut self) -> UpdateReport {
        let mut report = UpdateReport::default();
        for id in self.ctx.registry.ids() {
            let Some(optimum) = self.optimal_source(id) else {
                continue;
            };
            let is_live = self
                .ctx
                .registry
                .get(id)
                .is_some_and(|r| r.element().is_some());
            if is_live {
                if self.materializer.swap(
                    &mut self.doc,
                    &mut self.ctx.registry,
                    id,
                    optimum,
                ) {
                    report.swapped.push(id);
                }
            } else if self.ctx.registry.update_selected_source(id, optimum) {
                report.refreshed.push(id);
            }
        }
        report
    }

    /// Materialize every pending lazy image whose container is in the load band.
    fn lazy_pass(&mut self) -> Vec<ImageId> {
        if !self.initialized || !self.ctx.lazy_gate.is_open() {
            return Vec::new();
        }
        let viewport = self.doc.viewport();
        let due: Vec<ImageId> = self
            .ctx
            .registry
            .iter()
            .filter(|r| r.trigger == LoadTrigger::Lazy && !r.is_loaded())
            .filter(|r| {
                should_load(
                    self.ctx.lazy_gate,
                    &viewport,
                    &self.doc.container(&r.placeholder),
                    &self.settings.lazy_load,
                )
            })
            .map(|r| r.id)
            .collect();
        due.into_iter()
            .filter(|&id| self.materialize(id, None, None))
            .collect()
    }

    fn materialize(
        &mut self,
        id: ImageId,
        fade: Option<Duration>,
        on_complete: Option<Completion>,
    ) -> bool {
        matches!(
            self.materializer.materialize(
                &mut self.doc,
                &mut self.ctx.registry,
                id,
                fade,
                on_complete
            ),
            Materialized::Inserted(_)
        )
    }

    /// Best source for an image at its container's current width.
    fn optimal_source(&self, id: ImageId) -> Option<SelectedSource> {
        let record = self.ctx.registry.get(id)?;
        let width = self.doc.container(&record.placeholder).width;
        let multiplier = record.multipliers.for_display(&self.ctx.density);
        Some(select(&record.sources, width, multiplier))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn lazy_load_allowed(&self) -> bool {
        self.ctx.lazy_gate.is_open()
    }

    pub fn context(&self) -> &Context<D::Handle> {
        &self.ctx
    }

    pub fn registry(&self) -> &Registry<D::Handle> {
        &self.ctx.registry
    }

    pub fn density(&self) -> &DensityState {
        &self.ctx.density
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.doc
    }

    /// Elements still loading or fading.
    pub fn pending_work(&self) -> usize {
        self.materializer.pending_loads() + self.materializer.pending_fades()
    }

    pub fn into_document(self) -> D {
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{ATTR_ID, ATTR_SOURCES, ATTR_TRIGGER};
    use crate::headless::HeadlessPage;
    use crate::test_helpers::{lazy, placeholder};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Instant;

    fn engine(placeholders: Vec<crate::headless::PlaceholderSpec>) -> Engine<HeadlessPage> {
        Engine::new(
            HeadlessPage::from_placeholders(placeholders),
            Settings::default(),
        )
    }

    #[test]
    fn init_without_placeholders_is_noop() {
        let mut e = engine(vec![]);
        assert_eq!(e.init(), InitReport::default());
        assert!(!e.is_initialized());
        assert_eq!(
            e.external_load_trigger(ImageId(1), None, None),
            Materialized::Skipped
        );
    }

    #[test]
    fn init_is_idempotent() {
        let mut e = engine(vec![lazy(0.0)]);
        let first = e.init();
        assert_eq!(first.registered, vec![ImageId(1)]);
        assert_eq!(e.init(), InitReport::default());
        assert_eq!(e.document().images().len(), 1);
    }

    #[test]
    fn on_ready_images_materialize_at_init() {
        let far_below = placeholder(
            10_000.0,
            &[
                (ATTR_SOURCES, r#"{"320":"a","640":"b"}"#),
                (ATTR_TRIGGER, "document_ready"),
            ],
        );
        let mut e = engine(vec![far_below]);
        let report = e.init();
        assert_eq!(report.materialized, vec![ImageId(1)]);
    }

    #[test]
    fn lazy_image_waits_for_scroll() {
        let mut e = engine(vec![lazy(5000.0)]);
        let report = e.init();
        assert!(report.materialized.is_empty());

        e.document_mut().scroll_to(4000.0);
        e.handle(Signal::Scroll);
        assert!(e.registry().get(ImageId(1)).unwrap().is_loaded());
    }

    #[test]
    fn declared_id_survives_earlier_generated_one() {
        let declared = placeholder(
            600.0,
            &[(ATTR_ID, "1"), (ATTR_SOURCES, r#"{"320":"a","640":"b"}"#)],
        );
        let mut e = engine(vec![lazy(0.0), declared]);
        let report = e.init();
        assert_eq!(report.registered, vec![ImageId(2), ImageId(1)]);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn exhausted_ids_skip_without_panicking() {
        let ext = ExternalSettings::from_json(r#"{"last_image_id": 4294967295}"#).unwrap();
        let mut e = Engine::new(
            HeadlessPage::from_placeholders(vec![lazy(0.0)]),
            Settings::default(),
        )
        .with_external_settings(ext);
        let report = e.init();
        assert!(report.registered.is_empty());
        assert_eq!(report.skipped, 1);
        assert!(e.is_initialized());
    }

    #[test]
    fn pending_work_drains_as_host_reports() {
        let mut e = engine(vec![lazy(0.0)]);
        e.init();
        assert_eq!(e.pending_work(), 1);
        let img = e.document().images()[0];
        e.handle(Signal::ImageLoaded(img));
        // Loaded, now fading
        assert_eq!(e.pending_work(), 1);
        e.handle(Signal::FadeComplete(img));
        assert_eq!(e.pending_work(), 0);

        assert!(e.context().lazy_gate.is_open());
        assert_eq!(e.context().registry.len(), 1);
        let page = e.into_document();
        assert_eq!(page.images(), vec![img]);
    }

    #[test]
    fn malformed_placeholder_does_not_block_others() {
        let broken = placeholder(0.0, &[(ATTR_SOURCES, "{oops")]);
        let mut e = engine(vec![broken, lazy(0.0)]);
        let report = e.init();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.registered.len(), 1);
        assert_eq!(report.materialized.len(), 1);
    }

    #[test]
    fn initial_selection_uses_container_width() {
        // Container is 600px wide in the helper
        let mut e = engine(vec![lazy(5000.0)]);
        e.init();
        let current = e.registry().get(ImageId(1)).unwrap().current().unwrap();
        assert_eq!(current.width, 640);
    }

    #[test]
    fn high_density_display_picks_wider_source() {
        let mut page = HeadlessPage::from_placeholders(vec![lazy(5000.0)]);
        page.set_device_pixel_ratio(Some(2.0));
        let mut e = Engine::new(page, Settings::default());
        e.init();
        assert!(e.density().is_high_density());
        // 600 * 2.0 = 1200 → widest is 1024
        let current = e.registry().get(ImageId(1)).unwrap().current().unwrap();
        assert_eq!(current.width, 1024);
    }

    #[test]
    fn closed_gate_blocks_scroll_loading_until_reopened() {
        let mut e = engine(vec![lazy(5000.0)]);
        e.init();
        e.allow_lazy_load_trigger(false);
        e.document_mut().scroll_to(4500.0);
        e.handle(Signal::Scroll);
        assert!(!e.registry().get(ImageId(1)).unwrap().is_loaded());

        let loaded = e.allow_lazy_load_trigger(true);
        assert_eq!(loaded, vec![ImageId(1)]);
    }

    #[test]
    fn external_trigger_materializes_once() {
        let ext = placeholder(
            0.0,
            &[
                (ATTR_ID, "4"),
                (ATTR_SOURCES, r#"{"320":"a"}"#),
                (ATTR_TRIGGER, "external_trigger"),
            ],
        );
        let mut e = engine(vec![ext]);
        e.init();
        assert!(!e.registry().get(ImageId(4)).unwrap().is_loaded());

        let first = e.external_load_trigger(ImageId(4), None, None);
        assert!(matches!(first, Materialized::Inserted(_)));

        let called = Rc::new(Cell::new(0));
        let c = Rc::clone(&called);
        let second = e.external_load_trigger(
            ImageId(4),
            None,
            Some(Box::new(move |_| c.set(c.get() + 1))),
        );
        assert_eq!(second, Materialized::AlreadyLoaded);
        assert_eq!(called.get(), 1);
        assert_eq!(e.document().images().len(), 1);
    }

    #[test]
    fn external_trigger_unknown_id_is_noop() {
        let mut e = engine(vec![lazy(0.0)]);
        e.init();
        let called = Rc::new(Cell::new(false));
        let c = Rc::clone(&called);
        let outcome =
            e.external_load_trigger(ImageId(99), None, Some(Box::new(move |_| c.set(true))));
        assert_eq!(outcome, Materialized::Skipped);
        assert!(!called.get());
    }

    #[test]
    fn resize_is_debounced() {
        let mut e = engine(vec![lazy(0.0)]);
        e.init();
        let img = e.document().images()[0];
        e.handle(Signal::ImageLoaded(img));

        e.document_mut().set_all_container_widths(1000.0);
        let start = Instant::now();
        e.handle(Signal::Resize(start));
        e.handle(Signal::Tick(start + Duration::from_millis(50)));
        assert_eq!(e.document().clones_requested(), 0);

        e.handle(Signal::Tick(start + Duration::from_millis(100)));
        assert_eq!(e.document().clones_requested(), 1);
    }

    #[test]
    fn update_swaps_only_upward() {
        let mut e = engine(vec![lazy(0.0)]);
        e.init();
        assert_eq!(
            e.registry().get(ImageId(1)).unwrap().current().unwrap().width,
            640
        );

        e.document_mut().set_all_container_widths(200.0);
        let report = e.update_image_logic();
        assert!(report.swapped.is_empty());
        assert_eq!(
            e.registry().get(ImageId(1)).unwrap().current().unwrap().width,
            640
        );

        e.document_mut().set_all_container_widths(900.0);
        let report = e.update_image_logic();
        assert_eq!(report.swapped, vec![ImageId(1)]);
        assert_eq!(
            e.registry().get(ImageId(1)).unwrap().current().unwrap().width,
            1024
        );
    }

    #[test]
    fn update_refreshes_pending_images_without_dom_changes() {
        let mut e = engine(vec![lazy(5000.0)]);
        e.init();
        e.document_mut().set_all_container_widths(200.0);
        let report = e.update_image_logic();
        assert_eq!(report.refreshed, vec![ImageId(1)]);
        assert_eq!(
            e.registry().get(ImageId(1)).unwrap().current().unwrap().width,
            320
        );
        assert!(e.document().images().is_empty());
    }
}
