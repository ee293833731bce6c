//! Image registry.
//!
//! Maps image ids to per-image state for the lifetime of the page. Records are
//! built from placeholders: the id is read from the placeholder or allocated,
//! attributes come from the external settings object when it lists the id and
//! from the placeholder otherwise, and everything is parsed into a typed
//! [`ImageConfig`] before a record is stored.
//!
//! ## Id allocation
//!
//! Generated ids count up from the highest id the external settings object
//! knows about, skipping any id already registered or declared by a
//! placeholder (see [`Registry::reserve_declared`]), so generated ids never
//! collide with declared ones regardless of document order. A generated id is
//! written back to the placeholder's `data-image-id`.
//!
//! ## Invariants
//!
//! - `loaded` only ever goes from false to true.
//! - Once loaded, the selected source's width never decreases.

use crate::attributes::{ATTR_ID, AttributeError, ExternalSettings, ImageConfig, SourceSet, parse_id};
use crate::config::Settings;
use crate::density::DensityState;
use crate::host::Document;
use crate::selector::{Multipliers, resolve_multipliers};
use crate::types::{ImageId, LoadTrigger, SelectedSource};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("malformed image config: {0}")]
    Attribute(#[from] AttributeError),
    #[error("image id {0} is already registered")]
    DuplicateId(ImageId),
    #[error("no image ids left above {0}")]
    IdSpaceExhausted(u32),
}

/// Per-image state.
#[derive(Debug, Clone)]
pub struct ImageRecord<H> {
    pub id: ImageId,
    pub sources: SourceSet,
    pub trigger: LoadTrigger,
    pub classes: Vec<String>,
    pub fade: Duration,
    pub alt: String,
    pub multipliers: Multipliers,
    /// The placeholder this record was built from.
    pub placeholder: H,
    current: Option<SelectedSource>,
    loaded: bool,
    element: Option<H>,
}

impl<H> ImageRecord<H> {
    pub fn new(id: ImageId, config: ImageConfig, multipliers: Multipliers, placeholder: H) -> Self {
        Self {
            id,
            sources: config.sources,
            trigger: config.trigger,
            classes: config.classes,
            fade: config.fade,
            alt: config.alt,
            multipliers,
            placeholder,
            current: None,
            loaded: false,
            element: None,
        }
    }

    /// The source most recently chosen for this image.
    pub fn current(&self) -> Option<&SelectedSource> {
        self.current.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The live image element, once materialized.
    pub fn element(&self) -> Option<&H> {
        self.element.as_ref()
    }
}

/// All registered images, iterated in ascending id order.
#[derive(Debug)]
pub struct Registry<H> {
    records: BTreeMap<ImageId, ImageRecord<H>>,
    /// Ids declared on placeholders; never handed out by `allocate_id`.
    reserved: BTreeSet<ImageId>,
    last_generated: u32,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<H> Registry<H> {
    /// Empty registry whose generated ids start above `highest_known_id`.
    pub fn new(highest_known_id: u32) -> Self {
        Self {
            records: BTreeMap::new(),
            reserved: BTreeSet::new(),
            last_generated: highest_known_id,
        }
    }

    /// Keep `id` out of the generated sequence.
    pub fn reserve(&mut self, id: ImageId) {
        self.reserved.insert(id);
    }

    /// Next free generated id.
    pub fn allocate_id(&mut self) -> Result<ImageId, RegistryError> {
        loop {
            self.last_generated = self
                .last_generated
                .checked_add(1)
                .ok_or(RegistryError::IdSpaceExhausted(self.last_generated))?;
            let id = ImageId(self.last_generated);
            if !self.records.contains_key(&id) && !self.reserved.contains(&id) {
                return Ok(id);
            }
        }
    }

    /// Store a fully built record.
    pub fn insert(&mut self, record: ImageRecord<H>) -> Result<ImageId, RegistryError> {
        let id = record.id;
        if self.records.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        self.records.insert(id, record);
        Ok(id)
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageRecord<H>> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ImageId> {
        self.records.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord<H>> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a newly computed source.
    ///
    /// Returns false (and changes nothing) when the image is already loaded
    /// and the new source is narrower than the current one.
    pub fn update_selected_source(&mut self, id: ImageId, source: SelectedSource) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        if record.loaded
            && record
                .current
                .as_ref()
                .is_some_and(|current| source.width < current.width)
        {
            return false;
        }
        record.current = Some(source);
        true
    }

    /// Flag an image as loaded. Never reverts.
    pub fn mark_loaded(&mut self, id: ImageId) {
        if let Some(record) = self.records.get_mut(&id) {
            record.loaded = true;
        }
    }

    /// Point a record at its live image element.
    pub fn set_element(&mut self, id: ImageId, element: H) {
        if let Some(record) = self.records.get_mut(&id) {
            record.element = Some(element);
        }
    }
}

impl<H: Clone> Registry<H> {
    /// Reserve every well-formed id declared on `placeholders`.
    ///
    /// Run before registering so a placeholder without an id never takes an
    /// id a later placeholder declares. Malformed ids are left for
    /// [`register`](Self::register) to report.
    pub fn reserve_declared<D>(&mut self, doc: &D, placeholders: &[H])
    where
        D: Document<Handle = H> + ?Sized,
    {
        for placeholder in placeholders {
            if let Ok(Some(id)) = parse_id(&doc.attributes(placeholder)) {
                self.reserve(id);
            }
        }
    }

    /// Read a placeholder and store a record for it.
    ///
    /// Malformed attributes fail this placeholder only; the caller logs and
    /// moves on to the next one.
    pub fn register<D>(
        &mut self,
        doc: &mut D,
        placeholder: &H,
        external: Option<&ExternalSettings>,
        settings: &Settings,
        density: &DensityState,
    ) -> Result<ImageId, RegistryError>
    where
        D: Document<Handle = H> + ?Sized,
    {
        let element_attrs = doc.attributes(placeholder);
        let id = match parse_id(&element_attrs)? {
            Some(id) => id,
            None => {
                let id = self.allocate_id()?;
                doc.set_attribute(placeholder, ATTR_ID, &id.to_string());
                id
            }
        };
        if self.contains(id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let attrs = external
            .and_then(|ext| ext.attributes_for(id))
            .unwrap_or(element_attrs);
        let config = ImageConfig::parse(&attrs, &settings.loading)?;
        let multipliers = resolve_multipliers(
            config.standard,
            config.retina,
            density.device_ratio(),
            settings.density.fallback_ratio,
        );
        debug!(
            "registered image {id}: {} sources, trigger {}",
            config.sources.len(),
            config.trigger
        );
        self.insert(ImageRecord::new(id, config, multipliers, placeholder.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{ATTR_SOURCES, ATTR_TRIGGER};
    use crate::headless::HeadlessPage;
    use crate::test_helpers::placeholder;

    fn selected(width: u32) -> SelectedSource {
        SelectedSource {
            width,
            url: format!("{width}.jpg"),
        }
    }

    fn register_all(
        page: &mut HeadlessPage,
        external: Option<&ExternalSettings>,
    ) -> (Registry<crate::headless::NodeId>, Vec<Result<ImageId, RegistryError>>) {
        let mut registry = Registry::new(external.map(|e| e.highest_id()).unwrap_or(0));
        let settings = Settings::default();
        let density = DensityState::default();
        let nodes = page.placeholders(&settings.markup.placeholder_class);
        registry.reserve_declared(&*page, &nodes);
        let results = nodes
            .iter()
            .map(|node| registry.register(&mut *page, node, external, &settings, &density))
            .collect();
        (registry, results)
    }

    #[test]
    fn generated_ids_follow_external_last_id() {
        let mut page = HeadlessPage::from_placeholders(vec![
            placeholder(0.0, &[(ATTR_SOURCES, r#"{"320":"a"}"#)]),
            placeholder(500.0, &[(ATTR_SOURCES, r#"{"320":"b"}"#)]),
        ]);
        let ext = ExternalSettings::from_json(r#"{"last_image_id": 5}"#).unwrap();
        let (registry, results) = register_all(&mut page, Some(&ext));

        let ids: Vec<ImageId> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(ids, vec![ImageId(6), ImageId(7)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn generated_id_written_back_to_placeholder() {
        let mut page = HeadlessPage::from_placeholders(vec![placeholder(
            0.0,
            &[(ATTR_SOURCES, r#"{"320":"a"}"#)],
        )]);
        let (_, results) = register_all(&mut page, None);
        assert_eq!(results[0].as_ref().unwrap(), &ImageId(1));

        let node = page.placeholders("ca-images-noscript")[0];
        assert_eq!(
            page.attributes(&node).get(ATTR_ID).map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn explicit_id_is_kept() {
        let mut page = HeadlessPage::from_placeholders(vec![placeholder(
            0.0,
            &[(ATTR_ID, "42"), (ATTR_SOURCES, r#"{"320":"a"}"#)],
        )]);
        let (registry, results) = register_all(&mut page, None);
        assert_eq!(results[0].as_ref().unwrap(), &ImageId(42));
        assert!(registry.contains(ImageId(42)));
    }

    #[test]
    fn generated_ids_skip_registered_explicit_ids() {
        let mut page = HeadlessPage::from_placeholders(vec![
            placeholder(0.0, &[(ATTR_ID, "1"), (ATTR_SOURCES, r#"{"320":"a"}"#)]),
            placeholder(500.0, &[(ATTR_SOURCES, r#"{"320":"b"}"#)]),
        ]);
        let (_, results) = register_all(&mut page, None);
        assert_eq!(results[1].as_ref().unwrap(), &ImageId(2));
    }

    #[test]
    fn declared_id_later_in_document_is_not_generated_earlier() {
        let mut page = HeadlessPage::from_placeholders(vec![
            placeholder(0.0, &[(ATTR_SOURCES, r#"{"320":"a"}"#)]),
            placeholder(500.0, &[(ATTR_ID, "1"), (ATTR_SOURCES, r#"{"320":"b"}"#)]),
        ]);
        let (registry, results) = register_all(&mut page, None);
        assert_eq!(results[0].as_ref().unwrap(), &ImageId(2));
        assert_eq!(results[1].as_ref().unwrap(), &ImageId(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn exhausted_id_space_skips_placeholder() {
        let mut page = HeadlessPage::from_placeholders(vec![
            placeholder(0.0, &[(ATTR_SOURCES, r#"{"320":"a"}"#)]),
            placeholder(500.0, &[(ATTR_ID, "7"), (ATTR_SOURCES, r#"{"320":"b"}"#)]),
        ]);
        let ext = ExternalSettings::from_json(r#"{"last_image_id": 4294967295}"#).unwrap();
        let (registry, results) = register_all(&mut page, Some(&ext));
        assert!(matches!(
            results[0],
            Err(RegistryError::IdSpaceExhausted(u32::MAX))
        ));
        assert_eq!(results[1].as_ref().unwrap(), &ImageId(7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn allocation_skips_reserved_ids() {
        let mut registry: Registry<u32> = Registry::new(0);
        registry.reserve(ImageId(1));
        registry.reserve(ImageId(2));
        assert_eq!(registry.allocate_id().unwrap(), ImageId(3));
    }

    #[test]
    fn duplicate_explicit_id_rejected() {
        let mut page = HeadlessPage::from_placeholders(vec![
            placeholder(0.0, &[(ATTR_ID, "3"), (ATTR_SOURCES, r#"{"320":"a"}"#)]),
            placeholder(500.0, &[(ATTR_ID, "3"), (ATTR_SOURCES, r#"{"320":"b"}"#)]),
        ]);
        let (registry, results) = register_all(&mut page, None);
        assert!(matches!(results[1], Err(RegistryError::DuplicateId(ImageId(3)))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn malformed_sources_skip_only_that_image() {
        let mut page = HeadlessPage::from_placeholders(vec![
            placeholder(0.0, &[(ATTR_SOURCES, "{not json")]),
            placeholder(500.0, &[]),
            placeholder(900.0, &[(ATTR_SOURCES, r#"{"320":"ok"}"#)]),
        ]);
        let (registry, results) = register_all(&mut page, None);
        assert!(matches!(
            results[0],
            Err(RegistryError::Attribute(AttributeError::InvalidSources(_)))
        ));
        assert!(matches!(
            results[1],
            Err(RegistryError::Attribute(AttributeError::MissingSources))
        ));
        assert!(results[2].is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn external_attributes_take_priority() {
        let mut page = HeadlessPage::from_placeholders(vec![placeholder(
            0.0,
            &[
                (ATTR_ID, "2"),
                (ATTR_SOURCES, r#"{"320":"element.jpg"}"#),
                (ATTR_TRIGGER, "lazy_load"),
            ],
        )]);
        let ext = ExternalSettings::from_json(
            r#"{"images_data": {"2": {"attributes": {
                "data-srcs": {"800": "external.jpg"},
                "data-load-trigger": "external_trigger"
            }}}}"#,
        )
        .unwrap();
        let (registry, _) = register_all(&mut page, Some(&ext));
        let record = registry.get(ImageId(2)).unwrap();
        assert_eq!(record.sources.smallest(), (800, "external.jpg"));
        assert_eq!(record.trigger, LoadTrigger::External);
    }

    #[test]
    fn multipliers_resolved_at_registration() {
        let mut page = HeadlessPage::from_placeholders(vec![placeholder(
            0.0,
            &[(ATTR_SOURCES, r#"{"320":"a"}"#)],
        )]);
        let mut registry = Registry::new(0);
        let node = page.placeholders("ca-images-noscript")[0];
        let density = DensityState::fixed(true, Some(3.0));
        let id = registry
            .register(&mut page, &node, None, &Settings::default(), &density)
            .unwrap();
        let m = registry.get(id).unwrap().multipliers;
        assert_eq!(m.standard, 1.0);
        assert_eq!(m.high_density, 3.0);
    }

    // =========================================================================
    // Record state transitions
    // =========================================================================

    fn registry_with_one() -> (Registry<u32>, ImageId) {
        let mut registry = Registry::new(0);
        let config = ImageConfig::parse(
            &[(ATTR_SOURCES.to_string(), r#"{"320":"a","640":"b"}"#.to_string())]
                .into_iter()
                .collect(),
            &Default::default(),
        )
        .unwrap();
        let m = Multipliers {
            standard: 1.0,
            high_density: 2.0,
        };
        let id = registry.allocate_id().unwrap();
        registry.insert(ImageRecord::new(id, config, m, 0)).unwrap();
        (registry, id)
    }

    #[test]
    fn pending_record_follows_latest_geometry() {
        let (mut registry, id) = registry_with_one();
        assert!(registry.update_selected_source(id, selected(640)));
        assert!(registry.update_selected_source(id, selected(320)));
        assert_eq!(registry.get(id).unwrap().current().unwrap().width, 320);
    }

    #[test]
    fn loaded_record_never_downgrades() {
        let (mut registry, id) = registry_with_one();
        registry.update_selected_source(id, selected(640));
        registry.mark_loaded(id);
        assert!(!registry.update_selected_source(id, selected(320)));
        assert_eq!(registry.get(id).unwrap().current().unwrap().width, 640);
        assert!(registry.update_selected_source(id, selected(1024)));
    }

    #[test]
    fn mark_loaded_is_sticky() {
        let (mut registry, id) = registry_with_one();
        assert!(!registry.get(id).unwrap().is_loaded());
        registry.mark_loaded(id);
        registry.mark_loaded(id);
        assert!(registry.get(id).unwrap().is_loaded());
    }

    #[test]
    fn unknown_id_updates_are_ignored() {
        let (mut registry, _) = registry_with_one();
        assert!(!registry.update_selected_source(ImageId(99), selected(320)));
        registry.mark_loaded(ImageId(99));
        assert!(registry.get(ImageId(99)).is_none());
    }
}
