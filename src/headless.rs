//! In-memory host document and page scripts.
//!
//! [`HeadlessPage`] implements [`Document`] without a browser: placeholders
//! carry attributes and a container box, inserted images are tracked as
//! nodes (attached, visible, fading), and every document mutation is
//! recorded as a [`PageEvent`]. Loads and fades never complete on their own;
//! the caller decides when, which makes timing-dependent paths (superseded
//! swaps, callbacks after fades) easy to drive.
//!
//! A [`PageSpec`] describes a page plus a script of steps in TOML:
//!
//! ```toml
//! external_settings = '{"last_image_id": 5}'
//!
//! [viewport]
//! height = 800.0
//!
//! [display]
//! device_pixel_ratio = 2.0
//!
//! [[placeholder]]
//! top = 1800.0
//! width = 400.0
//! attributes = { "data-srcs" = '{"320":"a.jpg","640":"b.jpg"}' }
//!
//! [[step]]
//! action = "scroll"
//! to = 1200.0
//!
//! [[step]]
//! action = "settle"
//! ```
//!
//! [`simulate`] runs the script against an [`Engine`] and reports what each
//! step loaded or upgraded.

use crate::attributes::{ExternalSettings, RawAttributes};
use crate::config::Settings;
use crate::density::DisplayProbe;
use crate::engine::{Engine, InitReport};
use crate::host::{Document, ImageElement, Signal};
use crate::types::{ImageId, LoadTrigger};
use crate::viewport::{ContainerBox, Viewport};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("page parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("external settings are not valid JSON: {0}")]
    ExternalSettings(#[from] serde_json::Error),
    #[error("step {step}: placeholder index {index} out of range")]
    NoSuchPlaceholder { step: usize, index: usize },
}

/// Node reference inside a [`HeadlessPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn default_height() -> f64 {
    300.0
}

fn default_width() -> f64 {
    600.0
}

fn default_visible() -> bool {
    true
}

/// A placeholder and the layout of its container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaceholderSpec {
    /// Class on the placeholder. Unset means it carries the configured placeholder class.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub attributes: RawAttributes,
    pub top: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl PlaceholderSpec {
    fn container(&self) -> ContainerBox {
        ContainerBox {
            top: self.top,
            height: self.height,
            width: self.width,
            visible: self.visible,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewportSpec {
    pub height: f64,
    pub scroll_top: f64,
}

impl Default for ViewportSpec {
    fn default() -> Self {
        Self {
            height: 800.0,
            scroll_top: 0.0,
        }
    }
}

/// What the page reports about the display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySpec {
    pub device_pixel_ratio: Option<f64>,
    /// Highest ratio a `min-device-pixel-ratio` media query matches.
    pub media_pixel_ratio: Option<f64>,
}

/// Record of a document mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    AttributeSet {
        node: NodeId,
        name: String,
        value: String,
    },
    Inserted {
        node: NodeId,
        after: NodeId,
        src: String,
    },
    CloneRequested {
        node: NodeId,
        from: NodeId,
        src: String,
    },
    Replaced {
        old: NodeId,
        new: NodeId,
    },
    Shown(NodeId),
    FadeStarted {
        node: NodeId,
        duration: Duration,
    },
}

#[derive(Debug, Clone)]
struct ImageNode {
    element: ImageElement,
    anchor: NodeId,
    attached: bool,
    visible: bool,
    fade: Option<Duration>,
}

#[derive(Debug, Clone)]
enum Node {
    Placeholder(PlaceholderSpec),
    Image(ImageNode),
}

/// Recording in-memory [`Document`].
#[derive(Debug, Clone)]
pub struct HeadlessPage {
    nodes: Vec<Node>,
    viewport: Viewport,
    display: DisplaySpec,
    loading: Vec<NodeId>,
    fading: Vec<NodeId>,
    clones: Vec<NodeId>,
    events: Vec<PageEvent>,
}

impl HeadlessPage {
    pub fn new(viewport: ViewportSpec, display: DisplaySpec) -> Self {
        Self {
            nodes: Vec::new(),
            viewport: Viewport {
                height: viewport.height,
                scroll_top: viewport.scroll_top,
            },
            display,
            loading: Vec::new(),
            fading: Vec::new(),
            clones: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Page with an 800px viewport at the top and a standard-density display.
    pub fn from_placeholders(placeholders: Vec<PlaceholderSpec>) -> Self {
        let mut page = Self::new(
            ViewportSpec::default(),
            DisplaySpec {
                device_pixel_ratio: Some(1.0),
                media_pixel_ratio: None,
            },
        );
        for spec in placeholders {
            page.add_placeholder(spec);
        }
        page
    }

    pub fn add_placeholder(&mut self, spec: PlaceholderSpec) -> NodeId {
        self.push(Node::Placeholder(spec))
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn image(&self, node: NodeId) -> Option<&ImageNode> {
        match self.nodes.get(node.0) {
            Some(Node::Image(image)) => Some(image),
            _ => None,
        }
    }

    fn image_mut(&mut self, node: NodeId) -> Option<&mut ImageNode> {
        match self.nodes.get_mut(node.0) {
            Some(Node::Image(image)) => Some(image),
            _ => None,
        }
    }

    fn placeholder_mut(&mut self, node: NodeId) -> Option<&mut PlaceholderSpec> {
        match self.nodes.get_mut(node.0) {
            Some(Node::Placeholder(spec)) => Some(spec),
            _ => None,
        }
    }

    pub fn scroll_to(&mut self, scroll_top: f64) {
        self.viewport.scroll_top = scroll_top;
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport.height = height;
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: Option<f64>) {
        self.display.device_pixel_ratio = ratio;
    }

    /// Resize one placeholder's container. Returns false for non-placeholders.
    pub fn set_container_width(&mut self, placeholder: NodeId, width: f64) -> bool {
        match self.placeholder_mut(placeholder) {
            Some(spec) => {
                spec.width = width;
                true
            }
            None => false,
        }
    }

    pub fn set_all_container_widths(&mut self, width: f64) {
        for node in &mut self.nodes {
            if let Node::Placeholder(spec) = node {
                spec.width = width;
            }
        }
    }

    /// Every placeholder node regardless of class, in document order.
    pub fn all_placeholders(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Placeholder(_)))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Attached image elements, in insertion order.
    pub fn images(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Image(image) if image.attached))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// The attached image element following `placeholder`, if any.
    pub fn image_after(&self, placeholder: NodeId) -> Option<NodeId> {
        self.images()
            .into_iter()
            .find(|&n| self.image(n).is_some_and(|i| i.anchor == placeholder))
    }

    pub fn element(&self, node: NodeId) -> Option<&ImageElement> {
        self.image(node).map(|i| &i.element)
    }

    pub fn image_src(&self, node: NodeId) -> Option<String> {
        self.image(node).map(|i| i.element.src.clone())
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        match self.nodes.get(node.0) {
            Some(Node::Placeholder(_)) => true,
            Some(Node::Image(image)) => image.attached,
            None => false,
        }
    }

    pub fn is_visible(&self, node: NodeId) -> bool {
        self.image(node).is_some_and(|i| i.attached && i.visible)
    }

    /// Duration of the fade started on `node`, if any.
    pub fn fade_duration(&self, node: NodeId) -> Option<Duration> {
        self.image(node).and_then(|i| i.fade)
    }

    pub fn clones_requested(&self) -> usize {
        self.clones.len()
    }

    pub fn last_clone(&self) -> Option<NodeId> {
        self.clones.last().copied()
    }

    pub fn events(&self) -> &[PageEvent] {
        &self.events
    }

    /// Elements whose loads started and have not been reported, oldest first.
    pub fn take_loading(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.loading)
    }

    /// Elements fading in, oldest first.
    pub fn take_fading(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.fading)
    }

    /// End the fade on `node`, leaving it visible.
    pub fn finish_fade(&mut self, node: NodeId) {
        if let Some(image) = self.image_mut(node) {
            image.visible = true;
        }
    }
}

impl DisplayProbe for HeadlessPage {
    fn device_pixel_ratio(&self) -> Option<f64> {
        self.display.device_pixel_ratio
    }

    fn matches_min_pixel_ratio(&self, ratio: f64) -> bool {
        self.display.media_pixel_ratio.is_some_and(|m| m >= ratio)
    }
}

impl Document for HeadlessPage {
    type Handle = NodeId;

    fn placeholders(&self, class: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match n {
                Node::Placeholder(spec) => spec.class.as_deref().is_none_or(|c| c == class),
                Node::Image(_) => false,
            })
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    fn attributes(&self, placeholder: &NodeId) -> RawAttributes {
        match self.nodes.get(placeholder.0) {
            Some(Node::Placeholder(spec)) => spec.attributes.clone(),
            _ => RawAttributes::new(),
        }
    }

    fn set_attribute(&mut self, placeholder: &NodeId, name: &str, value: &str) {
        if let Some(spec) = self.placeholder_mut(*placeholder) {
            spec.attributes.insert(name.to_string(), value.to_string());
            self.events.push(PageEvent::AttributeSet {
                node: *placeholder,
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    fn container(&self, placeholder: &NodeId) -> ContainerBox {
        match self.nodes.get(placeholder.0) {
            Some(Node::Placeholder(spec)) => spec.container(),
            _ => ContainerBox::default(),
        }
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn insert_after(&mut self, placeholder: &NodeId, image: &ImageElement) -> NodeId {
        let node = self.push(Node::Image(ImageNode {
            element: image.clone(),
            anchor: *placeholder,
            attached: true,
            visible: !image.hidden,
            fade: None,
        }));
        self.loading.push(node);
        self.events.push(PageEvent::Inserted {
            node,
            after: *placeholder,
            src: image.src.clone(),
        });
        node
    }

    fn clone_with_source(&mut self, live: &NodeId, src: &str) -> NodeId {
        let Some(original) = self.image(*live).cloned() else {
            // Cloning a non-image yields an inert detached node
            return self.push(Node::Placeholder(PlaceholderSpec {
                class: Some(String::new()),
                attributes: RawAttributes::new(),
                top: 0.0,
                height: 0.0,
                width: 0.0,
                visible: false,
            }));
        };
        let mut element = original.element;
        element.src = src.to_string();
        let node = self.push(Node::Image(ImageNode {
            element,
            anchor: original.anchor,
            attached: false,
            visible: original.visible,
            fade: None,
        }));
        self.clones.push(node);
        self.loading.push(node);
        self.events.push(PageEvent::CloneRequested {
            node,
            from: *live,
            src: src.to_string(),
        });
        node
    }

    fn replace(&mut self, old: &NodeId, new: &NodeId) {
        let anchor = match self.image_mut(*old) {
            Some(image) => {
                image.attached = false;
                image.anchor
            }
            None => return,
        };
        if let Some(image) = self.image_mut(*new) {
            image.attached = true;
            image.anchor = anchor;
        }
        self.events.push(PageEvent::Replaced {
            old: *old,
            new: *new,
        });
    }

    fn show(&mut self, element: &NodeId) {
        if let Some(image) = self.image_mut(*element) {
            image.visible = true;
            self.events.push(PageEvent::Shown(*element));
        }
    }

    fn fade_in(&mut self, element: &NodeId, duration: Duration) {
        if let Some(image) = self.image_mut(*element) {
            image.fade = Some(duration);
            self.fading.push(*element);
            self.events.push(PageEvent::FadeStarted {
                node: *element,
                duration,
            });
        }
    }
}

// =============================================================================
// Page scripts
// =============================================================================

/// One scripted interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Move the viewport and fire a scroll event.
    Scroll { to: f64 },
    /// Change container widths (one placeholder by index, or all) and let the
    /// debounced resize fire.
    ResizeContainer {
        width: f64,
        #[serde(default)]
        placeholder: Option<usize>,
    },
    /// Call the external load trigger.
    External {
        id: u32,
        #[serde(default)]
        fade_ms: Option<u64>,
    },
    AllowLazy { allow: bool },
    /// Recompute sources without a resize event.
    Update,
    /// Complete every pending load and fade.
    Settle,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Scroll { to } => write!(f, "scroll to {to}"),
            Step::ResizeContainer {
                width,
                placeholder: Some(index),
            } => write!(f, "resize placeholder {index} to {width}px"),
            Step::ResizeContainer { width, .. } => write!(f, "resize all containers to {width}px"),
            Step::External { id, fade_ms: None } => write!(f, "external trigger {id}"),
            Step::External {
                id,
                fade_ms: Some(ms),
            } => write!(f, "external trigger {id} ({ms}ms fade)"),
            Step::AllowLazy { allow: true } => write!(f, "allow lazy loading"),
            Step::AllowLazy { allow: false } => write!(f, "block lazy loading"),
            Step::Update => write!(f, "update image logic"),
            Step::Settle => write!(f, "settle"),
        }
    }
}

/// A page description plus its script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageSpec {
    /// External settings object, as JSON.
    pub external_settings: Option<String>,
    pub viewport: ViewportSpec,
    pub display: DisplaySpec,
    #[serde(rename = "placeholder")]
    pub placeholders: Vec<PlaceholderSpec>,
    #[serde(rename = "step")]
    pub steps: Vec<Step>,
}

impl PageSpec {
    pub fn from_toml(source: &str) -> Result<Self, PageError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, PageError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn page(&self) -> HeadlessPage {
        let mut page = HeadlessPage::new(self.viewport, self.display);
        for spec in &self.placeholders {
            page.add_placeholder(spec.clone());
        }
        page
    }

    pub fn external(&self) -> Result<Option<ExternalSettings>, PageError> {
        self.external_settings
            .as_deref()
            .map(ExternalSettings::from_json)
            .transpose()
            .map_err(PageError::from)
    }
}

/// State of one image at the end of a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSummary {
    pub id: ImageId,
    pub trigger: LoadTrigger,
    pub loaded: bool,
    pub width: Option<u32>,
    pub url: Option<String>,
    /// Source of the attached element, if one is live.
    pub displayed: Option<String>,
    pub visible: bool,
}

/// What a single step changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: Step,
    pub loaded: Vec<ImageId>,
    pub upgraded: Vec<(ImageId, u32)>,
    pub completed: Vec<ImageId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub high_density: bool,
    pub init: InitReport,
    pub steps: Vec<StepOutcome>,
    pub images: Vec<ImageSummary>,
}

impl SimulationReport {
    pub fn image(&self, id: ImageId) -> Option<&ImageSummary> {
        self.images.iter().find(|i| i.id == id)
    }
}

/// Drive every pending load and fade to completion.
pub fn settle(engine: &mut Engine<HeadlessPage>) {
    loop {
        let loads = engine.document_mut().take_loading();
        let fades = engine.document_mut().take_fading();
        if loads.is_empty() && fades.is_empty() {
            break;
        }
        for node in loads {
            engine.handle(Signal::ImageLoaded(node));
        }
        for node in fades {
            engine.document_mut().finish_fade(node);
            engine.handle(Signal::FadeComplete(node));
        }
    }
}

fn snapshot(engine: &Engine<HeadlessPage>) -> Vec<ImageSummary> {
    let page = engine.document();
    engine
        .registry()
        .iter()
        .map(|record| {
            let live = record.element().copied();
            ImageSummary {
                id: record.id,
                trigger: record.trigger,
                loaded: record.is_loaded(),
                width: record.current().map(|c| c.width),
                url: record.current().map(|c| c.url.clone()),
                displayed: live.and_then(|n| page.image_src(n)),
                visible: live.is_some_and(|n| page.is_visible(n)),
            }
        })
        .collect()
}

fn diff(before: &[ImageSummary], after: &[ImageSummary]) -> (Vec<ImageId>, Vec<(ImageId, u32)>) {
    let earlier: BTreeMap<ImageId, &ImageSummary> = before.iter().map(|i| (i.id, i)).collect();
    let mut loaded = Vec::new();
    let mut upgraded = Vec::new();
    for now in after {
        let Some(then) = earlier.get(&now.id) else {
            continue;
        };
        if now.loaded && !then.loaded {
            loaded.push(now.id);
        } else if then.loaded {
            if let (Some(old), Some(new)) = (then.width, now.width) {
                if new > old {
                    upgraded.push((now.id, new));
                }
            }
        }
    }
    (loaded, upgraded)
}

/// Run a page script: init, every step in order, then a final settle.
pub fn simulate(spec: &PageSpec, settings: &Settings) -> Result<SimulationReport, PageError> {
    let mut engine = Engine::new(spec.page(), settings.clone());
    if let Some(external) = spec.external()? {
        engine = engine.with_external_settings(external);
    }
    let init = engine.init();
    let placeholders = engine.document().all_placeholders();
    let completions: Rc<RefCell<Vec<ImageId>>> = Rc::default();
    let mut clock = Instant::now();
    let mut steps = Vec::with_capacity(spec.steps.len());

    for (index, step) in spec.steps.iter().enumerate() {
        let before = snapshot(&engine);
        match step {
            Step::Scroll { to } => {
                engine.document_mut().scroll_to(*to);
                engine.handle(Signal::Scroll);
            }
            Step::ResizeContainer { width, placeholder } => {
                match placeholder {
                    Some(i) => {
                        let node = placeholders.get(*i).copied().ok_or(
                            PageError::NoSuchPlaceholder {
                                step: index + 1,
                                index: *i,
                            },
                        )?;
                        engine.document_mut().set_container_width(node, *width);
                    }
                    None => engine.document_mut().set_all_container_widths(*width),
                }
                engine.handle(Signal::Resize(clock));
                clock += settings.loading.resize_debounce();
                engine.handle(Signal::Tick(clock));
            }
            Step::External { id, fade_ms } => {
                let sink = Rc::clone(&completions);
                engine.external_load_trigger(
                    ImageId(*id),
                    fade_ms.map(Duration::from_millis),
                    Some(Box::new(move |id| sink.borrow_mut().push(id))),
                );
            }
            Step::AllowLazy { allow } => {
                engine.allow_lazy_load_trigger(*allow);
            }
            Step::Update => {
                engine.update_image_logic();
            }
            Step::Settle => settle(&mut engine),
        }
        let (loaded, upgraded) = diff(&before, &snapshot(&engine));
        steps.push(StepOutcome {
            step: step.clone(),
            loaded,
            upgraded,
            completed: std::mem::take(&mut *completions.borrow_mut()),
        });
    }

    settle(&mut engine);
    if let Some(last) = steps.last_mut() {
        last.completed.extend(completions.borrow_mut().drain(..));
    }

    Ok(SimulationReport {
        high_density: engine.density().is_high_density(),
        init,
        steps,
        images: snapshot(&engine),
    })
}
