//! BrowserDriver - Abstract UI automation boundary
//!
//! The runner treats the application under test as an opaque document tree.
//! Everything it needs from a browser goes through this trait: navigate,
//! probe for elements, act on a bound handle, read text and attributes, and
//! capture diagnostics.
//!
//! # Implementations
//!
//! - `CdpDriver` - real Chromium over CDP (`browser` feature)
//! - `MockDriver` - scripted in-memory document for unit tests

use crate::locator::{BoundingBox, Point, Strategy};
use crate::result::{EnsayoError, EnsayoResult, ResolutionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Path of iframe indices from the top-level document (empty = main frame)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub Vec<usize>);

impl FrameId {
    /// The top-level document
    #[must_use]
    pub const fn main() -> Self {
        Self(Vec::new())
    }

    /// A frame nested under this one
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }

    /// Whether this is the top-level document
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("main");
        }
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("/"))
    }
}

/// Handle bound to one element at resolution time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Value of the `data-ensayo-handle` attribute placed on the element
    pub id: String,
    /// Frame owning the element
    pub frame: FrameId,
    /// Strategy that produced the match
    pub strategy: String,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, frame: FrameId, strategy: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frame,
            strategy: strategy.into(),
        }
    }
}

/// Outcome of probing one strategy in one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Probe {
    /// Number of visible candidates
    pub visible: usize,
    /// Bound handle, present only when exactly one candidate is visible
    pub handle: Option<ElementHandle>,
}

impl Probe {
    /// Probe that found nothing
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            visible: 0,
            handle: None,
        }
    }
}

/// Interactability snapshot of a bound element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    /// Still connected to its document
    pub attached: bool,
    /// Rendered with a non-empty box
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Another element covers its center point
    pub occluded: bool,
    /// Layout box in viewport coordinates
    pub bounds: Option<BoundingBox>,
}

impl ElementState {
    /// State of a handle whose element is gone
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            attached: false,
            visible: false,
            enabled: false,
            occluded: false,
            bounds: None,
        }
    }

    /// Reason the element cannot be acted on, if any
    #[must_use]
    pub const fn blocker(&self) -> Option<&'static str> {
        if !self.attached {
            Some("element detached")
        } else if !self.visible {
            Some("element not visible")
        } else if !self.enabled {
            Some("element disabled")
        } else if self.occluded {
            Some("element occluded")
        } else {
            None
        }
    }
}

/// Abstract driver trait for browser automation
#[async_trait]
pub trait BrowserDriver: Send + Sync + fmt::Debug {
    /// Navigate the main frame and wait for the navigation to commit
    async fn navigate(&mut self, url: &str) -> EnsayoResult<()>;

    /// Current URL of the main frame
    async fn current_url(&mut self) -> EnsayoResult<String>;

    /// Main frame followed by every reachable embedded frame
    async fn frames(&mut self) -> EnsayoResult<Vec<FrameId>>;

    /// Count visible matches of a strategy in a frame and bind a handle when unique
    async fn probe(&mut self, frame: &FrameId, strategy: &Strategy) -> EnsayoResult<Probe>;

    /// Current state of a bound element
    async fn element_state(&mut self, handle: &ElementHandle) -> EnsayoResult<ElementState>;

    /// Click a bound element
    async fn click(&mut self, handle: &ElementHandle) -> EnsayoResult<()>;

    /// Replace the value of a bound input
    async fn fill(&mut self, handle: &ElementHandle, value: &str) -> EnsayoResult<()>;

    /// Move the pointer over a bound element
    async fn hover(&mut self, handle: &ElementHandle) -> EnsayoResult<()>;

    /// Choose an option of a bound select element by value or label
    async fn select_option(&mut self, handle: &ElementHandle, value: &str) -> EnsayoResult<()>;

    /// Press the primary pointer button at a point
    async fn pointer_down(&mut self, at: Point) -> EnsayoResult<()>;

    /// Move the pointer to a point
    async fn pointer_move(&mut self, to: Point) -> EnsayoResult<()>;

    /// Release the primary pointer button at a point
    async fn pointer_up(&mut self, at: Point) -> EnsayoResult<()>;

    /// Visible text of a bound element
    async fn text(&mut self, handle: &ElementHandle) -> EnsayoResult<String>;

    /// Attribute of a bound element
    async fn attribute(&mut self, handle: &ElementHandle, name: &str)
        -> EnsayoResult<Option<String>>;

    /// `document.readyState` of the main frame
    async fn ready_state(&mut self) -> EnsayoResult<String>;

    /// Number of resource loads observed by the page so far
    async fn resource_count(&mut self) -> EnsayoResult<u64>;

    /// Monotonic counter of DOM mutations in the main frame
    async fn mutation_count(&mut self) -> EnsayoResult<u64>;

    /// Serialized markup of the main frame
    async fn snapshot(&mut self) -> EnsayoResult<String>;

    /// PNG screenshot of the viewport
    async fn screenshot(&mut self) -> EnsayoResult<Vec<u8>>;

    /// Close the browser context
    async fn close(&mut self) -> EnsayoResult<()>;
}

// ============================================================================
// MockDriver
// ============================================================================

/// Element in the mock document
#[derive(Debug, Clone, PartialEq)]
pub struct MockElement {
    /// Stable element id used by mutations
    pub id: String,
    /// Owning frame
    pub frame: FrameId,
    /// Tag name
    pub tag: String,
    /// Text content
    pub text: String,
    /// ARIA role
    pub role: Option<String>,
    /// Accessible label
    pub label: Option<String>,
    /// Selectors (CSS or XPath) this element answers to
    pub selectors: Vec<String>,
    /// Attributes
    pub attributes: BTreeMap<String, String>,
    /// Rendered
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Covered by another element
    pub occluded: bool,
    /// Connected to the document
    pub attached: bool,
    /// Probes left before the element renders
    pub reveal_after: u32,
    /// Layout box
    pub bounds: BoundingBox,
}

impl MockElement {
    /// Create a visible, enabled element
    #[must_use]
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frame: FrameId::main(),
            tag: tag.into(),
            text: String::new(),
            role: None,
            label: None,
            selectors: Vec::new(),
            attributes: BTreeMap::new(),
            visible: true,
            enabled: true,
            occluded: false,
            attached: true,
            reveal_after: 0,
            bounds: BoundingBox::new(0.0, 0.0, 100.0, 20.0),
        }
    }

    /// Set text content
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set ARIA role
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set accessible label
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a CSS or XPath selector this element answers to
    #[must_use]
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Place the element in a frame
    #[must_use]
    pub fn in_frame(mut self, frame: FrameId) -> Self {
        self.frame = frame;
        self
    }

    /// Set visibility
    #[must_use]
    pub const fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Set enabled state
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Mark as covered by another element
    #[must_use]
    pub const fn occluded(mut self, occluded: bool) -> Self {
        self.occluded = occluded;
        self
    }

    /// Render only after the given number of probes
    #[must_use]
    pub const fn reveal_after(mut self, probes: u32) -> Self {
        self.reveal_after = probes;
        self
    }

    /// Set layout box
    #[must_use]
    pub const fn bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = bounds;
        self
    }

    fn matches(&self, strategy: &Strategy) -> bool {
        match strategy {
            Strategy::Css(s) | Strategy::XPath(s) => self.selectors.iter().any(|x| x == s),
            Strategy::Text(t) => self.text.contains(t.as_str()),
            Strategy::TestId(t) => self.attributes.get("data-testid") == Some(t),
            Strategy::Label(l) => self.label.as_deref() == Some(l.as_str()),
            Strategy::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_ref().map_or(true, |n| {
                        self.text.trim() == n || self.label.as_deref() == Some(n.as_str())
                    })
            }
            Strategy::CssWithText { css, text } => {
                self.selectors.iter().any(|x| x == css) && self.text.contains(text.as_str())
            }
        }
    }

    fn rendered(&self) -> bool {
        self.attached && self.visible && self.reveal_after == 0
    }
}

/// Events that trigger scripted mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Element clicked
    Click,
    /// Element hovered
    Hover,
    /// Pointer released over element
    Drop,
}

/// Scripted change to the mock document
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Make an element visible
    Show(String),
    /// Hide an element
    Hide(String),
    /// Remove an element from its document
    Detach(String),
    /// Enable an element
    Enable(String),
    /// Replace text content
    SetText(String, String),
    /// Set an attribute
    SetAttribute(String, String, String),
    /// Insert a new element
    Add(MockElement),
    /// Change the current URL
    Navigate(String),
}

/// Mock driver for unit testing
#[derive(Debug)]
pub struct MockDriver {
    /// Current URL
    pub url: String,
    /// Document elements
    pub elements: Vec<MockElement>,
    /// Reachable frames (main frame first)
    pub frames: Vec<FrameId>,
    /// `document.readyState`
    pub ready_state: String,
    /// Resource load counter
    pub resources: u64,
    /// DOM mutation counter
    pub mutations: u64,
    /// Screenshot bytes
    pub screenshot_data: Vec<u8>,
    pages: HashMap<String, Vec<MockElement>>,
    reactions: HashMap<(Trigger, String), Vec<Mutation>>,
    failures: HashMap<String, String>,
    detach_on_probe: Option<FrameId>,
    handles: HashMap<String, String>,
    pointer: Option<Point>,
    pressed: bool,
    closed: bool,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            url: "about:blank".to_string(),
            elements: Vec::new(),
            frames: vec![FrameId::main()],
            ready_state: "complete".to_string(),
            resources: 0,
            mutations: 0,
            screenshot_data: vec![0x89, 0x50, 0x4E, 0x47],
            pages: HashMap::new(),
            reactions: HashMap::new(),
            failures: HashMap::new(),
            detach_on_probe: None,
            handles: HashMap::new(),
            pointer: None,
            pressed: false,
            closed: false,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element to the current document
    #[must_use]
    pub fn with_element(mut self, element: MockElement) -> Self {
        self.add_element(element);
        self
    }

    /// Add an element to the current document
    pub fn add_element(&mut self, element: MockElement) {
        self.elements.push(element);
    }

    /// Add an embedded frame
    #[must_use]
    pub fn with_frame(mut self, frame: FrameId) -> Self {
        self.frames.push(frame);
        self
    }

    /// Document served when navigating to `url`
    #[must_use]
    pub fn with_page(mut self, url: impl Into<String>, elements: Vec<MockElement>) -> Self {
        self.pages.insert(url.into(), elements);
        self
    }

    /// Apply mutations when `element` receives `trigger`
    #[must_use]
    pub fn on(mut self, trigger: Trigger, element: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        self.reactions.insert((trigger, element.into()), mutations);
        self
    }

    /// Make the next call to `method` fail with a driver error
    #[must_use]
    pub fn fail_next(mut self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(method.into(), message.into());
        self
    }

    /// Tear down `frame` the first time it is probed
    #[must_use]
    pub fn detach_frame_on_probe(mut self, frame: FrameId) -> Self {
        self.detach_on_probe = Some(frame);
        self
    }

    /// Shared view of the call history, usable after the driver is boxed
    #[must_use]
    pub fn history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.history().iter().any(|c| c.starts_with(method))
    }

    /// Whether `close` was called
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the pointer button is currently held
    #[must_use]
    pub const fn pointer_pressed(&self) -> bool {
        self.pressed
    }

    /// Element by id
    #[must_use]
    pub fn element(&self, id: &str) -> Option<&MockElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn record(&self, call: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(call);
        }
    }

    fn check_failure(&mut self, method: &str) -> EnsayoResult<()> {
        match self.failures.remove(method) {
            Some(message) => Err(EnsayoError::driver(message)),
            None => Ok(()),
        }
    }

    fn bound(&self, handle: &ElementHandle) -> Option<&MockElement> {
        let id = self.handles.get(&handle.id)?;
        self.elements.iter().find(|e| &e.id == id && e.attached)
    }

    fn bound_id(&self, handle: &ElementHandle) -> EnsayoResult<String> {
        self.bound(handle)
            .map(|e| e.id.clone())
            .ok_or_else(|| EnsayoError::driver(format!("handle {} is stale", handle.id)))
    }

    fn react(&mut self, trigger: Trigger, element: &str) {
        let Some(mutations) = self.reactions.get(&(trigger, element.to_string())).cloned() else {
            return;
        };
        for mutation in mutations {
            self.apply(mutation);
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        self.mutations += 1;
        let mut edit = |id: &str, f: &dyn Fn(&mut MockElement)| {
            if let Some(el) = self.elements.iter_mut().find(|e| e.id == id) {
                f(el);
            }
        };
        match mutation {
            Mutation::Show(id) => edit(&id, &|e| {
                e.visible = true;
                e.reveal_after = 0;
            }),
            Mutation::Hide(id) => edit(&id, &|e| e.visible = false),
            Mutation::Detach(id) => edit(&id, &|e| e.attached = false),
            Mutation::Enable(id) => edit(&id, &|e| e.enabled = true),
            Mutation::SetText(id, text) => edit(&id, &|e| e.text.clone_from(&text)),
            Mutation::SetAttribute(id, name, value) => edit(&id, &|e| {
                e.attributes.insert(name.clone(), value.clone());
            }),
            Mutation::Add(element) => self.elements.push(element),
            Mutation::Navigate(url) => self.url = url,
        }
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&mut self, url: &str) -> EnsayoResult<()> {
        self.record(format!("navigate:{url}"));
        self.check_failure("navigate")?;
        self.url = url.to_string();
        if let Some(elements) = self.pages.get(url) {
            self.elements.clone_from(elements);
            self.handles.clear();
        }
        self.mutations += 1;
        Ok(())
    }

    async fn current_url(&mut self) -> EnsayoResult<String> {
        Ok(self.url.clone())
    }

    async fn frames(&mut self) -> EnsayoResult<Vec<FrameId>> {
        Ok(self.frames.clone())
    }

    async fn probe(&mut self, frame: &FrameId, strategy: &Strategy) -> EnsayoResult<Probe> {
        self.record(format!("probe:{frame}:{strategy}"));
        self.check_failure("probe")?;
        if self.detach_on_probe.as_ref() == Some(frame) {
            self.detach_on_probe = None;
            self.frames.retain(|f| f != frame);
            self.elements.retain(|e| &e.frame != frame);
        }
        if !self.frames.contains(frame) {
            return Err(ResolutionError::FrameDetached {
                frame: frame.to_string(),
            }
            .into());
        }

        let mut visible = Vec::new();
        for el in &mut self.elements {
            if &el.frame != frame || !el.attached || !el.matches(strategy) {
                continue;
            }
            if el.reveal_after > 0 {
                el.reveal_after -= 1;
                continue;
            }
            if el.visible {
                visible.push(el.id.clone());
            }
        }

        if visible.len() == 1 {
            let handle_id = uuid::Uuid::new_v4().to_string();
            self.handles.insert(handle_id.clone(), visible[0].clone());
            return Ok(Probe {
                visible: 1,
                handle: Some(ElementHandle::new(handle_id, frame.clone(), strategy.to_string())),
            });
        }
        Ok(Probe {
            visible: visible.len(),
            handle: None,
        })
    }

    async fn element_state(&mut self, handle: &ElementHandle) -> EnsayoResult<ElementState> {
        self.check_failure("element_state")?;
        Ok(self.bound(handle).map_or_else(ElementState::detached, |el| ElementState {
            attached: true,
            visible: el.rendered(),
            enabled: el.enabled,
            occluded: el.occluded,
            bounds: Some(el.bounds),
        }))
    }

    async fn click(&mut self, handle: &ElementHandle) -> EnsayoResult<()> {
        let id = self.bound_id(handle)?;
        self.record(format!("click:{id}"));
        self.check_failure("click")?;
        self.react(Trigger::Click, &id);
        Ok(())
    }

    async fn fill(&mut self, handle: &ElementHandle, value: &str) -> EnsayoResult<()> {
        let id = self.bound_id(handle)?;
        self.record(format!("fill:{id}:{value}"));
        self.check_failure("fill")?;
        self.apply(Mutation::SetAttribute(id, "value".to_string(), value.to_string()));
        Ok(())
    }

    async fn hover(&mut self, handle: &ElementHandle) -> EnsayoResult<()> {
        let id = self.bound_id(handle)?;
        self.record(format!("hover:{id}"));
        self.check_failure("hover")?;
        self.react(Trigger::Hover, &id);
        Ok(())
    }

    async fn select_option(&mut self, handle: &ElementHandle, value: &str) -> EnsayoResult<()> {
        let id = self.bound_id(handle)?;
        self.record(format!("select:{id}:{value}"));
        self.check_failure("select_option")?;
        self.apply(Mutation::SetAttribute(id, "value".to_string(), value.to_string()));
        Ok(())
    }

    async fn pointer_down(&mut self, at: Point) -> EnsayoResult<()> {
        self.record(format!("pointer_down:{},{}", at.x, at.y));
        self.check_failure("pointer_down")?;
        self.pointer = Some(at);
        self.pressed = true;
        Ok(())
    }

    async fn pointer_move(&mut self, to: Point) -> EnsayoResult<()> {
        self.record(format!("pointer_move:{},{}", to.x, to.y));
        self.check_failure("pointer_move")?;
        self.pointer = Some(to);
        Ok(())
    }

    async fn pointer_up(&mut self, at: Point) -> EnsayoResult<()> {
        self.record(format!("pointer_up:{},{}", at.x, at.y));
        self.check_failure("pointer_up")?;
        let was_pressed = self.pressed;
        self.pressed = false;
        self.pointer = Some(at);
        if was_pressed {
            let target = self
                .elements
                .iter()
                .rev()
                .find(|e| {
                    e.rendered()
                        && e.bounds.contains(&at)
                        && self.reactions.contains_key(&(Trigger::Drop, e.id.clone()))
                })
                .map(|e| e.id.clone());
            if let Some(id) = target {
                self.react(Trigger::Drop, &id);
            }
        }
        Ok(())
    }

    async fn text(&mut self, handle: &ElementHandle) -> EnsayoResult<String> {
        self.check_failure("text")?;
        self.bound(handle)
            .map(|e| e.text.clone())
            .ok_or_else(|| EnsayoError::driver(format!("handle {} is stale", handle.id)))
    }

    async fn attribute(
        &mut self,
        handle: &ElementHandle,
        name: &str,
    ) -> EnsayoResult<Option<String>> {
        self.check_failure("attribute")?;
        self.bound(handle)
            .map(|e| e.attributes.get(name).cloned())
            .ok_or_else(|| EnsayoError::driver(format!("handle {} is stale", handle.id)))
    }

    async fn ready_state(&mut self) -> EnsayoResult<String> {
        Ok(self.ready_state.clone())
    }

    async fn resource_count(&mut self) -> EnsayoResult<u64> {
        Ok(self.resources)
    }

    async fn mutation_count(&mut self) -> EnsayoResult<u64> {
        Ok(self.mutations)
    }

    async fn snapshot(&mut self) -> EnsayoResult<String> {
        self.record("snapshot".to_string());
        let body: String = self
            .elements
            .iter()
            .filter(|e| e.attached)
            .map(|e| format!("<{tag} id=\"{id}\">{text}</{tag}>", tag = e.tag, id = e.id, text = e.text))
            .collect();
        Ok(format!("<html><body>{body}</body></html>"))
    }

    async fn screenshot(&mut self) -> EnsayoResult<Vec<u8>> {
        self.record("screenshot".to_string());
        self.check_failure("screenshot")?;
        Ok(self.screenshot_data.clone())
    }

    async fn close(&mut self) -> EnsayoResult<()> {
        self.record("close".to_string());
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod frame_id_tests {
        use super::*;

        #[test]
        fn test_main_frame_display() {
            assert_eq!(FrameId::main().to_string(), "main");
            assert!(FrameId::main().is_main());
        }

        #[test]
        fn test_child_frame_path() {
            let frame = FrameId::main().child(0).child(2);
            assert_eq!(frame.to_string(), "0/2");
            assert!(!frame.is_main());
        }
    }

    mod element_state_tests {
        use super::*;

        #[test]
        fn test_blocker_order() {
            assert_eq!(ElementState::detached().blocker(), Some("element detached"));

            let mut state = ElementState {
                attached: true,
                visible: true,
                enabled: false,
                occluded: true,
                bounds: None,
            };
            assert_eq!(state.blocker(), Some("element disabled"));
            state.enabled = true;
            assert_eq!(state.blocker(), Some("element occluded"));
            state.occluded = false;
            assert_eq!(state.blocker(), None);
        }
    }

    mod mock_driver_tests {
        use super::*;

        fn button(id: &str, text: &str) -> MockElement {
            MockElement::new(id, "button").text(text).role("button")
        }

        #[tokio::test]
        async fn test_probe_binds_unique_match() {
            let mut driver = MockDriver::new().with_element(button("save", "Save"));
            let probe = driver
                .probe(&FrameId::main(), &Strategy::text("Save"))
                .await
                .unwrap();
            assert_eq!(probe.visible, 1);
            let handle = probe.handle.unwrap();
            assert_eq!(driver.text(&handle).await.unwrap(), "Save");
        }

        #[tokio::test]
        async fn test_probe_counts_ambiguous_matches() {
            let mut driver = MockDriver::new()
                .with_element(button("a", "Delete"))
                .with_element(button("b", "Delete"));
            let probe = driver
                .probe(&FrameId::main(), &Strategy::text("Delete"))
                .await
                .unwrap();
            assert_eq!(probe.visible, 2);
            assert!(probe.handle.is_none());
        }

        #[tokio::test]
        async fn test_probe_ignores_hidden_elements() {
            let mut driver = MockDriver::new()
                .with_element(button("a", "Next"))
                .with_element(button("b", "Next").visible(false));
            let probe = driver
                .probe(&FrameId::main(), &Strategy::text("Next"))
                .await
                .unwrap();
            assert_eq!(probe.visible, 1);
        }

        #[tokio::test]
        async fn test_reveal_after_counts_probes() {
            let mut driver =
                MockDriver::new().with_element(button("late", "Loaded").reveal_after(2));
            let strategy = Strategy::text("Loaded");
            assert_eq!(driver.probe(&FrameId::main(), &strategy).await.unwrap().visible, 0);
            assert_eq!(driver.probe(&FrameId::main(), &strategy).await.unwrap().visible, 0);
            assert_eq!(driver.probe(&FrameId::main(), &strategy).await.unwrap().visible, 1);
        }

        #[tokio::test]
        async fn test_detached_frame_errors() {
            let frame = FrameId::main().child(0);
            let mut driver = MockDriver::new()
                .with_frame(frame.clone())
                .detach_frame_on_probe(frame.clone());
            let err = driver.probe(&frame, &Strategy::css("#x")).await.unwrap_err();
            assert!(err.is_frame_detached());
        }

        #[tokio::test]
        async fn test_click_applies_reactions() {
            let mut driver = MockDriver::new()
                .with_element(button("open", "Open"))
                .with_element(MockElement::new("dialog", "div").visible(false))
                .on(Trigger::Click, "open", vec![Mutation::Show("dialog".into())]);
            let handle = driver
                .probe(&FrameId::main(), &Strategy::text("Open"))
                .await
                .unwrap()
                .handle
                .unwrap();
            let before = driver.mutation_count().await.unwrap();
            driver.click(&handle).await.unwrap();
            assert!(driver.element("dialog").unwrap().visible);
            assert!(driver.mutation_count().await.unwrap() > before);
            assert!(driver.was_called("click:open"));
        }

        #[tokio::test]
        async fn test_stale_handle_reports_detached() {
            let mut driver = MockDriver::new()
                .with_element(button("row", "Row"))
                .on(Trigger::Click, "row", vec![Mutation::Detach("row".into())]);
            let handle = driver
                .probe(&FrameId::main(), &Strategy::text("Row"))
                .await
                .unwrap()
                .handle
                .unwrap();
            driver.click(&handle).await.unwrap();
            let state = driver.element_state(&handle).await.unwrap();
            assert!(!state.attached);
            assert!(driver.click(&handle).await.is_err());
        }

        #[tokio::test]
        async fn test_fail_next_is_one_shot() {
            let mut driver = MockDriver::new().fail_next("navigate", "boom");
            assert!(driver.navigate("http://a").await.is_err());
            assert!(driver.navigate("http://a").await.is_ok());
        }

        #[tokio::test]
        async fn test_navigate_loads_page() {
            let mut driver = MockDriver::new()
                .with_page("http://app/board", vec![button("card", "Card")]);
            driver.navigate("http://app/board").await.unwrap();
            assert_eq!(driver.current_url().await.unwrap(), "http://app/board");
            assert!(driver.element("card").is_some());
        }

        #[tokio::test]
        async fn test_drop_reaction_on_pointer_up() {
            let mut driver = MockDriver::new()
                .with_element(
                    MockElement::new("column", "div")
                        .bounds(BoundingBox::new(200.0, 0.0, 100.0, 300.0)),
                )
                .on(
                    Trigger::Drop,
                    "column",
                    vec![Mutation::SetText("column".into(), "dropped".into())],
                );
            driver.pointer_down(Point::new(10.0, 10.0)).await.unwrap();
            assert!(driver.pointer_pressed());
            driver.pointer_up(Point::new(250.0, 50.0)).await.unwrap();
            assert!(!driver.pointer_pressed());
            assert_eq!(driver.element("column").unwrap().text, "dropped");
        }

        #[tokio::test]
        async fn test_history_handle_is_shared() {
            let mut driver = MockDriver::new();
            let history = driver.history_handle();
            driver.close().await.unwrap();
            assert!(history.lock().unwrap().contains(&"close".to_string()));
            assert!(driver.is_closed());
        }
    }
}
