//! In-memory page, media and timers for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::dom::{DocumentHost, MediaHandle, PlayerProbe};
use crate::error::FilterError;
use crate::media::{MediaSessionSource, SessionMetadata};
use crate::navigation::PageGlobals;
use crate::sanitizer::is_truthy;
use crate::schedule::Timers;

// =============================================================================
// FakeMedia
// =============================================================================

#[derive(Debug)]
struct MediaState {
    src: String,
    duration: f64,
    current_time: f64,
    playback_rate: f64,
    paused: bool,
    ready_state: u16,
    seeks: usize,
}

/// Shared handle; clones observe the same element.
#[derive(Debug, Clone)]
pub struct FakeMedia(Rc<RefCell<MediaState>>);

impl FakeMedia {
    pub fn new(src: &str, duration: f64) -> Self {
        Self(Rc::new(RefCell::new(MediaState {
            src: src.to_string(),
            duration,
            current_time: 0.0,
            playback_rate: 1.0,
            paused: true,
            ready_state: 4,
            seeks: 0,
        })))
    }

    pub fn set_src(&self, src: &str) {
        self.0.borrow_mut().src = src.to_string();
    }

    pub fn set_paused(&self, paused: bool) {
        self.0.borrow_mut().paused = paused;
    }

    pub fn set_ready_state(&self, ready_state: u16) {
        self.0.borrow_mut().ready_state = ready_state;
    }

    pub fn seek_count(&self) -> usize {
        self.0.borrow().seeks
    }
}

impl MediaHandle for FakeMedia {
    fn src(&self) -> String {
        self.0.borrow().src.clone()
    }

    fn duration(&self) -> f64 {
        self.0.borrow().duration
    }

    fn current_time(&self) -> f64 {
        self.0.borrow().current_time
    }

    fn set_current_time(&self, secs: f64) {
        let mut state = self.0.borrow_mut();
        state.current_time = secs;
        state.seeks += 1;
    }

    fn playback_rate(&self) -> f64 {
        self.0.borrow().playback_rate
    }

    fn set_playback_rate(&self, rate: f64) {
        self.0.borrow_mut().playback_rate = rate;
    }

    fn is_paused(&self) -> bool {
        self.0.borrow().paused
    }

    fn ready_state(&self) -> u16 {
        self.0.borrow().ready_state
    }

    fn pause(&self) {
        self.0.borrow_mut().paused = true;
    }
}

// =============================================================================
// FakePage
// =============================================================================

#[derive(Debug, Default)]
struct Node {
    /// Selector strings this node answers to, matched verbatim.
    selectors: Vec<String>,
    parent: Option<usize>,
    detached: bool,
    hidden: bool,
    clicks: usize,
    text: Option<String>,
    attributes: HashMap<String, String>,
    media: Option<FakeMedia>,
}

/// A document whose query engine matches exact selector strings.
#[derive(Debug, Default)]
pub struct FakePage {
    nodes: RefCell<Vec<Node>>,
    failing: RefCell<Vec<String>>,
    styles: RefCell<Vec<(String, String)>>,
    player: RefCell<Option<PlayerProbe<FakeMedia>>>,
    player_response: RefCell<Option<Value>>,
    ad_ux_clicks: RefCell<Vec<(String, String)>>,
    globals: RefCell<Value>,
    pinned: RefCell<HashSet<String>>,
    non_configurable: RefCell<HashSet<String>>,
    session: RefCell<Option<SessionMetadata>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            globals: RefCell::new(Value::Object(Map::new())),
            ..Self::default()
        }
    }

    fn push(&self, node: Node) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        nodes.len() - 1
    }

    fn node_selectors(selectors: &[&str]) -> Vec<String> {
        selectors.iter().map(|s| s.to_string()).collect()
    }

    pub fn add_element(&self, selectors: &[&str]) -> usize {
        self.push(Node {
            selectors: Self::node_selectors(selectors),
            ..Node::default()
        })
    }

    pub fn add_child(&self, parent: usize, selectors: &[&str]) -> usize {
        self.push(Node {
            selectors: Self::node_selectors(selectors),
            parent: Some(parent),
            ..Node::default()
        })
    }

    pub fn add_media(&self, selectors: &[&str], media: FakeMedia) -> usize {
        self.push(Node {
            selectors: Self::node_selectors(selectors),
            media: Some(media),
            ..Node::default()
        })
    }

    pub fn set_visible(&self, id: usize, visible: bool) {
        self.nodes.borrow_mut()[id].hidden = !visible;
    }

    pub fn set_text(&self, id: usize, text: &str) {
        self.nodes.borrow_mut()[id].text = Some(text.to_string());
    }

    pub fn clicks(&self, id: usize) -> usize {
        self.nodes.borrow()[id].clicks
    }

    /// A node is attached when neither it nor any ancestor was detached.
    pub fn is_attached(&self, id: usize) -> bool {
        let nodes = self.nodes.borrow();
        let mut current = Some(id);
        while let Some(index) = current {
            if nodes[index].detached {
                return false;
            }
            current = nodes[index].parent;
        }
        true
    }

    fn is_descendant(&self, id: usize, root: usize) -> bool {
        let nodes = self.nodes.borrow();
        let mut current = nodes[id].parent;
        while let Some(index) = current {
            if index == root {
                return true;
            }
            current = nodes[index].parent;
        }
        false
    }

    /// Queries for selectors containing `fragment` fail like an engine
    /// without support for them.
    pub fn fail_selectors_containing(&self, fragment: &str) {
        self.failing.borrow_mut().push(fragment.to_string());
    }

    pub fn style_node_count(&self) -> usize {
        self.styles.borrow().len()
    }

    pub fn style_text(&self, id: &str) -> Option<String> {
        self.styles
            .borrow()
            .iter()
            .find(|(style_id, _)| style_id == id)
            .map(|(_, text)| text.clone())
    }

    pub fn set_player(&self, media: Option<FakeMedia>, ad_module_children: u32) {
        *self.player.borrow_mut() = Some(PlayerProbe {
            media,
            ad_module_children,
        });
    }

    pub fn set_player_response(&self, response: Value) {
        *self.player_response.borrow_mut() = Some(response);
    }

    pub fn ad_ux_clicks(&self) -> Vec<(String, String)> {
        self.ad_ux_clicks.borrow().clone()
    }

    pub fn set_global(&self, path: &str, value: Value) {
        let mut globals = self.globals.borrow_mut();
        *slot(&mut globals, path) = value;
    }

    pub fn global(&self, path: &str) -> Option<Value> {
        let globals = self.globals.borrow();
        let mut current = &*globals;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Make `define_property` fail for this path.
    pub fn make_non_configurable(&self, path: &str) {
        self.non_configurable.borrow_mut().insert(path.to_string());
    }

    pub fn is_pinned(&self, path: &str) -> bool {
        self.pinned.borrow().contains(path)
    }

    pub fn set_session_metadata(&self, metadata: SessionMetadata) {
        *self.session.borrow_mut() = Some(metadata);
    }

    fn check_configurable(&self, path: &str) -> Result<(), FilterError> {
        if self.non_configurable.borrow().contains(path) {
            Err(FilterError::property(path, "property is non-configurable"))
        } else {
            Ok(())
        }
    }
}

/// Walk to `path`, creating intermediate objects and replacing non-objects.
fn slot<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    let mut current = root;
    for segment in path.split('.') {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            _ => unreachable!(),
        };
    }
    current
}

impl DocumentHost for FakePage {
    type Element = usize;
    type Media = FakeMedia;

    fn query_all(&self, selector: &str) -> Result<Vec<usize>, FilterError> {
        if self.failing.borrow().iter().any(|f| selector.contains(f.as_str())) {
            return Err(FilterError::selector(selector, "unsupported"));
        }
        let matching: Vec<usize> = self
            .nodes
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.selectors.iter().any(|s| s == selector))
            .map(|(id, _)| id)
            .collect();
        Ok(matching.into_iter().filter(|&id| self.is_attached(id)).collect())
    }

    fn query_within(&self, root: &usize, selector: &str) -> Result<Option<usize>, FilterError> {
        Ok(self
            .query_all(selector)?
            .into_iter()
            .find(|&id| self.is_descendant(id, *root)))
    }

    fn upsert_style(&self, id: &str, css: &str) -> Result<bool, FilterError> {
        let mut styles = self.styles.borrow_mut();
        match styles.iter_mut().find(|(style_id, _)| style_id == id) {
            Some((_, text)) => {
                *text = css.to_string();
                Ok(false)
            }
            None => {
                styles.push((id.to_string(), css.to_string()));
                Ok(true)
            }
        }
    }

    fn detach(&self, element: &usize) {
        self.nodes.borrow_mut()[*element].detached = true;
    }

    fn is_visible(&self, element: &usize) -> bool {
        !self.nodes.borrow()[*element].hidden
    }

    fn click(&self, element: &usize) {
        self.nodes.borrow_mut()[*element].clicks += 1;
    }

    fn attribute(&self, element: &usize, name: &str) -> Option<String> {
        self.nodes.borrow()[*element].attributes.get(name).cloned()
    }

    fn set_attribute(&self, element: &usize, name: &str, value: &str) {
        self.nodes.borrow_mut()[*element]
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    fn text_content(&self, element: &usize) -> Option<String> {
        self.nodes.borrow()[*element].text.clone()
    }

    fn as_media(&self, element: &usize) -> Option<FakeMedia> {
        self.nodes.borrow()[*element].media.clone()
    }

    fn player_probe(&self) -> Option<PlayerProbe<FakeMedia>> {
        self.player.borrow().clone()
    }
}

impl PageGlobals for FakePage {
    fn define_constant(&self, path: &str, value: &Value) -> Result<(), FilterError> {
        self.check_configurable(path)?;
        self.set_global(path, value.clone());
        Ok(())
    }

    fn pin_undefined(&self, path: &str) -> Result<(), FilterError> {
        self.check_configurable(path)?;
        self.set_global(path, Value::Null);
        self.pinned.borrow_mut().insert(path.to_string());
        Ok(())
    }

    fn assign(&self, path: &str, value: Option<&Value>) {
        self.set_global(path, value.cloned().unwrap_or(Value::Null));
    }

    fn truthy_keys(&self, path: &str, candidates: &[String]) -> Vec<String> {
        let Some(Value::Object(map)) = self.global(path) else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|key| map.get(key.as_str()).is_some_and(is_truthy))
            .cloned()
            .collect()
    }

    fn clear_key(&self, path: &str, key: &str) {
        if let Some(Value::Object(_)) = self.global(path) {
            self.set_global(&format!("{path}.{key}"), Value::Null);
        }
    }

    fn player_response(&self) -> Option<Value> {
        self.player_response.borrow().clone()
    }

    fn ad_ux_clicked(&self, kind: &str, layout_id: &str) -> bool {
        self.ad_ux_clicks
            .borrow_mut()
            .push((kind.to_string(), layout_id.to_string()));
        true
    }
}

impl MediaSessionSource for FakePage {
    fn session_metadata(&self) -> Option<SessionMetadata> {
        self.session.borrow().clone()
    }
}

// =============================================================================
// FakeTimers
// =============================================================================

/// Records interval starts; handles count up from 1.
#[derive(Debug, Default)]
pub struct FakeTimers {
    next: Cell<u32>,
    active: RefCell<Vec<(u32, u32)>>,
    started: RefCell<Vec<u32>>,
    fail: Cell<bool>,
}

impl FakeTimers {
    pub fn fail_next(&self) {
        self.fail.set(true);
    }

    /// Running intervals as (handle, period).
    pub fn active(&self) -> Vec<(u32, u32)> {
        self.active.borrow().clone()
    }

    /// Periods of every successful start, in order.
    pub fn started(&self) -> Vec<u32> {
        self.started.borrow().clone()
    }
}

impl Timers for FakeTimers {
    type Handle = u32;

    fn start_interval(&self, period_ms: u32) -> Result<u32, FilterError> {
        if self.fail.replace(false) {
            return Err(FilterError::ObserverAttach {
                kind: "interval",
                reason: "timer unavailable".to_string(),
            });
        }
        let handle = self.next.get() + 1;
        self.next.set(handle);
        self.active.borrow_mut().push((handle, period_ms));
        self.started.borrow_mut().push(period_ms);
        Ok(handle)
    }

    fn cancel(&self, handle: u32) {
        self.active.borrow_mut().retain(|(h, _)| *h != handle);
    }
}
