use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::AgentRef;

use super::command::{AgentAnnotation, Commands, DrawCommand};
use super::shapes::{DrawnShape, Expiration};

/// A set's front buffer as handed to the renderer.
pub type ShapeBuffer = Arc<Vec<DrawnShape>>;

/// Two buffers of shapes: the front is what gets drawn, the back is what the
/// current cycle is filling.
#[derive(Debug, Clone, Default)]
struct BufferedSet {
    visible: bool,
    front: ShapeBuffer,
    back: Vec<DrawnShape>,
}

impl BufferedSet {
    fn new() -> Self {
        BufferedSet {
            visible: true,
            ..Default::default()
        }
    }

    fn swap(&mut self) {
        let mut front: Vec<DrawnShape> = self
            .front
            .iter()
            .filter(|s| s.expiration == Expiration::Persistent)
            .cloned()
            .collect();
        front.append(&mut self.back);
        self.front = Arc::new(front);
    }

    fn clear(&mut self) {
        self.front = Arc::default();
        self.back.clear();
    }
}

/// Front buffer of one set at the time of the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SetSnapshot {
    pub name: String,
    pub visible: bool,
    pub shapes: ShapeBuffer,
}

#[derive(Debug, Default)]
struct DrawingsInner {
    sets: BTreeMap<String, BufferedSet>,
    agent_annotations: BTreeMap<AgentRef, AgentAnnotation>,
    selected_agent: Option<AgentRef>,
    /// Bumped whenever sets are created or removed.
    generation: u64,
}

/// Every shape set and agent annotation known to the viewer.
///
/// Writers (the drawing listener or log playback) and the renderer share one
/// instance. Readers only ever take `Arc` snapshots of front buffers, so a
/// frame never sees a set half way through being filled.
#[derive(Debug, Default)]
pub struct Drawings {
    inner: Mutex<DrawingsInner>,
}

fn matching<'a>(
    sets: &'a mut BTreeMap<String, BufferedSet>,
    prefix: &'a str,
) -> impl Iterator<Item = &'a mut BufferedSet> + 'a {
    sets.iter_mut()
        .filter(move |(name, _)| name.starts_with(prefix))
        .map(|(_, set)| set)
}

impl Drawings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a shape to the back buffer of `set`, creating the set if needed.
    pub fn put(&self, set: &str, shape: DrawnShape) {
        let mut inner = self.inner.lock();
        if !inner.sets.contains_key(set) {
            debug!("new shape set {set:?}");
            inner.generation += 1;
        }
        inner
            .sets
            .entry(set.to_string())
            .or_insert_with(BufferedSet::new)
            .back
            .push(shape);
    }

    /// Swaps every set whose name starts with `prefix`. An empty prefix
    /// matches every set.
    pub fn swap(&self, prefix: &str) {
        let mut inner = self.inner.lock();
        matching(&mut inner.sets, prefix).for_each(BufferedSet::swap);
    }

    /// Empties both buffers of every set whose name starts with `prefix`.
    pub fn clear(&self, prefix: &str) {
        let mut inner = self.inner.lock();
        matching(&mut inner.sets, prefix).for_each(BufferedSet::clear);
    }

    /// Forgets every set and agent annotation.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        inner.sets.clear();
        inner.agent_annotations.clear();
        inner.selected_agent = None;
        inner.generation += 1;
    }

    /// Returns false if no set is called `name`.
    pub fn set_visible(&self, name: &str, visible: bool) -> bool {
        match self.inner.lock().sets.get_mut(name) {
            Some(set) => {
                set.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn set_names(&self) -> Vec<String> {
        self.inner.lock().sets.keys().cloned().collect()
    }

    /// Counter that changes whenever the list of sets changes.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn front(&self, name: &str) -> Option<ShapeBuffer> {
        self.inner.lock().sets.get(name).map(|s| s.front.clone())
    }

    /// Front buffers of all sets, ordered by name.
    pub fn snapshot(&self) -> Vec<SetSnapshot> {
        self.inner
            .lock()
            .sets
            .iter()
            .map(|(name, set)| SetSnapshot {
                name: name.clone(),
                visible: set.visible,
                shapes: set.front.clone(),
            })
            .collect()
    }

    pub fn agent_annotation(&self, agent: AgentRef) -> Option<AgentAnnotation> {
        self.inner.lock().agent_annotations.get(&agent).cloned()
    }

    pub fn agent_annotations(&self) -> Vec<(AgentRef, AgentAnnotation)> {
        self.inner
            .lock()
            .agent_annotations
            .iter()
            .map(|(agent, annotation)| (*agent, annotation.clone()))
            .collect()
    }

    /// Agent most recently selected by a control command.
    pub fn selected_agent(&self) -> Option<AgentRef> {
        self.inner.lock().selected_agent
    }

    pub fn execute(&self, command: DrawCommand) {
        match command {
            DrawCommand::Swap(prefix) => self.swap(&prefix),
            DrawCommand::Clear(prefix) => self.clear(&prefix),
            DrawCommand::Shape(set, shape) => self.put(&set, shape),
            DrawCommand::AgentAnnotation(agent, annotation) => {
                self.inner.lock().agent_annotations.insert(agent, annotation);
            }
            DrawCommand::ClearAgentAnnotation(agent) => {
                self.inner.lock().agent_annotations.remove(&agent);
            }
            DrawCommand::SelectAgent(agent) => {
                self.inner.lock().selected_agent = Some(agent);
            }
        }
    }

    /// Decodes and executes every command of a datagram or log block.
    /// Commands before a malformed one still take effect; the rest of the
    /// data is dropped. Returns how many commands ran.
    pub fn execute_datagram(&self, data: &[u8]) -> usize {
        let mut executed = 0;
        for command in Commands::new(data) {
            match command {
                Ok(command) => {
                    self.execute(command);
                    executed += 1;
                }
                Err(e) => {
                    warn!("dropping rest of drawing data after {executed} commands: {e}");
                }
            }
        }
        executed
    }
}
