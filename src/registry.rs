//! The deduplicating node registry.
//!
//! An explicit service, passed by reference, holding the only globally shared
//! mutable structure in the engine: the identifier-to-node map. The map lock
//! is held just for the get-or-create decision, never across canonicalization
//! or user initialization, so unrelated nodes never contend on construction
//! latency.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::class::{Class, Shim};
use crate::error::CreateError;
use crate::hash::NodeId;
use crate::node::{Captured, NodeCell, NodeHandle, NodeRef};
use crate::params::Args;
use crate::store::Store;

/// Explicit construction-time options. The core never reads ambient state.
#[derive(Clone, Default)]
pub struct RegistryOptions {
    /// Hold registry entries weakly. When the last external handle to a node
    /// is released the entry is evicted and the class teardown hook runs; a
    /// later identical construction builds a fresh node.
    pub gc: bool,
    /// Persistence collaborator consulted for classes that opt into `SAVE`.
    pub store: Option<Arc<dyn Store>>,
}

pub(crate) enum Entry {
    Strong(Arc<NodeCell>),
    Weak(Weak<NodeCell>),
}

impl Entry {
    fn live(&self) -> Option<Arc<NodeCell>> {
        match self {
            Entry::Strong(cell) => Some(cell.clone()),
            Entry::Weak(cell) => cell.upgrade(),
        }
    }

    fn is_dead(&self) -> bool {
        match self {
            Entry::Strong(_) => false,
            Entry::Weak(cell) => cell.strong_count() == 0,
        }
    }
}

pub(crate) struct Shared {
    nodes: Mutex<HashMap<NodeId, Entry>>,
    options: RegistryOptions,
}

impl Shared {
    /// Removes the entry for `id` if it no longer holds a live node. A dying
    /// cell calls this before its teardown hook runs, so a concurrent create
    /// observes the entry gone and builds fresh rather than racing teardown.
    pub(crate) fn evict_if_dead(&self, id: NodeId) {
        let mut nodes = self.nodes.lock().expect("registry lock poisoned");
        if let Some(entry) = nodes.get(&id) {
            if entry.is_dead() {
                nodes.remove(&id);
            }
        }
    }
}

/// Get-or-create store guaranteeing exactly one live node per content
/// identifier.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                nodes: Mutex::new(HashMap::new()),
                options,
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Canonicalizes the call, derives the content identifier, and returns
    /// the unique node for it, registering a new unevaluated one on a miss.
    ///
    /// On a miss the new node records an input edge for every node handle
    /// nested anywhere in the arguments, and appends itself to each input's
    /// outputs. On a hit nothing is mutated.
    pub fn create<C: Class>(&self, args: Args) -> Result<NodeRef<C>, CreateError> {
        let canonical = C::spec().bind(args)?;
        let call = canonical.render_call(C::NAME);
        let id = NodeId::hash(&call);

        let inputs: Vec<NodeHandle> = canonical.nodes();

        let mut nodes = self.shared.nodes.lock().expect("registry lock poisoned");
        if let Some(entry) = nodes.get(&id) {
            if let Some(cell) = entry.live() {
                drop(nodes);
                if cell.payload_type() != TypeId::of::<C::Payload>() {
                    return Err(CreateError::ClassMismatch { name: C::NAME, id });
                }
                tracing::debug!(node = %cell.token(), "registry hit");
                return Ok(NodeRef::new(NodeHandle { cell }));
            }
        }

        let captured = Captured {
            args: canonical,
            inputs: inputs.iter().map(|input| input.cell.clone()).collect(),
        };
        let cell = Arc::new(NodeCell::new(
            id,
            Arc::new(Shim::<C>::new()),
            call,
            captured,
            self.shared.options.store.clone(),
            Arc::downgrade(&self.shared),
        ));

        let entry = if self.shared.options.gc {
            Entry::Weak(Arc::downgrade(&cell))
        } else {
            Entry::Strong(cell.clone())
        };
        nodes.insert(id, entry);
        drop(nodes);

        for input in &inputs {
            input.cell.append_output(&cell);
        }

        tracing::debug!(node = %cell.token(), inputs = inputs.len(), "registered");
        Ok(NodeRef::new(NodeHandle { cell }))
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.shared
            .nodes
            .lock()
            .expect("registry lock poisoned")
            .values()
            .filter(|entry| !entry.is_dead())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live node, unordered.
    pub(crate) fn cells(&self) -> Vec<Arc<NodeCell>> {
        self.shared
            .nodes
            .lock()
            .expect("registry lock poisoned")
            .values()
            .filter_map(Entry::live)
            .collect()
    }
}

/// Handed to a running factory. Reaches back into the registry that owns the
/// node under construction, so user initialization code can build and
/// evaluate its own dependency nodes.
pub struct Context {
    registry: Registry,
}

impl Context {
    pub(crate) fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Shorthand for [`Registry::create`].
    pub fn create<C: Class>(&self, args: Args) -> Result<NodeRef<C>, CreateError> {
        self.registry.create(args)
    }
}
