//! Node cells, handles, and the lazy evaluation state machine.
//!
//! A node transitions `Unevaluated -> Evaluating -> {Evaluated | Failed}` at
//! most once. The transient `Evaluating` state is owned by exactly one
//! thread; other threads calling [`NodeHandle::evaluate`] park on a condvar
//! and, upon wake, observe `Evaluated` (return normally) or `Failed`
//! (re-raise the recorded error) without re-invoking the factory. The owning
//! thread re-entering evaluation of the node it is currently constructing
//! returns immediately instead of deadlocking.
//!
//! Captured arguments and the strong input edges they carry are discarded as
//! soon as evaluation finishes, releasing memory held by the argument
//! snapshot. The canonical call string is retained forever, so identifier and
//! depth 1 description access never force or require evaluation.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, ThreadId};

use crate::class::{Class, Dynamic, ErasedClass};
use crate::error::EvalError;
use crate::hash::NodeId;
use crate::params::CanonicalArguments;
use crate::registry::{Context, Registry, Shared};
use crate::store::Store;
use crate::value::Value;

/// Observable evaluation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unevaluated,
    Evaluating,
    Evaluated,
    Failed,
}

enum State {
    Unevaluated,
    Evaluating(ThreadId),
    Evaluated(Dynamic),
    Failed(Arc<anyhow::Error>),
}

/// Argument snapshot held only until evaluation finishes. The `inputs` Arcs
/// keep dependency nodes alive for as long as this node may still need them.
pub(crate) struct Captured {
    pub(crate) args: CanonicalArguments,
    pub(crate) inputs: Vec<Arc<NodeCell>>,
}

pub(crate) struct NodeCell {
    id: NodeId,
    class: Arc<dyn ErasedClass>,
    /// Canonical call signature, immutable, retained past evaluation.
    call: String,
    state: Mutex<State>,
    done: Condvar,
    captured: Mutex<Option<Captured>>,
    outputs: Mutex<Vec<Weak<NodeCell>>>,
    store: Option<Arc<dyn Store>>,
    registry: Weak<Shared>,
}

impl NodeCell {
    pub(crate) fn new(
        id: NodeId,
        class: Arc<dyn ErasedClass>,
        call: String,
        captured: Captured,
        store: Option<Arc<dyn Store>>,
        registry: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            class,
            call,
            state: Mutex::new(State::Unevaluated),
            done: Condvar::new(),
            captured: Mutex::new(Some(captured)),
            outputs: Mutex::new(Vec::new()),
            store,
            registry,
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn name(&self) -> &'static str {
        self.class.name()
    }

    pub(crate) fn call(&self) -> &str {
        &self.call
    }

    pub(crate) fn payload_type(&self) -> std::any::TypeId {
        self.class.payload_type()
    }

    /// The opaque `<Name id>` token.
    pub(crate) fn token(&self) -> String {
        format!("<{} {}>", self.class.name(), self.id)
    }

    pub(crate) fn state(&self) -> NodeState {
        match &*self.state.lock().expect("node state lock poisoned") {
            State::Unevaluated => NodeState::Unevaluated,
            State::Evaluating(_) => NodeState::Evaluating,
            State::Evaluated(_) => NodeState::Evaluated,
            State::Failed(_) => NodeState::Failed,
        }
    }

    pub(crate) fn append_output(&self, output: &Arc<NodeCell>) {
        self.outputs
            .lock()
            .expect("node outputs lock poisoned")
            .push(Arc::downgrade(output));
    }

    pub(crate) fn live_outputs(&self) -> Vec<Arc<NodeCell>> {
        let mut outputs = self.outputs.lock().expect("node outputs lock poisoned");
        outputs.retain(|weak| weak.strong_count() > 0);
        outputs.iter().filter_map(Weak::upgrade).collect()
    }

    fn failed(&self, source: Arc<anyhow::Error>) -> EvalError {
        EvalError::ConstructionFailed {
            name: self.class.name(),
            id: self.id,
            source,
        }
    }

    fn unavailable(&self) -> EvalError {
        EvalError::InputsUnavailable {
            name: self.class.name(),
            id: self.id,
        }
    }

    /// Drives the node to `Evaluated` or `Failed`, running the factory at
    /// most once across all threads.
    pub(crate) fn evaluate(&self) -> Result<(), EvalError> {
        let me = thread::current().id();

        {
            let mut state = self.state.lock().expect("node state lock poisoned");
            loop {
                match &*state {
                    State::Evaluated(_) => return Ok(()),
                    State::Failed(error) => return Err(self.failed(error.clone())),
                    State::Evaluating(owner) => {
                        // Re-entry by the owning thread must not deadlock.
                        if *owner == me {
                            return Ok(());
                        }
                    }
                    State::Unevaluated => {
                        *state = State::Evaluating(me);
                        break;
                    }
                }
                state = self.done.wait(state).expect("node state lock poisoned");
            }
        }

        tracing::debug!(node = %self.token(), "evaluating");

        // User code runs without any lock held. Waiters park on the condvar.
        let captured = self
            .captured
            .lock()
            .expect("node captured lock poisoned")
            .take()
            .expect("arguments taken twice for evaluation");

        let result = match self.registry.upgrade() {
            Some(shared) => {
                let ctx = Context::new(Registry::from_shared(shared));
                self.class
                    .construct(&ctx, self.store.as_deref(), self.id, &self.call, &captured.args)
            }
            None => Err(anyhow::anyhow!("registry dropped before evaluation")),
        };

        // Release the argument snapshot and input edges, success or failure.
        drop(captured);

        let mut state = self.state.lock().expect("node state lock poisoned");
        let outcome = match result {
            Ok(payload) => {
                tracing::debug!(node = %self.token(), "evaluated");
                *state = State::Evaluated(payload);
                Ok(())
            }
            Err(error) => {
                tracing::debug!(node = %self.token(), error = %error, "evaluation failed");
                let error = Arc::new(error);
                *state = State::Failed(error.clone());
                Err(self.failed(error))
            }
        };
        self.done.notify_all();
        outcome
    }

    /// Evaluates, then hands out the type-erased payload.
    pub(crate) fn payload(&self) -> Result<Dynamic, EvalError> {
        self.evaluate()?;
        match &*self.state.lock().expect("node state lock poisoned") {
            State::Evaluated(payload) => Ok(payload.clone()),
            State::Evaluating(_) => Err(EvalError::Reentrant {
                name: self.class.name(),
                id: self.id,
            }),
            _ => unreachable!("evaluate left the node unresolved"),
        }
    }

    pub(crate) fn inputs(&self) -> Result<Vec<Arc<NodeCell>>, EvalError> {
        match &*self.captured.lock().expect("node captured lock poisoned") {
            Some(captured) => Ok(captured.inputs.clone()),
            None => Err(self.unavailable()),
        }
    }

    pub(crate) fn argument(&self, name: &str) -> Result<Option<Value>, EvalError> {
        match &*self.captured.lock().expect("node captured lock poisoned") {
            Some(captured) => Ok(captured.args.get(name).cloned()),
            None => Err(self.unavailable()),
        }
    }

    /// Depth-limited structural description. Depth 0 is the opaque token,
    /// depth 1 is always available through the retained canonical call,
    /// deeper renderings need the captured arguments.
    pub(crate) fn describe(&self, depth: usize) -> Result<String, EvalError> {
        if depth == 0 {
            return Ok(self.token());
        }

        match &*self.captured.lock().expect("node captured lock poisoned") {
            Some(captured) => {
                crate::describe::describe_call(self.class.name(), &captured.args, depth - 1)
            }
            None if depth == 1 => Ok(self.call.clone()),
            None => Err(self.unavailable()),
        }
    }

    /// Evaluates the full transitive output subgraph. The set of dependents
    /// is discovered while walking, so nodes registered after this one are
    /// included.
    pub(crate) fn evaluate_dependents(&self) -> Result<(), EvalError> {
        let mut queue = self.live_outputs();
        let mut seen: HashSet<NodeId> = HashSet::new();

        while let Some(cell) = queue.pop() {
            if !seen.insert(cell.id) {
                continue;
            }
            cell.evaluate()?;
            queue.extend(cell.live_outputs());
        }
        Ok(())
    }

    pub(crate) fn enter_payload(&self, payload: &Dynamic) {
        self.class.enter(payload);
    }

    pub(crate) fn exit_payload(&self, payload: &Dynamic) {
        self.class.exit(payload);
    }
}

impl Drop for NodeCell {
    fn drop(&mut self) {
        // In gc mode the registry entry is weak; remove it before running
        // the teardown hook so a racing create builds a fresh node instead
        // of observing a half-dead entry.
        if let Some(shared) = self.registry.upgrade() {
            shared.evict_if_dead(self.id);
            tracing::debug!(node = %self.token(), "evicted");
        }

        if let Ok(state) = self.state.get_mut() {
            if let State::Evaluated(payload) = state {
                self.class.teardown(payload);
            }
        }
    }
}

/// Untyped, cheaply clonable handle to a node. Everything reachable from
/// here is lazy-tagged: identifier, name, state, and description access never
/// trigger evaluation.
#[derive(Clone)]
pub struct NodeHandle {
    pub(crate) cell: Arc<NodeCell>,
}

impl NodeHandle {
    /// Permanent content identifier.
    pub fn id(&self) -> NodeId {
        self.cell.id()
    }

    /// Class name.
    pub fn name(&self) -> &'static str {
        self.cell.name()
    }

    /// Canonical call signature, always available.
    pub fn signature(&self) -> &str {
        self.cell.call()
    }

    pub fn state(&self) -> NodeState {
        self.cell.state()
    }

    /// Forces evaluation; at most once per node, sticky on failure.
    pub fn evaluate(&self) -> Result<(), EvalError> {
        self.cell.evaluate()
    }

    /// Depth-limited, cycle-free description. See [`crate::describe`].
    pub fn describe(&self, depth: usize) -> Result<String, EvalError> {
        self.cell.describe(depth)
    }

    /// Nodes referenced in the construction arguments. Unavailable once
    /// evaluation has finished and the arguments were discarded.
    pub fn inputs(&self) -> Result<Vec<NodeHandle>, EvalError> {
        Ok(self
            .cell
            .inputs()?
            .into_iter()
            .map(|cell| NodeHandle { cell })
            .collect())
    }

    /// Nodes that reference this node in their construction arguments.
    pub fn outputs(&self) -> Vec<NodeHandle> {
        self.cell
            .live_outputs()
            .into_iter()
            .map(|cell| NodeHandle { cell })
            .collect()
    }

    /// A captured argument by parameter name, deep-copied out. Unavailable
    /// once evaluation has finished.
    pub fn argument(&self, name: &str) -> Result<Option<Value>, EvalError> {
        self.cell.argument(name)
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for NodeHandle {}

impl std::hash::Hash for NodeHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cell.token())
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cell.token())
    }
}

/// Typed handle to a node of class `C`.
///
/// Carries the payload type as phantom data only; at runtime it is the same
/// [`NodeHandle`], and it derefs to one for the untyped surface.
pub struct NodeRef<C: Class> {
    handle: NodeHandle,
    _marker: std::marker::PhantomData<fn() -> C>,
}

impl<C: Class> NodeRef<C> {
    pub(crate) fn new(handle: NodeHandle) -> Self {
        Self {
            handle,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Evaluates the node (at most once) and returns the shared payload.
    pub fn value(&self) -> Result<Arc<C::Payload>, EvalError> {
        let payload = self.handle.cell.payload()?;
        match payload.downcast::<C::Payload>() {
            Ok(payload) => Ok(payload),
            Err(_) => unreachable!("payload type checked at node creation"),
        }
    }

    /// Scoped resource access: evaluates just this node, calls the class's
    /// `enter`, runs `f`, then evaluates the node's full transitive output
    /// subgraph (computed at close time, so dependents registered inside the
    /// scope are flushed) and calls `exit`.
    pub fn scoped<R>(&self, f: impl FnOnce(&C::Payload) -> R) -> Result<R, EvalError> {
        let payload = self.value()?;
        let erased: Dynamic = payload.clone();

        self.handle.cell.enter_payload(&erased);
        let out = f(&payload);
        self.handle.cell.evaluate_dependents()?;
        self.handle.cell.exit_payload(&erased);
        Ok(out)
    }
}

impl<C: Class> Clone for NodeRef<C> {
    fn clone(&self) -> Self {
        Self::new(self.handle.clone())
    }
}

impl<C: Class> std::ops::Deref for NodeRef<C> {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}

impl<C: Class> From<NodeRef<C>> for Value {
    fn from(node: NodeRef<C>) -> Self {
        Value::Node(node.handle)
    }
}

impl<C: Class> From<&NodeRef<C>> for Value {
    fn from(node: &NodeRef<C>) -> Self {
        Value::Node(node.handle.clone())
    }
}

impl<C: Class> std::fmt::Debug for NodeRef<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.handle, f)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::params::{Args, ParameterSpec};
    use crate::registry::Registry;

    #[test]
    fn evaluation_is_lazy_and_runs_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct Lazy;
        impl Class for Lazy {
            type Payload = i64;
            const NAME: &'static str = "Lazy";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().required("x").build()
            }
            fn init(_: &Context, args: &CanonicalArguments) -> anyhow::Result<i64> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(args.get("x").and_then(Value::as_int).unwrap_or(0) * 2)
            }
        }

        let registry = Registry::new();
        let node = registry.create::<Lazy>(Args::new().pos(21)).unwrap();

        assert_eq!(node.state(), NodeState::Unevaluated);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        assert_eq!(*node.value().unwrap(), 42);
        assert_eq!(*node.value().unwrap(), 42);
        assert_eq!(node.state(), NodeState::Evaluated);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exactly_once_under_contention() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct Slow;
        impl Class for Slow {
            type Payload = u64;
            const NAME: &'static str = "Slow";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().build()
            }
            fn init(_: &Context, _: &CanonicalArguments) -> anyhow::Result<u64> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(7)
            }
        }

        let registry = Registry::new();
        let node = registry.create::<Slow>(Args::new()).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                let node = node.clone();
                s.spawn(move || assert_eq!(*node.value().unwrap(), 7));
            }
        });

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_sticky() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct Broken;
        impl Class for Broken {
            type Payload = ();
            const NAME: &'static str = "Broken";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().build()
            }
            fn init(_: &Context, _: &CanonicalArguments) -> anyhow::Result<()> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }
        }

        let registry = Registry::new();
        let node = registry.create::<Broken>(Args::new()).unwrap();

        for _ in 0..3 {
            let err = node.evaluate().unwrap_err();
            match err {
                EvalError::ConstructionFailed { name, .. } => assert_eq!(name, "Broken"),
                other => panic!("unexpected error: {other}"),
            }
            assert!(err.to_string().contains("boom"));
        }
        assert_eq!(node.state(), NodeState::Failed);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arguments_discarded_after_evaluation() {
        struct Plain;
        impl Class for Plain {
            type Payload = ();
            const NAME: &'static str = "Plain";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().optional("a", 1).build()
            }
            fn init(_: &Context, _: &CanonicalArguments) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let registry = Registry::new();
        let node = registry.create::<Plain>(Args::new()).unwrap();

        assert_eq!(node.argument("a").unwrap(), Some(Value::from(1)));
        assert!(node.inputs().unwrap().is_empty());

        node.evaluate().unwrap();

        assert!(matches!(
            node.argument("a"),
            Err(EvalError::InputsUnavailable { .. })
        ));
        assert!(matches!(
            node.inputs(),
            Err(EvalError::InputsUnavailable { .. })
        ));
        // The canonical signature stays available.
        assert_eq!(node.signature(), "Plain(1)");
        assert_eq!(node.describe(1).unwrap(), "Plain(1)");
    }

    #[test]
    fn factories_evaluate_dependencies_through_value_access() {
        struct Chain;
        impl Class for Chain {
            type Payload = i64;
            const NAME: &'static str = "Chain";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().required("a").build()
            }
            fn init(_: &Context, args: &CanonicalArguments) -> anyhow::Result<i64> {
                match args.get("a") {
                    Some(Value::Node(dep)) => {
                        dep.evaluate()?;
                        // Inputs of the dependency may already be gone, its
                        // signature is not.
                        Ok(dep.signature().len() as i64)
                    }
                    Some(value) => Ok(value.as_int().unwrap_or(0)),
                    None => Ok(0),
                }
            }
        }

        let registry = Registry::new();
        let inner = registry.create::<Chain>(Args::new().pos(5)).unwrap();
        let outer = registry
            .create::<Chain>(Args::new().pos(&*inner))
            .unwrap();

        assert_eq!(inner.state(), NodeState::Unevaluated);
        outer.evaluate().unwrap();
        assert_eq!(inner.state(), NodeState::Evaluated);
        assert_eq!(*outer.value().unwrap(), "Chain(5)".len() as i64);
    }

    #[test]
    fn scope_close_flushes_dependents_created_inside() {
        use std::sync::Mutex;

        static EVENTS: Mutex<Vec<&str>> = Mutex::new(Vec::new());

        fn log(event: &'static str) {
            EVENTS.lock().unwrap().push(event);
        }

        struct Resource;
        impl Class for Resource {
            type Payload = i64;
            const NAME: &'static str = "Resource";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().required("n").build()
            }
            fn init(_: &Context, args: &CanonicalArguments) -> anyhow::Result<i64> {
                log("init resource");
                Ok(args.get("n").and_then(Value::as_int).unwrap_or(0))
            }
            fn enter(_: &i64) {
                log("enter");
            }
            fn exit(_: &i64) {
                log("exit");
            }
        }

        struct Derived;
        impl Class for Derived {
            type Payload = i64;
            const NAME: &'static str = "Derived";
            fn spec() -> ParameterSpec {
                ParameterSpec::builder().required("src").build()
            }
            fn init(_: &Context, args: &CanonicalArguments) -> anyhow::Result<i64> {
                log("init derived");
                let src = args.get("src").and_then(Value::as_node).expect("node arg");
                src.evaluate()?;
                Ok(1)
            }
        }

        let registry = Registry::new();
        let resource = registry.create::<Resource>(Args::new().pos(3)).unwrap();

        let derived = resource
            .scoped(|payload| {
                assert_eq!(*payload, 3);
                log("body");
                // Registered inside the scope, evaluated when it closes.
                registry.create::<Derived>(Args::new().pos(&*resource)).unwrap()
            })
            .unwrap();

        assert_eq!(derived.state(), NodeState::Evaluated);
        assert_eq!(
            *EVENTS.lock().unwrap(),
            ["init resource", "enter", "body", "init derived", "exit"]
        );
    }
}
