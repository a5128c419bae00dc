//! The capability contract of a wrapped class.
//!
//! A type opts into memoization by implementing [`Class`]: the required
//! `init` runs at most once per node, the remaining capabilities (`load` and
//! `save` for persistence, `enter` and `exit` for scoped resources,
//! `teardown` for eviction) have no-op defaults and are picked up only by
//! classes that implement them.
//!
//! Internally the registry is type-erased. Payloads are stored as
//! `Arc<dyn Any + Send + Sync>` and [`ErasedClass`] is the object-safe bridge
//! between a concrete `Class` and the untyped node machinery. Typed access
//! comes back through the phantom-typed [`NodeRef`] handle, whose downcast
//! cannot fail because payload types are checked at creation time.
//!
//! [`NodeRef`]: crate::NodeRef

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::hash::NodeId;
use crate::params::{CanonicalArguments, ParameterSpec};
use crate::registry::Context;
use crate::store::Store;

pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

pub trait Class: Sized + Send + Sync + 'static {
    /// The computed payload, present once a node is evaluated.
    type Payload: Send + Sync + 'static;

    /// Class name, the first component of every canonical signature.
    const NAME: &'static str;

    /// Opt into the persistence capability. When `true` and the registry
    /// carries a store, evaluation consults the store before running `init`
    /// and saves the payload after a successful run.
    const SAVE: bool = false;

    /// Formal parameters, declared statically. No runtime introspection.
    fn spec() -> ParameterSpec;

    /// User initialization logic, run at most once per node. The context
    /// reaches back into the owning registry, so a factory can construct and
    /// evaluate dependency nodes of its own.
    fn init(ctx: &Context, args: &CanonicalArguments) -> anyhow::Result<Self::Payload>;

    /// Rebuild the payload from a store that already holds this identifier.
    fn load(_store: &dyn Store, _id: NodeId) -> anyhow::Result<Self::Payload> {
        anyhow::bail!("{} does not implement the load capability", Self::NAME)
    }

    /// Persist a freshly computed payload.
    fn save(_store: &dyn Store, _id: NodeId, _payload: &Self::Payload) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a scope over this node opens, after evaluation.
    fn enter(_payload: &Self::Payload) {}

    /// Called when a scope over this node closes, after the transitive
    /// output subgraph has been flushed.
    fn exit(_payload: &Self::Payload) {}

    /// Called when the node is evicted or the registry is dropped.
    fn teardown(_payload: &Self::Payload) {}
}

pub(crate) trait ErasedClass: Send + Sync {
    fn name(&self) -> &'static str;
    fn payload_type(&self) -> TypeId;

    /// Runs the full construction flow: store short-circuit, `init`, save.
    fn construct(
        &self,
        ctx: &Context,
        store: Option<&dyn Store>,
        id: NodeId,
        call: &str,
        args: &CanonicalArguments,
    ) -> anyhow::Result<Dynamic>;

    fn enter(&self, payload: &Dynamic);
    fn exit(&self, payload: &Dynamic);
    fn teardown(&self, payload: &Dynamic);
}

pub(crate) struct Shim<C>(PhantomData<fn() -> C>);

impl<C> Shim<C> {
    pub(crate) fn new() -> Self {
        Shim(PhantomData)
    }
}

impl<C: Class> Shim<C> {
    fn downcast(payload: &Dynamic) -> &C::Payload {
        payload
            .downcast_ref::<C::Payload>()
            .expect("payload type mismatch in erased class")
    }
}

impl<C: Class> ErasedClass for Shim<C> {
    fn name(&self) -> &'static str {
        C::NAME
    }

    fn payload_type(&self) -> TypeId {
        TypeId::of::<C::Payload>()
    }

    fn construct(
        &self,
        ctx: &Context,
        store: Option<&dyn Store>,
        id: NodeId,
        call: &str,
        args: &CanonicalArguments,
    ) -> anyhow::Result<Dynamic> {
        if C::SAVE {
            if let Some(store) = store {
                if store.contains(id) {
                    tracing::debug!(node = %id, "loading payload from store");
                    return Ok(Arc::new(C::load(store, id)?));
                }

                let payload = C::init(ctx, args)?;
                C::save(store, id, &payload)?;
                store.record(id, call)?;
                return Ok(Arc::new(payload));
            }
        }

        Ok(Arc::new(C::init(ctx, args)?))
    }

    fn enter(&self, payload: &Dynamic) {
        C::enter(Self::downcast(payload));
    }

    fn exit(&self, payload: &Dynamic) {
        C::exit(Self::downcast(payload));
    }

    fn teardown(&self, payload: &Dynamic) {
        C::teardown(Self::downcast(payload));
    }
}
