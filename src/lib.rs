#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod class;
mod describe;
mod engine;
mod error;
mod graph;
mod hash;
mod node;
mod params;
mod registry;
mod store;
mod value;

pub use crate::class::Class;
pub use crate::describe::describe;
pub use crate::engine::evaluate_many;
pub use crate::error::{CreateError, EvalError, SignatureError};
pub use crate::graph::GraphNode;
pub use crate::hash::NodeId;
pub use crate::node::{NodeHandle, NodeRef, NodeState};
pub use crate::params::{Args, CanonicalArguments, ParameterSpec, ParameterSpecBuilder};
pub use crate::registry::{Context, Registry, RegistryOptions};
pub use crate::store::{DirStore, Store};
pub use crate::value::Value;
