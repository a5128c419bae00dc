use std::sync::Arc;

use thiserror::Error;

use crate::hash::NodeId;

/// Failures while normalizing a raw call against a [`ParameterSpec`].
///
/// These are all local, user-facing errors surfaced at node creation time.
/// A failed call leaves no partial registry entry behind.
///
/// [`ParameterSpec`]: crate::ParameterSpec
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing required argument '{0}'")]
    MissingArgument(Box<str>),

    #[error("argument '{0}' supplied more than once")]
    DuplicateArgument(Box<str>),

    #[error("unknown keyword argument '{0}'")]
    UnknownArgument(Box<str>),

    #[error("too many positional arguments: expected at most {expected}, got {got}")]
    TooManyArguments { expected: usize, got: usize },
}

/// Failures while registering a node.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The identifier is already taken by a node with a different payload
    /// type. Two classes sharing a name and canonical arguments cannot
    /// coexist in one registry.
    #[error("node <{name} {id}> is already registered with a different payload type")]
    ClassMismatch { name: &'static str, id: NodeId },
}

/// Failures while evaluating a node or inspecting its captured arguments.
///
/// `ConstructionFailed` is sticky: the original error is recorded once as an
/// `Arc` and re-surfaced verbatim, wrapped with the node identity, on every
/// subsequent evaluation attempt. The factory is never re-run.
#[derive(Debug, Error, Clone)]
pub enum EvalError {
    #[error("node <{name} {id}> failed to initialize: {source}")]
    ConstructionFailed {
        name: &'static str,
        id: NodeId,
        #[source]
        source: Arc<anyhow::Error>,
    },

    /// Raw arguments and input edges are discarded once evaluation finishes.
    #[error("arguments of node <{name} {id}> were discarded after evaluation")]
    InputsUnavailable { name: &'static str, id: NodeId },

    /// A factory reached back into the value of the node it is currently
    /// constructing. Metadata access stays available, the payload does not
    /// exist yet.
    #[error("node <{name} {id}> was accessed during its own initialization")]
    Reentrant { name: &'static str, id: NodeId },
}
