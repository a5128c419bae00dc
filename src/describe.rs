//! Depth-limited structural description.
//!
//! Rendering is stable: sequences keep their order, sets and maps are sorted
//! by rendered text regardless of insertion order. A node at depth 0 renders
//! as its opaque `<Name id>` token; at depth above 0 it expands to
//! `Name(arg, ..., kw=val, ...)` with every argument described one level
//! shallower and keyword arguments sorted by name. The argument graph is
//! acyclic by construction, so unbounded depth always terminates.

use crate::error::EvalError;
use crate::params::CanonicalArguments;
use crate::value::Value;

/// Renders any argument value, plain data or node, to text.
///
/// Depth applies to nodes only; containers are transparent. Fails with
/// [`EvalError::InputsUnavailable`] when expansion needs arguments that were
/// discarded after evaluation.
pub fn describe(value: &Value, depth: usize) -> Result<String, EvalError> {
    Ok(match value {
        Value::Node(node) => node.cell.describe(depth)?,
        Value::List(items) => {
            let items: Vec<_> = items
                .iter()
                .map(|item| describe(item, depth))
                .collect::<Result<_, _>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Set(items) => {
            let mut items: Vec<_> = items
                .iter()
                .map(|item| describe(item, depth))
                .collect::<Result<_, _>>()?;
            items.sort();
            items.dedup();
            format!("{{{}}}", items.join(", "))
        }
        Value::Map(entries) => {
            let mut entries: Vec<_> = entries
                .iter()
                .map(|(k, v)| Ok(format!("{}: {}", describe(k, depth)?, describe(v, depth)?)))
                .collect::<Result<_, EvalError>>()?;
            entries.sort();
            format!("{{{}}}", entries.join(", "))
        }
        plain => plain.render(),
    })
}

/// `Name(arg, ..., kw=val, ...)` with every argument described at `depth`.
pub(crate) fn describe_call(
    name: &str,
    args: &CanonicalArguments,
    depth: usize,
) -> Result<String, EvalError> {
    let mut parts: Vec<String> = args
        .positional()
        .map(|value| describe(value, depth))
        .collect::<Result<_, _>>()?;

    for (name, value) in args.keywords() {
        parts.push(format!("{}={}", name, describe(value, depth)?));
    }

    Ok(format!("{}({})", name, parts.join(", ")))
}
