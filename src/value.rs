//! The argument value model.
//!
//! Arguments of a node are either plain data (none, booleans, integers,
//! floats, text, byte blobs), containers thereof (lists, sets, maps, possibly
//! nested), or handles to other nodes. Plain data is owned by the [`Value`],
//! so capturing an argument is a deep copy and later mutation of caller-owned
//! containers cannot affect a stored node's arguments or its identity. Node
//! handles are stored by reference, a node has one canonical identity and is
//! never copied.

use std::collections::HashSet;

use crate::hash::NodeId;
use crate::node::NodeHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Ordered sequence, order is significant for identity.
    List(Vec<Value>),
    /// Unordered collection, rendered sorted and deduplicated, so two sets
    /// differ only by content, not insertion order.
    Set(Vec<Value>),
    /// Mapping, rendered sorted by the rendered key text.
    Map(Vec<(Value, Value)>),
    Node(NodeHandle),
}

impl Value {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    pub fn list(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn set(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn map(
        entries: impl IntoIterator<Item = (impl Into<Value>, impl Into<Value>)>,
    ) -> Self {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeHandle> {
        match self {
            Value::Node(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical text rendering, the raw material for content addressing.
    ///
    /// A nested node renders as an opaque `<Name id>` token, never its own
    /// fully expanded argument list, so the size of a signature is
    /// independent of graph depth.
    pub(crate) fn render(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{v:?}"),
            Value::Text(v) => format!("{v:?}"),
            Value::Bytes(v) => format!("b\"{}\"", v.escape_ascii()),
            Value::List(items) => {
                let items: Vec<_> = items.iter().map(Value::render).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Set(items) => {
                let mut items: Vec<_> = items.iter().map(Value::render).collect();
                items.sort();
                items.dedup();
                format!("{{{}}}", items.join(", "))
            }
            Value::Map(entries) => {
                let mut entries: Vec<_> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.render(), v.render()))
                    .collect();
                entries.sort();
                format!("{{{}}}", entries.join(", "))
            }
            Value::Node(node) => node.cell.token(),
        }
    }

    /// Collects every node handle reachable through this value, in first-seen
    /// order, deduplicated by identifier. Map keys and values both count.
    pub(crate) fn collect_nodes(&self, acc: &mut Vec<NodeHandle>, seen: &mut HashSet<NodeId>) {
        match self {
            Value::Node(node) => {
                if seen.insert(node.id()) {
                    acc.push(node.clone());
                }
            }
            Value::List(items) | Value::Set(items) => {
                for item in items {
                    item.collect_nodes(acc, seen);
                }
            }
            Value::Map(entries) => {
                for (key, value) in entries {
                    key.collect_nodes(acc, seen);
                    value.collect_nodes(acc, seen);
                }
            }
            _ => {}
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NodeHandle> for Value {
    fn from(v: NodeHandle) -> Self {
        Value::Node(v)
    }
}

impl From<&NodeHandle> for Value {
    fn from(v: &NodeHandle) -> Self {
        Value::Node(v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_literals() {
        assert_eq!(Value::None.render(), "None");
        assert_eq!(Value::from(true).render(), "true");
        assert_eq!(Value::from(42).render(), "42");
        assert_eq!(Value::from(1.5).render(), "1.5");
        assert_eq!(Value::from("a").render(), "\"a\"");
        assert_eq!(Value::bytes(*b"ab").render(), "b\"ab\"");
    }

    #[test]
    fn int_and_float_render_apart() {
        assert_ne!(Value::from(1).render(), Value::from(1.0).render());
    }

    #[test]
    fn lists_preserve_order() {
        let a = Value::list([1, 2, 3]);
        let b = Value::list([3, 2, 1]);
        assert_eq!(a.render(), "[1, 2, 3]");
        assert_ne!(a.render(), b.render());
    }

    #[test]
    fn sets_ignore_insertion_order() {
        let a = Value::set([1, 2, 3]);
        let b = Value::set([3, 1, 2, 2]);
        assert_eq!(a.render(), b.render());
        assert_eq!(a.render(), "{1, 2, 3}");
    }

    #[test]
    fn maps_sort_by_rendered_key() {
        let a = Value::map([("b", 2), ("a", 1)]);
        let b = Value::map([("a", 1), ("b", 2)]);
        assert_eq!(a.render(), b.render());
        assert_eq!(a.render(), "{\"a\": 1, \"b\": 2}");
    }

    #[test]
    fn nested_containers() {
        let v = Value::List(vec![
            Value::map([("k", Value::list([1, 2]))]),
            Value::None,
        ]);
        assert_eq!(v.render(), "[{\"k\": [1, 2]}, None]");
    }
}
