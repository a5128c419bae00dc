//! Canonical signature construction.
//!
//! A [`ParameterSpec`] is declared once per class, statically, through the
//! builder. Binding a raw [`Args`] call against it resolves every default and
//! produces [`CanonicalArguments`], the normalized form used for content
//! addressing. Two calls that canonicalize identically, regardless of
//! positional vs keyword style or omitted defaults, address the same node.

use std::collections::{BTreeMap, HashSet};

use crate::error::SignatureError;
use crate::node::NodeHandle;
use crate::value::Value;

#[derive(Debug, Clone)]
struct Param {
    name: Box<str>,
    default: Option<Value>,
}

/// The formal parameters of a node class: ordered positional names with
/// optional defaults, an optional variadic positional tail, keyword-only
/// names with optional defaults, and an optional variadic keyword slot.
/// Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct ParameterSpec {
    positional: Vec<Param>,
    variadic: bool,
    keyword: Vec<Param>,
    keyword_variadic: bool,
}

#[derive(Debug, Default)]
pub struct ParameterSpecBuilder {
    spec: ParameterSpec,
}

impl ParameterSpecBuilder {
    /// Positional parameter without a default.
    pub fn required(mut self, name: impl Into<Box<str>>) -> Self {
        self.spec.positional.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Positional parameter with a default.
    pub fn optional(mut self, name: impl Into<Box<str>>, default: impl Into<Value>) -> Self {
        self.spec.positional.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Allow excess positional values to form an ordered variadic tail.
    pub fn variadic(mut self) -> Self {
        self.spec.variadic = true;
        self
    }

    /// Keyword-only parameter without a default.
    pub fn keyword_required(mut self, name: impl Into<Box<str>>) -> Self {
        self.spec.keyword.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Keyword-only parameter with a default.
    pub fn keyword(mut self, name: impl Into<Box<str>>, default: impl Into<Value>) -> Self {
        self.spec.keyword.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Accept keyword names not declared in the spec.
    pub fn keyword_variadic(mut self) -> Self {
        self.spec.keyword_variadic = true;
        self
    }

    pub fn build(self) -> ParameterSpec {
        self.spec
    }
}

impl ParameterSpec {
    pub fn builder() -> ParameterSpecBuilder {
        ParameterSpecBuilder::default()
    }

    /// Normalizes a raw call into [`CanonicalArguments`].
    ///
    /// Positional slots fill from positional values, then from matching
    /// keyword values, then from declared defaults, in that priority.
    pub fn bind(&self, args: Args) -> Result<CanonicalArguments, SignatureError> {
        let mut slots: Vec<Option<Value>> = vec![None; self.positional.len()];
        let mut tail = Vec::new();
        let mut keyword = BTreeMap::new();

        let mut positional = args.positional.into_iter();
        for slot in slots.iter_mut() {
            match positional.next() {
                Some(value) => *slot = Some(value),
                None => break,
            }
        }

        let excess: Vec<Value> = positional.collect();
        if !excess.is_empty() {
            if !self.variadic {
                return Err(SignatureError::TooManyArguments {
                    expected: self.positional.len(),
                    got: self.positional.len() + excess.len(),
                });
            }
            tail = excess;
        }

        let mut used: HashSet<Box<str>> = HashSet::new();
        for (name, value) in args.named {
            if !used.insert(name.clone()) {
                return Err(SignatureError::DuplicateArgument(name));
            }

            if let Some(index) = self.positional.iter().position(|p| p.name == name) {
                if slots[index].is_some() {
                    return Err(SignatureError::DuplicateArgument(name));
                }
                slots[index] = Some(value);
            } else if self.keyword.iter().any(|p| p.name == name) || self.keyword_variadic {
                keyword.insert(name, value);
            } else {
                return Err(SignatureError::UnknownArgument(name));
            }
        }

        let mut resolved = Vec::with_capacity(self.positional.len());
        for (param, slot) in self.positional.iter().zip(slots) {
            let value = match slot.or_else(|| param.default.clone()) {
                Some(value) => value,
                None => return Err(SignatureError::MissingArgument(param.name.clone())),
            };
            resolved.push((param.name.clone(), value));
        }

        for param in &self.keyword {
            if keyword.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    keyword.insert(param.name.clone(), default.clone());
                }
                None => return Err(SignatureError::MissingArgument(param.name.clone())),
            }
        }

        Ok(CanonicalArguments {
            slots: resolved,
            tail,
            keyword,
        })
    }
}

/// A raw constructor call: positional values plus named values, in the order
/// the caller supplied them.
#[derive(Debug, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(Box<str>, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pos(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kw(mut self, name: impl Into<Box<str>>, value: impl Into<Value>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }
}

/// The fully resolved form of a constructor call. No implicit defaults
/// remain: named positional slots in declaration order, the variadic tail,
/// and keyword-only values sorted by name.
#[derive(Debug, Clone)]
pub struct CanonicalArguments {
    slots: Vec<(Box<str>, Value)>,
    tail: Vec<Value>,
    keyword: BTreeMap<Box<str>, Value>,
}

impl CanonicalArguments {
    /// Looks up a value by parameter name, named positional slots first,
    /// keyword-only names second. The variadic tail has no names.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots
            .iter()
            .find(|(slot, _)| slot.as_ref() == name)
            .map(|(_, value)| value)
            .or_else(|| self.keyword.get(name))
    }

    /// All positional values in canonical order, named slots then tail.
    pub fn positional(&self) -> impl Iterator<Item = &Value> {
        self.slots.iter().map(|(_, value)| value).chain(&self.tail)
    }

    /// The variadic tail, empty unless the spec declared one.
    pub fn tail(&self) -> &[Value] {
        &self.tail
    }

    /// Keyword-only values, sorted by name.
    pub fn keywords(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keyword.iter().map(|(name, value)| (name.as_ref(), value))
    }

    /// The canonical call signature, the exact string that gets hashed into
    /// the node identifier.
    pub(crate) fn render_call(&self, name: &str) -> String {
        let mut parts: Vec<String> = self.positional().map(Value::render).collect();
        parts.extend(
            self.keywords()
                .map(|(name, value)| format!("{}={}", name, value.render())),
        );
        format!("{}({})", name, parts.join(", "))
    }

    /// Every node handle referenced anywhere in the arguments, first-seen
    /// order, deduplicated.
    pub(crate) fn nodes(&self) -> Vec<NodeHandle> {
        let mut acc = Vec::new();
        let mut seen = HashSet::new();
        for value in self.positional() {
            value.collect_nodes(&mut acc, &mut seen);
        }
        for (_, value) in self.keywords() {
            value.collect_nodes(&mut acc, &mut seen);
        }
        acc
    }
}
