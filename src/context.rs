//! [`Context`]: the owner of every registry a parse accumulates into, and
//! the driver of the render pipeline and `#include` resolution.
//!
//! Unlike `grill::Interrogator`'s `Arc<RwLock<_>>`-guarded state (built for
//! concurrent, incremental schema compilation), a `Context` is parsed and
//! rendered synchronously to completion by a single call to
//! [`crate::parse`]/[`crate::parse_file`], so it owns its registries
//! directly.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use slotmap::SlotMap;

use crate::error::{Error, ErrorKind};
use crate::fragment::Origin;
use crate::schema::StructSchema;
use crate::value::{Array, Instance, Node, NodeKey, NodeKind, Primitive, Reference, Rendered};

/// All state accumulated while lexing one (possibly `#include`-spanning)
/// Tyco document, and later rendered in place.
#[derive(Debug, Default)]
pub struct Context {
    /// Declared top-level globals, in declaration order.
    pub(crate) globals: IndexMap<String, NodeKey>,
    /// Declared struct types, in declaration order.
    pub(crate) structs: IndexMap<String, StructSchema>,
    /// Canonicalized paths of every file visited through `#include`, so a
    /// cycle re-includes nothing instead of recursing forever.
    pub(crate) included_paths: HashSet<PathBuf>,
    /// The node arena backing every value produced anywhere in the
    /// document.
    pub(crate) arena: SlotMap<NodeKey, Node>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares (or reuses) a struct registry entry by name, in the order
    /// first seen.
    pub(crate) fn struct_mut(&mut self, name: &str) -> &mut StructSchema {
        self.structs
            .entry(name.to_string())
            .or_insert_with(|| StructSchema::new(name))
    }

    /// Inserts a new global, rejecting a name already taken.
    pub(crate) fn add_global(
        &mut self,
        name: &str,
        node: NodeKey,
        fragment: &crate::fragment::Fragment,
    ) -> Result<(), Error> {
        if self.globals.contains_key(name) {
            return Err(Error::at(ErrorKind::DuplicateGlobal(name.to_string()), fragment));
        }
        self.globals.insert(name.to_string(), node);
        Ok(())
    }

    /// Resolves and canonicalizes an `#include` target relative to the
    /// including file, returning `Ok(None)` when that path has already been
    /// visited (the include is a silent no-op, per spec section 4.6).
    pub(crate) fn begin_include(&mut self, target: &Path) -> Result<Option<PathBuf>, Error> {
        let canonical = fs::canonicalize(target)?;
        if self.included_paths.contains(&canonical) {
            return Ok(None);
        }
        self.included_paths.insert(canonical.clone());
        Ok(Some(canonical))
    }

    /// Runs the full render pipeline: `set_parents -> render_base ->
    /// load_primary_keys -> render_references -> render_templates`.
    #[tracing::instrument(skip(self), level = "trace")]
    pub(crate) fn render(&mut self) -> Result<(), Error> {
        crate::render::set_parents(self);
        crate::render::render_base(self)?;
        crate::render::load_primary_keys(self)?;
        crate::render::render_references(self)?;
        crate::render::render_templates(self)?;
        Ok(())
    }

    /// Flattens the rendered graph into a plain [`serde_json::Value`] tree,
    /// per spec section 4.5: globals become top-level entries; struct types
    /// with at least one primary key become top-level arrays of per-instance
    /// objects, in declaration order; structs with no primary keys never
    /// appear at the top level (only nested, as instance fields).
    pub(crate) fn to_object(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, &key) in &self.globals {
            map.insert(name.clone(), self.node_to_json(key));
        }
        for (name, schema) in &self.structs {
            if !schema.has_primary_keys() {
                continue;
            }
            let rows: Vec<serde_json::Value> = schema
                .instances
                .iter()
                .map(|&key| self.node_to_json(key))
                .collect();
            map.insert(name.clone(), serde_json::Value::Array(rows));
        }
        serde_json::Value::Object(map)
    }

    fn node_to_json(&self, key: NodeKey) -> serde_json::Value {
        let node = &self.arena[key];
        match &node.kind {
            NodeKind::Primitive(_) => match &node.rendered {
                Some(Rendered::Null) | None => serde_json::Value::Null,
                Some(Rendered::Str(s)) => serde_json::Value::String(s.clone()),
                Some(Rendered::Int(i)) => serde_json::Value::from(*i),
                Some(Rendered::Float(f)) => serde_json::Number::from_f64(*f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                Some(Rendered::Bool(b)) => serde_json::Value::Bool(*b),
                Some(Rendered::Date(s) | Rendered::Time(s) | Rendered::DateTime(s)) => {
                    serde_json::Value::String(s.clone())
                }
                Some(Rendered::Instance(target)) => self.node_to_json(*target),
            },
            NodeKind::Array(array) => {
                serde_json::Value::Array(array.elements.iter().map(|&child| self.node_to_json(child)).collect())
            }
            NodeKind::Instance(instance) => {
                let mut obj = serde_json::Map::new();
                for (name, &child) in &instance.fields {
                    obj.insert(name.clone(), self.node_to_json(child));
                }
                serde_json::Value::Object(obj)
            }
            NodeKind::Reference(_) => match &node.rendered {
                Some(Rendered::Instance(target)) => self.node_to_json(*target),
                _ => serde_json::Value::Null,
            },
        }
    }
}

/// Deep-copies the subtree rooted at `key` into fresh arena slots, so a
/// struct default can be reused across many instances without aliasing.
/// Lives outside `Context`/`StructSchema` so it can be passed as a plain
/// function item to [`crate::schema::StructSchema::create_instance`]
/// without holding two simultaneous mutable borrows of the arena's owner.
pub(crate) fn deep_copy_node(key: NodeKey, arena: &mut SlotMap<NodeKey, Node>) -> NodeKey {
    let node = arena[key].clone();
    let kind = match node.kind {
        NodeKind::Primitive(ref primitive) => NodeKind::Primitive(Primitive {
            raw: primitive.raw.clone(),
            is_literal_str: primitive.is_literal_str,
        }),
        NodeKind::Array(ref array) => {
            let elements = array.elements.iter().map(|&child| deep_copy_node(child, arena)).collect();
            NodeKind::Array(Array { elements })
        }
        NodeKind::Instance(ref instance) => {
            let fields = instance
                .fields
                .iter()
                .map(|(name, &child)| (name.clone(), deep_copy_node(child, arena)))
                .collect();
            NodeKind::Instance(Instance { fields })
        }
        NodeKind::Reference(ref reference) => {
            let args = reference.args.iter().map(|&arg| deep_copy_node(arg, arena)).collect();
            NodeKind::Reference(Reference { args })
        }
    };
    let mut copy = Node::new(kind, node.type_name.clone(), node.fragment.clone());
    copy.attr_name = node.attr_name.clone();
    copy.is_nullable = node.is_nullable;
    copy.is_array = node.is_array;
    arena.insert(copy)
}

#[must_use]
pub(crate) fn origin_for(source: Option<String>) -> std::rc::Rc<Origin> {
    std::rc::Rc::new(Origin { name: source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Fragment;

    #[test]
    fn add_global_rejects_duplicates() {
        let mut ctx = Context::new();
        let fragment = Fragment::new("x", 1, 1, origin_for(None));
        let node = ctx.arena.insert(Node::new(
            NodeKind::Primitive(Primitive {
                raw: "1".to_string(),
                is_literal_str: false,
            }),
            "int",
            fragment.clone(),
        ));
        ctx.add_global("x", node, &fragment).unwrap();
        let err = ctx.add_global("x", node, &fragment).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateGlobal(_)));
    }

    #[test]
    fn deep_copy_produces_independent_node() {
        let mut arena: SlotMap<NodeKey, Node> = SlotMap::with_key();
        let fragment = Fragment::new("1", 1, 1, origin_for(None));
        let original = arena.insert(Node::new(
            NodeKind::Primitive(Primitive {
                raw: "1".to_string(),
                is_literal_str: false,
            }),
            "int",
            fragment,
        ));
        let copy = deep_copy_node(original, &mut arena);
        assert_ne!(original, copy);
        arena[copy].as_primitive();
    }
}
