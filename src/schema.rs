//! Per-type schema: the Struct Registry.
//!
//! Mirrors the role `grill::dialect::Dialect` plays for JSON Schema
//! keywords -- an ordered, named registry that the lexer populates
//! incrementally and the render pipeline later indexes and queries.

use std::collections::HashMap;

use indexmap::IndexMap;
use slotmap::SlotMap;

use crate::error::{Error, ErrorKind};
use crate::fragment::Fragment;
use crate::value::{Instance, Node, NodeKey, NodeKind, Rendered};

/// One declared attribute of a struct: its type plus the nullable/array
/// modifiers, and whether it is (part of) the primary key.
#[derive(Debug, Clone)]
pub struct AttrSchema {
    pub type_name: String,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    pub is_array: bool,
}

/// One positional or keyword argument, as collected by the lexer before
/// being handed to [`StructSchema::create_instance`] or
/// [`StructSchema::load_reference`].
#[derive(Debug, Clone)]
pub struct Arg {
    pub attr_name: Option<String>,
    pub node: NodeKey,
}

/// The schema and declared instances of one struct type.
#[derive(Debug, Clone, Default)]
pub struct StructSchema {
    pub name: String,
    /// Ordered `attr_name -> AttrSchema`, in declaration order.
    pub attrs: IndexMap<String, AttrSchema>,
    /// Ordered list of primary-key attribute names.
    pub primary_keys: Vec<String>,
    /// Per-attribute default value node, updatable by later "local
    /// default" lines.
    pub defaults: HashMap<String, NodeKey>,
    /// Declared instances, in declaration order.
    pub instances: Vec<NodeKey>,
    /// `\0`-joined primary-key tuple -> instance, built by
    /// `load_primary_keys`. Empty (and never populated) for structs with
    /// no primary keys; those only ever appear as inline instances.
    pub mapped_instances: HashMap<String, NodeKey>,
    /// Set once the first instance row has been parsed; attributes may
    /// not be added after this point.
    initialized: bool,
}

impl StructSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn has_primary_keys(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    /// Declares an attribute, in order. Fails with `DuplicateAttr` if the
    /// name is already taken, `PrimaryKeyOnArray` if `*` and `[]` are
    /// combined, or `SchemaAfterInit` if instances have already been read.
    pub fn add_attr(
        &mut self,
        name: &str,
        type_name: &str,
        is_primary_key: bool,
        is_nullable: bool,
        is_array: bool,
        fragment: &Fragment,
    ) -> Result<(), Error> {
        if self.initialized {
            return Err(Error::at(ErrorKind::SchemaAfterInit(self.name.clone()), fragment));
        }
        if self.attrs.contains_key(name) {
            return Err(Error::at(
                ErrorKind::DuplicateAttr(name.to_string(), self.name.clone()),
                fragment,
            ));
        }
        if is_primary_key && is_array {
            return Err(Error::at(
                ErrorKind::PrimaryKeyOnArray(name.to_string()),
                fragment,
            ));
        }
        if is_primary_key {
            self.primary_keys.push(name.to_string());
        }
        self.attrs.insert(
            name.to_string(),
            AttrSchema {
                type_name: type_name.to_string(),
                is_primary_key,
                is_nullable,
                is_array,
            },
        );
        Ok(())
    }

    /// Updates (or, when `value` is `None`, clears) the default for an
    /// already-declared attribute. Fails with `UnknownAttr` otherwise.
    pub fn set_default(
        &mut self,
        name: &str,
        value: Option<NodeKey>,
        fragment: &Fragment,
    ) -> Result<(), Error> {
        if !self.attrs.contains_key(name) {
            return Err(Error::at(ErrorKind::UnknownAttr(name.to_string()), fragment));
        }
        match value {
            Some(node) => {
                self.defaults.insert(name.to_string(), node);
            }
            None => {
                self.defaults.remove(name);
            }
        }
        Ok(())
    }

    /// Builds one instance from a collected argument list, applying schema
    /// info (type, nullable, array) to each chosen field node.
    ///
    /// `deep_copy` must produce a fresh, independently owned subtree rooted
    /// at the given node -- defaults are shared across every instance that
    /// falls back to them, so each use needs its own copy.
    pub fn create_instance(
        &mut self,
        args: Vec<Arg>,
        arena: &mut SlotMap<NodeKey, Node>,
        fragment: &Fragment,
        deep_copy: impl Fn(NodeKey, &mut SlotMap<NodeKey, Node>) -> NodeKey,
    ) -> Result<NodeKey, Error> {
        self.initialized = true;
        let attr_order: Vec<String> = self.attrs.keys().cloned().collect();

        let mut by_attr: HashMap<String, NodeKey> = HashMap::new();
        let mut keyword_mode = false;
        let mut positional_idx = 0usize;
        for arg in args {
            match &arg.attr_name {
                Some(name) => {
                    keyword_mode = true;
                    by_attr.insert(name.clone(), arg.node);
                }
                None => {
                    if keyword_mode {
                        return Err(Error::at(ErrorKind::PositionalAfterKeyword, fragment));
                    }
                    let name = attr_order.get(positional_idx).ok_or_else(|| {
                        Error::at(ErrorKind::MissingAttr(format!("#{positional_idx}")), fragment)
                    })?;
                    by_attr.insert(name.clone(), arg.node);
                    positional_idx += 1;
                }
            }
        }

        let mut fields = IndexMap::new();
        for name in &attr_order {
            let attr = &self.attrs[name];
            let node_key = match by_attr.get(name) {
                Some(key) => *key,
                None => match self.defaults.get(name) {
                    Some(default_key) => deep_copy(*default_key, arena),
                    None => return Err(Error::at(ErrorKind::MissingAttr(name.clone()), fragment)),
                },
            };
            apply_attr_schema(arena, node_key, attr, name, fragment)?;
            fields.insert(name.clone(), node_key);
        }

        let instance_key = arena.insert(Node::new(
            NodeKind::Instance(Instance { fields }),
            self.name.clone(),
            fragment.clone(),
        ));
        self.instances.push(instance_key);
        Ok(instance_key)
    }

    /// Resolves a `Type(args)` invocation to the primary-key tuple its
    /// arguments name. Each argument is base-rendered immediately (they
    /// have no further template dependencies -- primary keys must be
    /// comparable as soon as they're declared) and joined with `\0`.
    pub fn primary_key_tuple(
        &self,
        args: &[Arg],
        arena: &mut SlotMap<NodeKey, Node>,
        fragment: &Fragment,
    ) -> Result<String, Error> {
        let mut by_key: HashMap<String, NodeKey> = HashMap::new();
        let mut keyword_mode = false;
        let mut positional_idx = 0usize;
        for arg in args {
            match &arg.attr_name {
                Some(name) => {
                    keyword_mode = true;
                    by_key.insert(name.clone(), arg.node);
                }
                None => {
                    if keyword_mode {
                        return Err(Error::at(ErrorKind::PositionalAfterKeyword, fragment));
                    }
                    let name = self.primary_keys.get(positional_idx).ok_or_else(|| {
                        Error::at(ErrorKind::MissingAttr(format!("#{positional_idx}")), fragment)
                    })?;
                    by_key.insert(name.clone(), arg.node);
                    positional_idx += 1;
                }
            }
        }

        let mut parts = Vec::with_capacity(self.primary_keys.len());
        for name in &self.primary_keys {
            let attr = &self.attrs[name];
            let node_key = *by_key
                .get(name)
                .ok_or_else(|| Error::at(ErrorKind::MissingAttr(name.clone()), fragment))?;
            apply_attr_schema(arena, node_key, attr, name, fragment)?;
            crate::render::render_base_node(arena, node_key)?;
            let rendered = arena[node_key].rendered.clone().unwrap_or(Rendered::Null);
            parts.push(render_to_key_part(&rendered));
        }
        Ok(parts.join("\0"))
    }
}

pub(crate) fn render_to_key_part(rendered: &Rendered) -> String {
    match rendered {
        Rendered::Null => "null".to_string(),
        Rendered::Str(s) => s.clone(),
        Rendered::Int(i) => i.to_string(),
        Rendered::Float(f) => f.to_string(),
        Rendered::Bool(b) => b.to_string(),
        Rendered::Date(s) | Rendered::Time(s) | Rendered::DateTime(s) => s.clone(),
        Rendered::Instance(_) => String::new(),
    }
}

/// Applies type/nullable/array schema info to a chosen field or argument
/// node. An array-typed attribute paired with a non-`Array` node is
/// accepted only when that node is a `Primitive` whose content is the
/// literal `null`.
pub(crate) fn apply_attr_schema(
    arena: &mut SlotMap<NodeKey, Node>,
    node_key: NodeKey,
    attr: &AttrSchema,
    attr_name: &str,
    fragment: &Fragment,
) -> Result<(), Error> {
    let is_null_literal = {
        let node = &arena[node_key];
        matches!(&node.kind, NodeKind::Primitive(p) if p.raw.trim() == "null")
    };
    if attr.is_array {
        let is_array_node = matches!(&arena[node_key].kind, NodeKind::Array(_));
        if !is_array_node && !is_null_literal {
            return Err(Error::at(
                ErrorKind::ExpectedArray(attr_name.to_string()),
                fragment,
            ));
        }
    }
    let node = &mut arena[node_key];
    node.type_name = attr.type_name.clone();
    node.attr_name = Some(attr_name.to_string());
    node.is_nullable = attr.is_nullable;
    node.is_array = attr.is_array && !is_null_literal;

    if let NodeKind::Array(array) = &arena[node_key].kind.clone() {
        for &child in &array.elements {
            let child_node = &mut arena[child];
            child_node.type_name = attr.type_name.clone();
            child_node.attr_name = Some(attr_name.to_string());
            child_node.is_nullable = false;
            child_node.is_array = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Origin;
    use std::rc::Rc;

    fn fragment() -> Fragment {
        Fragment::new("", 1, 1, Rc::new(Origin { name: None }))
    }

    #[test]
    fn primary_key_on_array_is_rejected() {
        let mut schema = StructSchema::new("Database");
        let err = schema
            .add_attr("names", "str", true, false, true, &fragment())
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::PrimaryKeyOnArray(_)));
    }

    #[test]
    fn duplicate_attr_is_rejected() {
        let mut schema = StructSchema::new("Database");
        schema
            .add_attr("name", "str", false, false, false, &fragment())
            .unwrap();
        let err = schema
            .add_attr("name", "int", false, false, false, &fragment())
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateAttr(_, _)));
    }

    #[test]
    fn schema_after_init_is_rejected() {
        let mut schema = StructSchema::new("Database");
        schema
            .add_attr("name", "str", false, false, false, &fragment())
            .unwrap();
        let mut arena: SlotMap<NodeKey, Node> = SlotMap::with_key();
        let node = arena.insert(Node::new(
            NodeKind::Primitive(crate::value::Primitive {
                raw: "primary".to_string(),
                is_literal_str: false,
            }),
            "str",
            fragment(),
        ));
        schema
            .create_instance(
                vec![Arg {
                    attr_name: None,
                    node,
                }],
                &mut arena,
                &fragment(),
                |key, _| key,
            )
            .unwrap();
        let err = schema
            .add_attr("host", "str", false, false, false, &fragment())
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::SchemaAfterInit(_)));
    }
}
