//! Value nodes: the polymorphic unit of Tyco's deferred evaluation graph.
//!
//! Every parsed value -- a global, a struct field, an array element, a
//! reference argument -- becomes a [`Node`] living in a [`Context`](crate::context::Context)'s
//! arena. Nodes point at each other (parent, array elements, instance
//! fields, reference arguments) through [`NodeKey`]s rather than ownership,
//! the same non-owning-handle approach `grill::schema` uses for
//! `SchemaRef` so that cyclic containment graphs don't require `Rc`/`Weak`
//! bookkeeping at every call site.

use indexmap::IndexMap;
use slotmap::new_key_type;

use crate::fragment::Fragment;

new_key_type! {
    /// A handle to a [`Node`] within a [`Context`](crate::context::Context)'s arena.
    pub struct NodeKey;
}

/// The four concrete forms a [`Node`] can take.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A scalar: string, int, float, bool, date, time, or datetime.
    Primitive(Primitive),
    /// An ordered sequence of child nodes, all sharing this array's
    /// `type_name`/`attr_name` once schema is applied.
    Array(Array),
    /// An ordered mapping of `attr_name -> field node`, per a struct's
    /// declared attribute order.
    Instance(Instance),
    /// A `Type(args)` invocation awaiting resolution to a declared
    /// instance of `Type`.
    Reference(Reference),
}

/// A raw scalar, plus the escape/template policy carried by its delimiter.
#[derive(Debug, Clone)]
pub struct Primitive {
    /// The exact text between delimiters (or the bare raw token), before
    /// any base-rendering has occurred.
    pub raw: String,
    /// `true` when the source delimiter was `'` or `'''`: no template
    /// expansion, no escape substitution.
    pub is_literal_str: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Array {
    pub elements: Vec<NodeKey>,
}

#[derive(Debug, Clone, Default)]
pub struct Instance {
    /// `attr_name -> field node`, in the declaring struct's attribute
    /// order.
    pub fields: IndexMap<String, NodeKey>,
}

#[derive(Debug, Clone)]
pub struct Reference {
    /// The positional/keyed argument list; each argument is itself a node
    /// (almost always a `Primitive`) whose own `attr_name` records whether
    /// it was given as a keyword argument.
    pub args: Vec<NodeKey>,
}

/// The outcome of rendering a [`Node`]. `None` (absence of this type,
/// modeled as `Option<Rendered>` on [`Node`]) is the UNRENDERED sentinel;
/// `Rendered::Null` is a distinct, already-rendered state.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Kept as the source string; this core does no date arithmetic.
    Date(String),
    Time(String),
    DateTime(String),
    /// Set on a [`Reference`] once [`crate::render::render_references`] has
    /// resolved it to the instance it names.
    Instance(NodeKey),
}

impl Rendered {
    /// The two templatable kinds per spec section 4.4: only `str` and
    /// `int` may be substituted into a template.
    #[must_use]
    pub fn as_template_string(&self) -> Option<String> {
        match self {
            Rendered::Str(s) => Some(s.clone()),
            Rendered::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

/// A node in the deferred evaluation graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// A base type name (`str`, `int`, ...) or a user struct name.
    pub type_name: String,
    pub attr_name: Option<String>,
    pub is_nullable: bool,
    pub is_array: bool,
    /// Non-owning back-reference to the containing node, set during
    /// `set_parents`. `None` for top-level globals.
    pub parent: Option<NodeKey>,
    pub fragment: Fragment,
    pub rendered: Option<Rendered>,
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind, type_name: impl Into<String>, fragment: Fragment) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            attr_name: None,
            is_nullable: false,
            is_array: false,
            parent: None,
            fragment,
            rendered: None,
        }
    }

    #[must_use]
    pub fn was_rendered(&self) -> bool {
        self.rendered.is_some()
    }

    #[must_use]
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match &self.kind {
            NodeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match &self.kind {
            NodeKind::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_instance(&self) -> Option<&Instance> {
        match &self.kind {
            NodeKind::Instance(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reference(&self) -> Option<&Reference> {
        match &self.kind {
            NodeKind::Reference(r) => Some(r),
            _ => None,
        }
    }
}
