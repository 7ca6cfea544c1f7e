//! The render pipeline: `set_parents -> render_base -> load_primary_keys ->
//! render_references -> render_templates`.
//!
//! Ordering is load-bearing (spec section 5): templates read through
//! references, references are looked up by rendered primary-key values, and
//! primary keys must already be typed before they can be compared. Each
//! phase below is a single top-to-bottom pass over the [`Context`]'s
//! registries; none of them loop to a fixed point, matching the "template
//! determinism" testable property in spec section 8.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::value::{Node, NodeKey, NodeKind, Rendered};

/// Assigns every node's `parent` link: globals point at `None` (they are
/// roots), a struct field's parent is its owning instance, an array
/// element's parent is the array's own parent (elements are transparent
/// for containment purposes -- a template inside an array element walks
/// up through the array to the instance that owns the array).
pub fn set_parents(ctx: &mut Context) {
    let globals: Vec<NodeKey> = ctx.globals.values().copied().collect();
    for key in globals {
        set_parent_recursive(&mut ctx.arena, key, None);
    }
    let struct_names: Vec<String> = ctx.structs.keys().cloned().collect();
    for name in struct_names {
        let instances = ctx.structs[&name].instances.clone();
        for instance_key in instances {
            set_parent_recursive(&mut ctx.arena, instance_key, None);
        }
    }
}

fn set_parent_recursive(arena: &mut SlotMap<NodeKey, Node>, key: NodeKey, parent: Option<NodeKey>) {
    arena[key].parent = parent;
    match arena[key].kind.clone() {
        NodeKind::Array(array) => {
            // Elements share the array's own parent: the array itself is
            // not a containment boundary for template resolution.
            for child in array.elements {
                set_parent_recursive(arena, child, parent);
            }
        }
        NodeKind::Instance(instance) => {
            for child in instance.fields.values().copied() {
                set_parent_recursive(arena, child, Some(key));
            }
        }
        NodeKind::Reference(reference) => {
            for arg in reference.args {
                set_parent_recursive(arena, arg, parent);
            }
        }
        NodeKind::Primitive(_) => {}
    }
}

/// Converts every `Primitive`'s raw content into a typed [`Rendered`]
/// value, recursing through arrays and instances. References are
/// left untouched here; they render in `render_references`.
pub fn render_base(ctx: &mut Context) -> Result<(), Error> {
    let globals: Vec<NodeKey> = ctx.globals.values().copied().collect();
    for key in globals {
        render_base_node(&mut ctx.arena, key)?;
    }
    let struct_names: Vec<String> = ctx.structs.keys().cloned().collect();
    for name in struct_names {
        let instances = ctx.structs[&name].instances.clone();
        for instance_key in instances {
            render_base_node(&mut ctx.arena, instance_key)?;
        }
    }
    Ok(())
}

/// Renders a single node and (for arrays/instances) its descendants. Public
/// to the crate because primary-key resolution needs to force an
/// individual argument to render early (spec section 4.3).
pub(crate) fn render_base_node(arena: &mut SlotMap<NodeKey, Node>, key: NodeKey) -> Result<(), Error> {
    if arena[key].was_rendered() {
        return Ok(());
    }
    let kind = arena[key].kind.clone();
    match kind {
        NodeKind::Primitive(primitive) => {
            let is_nullable = arena[key].is_nullable;
            let type_name = arena[key].type_name.clone();
            let fragment = arena[key].fragment.clone();
            let content = primitive.raw.trim();
            let rendered = if is_nullable && content == "null" {
                Rendered::Null
            } else {
                render_primitive(&type_name, &primitive.raw, &fragment)?
            };
            arena[key].rendered = Some(rendered);
        }
        NodeKind::Array(array) => {
            for child in array.elements {
                render_base_node(arena, child)?;
            }
        }
        NodeKind::Instance(instance) => {
            for child in instance.fields.values().copied() {
                render_base_node(arena, child)?;
            }
        }
        NodeKind::Reference(_) => {}
    }
    Ok(())
}

fn render_primitive(type_name: &str, raw: &str, fragment: &crate::fragment::Fragment) -> Result<Rendered, Error> {
    let content = raw.trim();
    match type_name {
        "str" => Ok(Rendered::Str(raw.to_string())),
        "int" => Ok(Rendered::Int(parse_int(content, fragment)?)),
        "float" | "decimal" => content
            .parse::<f64>()
            .map(Rendered::Float)
            .map_err(|_| Error::at(ErrorKind::InvalidNumber(content.to_string()), fragment)),
        "bool" => match content {
            "true" => Ok(Rendered::Bool(true)),
            "false" => Ok(Rendered::Bool(false)),
            _ => Err(Error::at(ErrorKind::InvalidBool(content.to_string()), fragment)),
        },
        "date" => Ok(Rendered::Date(content.to_string())),
        "time" => Ok(Rendered::Time(normalize_time(content))),
        "datetime" => Ok(Rendered::DateTime(normalize_datetime(content))),
        _ => Ok(Rendered::Str(raw.to_string())),
    }
}

fn parse_int(content: &str, fragment: &crate::fragment::Fragment) -> Result<i64, Error> {
    let (sign, rest) = match content.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, content.strip_prefix('+').unwrap_or(content)),
    };
    let invalid = || Error::at(ErrorKind::InvalidNumber(content.to_string()), fragment);
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).map_err(|_| invalid())?
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).map_err(|_| invalid())?
    } else {
        rest.parse::<i64>().map_err(|_| invalid())?
    };
    Ok(sign * value)
}

/// Normalizes a time string to `HH:MM:SS[.ffffff]`: fractional seconds are
/// right-padded and truncated to exactly six digits.
#[must_use]
pub fn normalize_time(content: &str) -> String {
    match content.split_once('.') {
        Some((head, frac)) => {
            let mut digits: String = frac.chars().filter(char::is_ascii_digit).collect();
            digits.truncate(6);
            while digits.len() < 6 {
                digits.push('0');
            }
            format!("{head}.{digits}")
        }
        None => content.to_string(),
    }
}

/// Normalizes a datetime string: a space between date and time becomes
/// `T`, a trailing `Z` becomes `+00:00`, and fractional seconds are
/// normalized to six digits, leaving any `±HH:MM` offset untouched.
#[must_use]
pub fn normalize_datetime(content: &str) -> String {
    let mut s = content.to_string();
    if let Some(idx) = s.find(' ') {
        s.replace_range(idx..=idx, "T");
    }
    if let Some(stripped) = s.strip_suffix('Z') {
        s = format!("{stripped}+00:00");
    }
    // Split off any trailing `+HH:MM`/`-HH:MM` offset before normalizing
    // the fractional-second digits so the offset's own `:`/digits are
    // untouched.
    let t_idx = s.find('T').unwrap_or(0);
    let (offset_idx, has_offset) = match s[t_idx..].rfind(['+', '-']) {
        Some(rel) => (t_idx + rel, true),
        None => (s.len(), false),
    };
    let (body, offset) = s.split_at(offset_idx);
    let offset = offset.to_string();
    let mut body = body.to_string();
    if let Some(dot) = body.find('.') {
        let head = body[..dot].to_string();
        let mut digits: String = body[dot + 1..].chars().filter(char::is_ascii_digit).collect();
        digits.truncate(6);
        while digits.len() < 6 {
            digits.push('0');
        }
        body = format!("{head}.{digits}");
    }
    if has_offset {
        format!("{body}{offset}")
    } else {
        body
    }
}

/// Builds the per-struct primary-key index. Duplicate tuples fail with
/// `DuplicatePrimaryKey`; structs with zero primary keys are skipped (they
/// participate only as inline instances).
pub fn load_primary_keys(ctx: &mut Context) -> Result<(), Error> {
    let struct_names: Vec<String> = ctx.structs.keys().cloned().collect();
    for name in struct_names {
        if !ctx.structs[&name].has_primary_keys() {
            continue;
        }
        let instances = ctx.structs[&name].instances.clone();
        let mut mapped: HashMap<String, NodeKey> = HashMap::new();
        for instance_key in instances {
            let primary_keys = ctx.structs[&name].primary_keys.clone();
            let mut parts = Vec::with_capacity(primary_keys.len());
            for attr in &primary_keys {
                let field_key = ctx.arena[instance_key]
                    .as_instance()
                    .and_then(|i| i.fields.get(attr))
                    .copied()
                    .ok_or_else(|| {
                        Error::at(
                            ErrorKind::MissingAttr(attr.clone()),
                            &ctx.arena[instance_key].fragment,
                        )
                    })?;
                let rendered = ctx.arena[field_key].rendered.clone().unwrap_or(Rendered::Null);
                parts.push(crate::schema::render_to_key_part(&rendered));
            }
            let tuple = parts.join("\0");
            let fragment = ctx.arena[instance_key].fragment.clone();
            if mapped.insert(tuple.clone(), instance_key).is_some() {
                return Err(Error::at(
                    ErrorKind::DuplicatePrimaryKey(name.clone(), tuple),
                    &fragment,
                ));
            }
        }
        ctx.structs.get_mut(&name).unwrap().mapped_instances = mapped;
    }
    Ok(())
}

/// Resolves every `Reference` node to the `Instance` it names.
pub fn render_references(ctx: &mut Context) -> Result<(), Error> {
    let mut reference_keys = Vec::new();
    collect_reference_keys(ctx, &mut reference_keys);
    for key in reference_keys {
        render_reference(ctx, key)?;
    }
    Ok(())
}

fn collect_reference_keys(ctx: &Context, out: &mut Vec<NodeKey>) {
    for &key in ctx.globals.values() {
        collect_references_under(ctx, key, out);
    }
    for schema in ctx.structs.values() {
        for &instance_key in &schema.instances {
            collect_references_under(ctx, instance_key, out);
        }
    }
}

fn collect_references_under(ctx: &Context, key: NodeKey, out: &mut Vec<NodeKey>) {
    match &ctx.arena[key].kind {
        NodeKind::Reference(reference) => {
            out.push(key);
            for &arg in &reference.args {
                collect_references_under(ctx, arg, out);
            }
        }
        NodeKind::Array(array) => {
            for &child in &array.elements {
                collect_references_under(ctx, child, out);
            }
        }
        NodeKind::Instance(instance) => {
            for &child in instance.fields.values() {
                collect_references_under(ctx, child, out);
            }
        }
        NodeKind::Primitive(_) => {}
    }
}

fn render_reference(ctx: &mut Context, key: NodeKey) -> Result<(), Error> {
    if ctx.arena[key].was_rendered() {
        return Err(Error::at(ErrorKind::DoubleRender, &ctx.arena[key].fragment));
    }
    let type_name = ctx.arena[key].type_name.clone();
    let fragment = ctx.arena[key].fragment.clone();
    if !ctx.structs.contains_key(&type_name) {
        return Err(Error::at(
            ErrorKind::UnknownReference(type_name.clone(), String::new()),
            &fragment,
        ));
    }
    let args: Vec<crate::schema::Arg> = match &ctx.arena[key].kind {
        NodeKind::Reference(reference) => reference
            .args
            .iter()
            .map(|&node| crate::schema::Arg {
                attr_name: ctx.arena[node].attr_name.clone(),
                node,
            })
            .collect(),
        _ => unreachable!("collect_reference_keys only yields Reference nodes"),
    };
    let tuple = {
        let schema = ctx.structs.get(&type_name).unwrap().clone();
        let tuple = schema.primary_key_tuple(&args, &mut ctx.arena, &fragment)?;
        tuple
    };
    let target = ctx
        .structs
        .get(&type_name)
        .unwrap()
        .mapped_instances
        .get(&tuple)
        .copied()
        .ok_or_else(|| {
            Error::at(
                ErrorKind::UnknownReference(type_name.clone(), tuple.replace('\0', ", ")),
                &fragment,
            )
        })?;
    ctx.arena[key].rendered = Some(Rendered::Instance(target));
    Ok(())
}

/// Scans every non-literal `str` primitive for `{path}` templates and
/// substitutes them, then applies escape processing exactly once. Literal
/// strings are left byte-identical to their base-rendered content.
pub fn render_templates(ctx: &mut Context) -> Result<(), Error> {
    let mut str_keys = Vec::new();
    for &key in ctx.globals.values() {
        collect_str_primitives(ctx, key, &mut str_keys);
    }
    for schema in ctx.structs.values() {
        for &instance_key in &schema.instances {
            collect_str_primitives(ctx, instance_key, &mut str_keys);
        }
    }
    for key in str_keys {
        crate::template::render_template(ctx, key)?;
    }
    Ok(())
}

fn collect_str_primitives(ctx: &Context, key: NodeKey, out: &mut Vec<NodeKey>) {
    match &ctx.arena[key].kind {
        NodeKind::Primitive(_) => {
            if ctx.arena[key].type_name == "str" {
                out.push(key);
            }
        }
        NodeKind::Array(array) => {
            for &child in &array.elements {
                collect_str_primitives(ctx, child, out);
            }
        }
        NodeKind::Instance(instance) => {
            for &child in instance.fields.values() {
                collect_str_primitives(ctx, child, out);
            }
        }
        NodeKind::Reference(reference) => {
            for &arg in &reference.args {
                collect_str_primitives(ctx, arg, out);
            }
        }
    }
}
