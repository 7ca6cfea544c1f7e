//! Template expansion: resolving `{path.to.attr}` substrings inside
//! non-literal `str` values by walking up a value's containment chain (or
//! escaping into the global scope), then applying classic string escapes
//! exactly once.
//!
//! Attribute names may themselves contain dots, so a naive `split('.')`
//! cannot tell where one segment ends and the next begins. We resolve each
//! hop greedily, merging consecutive raw tokens with `.` and retrying until
//! a match is found, per the design note in spec section 9.

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::value::{NodeKey, NodeKind, Rendered};

/// A resolution scope: either a concrete containing node (an `Instance`)
/// or the context's top-level global map.
#[derive(Clone, Copy)]
enum Scope {
    Node(NodeKey),
    Globals,
}

pub fn render_template(ctx: &mut Context, key: NodeKey) -> Result<(), Error> {
    let is_literal = ctx.arena[key]
        .as_primitive()
        .map(|p| p.is_literal_str)
        .unwrap_or(false);
    if is_literal {
        return Ok(());
    }
    let fragment = ctx.arena[key].fragment.clone();
    let content = match &ctx.arena[key].rendered {
        Some(Rendered::Str(s)) => s.clone(),
        _ => return Ok(()),
    };
    let parent = ctx.arena[key].parent;
    let start_scope = parent.map_or(Scope::Globals, Scope::Node);

    let substituted = substitute(ctx, &content, start_scope, &fragment)?;
    let escaped = apply_escapes(&substituted);
    ctx.arena[key].rendered = Some(Rendered::Str(escaped));
    Ok(())
}

fn substitute(ctx: &mut Context, content: &str, start_scope: Scope, fragment: &crate::fragment::Fragment) -> Result<String, Error> {
    let mut out = String::with_capacity(content.len());
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = content[i + 1..].find('}') {
                let path = &content[i + 1..i + 1 + end];
                let resolved = resolve_path(ctx, start_scope, path, fragment)?;
                out.push_str(&resolved);
                i = i + 1 + end + 1;
                continue;
            }
        }
        let ch = content[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

fn resolve_path(ctx: &mut Context, start_scope: Scope, path: &str, fragment: &crate::fragment::Fragment) -> Result<String, Error> {
    let leading_dots = path.chars().take_while(|&c| c == '.').count();
    let hops = leading_dots.saturating_sub(1);
    let remainder = &path[leading_dots..];

    let mut scope = start_scope;
    for _ in 0..hops {
        scope = hop_up(ctx, scope, fragment)?;
    }

    if remainder.is_empty() {
        return Err(Error::at(ErrorKind::UnknownAttr(path.to_string()), fragment));
    }

    let tokens: Vec<&str> = remainder.split('.').collect();
    let mut i = 0;
    let mut allow_global_escape = true;
    let target = loop {
        let mut matched = None;
        for j in i..tokens.len() {
            let candidate = tokens[i..=j].join(".");
            if let Some(node_key) = lookup_attr(ctx, scope, &candidate) {
                matched = Some((j, node_key));
                break;
            }
        }
        match matched {
            Some((j, node_key)) => {
                if j + 1 < tokens.len() {
                    i = j + 1;
                    scope = node_to_scope(ctx, node_key, fragment)?;
                    allow_global_escape = false;
                } else {
                    break node_key;
                }
            }
            None => {
                if allow_global_escape && tokens[i] == "global" {
                    scope = Scope::Globals;
                    allow_global_escape = false;
                    i += 1;
                    if i >= tokens.len() {
                        return Err(Error::at(
                            ErrorKind::UnknownAttr(remainder.to_string()),
                            fragment,
                        ));
                    }
                    continue;
                }
                return Err(Error::at(
                    ErrorKind::UnknownAttr(remainder.to_string()),
                    fragment,
                ));
            }
        }
    };

    let rendered = ctx.arena[target].rendered.clone();
    match rendered.as_ref().and_then(Rendered::as_template_string) {
        Some(s) => Ok(s),
        None => Err(Error::at(ErrorKind::UntemplatableType, fragment)),
    }
}

fn hop_up(ctx: &Context, scope: Scope, fragment: &crate::fragment::Fragment) -> Result<Scope, Error> {
    match scope {
        Scope::Node(key) => match ctx.arena[key].parent {
            Some(parent) => Ok(Scope::Node(parent)),
            None => Ok(Scope::Globals),
        },
        Scope::Globals => Err(Error::at(ErrorKind::ParentOverflow, fragment)),
    }
}

fn lookup_attr(ctx: &Context, scope: Scope, name: &str) -> Option<NodeKey> {
    match scope {
        Scope::Globals => ctx.globals.get(name).copied(),
        Scope::Node(key) => ctx.arena[key].as_instance().and_then(|i| i.fields.get(name)).copied(),
    }
}

fn node_to_scope(ctx: &Context, key: NodeKey, fragment: &crate::fragment::Fragment) -> Result<Scope, Error> {
    match &ctx.arena[key].kind {
        NodeKind::Instance(_) => Ok(Scope::Node(key)),
        NodeKind::Reference(_) => match &ctx.arena[key].rendered {
            Some(Rendered::Instance(target)) => Ok(Scope::Node(*target)),
            _ => Err(Error::at(ErrorKind::UnresolvedReferenceInTemplate, fragment)),
        },
        NodeKind::Array(_) | NodeKind::Primitive(_) => {
            Err(Error::at(ErrorKind::UnknownAttr(String::new()), fragment))
        }
    }
}

/// Applies classic string escapes exactly once: `\\`, `\"`, `\b`, `\t`,
/// `\n`, `\f`, `\r`, `\uXXXX`, `\UXXXXXXXX`, and `\<EOL>` line-continuation
/// elision (the backslash, the newline, and the next line's leading
/// whitespace are all dropped).
#[must_use]
pub fn apply_escapes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '\\' || i + 1 >= chars.len() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars[i + 1] {
            '\\' => {
                out.push('\\');
                i += 2;
            }
            '"' => {
                out.push('"');
                i += 2;
            }
            'b' => {
                out.push('\u{8}');
                i += 2;
            }
            't' => {
                out.push('\t');
                i += 2;
            }
            'n' => {
                out.push('\n');
                i += 2;
            }
            'f' => {
                out.push('\u{c}');
                i += 2;
            }
            'r' => {
                out.push('\r');
                i += 2;
            }
            '\n' => {
                i += 2;
                while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                    i += 1;
                }
            }
            'u' => match decode_unicode_escape(&chars, i + 2, 4) {
                Some((ch, consumed)) => {
                    out.push(ch);
                    i += 2 + consumed;
                }
                None => {
                    out.push(chars[i]);
                    i += 1;
                }
            },
            'U' => match decode_unicode_escape(&chars, i + 2, 8) {
                Some((ch, consumed)) => {
                    out.push(ch);
                    i += 2 + consumed;
                }
                None => {
                    out.push(chars[i]);
                    i += 1;
                }
            },
            _ => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

fn decode_unicode_escape(chars: &[char], start: usize, digits: usize) -> Option<(char, usize)> {
    if start + digits > chars.len() {
        return None;
    }
    let hex: String = chars[start..start + digits].iter().collect();
    let code = u32::from_str_radix(&hex, 16).ok()?;
    char::from_u32(code).map(|ch| (ch, digits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_basic_escapes() {
        assert_eq!(apply_escapes(r"a\nb\tc"), "a\nb\tc");
        assert_eq!(apply_escapes(r#"\"quoted\""#), "\"quoted\"");
    }

    #[test]
    fn applies_unicode_escape() {
        assert_eq!(apply_escapes(r"A"), "A");
        assert_eq!(apply_escapes(r"\U00000041"), "A");
    }

    #[test]
    fn elides_line_continuation() {
        assert_eq!(apply_escapes("a\\\n   b"), "ab");
    }
}
