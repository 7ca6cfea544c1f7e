//! The line-oriented lexer: dispatches top-level constructs (`#include`,
//! globals, struct blocks) and, within a struct block, schema/default/
//! instance rows, driving value parsing (arrays, invocations, quoted
//! strings, raw tokens) as it goes.
//!
//! Mirrors the role `grill::dialect::Dialect`'s keyword-registration walk
//! plays for JSON Schema, generalized to Tyco's line grammar: one register
//! and one parse step per recognized construct, with every failure wrapped
//! in a located [`Error`].

mod string;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::fragment::{coerce_content_to_fragments, Fragment, Origin};
use crate::schema::{Arg, AttrSchema};
use crate::value::{Array, Node, NodeKey, NodeKind, Reference};

static GLOBAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\?)?([A-Za-z_][A-Za-z0-9_]*)(\[\])?\s+([A-Za-z_][A-Za-z0-9_.]*)\s*:").unwrap()
});
static STRUCT_HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*:\s*$").unwrap());
static SCHEMA_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([*?])?([A-Za-z_][A-Za-z0-9_]*)(\[\])?\s+([A-Za-z_][A-Za-z0-9_.]*)\s*:").unwrap()
});
static DEFAULT_ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\s*:").unwrap());
static NAMED_ARG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\s*:").unwrap());

/// The delimiter context a value is being read in, per spec section 4.2.5:
/// the set of characters that legitimately terminate a raw token here, and
/// the set that are simply malformed.
#[derive(Clone, Copy, PartialEq)]
enum Delims {
    /// A single top-level value (global, schema default, local default):
    /// terminates at end of line; any of `) ] ,` found mid-token is bad.
    TopLevel,
    /// An array element: terminates at `]` or `,`; a stray `)` is bad.
    Array,
    /// An invocation argument: terminates at `)` or `,`; a stray `]` is bad.
    Invocation,
}

impl Delims {
    fn is_good(self, c: char) -> bool {
        match self {
            Delims::TopLevel => false,
            Delims::Array => c == ']' || c == ',',
            Delims::Invocation => c == ')' || c == ',',
        }
    }

    fn is_bad(self, c: char) -> bool {
        matches!(c, ')' | ']' | ',') && !self.is_good(c)
    }
}

/// A cursor over one document's physical lines. Lines are stored without
/// their trailing newline; crossing a line boundary is an explicit,
/// visible action (`advance_to_next_line`/`pull_raw_continuation_line`)
/// rather than something that falls out of scanning a `\n` character, so
/// the difference between "stop at end of line" (most constructs) and
/// "keep reading raw lines" (multi-line strings, continued instance rows)
/// stays obvious at each call site.
pub(crate) struct Lexer {
    lines: Vec<Fragment>,
    line_idx: usize,
    text: String,
    row: usize,
    col: usize,
    origin: Rc<Origin>,
}

impl Lexer {
    fn new(lines: Vec<Fragment>, origin: Rc<Origin>) -> Self {
        let (text, row) = match lines.first() {
            Some(f) => (f.line_text().to_string(), f.row()),
            None => (String::new(), 1),
        };
        Self {
            lines,
            line_idx: 0,
            text,
            row,
            col: 1,
            origin,
        }
    }

    fn has_more_lines(&self) -> bool {
        self.line_idx < self.lines.len()
    }

    fn current_line_fragment(&self) -> &Fragment {
        &self.lines[self.line_idx]
    }

    fn fragment_here(&self) -> Fragment {
        Fragment::new(
            self.current_line_fragment().line_text().to_string(),
            self.row,
            self.col,
            Rc::clone(&self.origin),
        )
    }

    fn peek_char(&self) -> Option<char> {
        self.text.chars().next()
    }

    fn peek_char_at(&self, n: usize) -> Option<char> {
        self.text.chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        let len = ch.len_utf8();
        self.text = self.text[len..].to_string();
        self.col += 1;
        Some(ch)
    }

    fn advance_n(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek_char(), Some(c) if c == ' ' || c == '\t') {
            self.advance();
        }
    }

    fn at_line_end(&self) -> bool {
        self.text.is_empty()
    }

    /// Moves to the next physical line verbatim (no comment stripping);
    /// used while inside a multi-line string or a continued instance row.
    /// Returns `false` at end of input.
    fn pull_raw_continuation_line(&mut self) -> bool {
        self.line_idx += 1;
        if self.line_idx < self.lines.len() {
            self.row = self.lines[self.line_idx].row();
            self.col = 1;
            self.text = self.lines[self.line_idx].line_text().to_string();
            true
        } else {
            self.text = String::new();
            false
        }
    }

    /// Moves to the next physical line and strips its comment, for
    /// resuming ordinary top-level/struct-body scanning.
    fn advance_to_next_line(&mut self) -> Result<bool, Error> {
        if !self.pull_raw_continuation_line() {
            return Ok(false);
        }
        self.strip_comment_on_current_line()?;
        Ok(true)
    }

    fn strip_comment_on_current_line(&mut self) -> Result<(), Error> {
        let (content, comment) = split_comment(&self.text);
        let content_len = content.len();
        if !comment.is_empty() {
            for ch in comment.chars() {
                if ch != '\t' && (u32::from(ch) < 0x20 || u32::from(ch) == 0x7f) {
                    return Err(Error::at(ErrorKind::InvalidComment, &self.fragment_here()));
                }
            }
        }
        self.text.truncate(content_len);
        Ok(())
    }

    fn peek_plain_ident(&self) -> String {
        self.text
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect()
    }

    /// If the upcoming text is `<dotted-ident> \s* :` (and the colon is
    /// not immediately followed by nothing meaningful -- any colon at all
    /// here unambiguously means a named argument), consumes it and
    /// returns the name.
    fn try_consume_named_prefix(&mut self) -> Option<String> {
        let caps = NAMED_ARG_RE.captures(&self.text)?;
        let name = caps[1].to_string();
        let end = caps.get(0).unwrap().end();
        self.advance_n(end);
        Some(name)
    }

    fn parse_arg(&mut self, ctx: &mut Context, delims: Delims) -> Result<Arg, Error> {
        self.skip_ws();
        let attr_name = self.try_consume_named_prefix();
        self.skip_ws();
        let node = self.parse_value(ctx, delims)?;
        Ok(Arg { attr_name, node })
    }

    fn parse_value(&mut self, ctx: &mut Context, delims: Delims) -> Result<NodeKey, Error> {
        self.skip_ws();
        let fragment = self.fragment_here();
        match self.peek_char() {
            Some('[') => self.parse_array(ctx, fragment),
            Some('"') | Some('\'') => string::parse_quoted_string(self, ctx, fragment),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.peek_plain_ident();
                let ident_len = ident.chars().count();
                if self.peek_char_at(ident_len) == Some('(') {
                    self.advance_n(ident_len + 1);
                    self.parse_invocation(ctx, ident, fragment)
                } else {
                    self.parse_raw_token(delims, &fragment, ctx)
                }
            }
            _ => self.parse_raw_token(delims, &fragment, ctx),
        }
    }

    fn parse_raw_token(&mut self, delims: Delims, fragment: &Fragment, ctx: &mut Context) -> Result<NodeKey, Error> {
        let mut out = String::new();
        loop {
            match self.peek_char() {
                None => break,
                Some(':') => return Err(Error::at(ErrorKind::StrayColon, fragment)),
                Some(c) if delims.is_good(c) => break,
                Some(c) if delims.is_bad(c) => return Err(Error::at(ErrorKind::BadDelimiter(c), fragment)),
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
        let raw = out.trim().to_string();
        Ok(ctx.arena.insert(Node::new(
            NodeKind::Primitive(crate::value::Primitive {
                raw,
                is_literal_str: false,
            }),
            "str",
            fragment.clone(),
        )))
    }

    fn parse_array(&mut self, ctx: &mut Context, fragment: Fragment) -> Result<NodeKey, Error> {
        self.advance(); // '['
        let mut elements = Vec::new();
        self.skip_ws();
        if self.peek_char() == Some(']') {
            self.advance();
        } else {
            loop {
                let node = self.parse_value(ctx, Delims::Array)?;
                elements.push(node);
                self.skip_ws();
                match self.peek_char() {
                    Some(',') => {
                        self.advance();
                        self.skip_ws();
                    }
                    Some(']') => {
                        self.advance();
                        break;
                    }
                    Some(c) => return Err(Error::at(ErrorKind::BadDelimiter(c), &fragment)),
                    None => return Err(Error::at(ErrorKind::UnclosedString, &fragment)),
                }
            }
        }
        Ok(ctx.arena.insert(Node::new(NodeKind::Array(Array { elements }), "", fragment)))
    }

    fn parse_invocation(&mut self, ctx: &mut Context, ident: String, fragment: Fragment) -> Result<NodeKey, Error> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek_char() == Some(')') {
            self.advance();
        } else {
            loop {
                let arg = self.parse_arg(ctx, Delims::Invocation)?;
                args.push(arg);
                self.skip_ws();
                match self.peek_char() {
                    Some(',') => {
                        self.advance();
                        self.skip_ws();
                    }
                    Some(')') => {
                        self.advance();
                        break;
                    }
                    Some(c) => return Err(Error::at(ErrorKind::BadDelimiter(c), &fragment)),
                    None => return Err(Error::at(ErrorKind::UnclosedString, &fragment)),
                }
            }
        }

        let has_primary_keys = ctx
            .structs
            .get(&ident)
            .map(crate::schema::StructSchema::has_primary_keys)
            .unwrap_or(true);

        if has_primary_keys {
            for arg in &args {
                if let Some(name) = &arg.attr_name {
                    ctx.arena[arg.node].attr_name = Some(name.clone());
                }
            }
            let arg_nodes = args.into_iter().map(|a| a.node).collect();
            Ok(ctx
                .arena
                .insert(Node::new(NodeKind::Reference(Reference { args: arg_nodes }), ident, fragment)))
        } else {
            let mut schema = ctx.struct_mut(&ident).clone();
            let key = schema.create_instance(args, &mut ctx.arena, &fragment, crate::context::deep_copy_node)?;
            ctx.structs.insert(ident.clone(), schema);
            Ok(key)
        }
    }
}

/// Splits `line` at the first `#` that is not inside a (single or triple)
/// quoted region, returning `(content, comment)`. A quote still open at
/// end of line means there is no comment on this line -- either the line
/// is genuinely malformed (the string reader will catch it) or it opens a
/// multi-line string, which is this function's business to leave alone.
fn split_comment(line: &str) -> (&str, &str) {
    #[derive(Clone, Copy, PartialEq)]
    enum Q {
        None,
        Single,
        Double,
        TripleSingle,
        TripleDouble,
    }
    let mut state = Q::None;
    let mut iter = line.char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        match state {
            Q::None => {
                if line[i..].starts_with("\"\"\"") {
                    state = Q::TripleDouble;
                    iter.next();
                    iter.next();
                } else if line[i..].starts_with("'''") {
                    state = Q::TripleSingle;
                    iter.next();
                    iter.next();
                } else if ch == '"' {
                    state = Q::Double;
                } else if ch == '\'' {
                    state = Q::Single;
                } else if ch == '#' {
                    return (&line[..i], &line[i..]);
                }
            }
            Q::Double => {
                if ch == '\\' {
                    iter.next();
                } else if ch == '"' {
                    state = Q::None;
                }
            }
            Q::Single => {
                if ch == '\'' {
                    state = Q::None;
                }
            }
            Q::TripleDouble => {
                if line[i..].starts_with("\"\"\"") {
                    state = Q::None;
                    iter.next();
                    iter.next();
                }
            }
            Q::TripleSingle => {
                if line[i..].starts_with("'''") {
                    state = Q::None;
                    iter.next();
                    iter.next();
                }
            }
        }
    }
    (line, "")
}

/// Lexes `text` into `ctx`, recursing into `#include`d files as they are
/// encountered. `base_dir` is the directory relative-`#include` paths in
/// this document resolve against.
#[tracing::instrument(skip(ctx, text), level = "trace")]
pub(crate) fn lex_into(
    ctx: &mut Context,
    text: &str,
    source: Option<String>,
    base_dir: Option<&Path>,
) -> Result<(), Error> {
    let origin = Rc::new(Origin { name: source });
    let lines = coerce_content_to_fragments(text, origin.name.clone());
    let mut lx = Lexer::new(lines, origin);
    lx.strip_comment_on_current_line()?;

    while lx.has_more_lines() {
        lx.skip_ws();
        if lx.at_line_end() {
            if !lx.advance_to_next_line()? {
                break;
            }
            continue;
        }
        dispatch_top_level(ctx, &mut lx, base_dir)?;
    }
    Ok(())
}

fn dispatch_top_level(ctx: &mut Context, lx: &mut Lexer, base_dir: Option<&Path>) -> Result<(), Error> {
    let fragment = lx.fragment_here();

    if lx.text.starts_with("#include") {
        return handle_include(ctx, lx, base_dir, &fragment);
    }
    if GLOBAL_RE.is_match(&lx.text) {
        return handle_global(ctx, lx, &fragment);
    }
    if STRUCT_HEADER_RE.is_match(lx.text.trim_end()) {
        return handle_struct_block(ctx, lx, base_dir);
    }
    Err(Error::at(ErrorKind::Malformatted, &fragment))
}

fn handle_include(ctx: &mut Context, lx: &mut Lexer, base_dir: Option<&Path>, fragment: &Fragment) -> Result<(), Error> {
    lx.advance_n("#include".chars().count());
    lx.skip_ws();
    let raw_path = PathBuf::from(lx.text.trim());
    lx.text.clear();

    let resolved = if raw_path.is_absolute() {
        raw_path
    } else {
        match base_dir {
            Some(dir) => dir.join(&raw_path),
            None => raw_path,
        }
    };

    if let Some(canonical) = ctx.begin_include(&resolved)? {
        let included_text = std::fs::read_to_string(&canonical)?;
        let child_base_dir = canonical.parent().map(Path::to_path_buf);
        lex_into(
            ctx,
            &included_text,
            Some(canonical.to_string_lossy().into_owned()),
            child_base_dir.as_deref(),
        )?;
    }
    let _ = fragment;
    lx.advance_to_next_line()?;
    Ok(())
}

fn handle_global(ctx: &mut Context, lx: &mut Lexer, fragment: &Fragment) -> Result<(), Error> {
    let caps = GLOBAL_RE.captures(&lx.text).expect("caller checked is_match");
    let is_nullable = caps.get(1).is_some();
    let type_name = caps[2].to_string();
    let is_array = caps.get(3).is_some();
    let name = caps[4].to_string();
    let prefix_len = caps.get(0).unwrap().end();
    lx.advance_n(prefix_len);
    lx.skip_ws();

    let value_fragment = lx.fragment_here();
    let node = lx.parse_value(ctx, Delims::TopLevel)?;
    let attr = AttrSchema {
        type_name,
        is_primary_key: false,
        is_nullable,
        is_array,
    };
    crate::schema::apply_attr_schema(&mut ctx.arena, node, &attr, &name, &value_fragment)?;
    ctx.add_global(&name, node, fragment)?;
    lx.advance_to_next_line()?;
    Ok(())
}

fn handle_struct_block(ctx: &mut Context, lx: &mut Lexer, base_dir: Option<&Path>) -> Result<(), Error> {
    let caps = STRUCT_HEADER_RE
        .captures(lx.text.trim_end())
        .expect("caller checked is_match");
    let name = caps[1].to_string();
    ctx.struct_mut(&name);
    if !lx.advance_to_next_line()? {
        return Ok(());
    }
    read_struct_body(ctx, lx, &name, base_dir)
}

fn read_struct_body(ctx: &mut Context, lx: &mut Lexer, struct_name: &str, base_dir: Option<&Path>) -> Result<(), Error> {
    loop {
        if !lx.has_more_lines() {
            break;
        }
        let is_indented = {
            let line = lx.current_line_fragment().line_text();
            line.starts_with(' ') || line.starts_with('\t')
        };
        if lx.text.trim().is_empty() {
            if !lx.advance_to_next_line()? {
                break;
            }
            continue;
        }
        if !is_indented {
            if lx.text.starts_with("#include") {
                let fragment = lx.fragment_here();
                handle_include(ctx, lx, base_dir, &fragment)?;
                continue;
            }
            break;
        }
        lx.skip_ws();
        let fragment = lx.fragment_here();
        if lx.text.starts_with('-') {
            read_instance_row(ctx, lx, struct_name, &fragment)?;
            continue;
        }
        if SCHEMA_ROW_RE.is_match(&lx.text) {
            handle_schema_row(ctx, lx, struct_name, &fragment)?;
            continue;
        }
        if DEFAULT_ROW_RE.is_match(&lx.text) {
            handle_default_row(ctx, lx, struct_name, &fragment)?;
            continue;
        }
        if !lx.text.contains(':') {
            return Err(Error::at(ErrorKind::MissingColon, &fragment));
        }
        return Err(Error::at(ErrorKind::Malformatted, &fragment));
    }
    Ok(())
}

fn handle_schema_row(ctx: &mut Context, lx: &mut Lexer, struct_name: &str, fragment: &Fragment) -> Result<(), Error> {
    let caps = SCHEMA_ROW_RE.captures(&lx.text).expect("caller checked is_match");
    let modifier = caps.get(1).map(|m| m.as_str());
    let is_primary_key = modifier == Some("*");
    let is_nullable = modifier == Some("?");
    let type_name = caps[2].to_string();
    let is_array = caps.get(3).is_some();
    let attr_name = caps[4].to_string();
    let prefix_len = caps.get(0).unwrap().end();
    lx.advance_n(prefix_len);

    ctx.struct_mut(struct_name)
        .add_attr(&attr_name, &type_name, is_primary_key, is_nullable, is_array, fragment)?;

    lx.skip_ws();
    if !lx.at_line_end() {
        let value_fragment = lx.fragment_here();
        let node = lx.parse_value(ctx, Delims::TopLevel)?;
        let attr = AttrSchema {
            type_name,
            is_primary_key,
            is_nullable,
            is_array,
        };
        crate::schema::apply_attr_schema(&mut ctx.arena, node, &attr, &attr_name, &value_fragment)?;
        ctx.struct_mut(struct_name).set_default(&attr_name, Some(node), fragment)?;
    }
    lx.advance_to_next_line()?;
    Ok(())
}

fn handle_default_row(ctx: &mut Context, lx: &mut Lexer, struct_name: &str, fragment: &Fragment) -> Result<(), Error> {
    let caps = DEFAULT_ROW_RE.captures(&lx.text).expect("caller checked is_match");
    let attr_name = caps[1].to_string();
    let prefix_len = caps.get(0).unwrap().end();
    lx.advance_n(prefix_len);
    lx.skip_ws();

    if lx.at_line_end() {
        ctx.struct_mut(struct_name).set_default(&attr_name, None, fragment)?;
    } else {
        let attr = ctx
            .structs
            .get(struct_name)
            .and_then(|s| s.attrs.get(&attr_name))
            .cloned()
            .ok_or_else(|| Error::at(ErrorKind::UnknownAttr(attr_name.clone()), fragment))?;
        let value_fragment = lx.fragment_here();
        let node = lx.parse_value(ctx, Delims::TopLevel)?;
        crate::schema::apply_attr_schema(&mut ctx.arena, node, &attr, &attr_name, &value_fragment)?;
        ctx.struct_mut(struct_name).set_default(&attr_name, Some(node), fragment)?;
    }
    lx.advance_to_next_line()?;
    Ok(())
}

fn read_instance_row(ctx: &mut Context, lx: &mut Lexer, struct_name: &str, fragment: &Fragment) -> Result<(), Error> {
    lx.advance(); // '-'
    lx.skip_ws();
    let mut args = Vec::new();

    if lx.at_line_end() {
        return finish_instance(ctx, lx, struct_name, args, fragment);
    }

    loop {
        let arg = lx.parse_arg(ctx, Delims::Invocation)?;
        args.push(arg);
        lx.skip_ws();
        match lx.peek_char() {
            Some(',') => {
                lx.advance();
                lx.skip_ws();
                if lx.at_line_end() && !pull_instance_continuation(lx)? {
                    break;
                }
            }
            None => {
                if !pull_instance_continuation(lx)? {
                    break;
                }
                if lx.at_line_end() {
                    break;
                }
            }
            Some(c) => return Err(Error::at(ErrorKind::BadDelimiter(c), fragment)),
        }
    }

    finish_instance(ctx, lx, struct_name, args, fragment)
}

/// After an instance row's line runs out, checks whether the next line is
/// an explicit `\` continuation marker (consumed silently) or genuinely
/// more argument content (kept for the caller to keep parsing). Returns
/// `false` when the row is over (blank line, dedent, or end of input).
fn pull_instance_continuation(lx: &mut Lexer) -> Result<bool, Error> {
    loop {
        if !lx.advance_to_next_line()? {
            return Ok(false);
        }
        let is_indented = {
            let line = lx.current_line_fragment().line_text();
            line.starts_with(' ') || line.starts_with('\t')
        };
        if !is_indented || lx.text.trim().is_empty() {
            return Ok(false);
        }
        lx.skip_ws();
        if lx.text.trim_end() == "\\" {
            lx.text.clear();
            continue;
        }
        return Ok(true);
    }
}

fn finish_instance(
    ctx: &mut Context,
    lx: &mut Lexer,
    struct_name: &str,
    args: Vec<Arg>,
    fragment: &Fragment,
) -> Result<(), Error> {
    let mut schema = ctx.struct_mut(struct_name).clone();
    schema.create_instance(args, &mut ctx.arena, fragment, crate::context::deep_copy_node)?;
    ctx.structs.insert(struct_name.to_string(), schema);
    if lx.at_line_end() {
        lx.advance_to_next_line()?;
    }
    Ok(())
}
