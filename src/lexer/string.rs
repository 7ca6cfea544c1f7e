//! Quoted-string scanning: single/triple, double (templatable) or single
//! quote (literal) delimiters, trailing-delimiter folding, leading-newline
//! trim, and the triple-double-quote line-continuation convention.
//!
//! Lines are stored without their trailing newline (see [`Lexer`]), so
//! "the next character is a newline" is represented here as "nothing left
//! on the current line" -- crossing that boundary means pulling the next
//! raw source line in, bypassing the usual per-line comment stripping
//! (embedded `#` inside a multi-line string is just string content).

use crate::error::{Error, ErrorKind};
use crate::fragment::Fragment;
use crate::value::{Node, NodeKey, NodeKind, Primitive};

use super::Lexer;
use crate::context::Context;

/// Reads one quoted string starting at the lexer's current position (which
/// must be sitting on `"` or `'`), returning the resulting `Primitive` node.
pub(super) fn parse_quoted_string(lx: &mut Lexer, ctx: &mut Context, fragment: Fragment) -> Result<NodeKey, Error> {
    let quote = lx.peek_char().expect("caller checked for a quote char");
    let is_literal = quote == '\'';
    let triple = lx.peek_char_at(1) == Some(quote) && lx.peek_char_at(2) == Some(quote);
    let opener_len = if triple { 3 } else { 1 };
    lx.advance_n(opener_len);

    if triple && lx.peek_char().is_none() {
        // A newline immediately after the opening triple is trimmed, not
        // preserved as content.
        lx.pull_raw_continuation_line();
    }

    let mut content = String::new();
    loop {
        match lx.peek_char() {
            None => {
                if !triple {
                    return Err(Error::at(ErrorKind::UnclosedString, &fragment));
                }
                if !lx.pull_raw_continuation_line() {
                    return Err(Error::at(ErrorKind::UnclosedString, &fragment));
                }
                content.push('\n');
            }
            Some(c) => {
                if triple && lx.peek_char_at(1) == Some(quote) && lx.peek_char_at(2) == Some(quote) {
                    lx.advance_n(3);
                    for _ in 0..2 {
                        if lx.peek_char() == Some(quote) {
                            content.push(quote);
                            lx.advance();
                        } else {
                            break;
                        }
                    }
                    break;
                }
                if triple && !is_literal && quote == '"' && c == '\\' && lx.peek_char_at(1).is_none() {
                    lx.advance(); // the backslash
                    if !lx.pull_raw_continuation_line() {
                        return Err(Error::at(ErrorKind::UnclosedString, &fragment));
                    }
                    lx.skip_ws();
                    continue;
                }
                if !triple && c == quote {
                    lx.advance();
                    break;
                }
                if !triple && !is_literal && quote == '"' && c == '\\' {
                    content.push(c);
                    lx.advance();
                    if let Some(next) = lx.peek_char() {
                        content.push(next);
                        lx.advance();
                    }
                    continue;
                }
                content.push(c);
                lx.advance();
            }
        }
    }

    Ok(ctx.arena.insert(Node::new(
        NodeKind::Primitive(Primitive {
            raw: content,
            is_literal_str: is_literal,
        }),
        "str",
        fragment,
    )))
}
