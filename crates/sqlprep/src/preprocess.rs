//! Conditional preprocessor.
//!
//! Runs before template expansion: evaluates `#if` / `#elif` / `#else` /
//! `#endif` lines against the parameter environment, strips `--` and `#`
//! end-of-line comments, drops blank lines and normalizes line terminators
//! to `\n`. Multiline `/* ... */` comments pass through untouched (they
//! carry optimizer hints).
//!
//! Directive detection happens before `#`-comment stripping: a line whose
//! first non-whitespace character is `#` is either a known directive or a
//! comment line. Comment stripping tracks single-quote literal state,
//! including literals left open across line boundaries, so `--` or `#`
//! inside a string survives.
//!
//! # Example
//! ```ignore
//! use sqlprep::{preprocess, Params};
//!
//! let sql = "SELECT *\n#if flag\nFROM a\n#else\nFROM b\n#endif";
//! let out = preprocess(sql, &Params::new().with("flag", true))?;
//! assert_eq!(out, "SELECT *\nFROM a");
//! # Ok::<(), sqlprep::PrepError>(())
//! ```

pub mod expr;

use crate::error::{PrepError, PrepResult};
use crate::value::Params;

#[derive(Debug)]
struct Frame {
    /// Whether the enclosing frame emits lines.
    parent_active: bool,
    /// Whether the current branch emits lines.
    active: bool,
    /// Whether any branch of this frame has activated yet.
    taken: bool,
    seen_else: bool,
}

/// Apply conditional directives and comment stripping to a SQL template.
pub fn preprocess(sql: &str, params: &Params) -> PrepResult<String> {
    let mut frames: Vec<Frame> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    let mut in_literal = false;

    for raw_line in sql.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        let active = frames.last().map_or(true, |f| f.active);

        // A line that starts inside an open string literal is content, never
        // a directive or a comment.
        if !in_literal {
            if let Some(directive) = parse_directive(line) {
                match directive {
                    Directive::If(expr) => {
                        let on = active && expr::eval_truthy(expr, params)?;
                        frames.push(Frame {
                            parent_active: active,
                            active: on,
                            taken: on,
                            seen_else: false,
                        });
                    }
                    Directive::Elif(expr) => {
                        let frame = frames
                            .last_mut()
                            .ok_or_else(|| PrepError::template("#elif without #if"))?;
                        if frame.seen_else {
                            return Err(PrepError::template("#elif after #else"));
                        }
                        let on =
                            frame.parent_active && !frame.taken && expr::eval_truthy(expr, params)?;
                        frame.active = on;
                        frame.taken |= on;
                    }
                    Directive::Else => {
                        let frame = frames
                            .last_mut()
                            .ok_or_else(|| PrepError::template("#else without #if"))?;
                        if frame.seen_else {
                            return Err(PrepError::template("duplicate #else"));
                        }
                        frame.seen_else = true;
                        let on = frame.parent_active && !frame.taken;
                        frame.active = on;
                        frame.taken |= on;
                    }
                    Directive::Endif => {
                        if frames.pop().is_none() {
                            return Err(PrepError::template("#endif without #if"));
                        }
                    }
                    Directive::Comment => {}
                }
                continue;
            }
        }

        if !active {
            continue;
        }

        let (stripped, still_open) = strip_line_comments(line, in_literal);
        in_literal = still_open;

        if still_open {
            // Literal content: keep the line verbatim, even if blank.
            out.push(stripped);
        } else {
            let trimmed = stripped.trim_end();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }

    if !frames.is_empty() {
        return Err(PrepError::template("#if without #endif"));
    }

    Ok(out.join("\n"))
}

enum Directive<'a> {
    If(&'a str),
    Elif(&'a str),
    Else,
    Endif,
    /// A line-initial `#` that is not a known directive: a comment line.
    Comment,
}

fn parse_directive(line: &str) -> Option<Directive<'_>> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix('#')?;

    let word_len = rest
        .char_indices()
        .take_while(|(i, c)| {
            if *i == 0 {
                *c == '_' || c.is_ascii_alphabetic()
            } else {
                *c == '_' || c.is_ascii_alphanumeric()
            }
        })
        .count();
    let (word, tail) = rest.split_at(word_len);

    Some(match word {
        "if" => Directive::If(tail.trim()),
        "elif" => Directive::Elif(tail.trim()),
        "else" => Directive::Else,
        "endif" => Directive::Endif,
        _ => Directive::Comment,
    })
}

/// Strip `--` and `#` comments from one line, honoring string literals.
/// Returns the kept portion and whether a literal is still open at EOL.
fn strip_line_comments(line: &str, mut in_literal: bool) -> (String, bool) {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_literal {
            match ch {
                '\\' => {
                    out.push(ch);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '\'' => {
                    out.push(ch);
                    if chars.peek() == Some(&'\'') {
                        out.push(chars.next().unwrap());
                    } else {
                        in_literal = false;
                    }
                }
                _ => out.push(ch),
            }
            continue;
        }

        match ch {
            '\'' => {
                in_literal = true;
                out.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => break,
            '#' => break,
            _ => out.push(ch),
        }
    }

    (out, in_literal)
}
