//! Substitution passes.
//!
//! Order matters and each pass parks its replacement in the marker table
//! rather than splicing text directly, so nothing a pass produces can be
//! re-parsed by a later pass:
//!
//! 1. string literals (already hidden by the caller)
//! 2. macro calls `$name(...)`
//! 3. constants `$name`
//! 4. verbatim slots `{name}`
//! 5. named parameters `::name` / `:name[:suffix]*`
//! 6. positional placeholders `??` / `?`
//!
//! Named and positional bind sites are mutually exclusive within a query.

use super::literals::hide_literals;
use super::markers::{Markers, MARK};
use super::{BindSite, Environment, Mode};
use crate::error::{PrepError, PrepResult};
use crate::quote::Quoter;
use crate::value::{Params, SqlValue};

pub(crate) struct Expansion {
    pub sql: String,
    pub param_names: Vec<String>,
    pub param_map: Vec<BindSite>,
}

pub(crate) fn expand(
    sql: &str,
    mode: Mode,
    env: &Environment,
    params: &Params,
    args: &[SqlValue],
) -> PrepResult<Expansion> {
    let quoter = env.quoter();
    let mut markers = Markers::new();

    let text = hide_literals(sql, &mut markers)?;
    let text = expand_macros(&text, env, params, &mut markers)?;
    let text = expand_defines(&text, env, &mut markers)?;
    let text = expand_verbatim(&text, params, &mut markers)?;

    let mut named = NamedSites::default();
    let text = expand_named(&text, mode, &quoter, params, &mut markers, &mut named)?;

    let mut positional = PositionalSites::default();
    let text = expand_positional(&text, mode, &quoter, args, &mut markers, &mut positional)?;

    if named.count > 0 && positional.count > 0 {
        return Err(PrepError::template(
            "named and positional bind sites cannot be mixed in one query",
        ));
    }

    let mut param_map = named.map;
    param_map.extend(positional.map);

    Ok(Expansion {
        sql: markers.resolve(&text)?,
        param_names: named.names,
        param_map,
    })
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// End index (exclusive) of the identifier starting at `start`, if any.
fn ident_end(chars: &[char], start: usize) -> Option<usize> {
    if !chars.get(start).copied().is_some_and(is_ident_start) {
        return None;
    }
    let mut end = start + 1;
    while chars.get(end).copied().is_some_and(is_ident_char) {
        end += 1;
    }
    Some(end)
}

/// Copy a marker pair to `out` and return the index after it.
fn copy_marker(chars: &[char], i: usize, out: &mut String) -> usize {
    out.push(chars[i]);
    if let Some(&payload) = chars.get(i + 1) {
        out.push(payload);
    }
    i + 2
}

/// Expand `$name(arg, ...)` macro calls.
fn expand_macros(
    text: &str,
    env: &Environment,
    params: &Params,
    markers: &mut Markers,
) -> PrepResult<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == MARK {
            i = copy_marker(&chars, i, &mut out);
            continue;
        }
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let Some(name_end) = ident_end(&chars, i + 1) else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        if chars.get(name_end) != Some(&'(') {
            // A constant; the next pass picks it up.
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let name: String = chars[i + 1..name_end].iter().collect();
        let (raw_args, after) = collect_macro_args(&chars, name_end, &name)?;

        let func = env
            .macros
            .get(&name)
            .ok_or_else(|| PrepError::template(format!("unknown macro ${name}")))?;

        let mut arg_texts = Vec::with_capacity(raw_args.len());
        for raw in &raw_args {
            arg_texts.push(expand_arg_raw(raw.trim(), params, markers)?);
        }

        let result = func(&arg_texts)?;
        out.push_str(&markers.push(result)?);
        i = after;
    }

    Ok(out)
}

/// Split the argument list of a macro call. `open` indexes the `(`.
/// Returns the raw argument texts and the index after the closing `)`.
fn collect_macro_args(
    chars: &[char],
    open: usize,
    name: &str,
) -> PrepResult<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 1usize;
    let mut j = open + 1;

    loop {
        let Some(&c) = chars.get(j) else {
            return Err(PrepError::template(format!("unclosed macro call ${name}(")));
        };
        if c == MARK {
            j = copy_marker(chars, j, &mut current);
            continue;
        }
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                current.push(c);
            }
            ',' if depth == 1 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
        j += 1;
    }

    // `$m()` is a zero-argument call, not a single empty argument.
    if args.is_empty() && current.trim().is_empty() {
        return Ok((Vec::new(), j + 1));
    }
    args.push(current);
    Ok((args, j + 1))
}

/// Expand `:name` / `::name` references inside a macro argument to the raw
/// (unquoted) parameter text, then restore any hidden literals so the macro
/// callable sees plain text.
fn expand_arg_raw(arg: &str, params: &Params, markers: &Markers) -> PrepResult<String> {
    let chars: Vec<char> = arg.chars().collect();
    let mut out = String::with_capacity(arg.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == MARK {
            i = copy_marker(&chars, i, &mut out);
            continue;
        }
        if chars[i] != ':' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let name_start = if chars.get(i + 1) == Some(&':') { i + 2 } else { i + 1 };
        let Some((key, after)) = named_key(&chars, name_start) else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        let value = params
            .get(&key)
            .ok_or_else(|| PrepError::template(format!("missing named parameter :{key}")))?;
        out.push_str(&value.raw_text()?);
        i = after;
    }

    markers.resolve(&out)
}

/// Expand `$name` constants from the environment's defines.
fn expand_defines(text: &str, env: &Environment, markers: &mut Markers) -> PrepResult<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == MARK {
            i = copy_marker(&chars, i, &mut out);
            continue;
        }
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let Some(name_end) = ident_end(&chars, i + 1) else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        let name: String = chars[i + 1..name_end].iter().collect();
        let value = env
            .defines
            .get(&name)
            .ok_or_else(|| PrepError::template(format!("unknown constant ${name}")))?;
        out.push_str(&markers.push(value.clone())?);
        i = name_end;
    }

    Ok(out)
}

/// Expand `{name}` verbatim slots: the parameter value is inserted with no
/// quoting whatsoever.
fn expand_verbatim(text: &str, params: &Params, markers: &mut Markers) -> PrepResult<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == MARK {
            i = copy_marker(&chars, i, &mut out);
            continue;
        }
        if chars[i] != '{' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let Some(name_end) = ident_end(&chars, i + 1) else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        if chars.get(name_end) != Some(&'}') {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let name: String = chars[i + 1..name_end].iter().collect();
        let value = params
            .get(&name)
            .ok_or_else(|| PrepError::template(format!("unknown verbatim parameter {{{name}}}")))?;
        out.push_str(&markers.push(value.raw_text()?)?);
        i = name_end + 1;
    }

    Ok(out)
}

#[derive(Default)]
struct NamedSites {
    count: usize,
    names: Vec<String>,
    map: Vec<BindSite>,
}

/// Parse a `name[:suffix]*` key starting at `start`. Returns the key and the
/// index after it. A `::` never extends a suffix chain.
fn named_key(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut end = ident_end(chars, start)?;
    let mut key: String = chars[start..end].iter().collect();

    while chars.get(end) == Some(&':')
        && chars.get(end + 1) != Some(&':')
        && chars.get(end + 1).copied().is_some_and(is_ident_start)
    {
        let suffix_end = ident_end(chars, end + 1).unwrap();
        key.push(':');
        key.extend(&chars[end + 1..suffix_end]);
        end = suffix_end;
    }
    Some((key, end))
}

/// Expand `::name` (quoted identifier) and `:name` (quoted value or bind
/// site) references.
fn expand_named(
    text: &str,
    mode: Mode,
    quoter: &Quoter,
    params: &Params,
    markers: &mut Markers,
    sites: &mut NamedSites,
) -> PrepResult<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == MARK {
            i = copy_marker(&chars, i, &mut out);
            continue;
        }
        if chars[i] != ':' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        if chars.get(i + 1) == Some(&':') {
            let Some(name_end) = ident_end(&chars, i + 2) else {
                out.push(chars[i]);
                out.push(chars[i + 1]);
                i += 2;
                continue;
            };
            let name: String = chars[i + 2..name_end].iter().collect();
            let value = params
                .get(&name)
                .ok_or_else(|| PrepError::template(format!("missing named parameter ::{name}")))?;
            let quoted = quoter.ident(&value.raw_text()?)?;
            out.push_str(&markers.push(quoted)?);
            sites.count += 1;
            sites.names.push(name);
            i = name_end;
            continue;
        }

        let Some((key, after)) = named_key(&chars, i + 1) else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        sites.count += 1;
        sites.names.push(key.clone());
        match mode {
            Mode::Literal => {
                let value = params
                    .get(&key)
                    .ok_or_else(|| PrepError::template(format!("missing named parameter :{key}")))?;
                out.push_str(&markers.push(quoter.value(value)?)?);
            }
            Mode::Prepare => {
                out.push_str(&markers.push("?".to_string())?);
                sites.map.push(BindSite::Param(key));
            }
        }
        i = after;
    }

    Ok(out)
}

#[derive(Default)]
struct PositionalSites {
    count: usize,
    map: Vec<BindSite>,
}

/// Expand `??` (quoted identifier) and `?` (quoted value or bind site)
/// placeholders. A single counter indexes into `args` across both forms.
fn expand_positional(
    text: &str,
    mode: Mode,
    quoter: &Quoter,
    args: &[SqlValue],
    markers: &mut Markers,
    sites: &mut PositionalSites,
) -> PrepResult<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut counter = 0usize;

    while i < chars.len() {
        if chars[i] == MARK {
            i = copy_marker(&chars, i, &mut out);
            continue;
        }
        if chars[i] != '?' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        sites.count += 1;
        if chars.get(i + 1) == Some(&'?') {
            // Identifiers cannot be bound; `??` resolves from args even in
            // prepare mode.
            let value = args.get(counter).ok_or_else(|| {
                PrepError::template(format!("missing positional argument {}", counter + 1))
            })?;
            let quoted = quoter.ident(&value.raw_text()?)?;
            out.push_str(&markers.push(quoted)?);
            counter += 1;
            i += 2;
            continue;
        }

        match mode {
            Mode::Literal => {
                let value = args.get(counter).ok_or_else(|| {
                    PrepError::template(format!("missing positional argument {}", counter + 1))
                })?;
                out.push_str(&markers.push(quoter.value(value)?)?);
            }
            Mode::Prepare => {
                out.push('?');
                sites.map.push(BindSite::Arg(counter));
            }
        }
        counter += 1;
        i += 1;
    }

    Ok(out)
}
