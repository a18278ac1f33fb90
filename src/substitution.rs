//! `[[reference]]` tokens in action inputs, resolved against earlier responses and constants.
//!
//! A reference is either a path (`users.0.username`) or an upper-case action alias followed by
//! a path into that action's response (`GET_USER.user.name`, `GET_USER.1.user.name`). Responses
//! are keyed `action.index`, so the alias becomes the escaped segment `{get_user.0}`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{Result, UnresolvedReference};
use crate::path::{Path, all_paths};
use crate::value::Value;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+?)\]\]").unwrap());

static ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<alias>[A-Z_]*[A-Z][A-Z0-9_]*)(?:\.(?P<index>\d+))?(?:\.(?P<rest>.+))?$").unwrap()
});

static BARE_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*)\.(?P<rest>[^0-9].*)$").unwrap());

/// Whether `text` contains at least one substitution token.
pub fn has_tokens(text: &str) -> bool {
    TOKEN.is_match(text)
}

/// Replace every token in every text leaf of `data`. Sources are consulted in order.
pub fn resolve(data: &mut Value, sources: &[&Value]) -> Result<()> {
    let paths: Vec<Path> = all_paths(data, false).collect();
    for path in paths {
        let replacement = match data.get_path(&path) {
            Ok(Value::Text(text)) if has_tokens(text) => substitute(text, sources)?,
            _ => continue,
        };
        debug!(path = %path, "substituted");
        data.put_path(&path, replacement)?;
    }
    Ok(())
}

/// Substitute the tokens of one text value. A value that is exactly one token takes the
/// referenced value as is; otherwise each token is stringified into the surrounding text.
pub fn substitute(text: &str, sources: &[&Value]) -> Result<Value, UnresolvedReference> {
    if let Some(caps) = TOKEN.captures(text) {
        if caps.get(0).is_some_and(|m| m.as_str() == text) {
            return resolve_reference(&caps[1], sources);
        }
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in TOKEN.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let value = resolve_reference(&caps[1], sources)?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&value.to_string());
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(Value::Text(out))
}

/// Look `reference` up in the first source that has it.
pub fn resolve_reference(reference: &str, sources: &[&Value]) -> Result<Value, UnresolvedReference> {
    let candidates = lookup_candidates(reference.trim());
    for source in sources {
        for candidate in &candidates {
            let Ok(path) = Path::parse(candidate) else { continue };
            if let Ok(found) = source.get_path(&path) {
                return Ok(found.clone());
            }
        }
    }
    Err(UnresolvedReference {
        reference: reference.to_string(),
        tried: candidates,
    })
}

/// The as-given path, then lower-cased, then with a bare `name.` rewritten to `{name.0}.`.
fn lookup_candidates(reference: &str) -> Vec<String> {
    let primary = match ALIAS.captures(reference) {
        Some(caps) => {
            let alias = caps["alias"].to_lowercase();
            let index = caps.name("index").map_or("0", |m| m.as_str());
            match caps.name("rest") {
                Some(rest) => format!("{{{alias}.{index}}}.{}", rest.as_str()),
                None => format!("{{{alias}.{index}}}"),
            }
        }
        None => reference.to_string(),
    };
    let mut candidates = vec![primary.clone()];
    let lowered = primary.to_lowercase();
    if !candidates.contains(&lowered) {
        candidates.push(lowered);
    }
    if let Some(caps) = BARE_ACTION.captures(&primary) {
        let rewritten = format!("{{{}.0}}.{}", &caps["name"], &caps["rest"]);
        if !candidates.contains(&rewritten) {
            candidates.push(rewritten);
        }
    }
    // upper-case constants read as aliases; fall back to the literal reference last
    if primary != reference && !candidates.iter().any(|c| c == reference) {
        candidates.push(reference.to_string());
    }
    candidates
}
