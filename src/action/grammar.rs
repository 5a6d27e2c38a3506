//! Function-call-like expression grammar shared by the action parser and
//! the textual tool-call extractor: `name(key='value', other=(1,2))`.

use regex::Regex;
use std::sync::LazyLock;

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*([A-Za-z_][\w.\-]*)\s*\((.*)\)\s*$").expect("valid call regex"));

static BARE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][\w.\-]*)\s*$").expect("valid name regex"));

/// One argument of a call expression. `key` is None for positional values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArg {
    pub key: Option<String>,
    pub value: String,
}

/// A parsed call expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<RawArg>,
}

/// Parse `name(args...)` or a bare `name`. Returns None when the text is not
/// a call expression at all.
pub fn parse_call(text: &str) -> Option<CallExpr> {
    if let Some(caps) = CALL_RE.captures(text) {
        let name = caps[1].to_string();
        let args = split_args(&caps[2]).into_iter().filter_map(|raw| parse_arg(&raw)).collect();
        return Some(CallExpr { name, args });
    }
    BARE_NAME_RE.captures(text).map(|caps| CallExpr {
        name: caps[1].to_string(),
        args: Vec::new(),
    })
}

/// Split an argument list on top-level commas, respecting quotes and brackets.
fn split_args(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0i32;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => {
                current.push(c);
                escaped = true;
            }
            (Some(q), c) if c == q => {
                current.push(c);
                quote = None;
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                current.push(c);
                quote = Some(c);
            }
            (None, '(' | '[' | '{') => {
                depth += 1;
                current.push(c);
            }
            (None, ')' | ']' | '}') => {
                depth -= 1;
                current.push(c);
            }
            (None, ',') if depth <= 0 => {
                parts.push(std::mem::take(&mut current));
            }
            (None, c) => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_arg(raw: &str) -> Option<RawArg> {
    let (key, value) = match find_top_level_eq(raw) {
        Some(idx) => {
            let key = raw[..idx].trim();
            if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
                (None, raw)
            } else {
                (Some(key.to_string()), &raw[idx + 1..])
            }
        }
        None => (None, raw),
    };
    let value = unquote(value.trim());
    Some(RawArg { key, value })
}

fn find_top_level_eq(raw: &str) -> Option<usize> {
    for (idx, c) in raw.char_indices() {
        match c {
            '=' => return Some(idx),
            '\'' | '"' | '(' | '[' | '{' => return None,
            _ => {}
        }
    }
    None
}

/// Strip matching quotes and resolve escaped quote characters. Other
/// escapes, including a literal `\n`, are left untouched.
pub fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if value.len() >= 2 {
        let first = bytes[0];
        let last = bytes[value.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            let inner = &value[1..value.len() - 1];
            return inner.replace("\\'", "'").replace("\\\"", "\"");
        }
    }
    // Unterminated quote from a truncated model turn.
    if let Some(rest) = value.strip_prefix('\'').or_else(|| value.strip_prefix('"')) {
        return rest.replace("\\'", "'").replace("\\\"", "\"");
    }
    value.to_string()
}
