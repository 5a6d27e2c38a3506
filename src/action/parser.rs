//! Model text → structured actions.
//!
//! A model turn looks like:
//!
//! ```text
//! Reflection: the menu did not open
//! Thought: click the menu again
//! Action: click(start_box='(100,200)')
//! ```
//!
//! Parsing never fails. Text that does not match the grammar degrades to a
//! single action with an empty `action_type`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

use super::boxes::{DEFAULT_FACTOR, normalize_box, parse_box, strip_box_markup};
use super::grammar::{CallExpr, parse_call};
use super::{ActionFormat, ParseOptions, ParsedAction};

static STATEMENT_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid statement regex"));

static EMBEDDED_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)[A-Za-z_][\w.]*\s*\(.*\)").expect("valid embedded call regex"));

static REFLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Reflection:(.*?)(?:Action_Summary:|Thought:|$)").expect("valid reflection regex")
});

static O1_THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Thought>(.*?)</Thought>").expect("valid thought regex"));

const ACTION_MARKER: &str = "Action:";
const THOUGHT_MARKER: &str = "Thought:";
const SUMMARY_MARKER: &str = "Action_Summary:";

/// Parse one model turn into one or more actions sharing the same thought.
pub fn parse_action_text(text: &str, options: &ParseOptions) -> Vec<ParsedAction> {
    let factors = options.factors.unwrap_or((DEFAULT_FACTOR, DEFAULT_FACTOR));
    let text = strip_box_markup(text.trim());

    let (preamble, action_section) = match text.find(ACTION_MARKER) {
        Some(idx) => (&text[..idx], Some(&text[idx + ACTION_MARKER.len()..])),
        None => (text.as_str(), None),
    };

    let (reflection, thought) = match options.mode {
        ActionFormat::Bc => parse_bc_preamble(preamble),
        ActionFormat::O1 => parse_o1_preamble(preamble),
    };

    let statements: Vec<&str> = match action_section {
        Some(section) => STATEMENT_SPLIT_RE
            .split(section)
            .map(|s| s.trim())
            .map(|s| s.strip_prefix(ACTION_MARKER).unwrap_or(s).trim())
            .filter(|s| !s.is_empty())
            .collect(),
        None => Vec::new(),
    };

    if statements.is_empty() {
        warn!("No action statement found in model output; degrading to empty action");
        return vec![ParsedAction {
            reflection,
            thought,
            action_type: String::new(),
            action_inputs: BTreeMap::new(),
        }];
    }

    statements
        .into_iter()
        .map(|statement| {
            let (action_type, action_inputs) = match parse_statement(statement) {
                Some(call) => (call.name.clone(), build_inputs(call, factors)),
                None => {
                    warn!("Unparseable action statement: {:?}", statement);
                    (String::new(), BTreeMap::new())
                }
            };
            debug!("Parsed action {:?} with {} inputs", action_type, action_inputs.len());
            ParsedAction {
                reflection: reflection.clone(),
                thought: thought.clone(),
                action_type,
                action_inputs,
            }
        })
        .collect()
}

fn parse_statement(statement: &str) -> Option<CallExpr> {
    parse_call(statement).or_else(|| {
        EMBEDDED_CALL_RE
            .find(statement)
            .and_then(|m| parse_call(m.as_str()))
    })
}

fn parse_bc_preamble(preamble: &str) -> (Option<String>, String) {
    let reflection = REFLECTION_RE
        .captures(preamble)
        .map(|caps| caps[1].trim().to_string())
        .filter(|r| !r.is_empty());

    let thought = if let Some(idx) = preamble.find(THOUGHT_MARKER) {
        preamble[idx + THOUGHT_MARKER.len()..].trim().to_string()
    } else if let Some(idx) = preamble.find(SUMMARY_MARKER) {
        preamble[idx + SUMMARY_MARKER.len()..].trim().to_string()
    } else if reflection.is_none() {
        preamble.trim().to_string()
    } else {
        String::new()
    };

    (reflection, thought)
}

fn parse_o1_preamble(preamble: &str) -> (Option<String>, String) {
    let (reflection, fallback_thought) = parse_bc_preamble(preamble);
    let mut thought = match O1_THOUGHT_RE.captures(preamble) {
        Some(caps) => caps[1].trim().to_string(),
        None => fallback_thought,
    };

    if let Some(idx) = preamble.find(SUMMARY_MARKER) {
        let summary = preamble[idx + SUMMARY_MARKER.len()..].trim();
        let summary = summary.lines().next().unwrap_or("").trim();
        if !summary.is_empty() {
            thought = format!("{}\n<Action_Summary>\n{}", thought, summary);
        }
    }

    (reflection, thought)
}

fn canonical_key(key: &str) -> String {
    match key {
        "start_point" | "point" => "start_box".to_string(),
        "end_point" => "end_box".to_string(),
        other => other.to_string(),
    }
}

fn positional_key(value: &str, boxes_seen: &mut usize) -> String {
    let arity = parse_box(value).len();
    let looks_like_box = (arity == 2 || arity == 4)
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || " ,.-()[]".contains(c));
    if looks_like_box {
        *boxes_seen += 1;
        if *boxes_seen == 1 {
            "start_box".to_string()
        } else {
            "end_box".to_string()
        }
    } else {
        "content".to_string()
    }
}

fn build_inputs(call: CallExpr, factors: (f64, f64)) -> BTreeMap<String, String> {
    let mut inputs = BTreeMap::new();
    let mut boxes_seen = 0usize;

    for arg in call.args {
        let key = match &arg.key {
            Some(k) => canonical_key(k),
            None => positional_key(&arg.value, &mut boxes_seen),
        };
        let value = if key.ends_with("_box") {
            normalize_box(&arg.value, factors).unwrap_or_else(|| {
                warn!("Could not normalize {}={:?}; keeping raw value", key, arg.value);
                arg.value.clone()
            })
        } else {
            arg.value
        };
        inputs.insert(key, value);
    }

    inputs
}
