//! Response parsing for free-form language model replies.
//!
//! Models wrap code in markdown fences, prepend prose to JSON and answer
//! yes/no questions in a dozen shapes. This module turns those replies into
//! the three structured shapes the refinement loop needs:
//!
//! - [`extract_code`] - replacement model source
//! - [`extract_verdict`] - an [`EvaluationVerdict`]
//! - [`extract_plan`] - a [`Plan`], structured when the reply holds JSON
//!
//! None of these functions fail. Ambiguous input resolves to the
//! conservative answer (unchanged text, `fulfilled = false`, opaque plan).
//!
//! # Example
//!
//! ```
//! use autoscad::parser::{extract_code, extract_verdict};
//!
//! assert_eq!(extract_code("```scad\ncube(10);\n```"), "cube(10);");
//!
//! let verdict = extract_verdict("NO\nThe hole is missing");
//! assert!(!verdict.fulfilled);
//! assert_eq!(verdict.explanation, "The hole is missing");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

// ============================================================================
// Code Extraction
// ============================================================================

fn opening_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^`{3,}\s*[A-Za-z0-9_+.#-]*$").expect("valid fence regex"))
}

fn closing_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^`{3,}$").expect("valid fence regex"))
}

fn is_opening_fence(line: &str) -> bool {
    opening_fence().is_match(line.trim())
}

fn is_closing_fence(line: &str) -> bool {
    closing_fence().is_match(line.trim())
}

/// Byte ranges `(start, end)` of every line in `text`, excluding the newline.
fn line_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices('\n') {
        spans.push((start, idx));
        start = idx + 1;
    }
    spans.push((start, text.len()));
    spans
}

/// Remove one layer of fencing from already-trimmed text.
///
/// Returns the input unchanged when there is nothing to strip.
fn strip_fence_once(text: &str) -> &str {
    let spans = line_spans(text);
    let line = |i: usize| &text[spans[i].0..spans[i].1];
    let last = spans.len() - 1;

    // ```scad ... ``` opening the reply, possibly followed by prose
    if is_opening_fence(line(0)) {
        let body_start = if last == 0 { text.len() } else { spans[1].0 };
        let body_end = (1..=last)
            .find(|&i| is_closing_fence(line(i)))
            .map_or(text.len(), |close| spans[close].0);
        if body_start >= body_end {
            return "";
        }
        return text[body_start..body_end].trim();
    }

    // Prose around a fenced block: take the first block
    if let Some(open) = (0..=last).find(|&i| is_opening_fence(line(i))) {
        if let Some(close) = (open + 1..=last).find(|&i| is_closing_fence(line(i))) {
            let body_start = spans[open].1;
            let body_end = spans[close].0;
            if body_start >= body_end {
                return "";
            }
            return text[body_start..body_end].trim();
        }
    }

    // Dangling closing fence only
    if last >= 1 && is_closing_fence(line(last)) {
        return text[..spans[last].0].trim();
    }

    text
}

/// Extract model source from a reply, stripping markdown fences.
///
/// Handles a reply wrapped in a fenced block (with or without a language
/// tag), a dangling closing fence, and a fenced block surrounded by prose.
/// Anything else is returned trimmed. Internal content is never rewritten,
/// and the function is idempotent.
///
/// # Example
///
/// ```
/// use autoscad::parser::extract_code;
///
/// let reply = "Here you go:\n```openscad\ndifference() { cube(10); sphere(6); }\n```\nEnjoy!";
/// let code = extract_code(reply);
/// assert_eq!(code, "difference() { cube(10); sphere(6); }");
/// assert_eq!(extract_code(&code), code);
/// ```
#[must_use]
pub fn extract_code(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let next = strip_fence_once(current);
        if next.len() == current.len() {
            return current.to_string();
        }
        current = next;
    }
}

// ============================================================================
// Verdict Extraction
// ============================================================================

/// The evaluator's judgment of a render against the specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EvaluationVerdict {
    /// Whether the specification is satisfied.
    pub fulfilled: bool,
    /// Short explanation, possibly empty.
    pub explanation: String,
}

impl EvaluationVerdict {
    /// A verdict declaring the specification unfulfilled.
    #[must_use]
    pub fn unfulfilled(explanation: impl Into<String>) -> Self {
        Self {
            fulfilled: false,
            explanation: explanation.into(),
        }
    }
}

fn yes_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\byes\b").expect("valid verdict regex"))
}

/// True when the line contains "yes" as a whole word, in any case.
fn line_says_yes(line: &str) -> bool {
    yes_token().is_match(line)
}

/// Locate a JSON object in the reply, skipping fences and leading prose.
fn find_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = extract_code(text);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned) {
        return Some(map);
    }
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn verdict_from_json(text: &str) -> Option<EvaluationVerdict> {
    let map = find_json_object(text)?;
    let fulfilled = match map.get("fulfilled")? {
        Value::Bool(b) => *b,
        Value::String(s) => line_says_yes(s),
        _ => false,
    };
    let explanation = ["explanation", "reason", "details"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .unwrap_or("")
        .to_string();
    Some(EvaluationVerdict {
        fulfilled,
        explanation,
    })
}

/// Extract a verdict from an evaluation reply.
///
/// A JSON object with a `fulfilled` field wins. Otherwise the first
/// non-empty line decides: it is fulfilled when it contains "yes" as a whole
/// word, in any case. The next non-empty line becomes the
/// explanation. Input without any non-empty line is unfulfilled with the raw
/// text as explanation.
///
/// # Example
///
/// ```
/// use autoscad::parser::extract_verdict;
///
/// assert!(extract_verdict("Fulfilled: yes").fulfilled);
/// assert!(extract_verdict(r#"{"fulfilled": true}"#).fulfilled);
/// assert!(!extract_verdict("The eyes look fine").fulfilled);
/// assert!(!extract_verdict("").fulfilled);
/// ```
#[must_use]
pub fn extract_verdict(text: &str) -> EvaluationVerdict {
    if let Some(verdict) = verdict_from_json(text) {
        return verdict;
    }

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(first) = lines.next() else {
        return EvaluationVerdict::unfulfilled(text);
    };

    EvaluationVerdict {
        fulfilled: line_says_yes(first),
        explanation: lines.next().unwrap_or("").to_string(),
    }
}

// ============================================================================
// Plan Extraction
// ============================================================================

/// A modification plan returned by the planning call.
///
/// Plans are advisory context for code generation. They are never
/// validated or executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// The reply contained a JSON object or array.
    Structured(Value),
    /// Anything else, kept verbatim (trimmed).
    Opaque(String),
}

impl Plan {
    /// Render the plan for inclusion in a prompt.
    #[must_use]
    pub fn as_prompt_text(&self) -> String {
        match self {
            Plan::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Plan::Opaque(text) => text.clone(),
        }
    }

    /// The plan as a JSON value (opaque plans become a string).
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Plan::Structured(value) => value.clone(),
            Plan::Opaque(text) => Value::String(text.clone()),
        }
    }

    /// Number of steps when the plan is a JSON array.
    #[must_use]
    pub fn step_count(&self) -> Option<usize> {
        match self {
            Plan::Structured(Value::Array(steps)) => Some(steps.len()),
            Plan::Structured(Value::Object(map)) => {
                map.get("steps").and_then(Value::as_array).map(Vec::len)
            }
            _ => None,
        }
    }
}

fn parse_container(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Extract a plan from a planning reply.
///
/// Tries JSON on the fence-stripped reply, then on the span from the first
/// `{` or `[` to the last matching closer. Falls back to an opaque plan.
///
/// # Example
///
/// ```
/// use autoscad::parser::{extract_plan, Plan};
///
/// let plan = extract_plan("Plan:\n[{\"action\": \"add\", \"description\": \"add a hole\"}]");
/// assert_eq!(plan.step_count(), Some(1));
///
/// assert!(matches!(extract_plan("Make it taller."), Plan::Opaque(_)));
/// ```
#[must_use]
pub fn extract_plan(text: &str) -> Plan {
    let cleaned = extract_code(text);
    if let Some(value) = parse_container(&cleaned) {
        return Plan::Structured(value);
    }

    let start = cleaned.find(['{', '[']);
    if let Some(start) = start {
        let closer = if cleaned[start..].starts_with('{') {
            '}'
        } else {
            ']'
        };
        if let Some(end) = cleaned.rfind(closer) {
            if end > start {
                if let Some(value) = parse_container(&cleaned[start..=end]) {
                    return Plan::Structured(value);
                }
            }
        }
    }

    Plan::Opaque(text.trim().to_string())
}
