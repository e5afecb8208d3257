//! Lenient JSON extraction from LLM responses.
//!
//! Models wrap JSON in reasoning tags, prose, or fenced code blocks, and emit
//! near-JSON with trailing commas or Python literals. Recovery order:
//! strip reasoning wrappers, direct parse, first balanced object/array,
//! fenced blocks, then light fixes. On total failure the caller gets an error
//! carrying a preview of the raw text.

use regex::Regex;
use serde_json::Value;

use crate::error::WorkflowError;

/// Max characters of raw text kept in a parse-failure message.
const PREVIEW_LEN: usize = 200;

/// Extracts a JSON value from LLM response text.
///
/// Steps, first success wins:
/// 1. Remove `<think>…</think>` / `<reasoning>…</reasoning>` wrappers
///    (unclosed `<think>` drops everything after it).
/// 2. Direct parse of the stripped text.
/// 3. First balanced `{…}` or `[…]` substring.
/// 4. Fenced ```json blocks in the original text.
/// 5. Light fixes on the candidate: trailing commas, `True`/`False`/`None`,
///    bare newlines inside string values.
///
/// Arrays are returned as-is; callers expecting objects handle both.
pub fn extract_json(text: &str) -> Result<Value, WorkflowError> {
    if text.trim().is_empty() {
        return Err(WorkflowError::ParseFailure("empty response".into()));
    }

    let stripped = strip_wrappers(text);
    let trimmed = stripped.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    for candidate in [balanced_slice(trimmed, '{', '}'), balanced_slice(trimmed, '[', ']')]
        .into_iter()
        .flatten()
    {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            return Ok(v);
        }
        if let Ok(v) = serde_json::from_str::<Value>(&apply_fixes(candidate)) {
            return Ok(v);
        }
    }

    if let Some(block) = fenced_block(text) {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(v);
        }
        if let Ok(v) = serde_json::from_str::<Value>(&apply_fixes(block.trim())) {
            return Ok(v);
        }
    }

    let preview: String = text.chars().take(PREVIEW_LEN).collect();
    Err(WorkflowError::ParseFailure(format!(
        "no JSON found in response: {preview}"
    )))
}

/// Removes reasoning wrappers the adapters may have missed.
fn strip_wrappers(text: &str) -> String {
    let think = Regex::new(r"(?s)<think>.*?</think>").expect("static regex");
    let mut out = think.replace_all(text, "").to_string();
    // Unclosed <think>: drop everything after it.
    if let Some(pos) = out.find("<think>") {
        out.truncate(pos);
    }
    let reasoning = Regex::new(r"(?s)<reasoning>.*?</reasoning>").expect("static regex");
    out = reasoning.replace_all(&out, "").to_string();
    out.replace("<output>", "").replace("</output>", "")
}

/// Returns the first balanced region starting at the first `open` and ending
/// at its matching `close`, respecting strings and escapes.
fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns the body of the first fenced code block (```json preferred).
fn fenced_block(text: &str) -> Option<&str> {
    let after = text.split_once("```json").map(|(_, rest)| rest).or_else(|| {
        text.split_once("```").map(|(_, rest)| rest)
    })?;
    let end = after.find("```")?;
    Some(&after[..end])
}

/// Light structural fixes for near-JSON.
fn apply_fixes(candidate: &str) -> String {
    let trailing_comma = Regex::new(r",\s*([}\]])").expect("static regex");
    let mut fixed = trailing_comma.replace_all(candidate, "$1").to_string();
    for (from, to) in [
        (r"\bTrue\b", "true"),
        (r"\bFalse\b", "false"),
        (r"\bNone\b", "null"),
    ] {
        let re = Regex::new(from).expect("static regex");
        fixed = re.replace_all(&fixed, to).to_string();
    }
    escape_bare_newlines(&fixed)
}

/// Escapes raw newlines that appear inside string literals.
fn escape_bare_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_json_parses_directly() {
        let v = extract_json(r#"{"action": "COMPLETE", "parameters": {}}"#).unwrap();
        assert_eq!(v["action"], "COMPLETE");
    }

    #[test]
    fn think_block_is_stripped() {
        let v = extract_json("<think>let me reason\nabout this</think>{\"a\": 1}").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn unclosed_think_drops_tail() {
        let v = extract_json("prefix {\"a\": 1} <think>never closed {\"b\": 2}").unwrap();
        assert_eq!(v["a"], 1);
        assert!(v.get("b").is_none());
    }

    #[test]
    fn balanced_object_extracted_from_prose() {
        let v = extract_json("Sure! Here is the plan: {\"steps\": [\"a\", \"b\"]} hope it helps")
            .unwrap();
        assert_eq!(v["steps"][0], "a");
    }

    #[test]
    fn nested_braces_in_strings_do_not_confuse_extraction() {
        let v = extract_json(r#"{"content": "fn main() { println!(\"{}\", 1); }"}"#).unwrap();
        assert!(v["content"].as_str().unwrap().contains("println"));
    }

    #[test]
    fn fenced_block_parses() {
        let text = "Here you go:\n```json\n{\"action\": \"READ_FILE\"}\n```\n";
        let v = extract_json(text).unwrap();
        assert_eq!(v["action"], "READ_FILE");
    }

    #[test]
    fn trailing_comma_and_python_literals_fixed() {
        let v = extract_json(r#"{"ok": True, "steps": ["a", "b",], "none": None,}"#).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["none"], Value::Null);
        assert_eq!(v["steps"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn bare_newline_inside_string_escaped() {
        let v = extract_json("{\"summary\": \"line one\nline two\"}").unwrap();
        assert_eq!(v["summary"], "line one\nline two");
    }

    #[test]
    fn array_response_returned_as_is() {
        let v = extract_json("[1, 2, 3]").unwrap();
        assert_eq!(v.as_array().unwrap().len(), 3);
    }

    #[test]
    fn total_failure_includes_preview() {
        let err = extract_json("I could not decide on an action.").unwrap_err();
        assert!(err.to_string().contains("could not decide"));
    }

    #[test]
    fn empty_input_is_parse_failure() {
        assert!(extract_json("   ").is_err());
    }
}
