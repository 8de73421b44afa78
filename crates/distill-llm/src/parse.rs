//! Turning raw tool output into a validated [`AnalysisResult`].

use distill_core::AnalysisResult;
use serde_json::Value;

use crate::error::AnalysisError;

const REQUIRED_FIELDS: &[&str] = &[
    "semantic_summary",
    "content_type",
    "content_density",
    "temporal_relevance",
];

/// Optional fields where an empty string or null means "absent".
const CLEARABLE_FIELDS: &[&str] = &[
    "suggested_topic",
    "dialogue_format",
    "key_topics",
    "key_entities",
    "segments",
];

/// Full pipeline: unwrap the response, find the JSON, validate it.
pub fn parse_output(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    let response = extract_response(raw);
    validate(extract_json(&response)?)
}

/// Unwrap a `{"response": ...}` envelope or a `## Response` section.
/// Anything else is returned trimmed.
pub fn extract_response(output: &str) -> String {
    let trimmed = output.trim();
    if let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(Value::String(response)) = envelope.get("response") {
            return response.trim().to_string();
        }
    }

    let mut in_response = false;
    let mut lines = Vec::new();
    for line in output.lines() {
        let t = line.trim();
        if t == "## Response" {
            in_response = true;
            continue;
        }
        if in_response {
            if t.starts_with("## ") {
                break;
            }
            lines.push(line);
        }
    }
    if !lines.is_empty() {
        return lines.join("\n").trim().to_string();
    }
    trimmed.to_string()
}

/// Locate a JSON object in free-form text. Tried in order: the last
/// ```` ```json ```` fence, the last bare fence holding an object, the last
/// balanced `{...}`, then the whole text.
pub fn extract_json(text: &str) -> Result<Value, AnalysisError> {
    let fences = fenced_blocks(text);
    let tagged = fences.iter().rev().find(|(lang, _)| lang.eq_ignore_ascii_case("json"));
    if let Some(v) = tagged.and_then(|(_, body)| parse_object(body)) {
        return Ok(v);
    }
    let bare = fences
        .iter()
        .rev()
        .find(|(lang, body)| lang.is_empty() && body.trim_start().starts_with('{'));
    if let Some(v) = bare.and_then(|(_, body)| parse_object(body)) {
        return Ok(v);
    }
    if let Some(v) = last_balanced_object(text).and_then(parse_object) {
        return Ok(v);
    }
    parse_object(text).ok_or_else(|| {
        let preview: String = text.chars().take(200).collect();
        AnalysisError::Parse(format!("no JSON object found in: {preview}"))
    })
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// `(language, body)` for every ```` ``` ```` fence.
fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    text.split("```")
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, inner)| match inner.split_once('\n') {
            Some((lang, body)) if !lang.trim().contains(' ') && !lang.contains('{') => {
                (lang.trim(), body)
            }
            _ => ("", inner),
        })
        .collect()
}

/// Last `{...}` span with balanced braces, scanning from the end.
fn last_balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in text.char_indices().rev() {
        match c {
            '}' => {
                if depth == 0 {
                    end = Some(i + 1);
                }
                depth += 1;
            }
            '{' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return end.map(|e| &text[i..e]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Check required fields and closed enums, then build the typed result.
pub fn validate(mut value: Value) -> Result<AnalysisResult, AnalysisError> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| AnalysisError::Parse("analysis output is not a JSON object".into()))?;
    for field in REQUIRED_FIELDS {
        if obj.get(*field).map_or(true, Value::is_null) {
            return Err(AnalysisError::Parse(format!("missing required field `{field}`")));
        }
    }
    for field in CLEARABLE_FIELDS {
        let empty = match obj.get(*field) {
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            _ => false,
        };
        if empty {
            obj.remove(*field);
        }
    }

    let result: AnalysisResult =
        serde_json::from_value(value).map_err(|e| AnalysisError::Parse(e.to_string()))?;
    if result.semantic_summary.trim().is_empty() {
        return Err(AnalysisError::Parse("empty semantic_summary".into()));
    }
    Ok(result)
}
