use super::cycle::{FixKind, ProposedFix};
use crate::learning::LearningPattern;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt::Write as _;

pub(crate) const ORIENT_SYSTEM: &str = "You diagnose defects in a browser IDE written in \
TypeScript and React. Given an observation of a reported issue, find the most likely root \
cause. Reply with JSON only: {\"analysis\": string, \"suggestions\": [string]}.";

pub(crate) const DECIDE_SYSTEM: &str = "You turn a diagnosis into concrete file changes for a \
browser IDE. Reply with JSON only: {\"fixes\": [{\"filePath\": string, \
\"type\": \"create\" | \"edit\" | \"delete\", \"explanation\": string, \
\"oldStr\": string?, \"newStr\": string?}]}. For edits, oldStr must appear exactly once \
in the file. For creates, newStr is the full file content.";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OrientReply {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Entries stay raw so one malformed fix cannot sink the others.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DecideReply {
    #[serde(default)]
    pub fixes: Vec<Value>,
}

/// Reads one fix from a model reply. Each field takes the first key present among its
/// spellings, so a reply carrying both `filePath` and `path` is still accepted.
pub(crate) fn parse_fix(entry: &Value) -> Result<ProposedFix, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "fix is not a JSON object".to_string())?;
    let file_path = first_string(obj, &["filePath", "file_path", "path"])
        .ok_or_else(|| "fix has no file path".to_string())?;
    let kind: FixKind = first_string(obj, &["type", "kind"])
        .ok_or_else(|| "fix has no type".to_string())?
        .parse()?;
    Ok(ProposedFix {
        file_path,
        kind,
        explanation: first_string(obj, &["explanation"]).unwrap_or_default(),
        old_str: first_string(obj, &["oldStr", "old_str"]),
        new_str: first_string(obj, &["newStr", "new_str", "content"]),
    })
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

pub(crate) fn orient_prompt(observation: &str, similar: &[LearningPattern]) -> String {
    let mut out = format!("Observation:\n{observation}\n");
    if !similar.is_empty() {
        out.push_str("\nPrior outcomes for similar issues:\n");
        for p in similar {
            let _ = writeln!(
                out,
                "- {} (success rate {:.0}% over {} cycles): {}",
                p.category,
                p.success_rate * 100.0,
                p.total_uses,
                if p.description.is_empty() { "no notes" } else { p.description.as_str() }
            );
        }
    }
    out
}

pub(crate) fn decide_prompt(observation: &str, analysis: &str, suggestions: &[String]) -> String {
    let mut out = format!("Observation:\n{observation}\n\nRoot cause analysis:\n{analysis}\n");
    if !suggestions.is_empty() {
        out.push_str("\nSuggestions:\n");
        for s in suggestions {
            let _ = writeln!(out, "- {s}");
        }
    }
    out
}

/// Pulls a JSON object out of a model reply: a fenced block, the whole text, or the span
/// from the first `{` to the last `}`.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced) {
            return Some(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

pub(crate) fn parse_reply<T: DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|v| serde_json::from_value(v).ok())
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}
