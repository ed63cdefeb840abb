//! Claude CLI stream-json decoding
//!
//! Turns one line of `--output-format stream-json` output into zero or more
//! [`Fact`]s. Decoding is pure: the same line always yields the same facts,
//! and running state (accumulated text, current session) lives with the
//! caller.
//!
//! The CLI interleaves non-protocol diagnostics with its JSON output, so
//! anything that is not a JSON object is dropped without a signal. Fields
//! with an unexpected type are treated as absent.

use serde_json::Value;

use super::types::{
    Fact, PermissionDenialFact, QuestionFact, QuestionOption, ResultFact, ToolResultFact,
    ToolUseFact,
};

/// Maximum length of a tool input detail in a denial summary
const DENIAL_DETAIL_MAX_CHARS: usize = 80;

/// Everything extracted from one protocol line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLine {
    /// Session id carried by the line; supersedes any earlier one
    pub session_id: Option<String>,
    pub facts: Vec<Fact>,
}

/// Decode a raw output line. Returns `None` for non-protocol lines.
pub fn decode_line(line: &str) -> Option<DecodedLine> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let msg: Value = serde_json::from_str(trimmed).ok()?;
    msg.is_object().then(|| decode_value(&msg))
}

/// Decode an already-parsed protocol object
pub fn decode_value(msg: &Value) -> DecodedLine {
    let session_id = str_field(msg, "session_id").map(str::to_string);

    if is_init(msg) {
        return DecodedLine {
            session_id,
            facts: vec![Fact::Init(msg.clone())],
        };
    }

    let mut facts = Vec::new();
    facts.extend(extract_token(msg));
    facts.extend(extract_assistant_text(msg));
    facts.extend(extract_tool_uses(msg));
    facts.extend(extract_tool_results(msg));
    facts.extend(extract_result(msg));

    DecodedLine { session_id, facts }
}

fn is_init(msg: &Value) -> bool {
    str_field(msg, "type") == Some("system") && str_field(msg, "subtype") == Some("init")
}

// ============================================================================
// Field helpers
// ============================================================================

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn has_type(value: &Value, expected: &str) -> bool {
    str_field(value, "type") == Some(expected)
}

/// Content blocks of `message.content` when it is an array
fn content_blocks(msg: &Value) -> &[Value] {
    msg.get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Keep JSON scalars and structures; anything else becomes null
fn normalize_input(value: Option<&Value>) -> Value {
    match value {
        Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => v.clone(),
        Some(v @ (Value::Object(_) | Value::Array(_))) => v.clone(),
        _ => Value::Null,
    }
}

/// Text of a tool_result `content`: a string or an array of text blocks
fn tool_result_content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                other if has_type(other, "text") => str_field(other, "text"),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

// ============================================================================
// Extractors
// ============================================================================

fn extract_token(msg: &Value) -> Option<Fact> {
    if !has_type(msg, "stream_event") {
        return None;
    }
    let event = msg.get("event")?;

    let text = match str_field(event, "type")? {
        "content_block_delta" => {
            let delta = event.get("delta")?;
            if !has_type(delta, "text_delta") {
                return None;
            }
            str_field(delta, "text")?
        }
        "content_block_start" => {
            let block = event.get("content_block")?;
            if !has_type(block, "text") {
                return None;
            }
            str_field(block, "text")?
        }
        _ => return None,
    };

    (!text.is_empty()).then(|| Fact::Token(text.to_string()))
}

fn extract_assistant_text(msg: &Value) -> Option<Fact> {
    if !has_type(msg, "assistant") {
        return None;
    }

    let text = match msg.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|block| has_type(block, "text"))
            .filter_map(|block| str_field(block, "text"))
            .collect::<String>(),
        _ => String::new(),
    };

    (!text.is_empty()).then_some(Fact::Assistant(text))
}

fn extract_tool_uses(msg: &Value) -> Vec<Fact> {
    if !has_type(msg, "assistant") {
        return Vec::new();
    }
    let parent_tool_use_id = str_field(msg, "parent_tool_use_id").map(str::to_string);

    let mut facts = Vec::new();
    for block in content_blocks(msg).iter().filter(|b| has_type(b, "tool_use")) {
        let tool = ToolUseFact {
            id: str_field(block, "id").unwrap_or_default().to_string(),
            name: str_field(block, "name").unwrap_or_default().to_string(),
            input: normalize_input(block.get("input")),
            parent_tool_use_id: parent_tool_use_id.clone(),
        };

        let question = is_question_tool(&tool.name).then(|| extract_question(&tool));
        facts.push(Fact::ToolUse(tool));
        if let Some(question) = question {
            facts.push(Fact::Question(question));
        }
    }
    facts
}

/// `AskUserQuestion`, `ask_user_question`, `mcp__ui__AskUserQuestion`, ...
fn is_question_tool(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    normalized.contains("askuserquestion")
}

fn extract_question(tool: &ToolUseFact) -> QuestionFact {
    let first = tool
        .input
        .get("questions")
        .and_then(Value::as_array)
        .and_then(|questions| questions.first());
    // Single-question payloads put the fields at the top level
    let source = first.unwrap_or(&tool.input);

    let options = source
        .get("options")
        .and_then(Value::as_array)
        .map(|options| options.iter().filter_map(parse_option).collect())
        .unwrap_or_default();

    QuestionFact {
        tool_use_id: tool.id.clone(),
        question: str_field(source, "question").unwrap_or_default().to_string(),
        header: str_field(source, "header").map(str::to_string),
        options,
        multi_select: bool_field(source, "multiSelect") || bool_field(source, "multi_select"),
    }
}

fn parse_option(option: &Value) -> Option<QuestionOption> {
    match option {
        Value::String(label) => Some(QuestionOption {
            label: label.clone(),
            description: None,
        }),
        Value::Object(_) => Some(QuestionOption {
            label: str_field(option, "label")?.to_string(),
            description: str_field(option, "description").map(str::to_string),
        }),
        _ => None,
    }
}

fn extract_tool_results(msg: &Value) -> Vec<Fact> {
    if !has_type(msg, "user") {
        return Vec::new();
    }
    let tracked = msg.get("tool_use_result");

    content_blocks(msg)
        .iter()
        .filter(|block| has_type(block, "tool_result"))
        .map(|block| {
            let mut output = tool_result_content_text(block.get("content"));
            if output.is_empty() {
                output = tracked_output(tracked);
            }
            Fact::ToolResult(ToolResultFact {
                tool_use_id: str_field(block, "tool_use_id").unwrap_or_default().to_string(),
                output,
                is_error: bool_field(block, "is_error"),
                interrupted: tracked.map(|t| bool_field(t, "interrupted")).unwrap_or(false),
            })
        })
        .collect()
}

/// Fallback output from the separately tracked `tool_use_result`
fn tracked_output(tracked: Option<&Value>) -> String {
    match tracked {
        Some(Value::String(s)) => s.clone(),
        Some(t @ Value::Object(_)) => [str_field(t, "stdout"), str_field(t, "stderr")]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn extract_result(msg: &Value) -> Vec<Fact> {
    if !has_type(msg, "result") {
        return Vec::new();
    }

    let denials: Vec<PermissionDenialFact> = msg
        .get("permission_denials")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(parse_denial).collect())
        .unwrap_or_default();

    let result = ResultFact {
        result: str_field(msg, "result").map(str::to_string),
        is_error: bool_field(msg, "is_error") || !denials.is_empty(),
        subtype: str_field(msg, "subtype").map(str::to_string),
        total_cost_usd: msg.get("total_cost_usd").and_then(Value::as_f64),
        duration_ms: msg.get("duration_ms").and_then(Value::as_u64),
        num_turns: msg.get("num_turns").and_then(Value::as_u64),
        permission_denials: denials.clone(),
    };

    let mut facts = vec![Fact::Result(result)];
    if !denials.is_empty() {
        facts.push(Fact::Permission(denials));
    }
    facts
}

fn parse_denial(entry: &Value) -> Option<PermissionDenialFact> {
    if !entry.is_object() {
        return None;
    }
    Some(PermissionDenialFact {
        tool_name: str_field(entry, "tool_name").unwrap_or("unknown").to_string(),
        tool_use_id: str_field(entry, "tool_use_id").unwrap_or_default().to_string(),
        tool_input: normalize_input(entry.get("tool_input")),
    })
}

// ============================================================================
// Summaries
// ============================================================================

/// Human-readable one-liner for a set of denials, e.g.
/// `Permission denied: Bash (git push); Write (src/lib.rs)`
pub fn summarize_denials(denials: &[PermissionDenialFact]) -> String {
    let parts: Vec<String> = denials
        .iter()
        .map(|denial| match denial_detail(&denial.tool_input) {
            Some(detail) => format!("{} ({detail})", denial.tool_name),
            None => denial.tool_name.clone(),
        })
        .collect();
    format!("Permission denied: {}", parts.join("; "))
}

fn denial_detail(input: &Value) -> Option<String> {
    let detail = ["command", "file_path", "path", "url", "pattern"]
        .iter()
        .find_map(|key| str_field(input, key))?;

    if detail.chars().count() > DENIAL_DETAIL_MAX_CHARS {
        let truncated: String = detail.chars().take(DENIAL_DETAIL_MAX_CHARS).collect();
        Some(format!("{truncated}…"))
    } else {
        Some(detail.to_string())
    }
}
