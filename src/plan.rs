//! Execution-sequence types and lenient JSON recovery.
//!
//! The planning LLM is asked for a JSON array of steps but its output is not
//! guaranteed well-formed. Recovery is an explicit, ordered list of fallback
//! parse strategies, each independently testable; any remaining failure
//! yields an empty sequence, never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One planned unit of work for a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStep {
    pub tool_id: String,
    pub parameters: serde_json::Map<String, Value>,
    pub reason: String,
    pub expected_output: String,
}

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\s*").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Remove markdown code-fence markers.
pub fn strip_code_fences(raw: &str) -> String {
    CODE_FENCE.replace_all(raw, "").into_owned()
}

/// Extract the first array-of-objects substring, if any.
///
/// A bracket-depth scan rather than a pattern match: step parameters may
/// themselves contain arrays and objects, and the array may carry a trailing
/// comma after its last element. Brackets inside string literals are ignored.
pub fn extract_array(raw: &str) -> Option<String> {
    let start = raw
        .char_indices()
        .find(|&(i, c)| c == '[' && raw[i + 1..].trim_start().starts_with('{'))
        .map(|(i, _)| i)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
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
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(raw[start..=start + offset].trim().to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove trailing commas before closing brackets/braces.
pub fn strip_trailing_commas(raw: &str) -> String {
    TRAILING_COMMA.replace_all(raw, "$1").into_owned()
}

/// Collapse whitespace and normalize single quotes to double quotes.
pub fn normalize_quotes(raw: &str) -> String {
    WHITESPACE.replace_all(raw, " ").replace('\'', "\"")
}

/// Parse a raw planning response into a validated step sequence.
///
/// Strategies are applied in order, stopping at the first success:
/// strip code fences, extract the array substring, strict parse, retry with
/// trailing commas stripped, retry with quotes normalized. Structural
/// violations discard the whole sequence.
pub fn parse_step_sequence(raw: &str) -> Vec<ExecutionStep> {
    let cleaned = strip_code_fences(raw);
    let Some(array) = extract_array(&cleaned) else {
        warn!("no JSON array found in planning response");
        return vec![];
    };

    let parsed = serde_json::from_str::<Value>(&array)
        .or_else(|_| {
            debug!("strict plan parse failed, stripping trailing commas");
            serde_json::from_str::<Value>(&strip_trailing_commas(&array))
        })
        .or_else(|_| {
            debug!("retry failed, normalizing whitespace and quotes");
            serde_json::from_str::<Value>(&normalize_quotes(&strip_trailing_commas(&array)))
        });

    match parsed {
        Ok(value) => validate_sequence(value),
        Err(e) => {
            warn!("plan JSON unrecoverable: {}", e);
            vec![]
        }
    }
}

/// Structural validation: a list of records each carrying the full required
/// field set, with `parameters` itself a record. Any violation discards the
/// whole sequence, never a partial plan.
fn validate_sequence(value: Value) -> Vec<ExecutionStep> {
    let Value::Array(items) = value else {
        warn!("parsed plan is not a list");
        return vec![];
    };

    let mut steps = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let Value::Object(map) = item else {
            warn!("plan step {} is not a record", i);
            return vec![];
        };

        let tool_id = map.get("tool_id").and_then(Value::as_str);
        let reason = map.get("reason").and_then(Value::as_str);
        let expected_output = map.get("expected_output").and_then(Value::as_str);
        let parameters = map.get("parameters").and_then(Value::as_object);

        match (tool_id, parameters, reason, expected_output) {
            (Some(tool_id), Some(parameters), Some(reason), Some(expected_output)) => {
                steps.push(ExecutionStep {
                    tool_id: tool_id.to_string(),
                    parameters: parameters.clone(),
                    reason: reason.to_string(),
                    expected_output: expected_output.to_string(),
                });
            }
            _ => {
                warn!("plan step {} missing required fields, discarding sequence", i);
                return vec![];
            }
        }
    }

    debug!("parsed tool sequence with {} steps", steps.len());
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = r#"[
        {"tool_id": "search_general_search",
         "parameters": {"query": "rust"},
         "reason": "need current info",
         "expected_output": "search results"}
    ]"#;

    #[test]
    fn parses_well_formed_plan() {
        let steps = parse_step_sequence(VALID);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool_id, "search_general_search");
        assert_eq!(steps[0].parameters["query"], json!("rust"));
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```json\n{VALID}\n```");
        assert_eq!(parse_step_sequence(&fenced).len(), 1);
    }

    #[test]
    fn extracts_array_from_surrounding_prose() {
        let wrapped = format!("Here is the plan you asked for:\n{VALID}\nLet me know!");
        assert_eq!(parse_step_sequence(&wrapped).len(), 1);
    }

    #[test]
    fn recovers_from_trailing_commas() {
        let raw = r#"[
            {"tool_id": "a", "parameters": {"q": "x",}, "reason": "r", "expected_output": "o",},
        ]"#;
        let steps = parse_step_sequence(raw);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool_id, "a");
    }

    #[test]
    fn nested_collections_in_parameters_survive_extraction() {
        let raw = r#"Here is the plan:
        [{"tool_id": "a",
          "parameters": {"items": [{"k": 1}, {"k": 2}], "query": "x"},
          "reason": "r",
          "expected_output": "o"}]
        Done."#;
        let steps = parse_step_sequence(raw);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].parameters["items"][1]["k"], json!(2));
    }

    #[test]
    fn brackets_inside_string_values_do_not_end_extraction() {
        let raw = r#"[{"tool_id": "a", "parameters": {"q": "odd }] text"}, "reason": "r", "expected_output": "o"}]"#;
        let steps = parse_step_sequence(raw);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].parameters["q"], json!("odd }] text"));
    }

    #[test]
    fn recovers_from_single_quotes() {
        let raw = "[{'tool_id': 'a', 'parameters': {}, 'reason': 'r', 'expected_output': 'o'}]";
        let steps = parse_step_sequence(raw);
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn missing_required_fields_discards_whole_sequence() {
        // Trailing comma is trimmed, then structural validation rejects the
        // step for its missing fields.
        let raw = r#"[{"tool_id":"x"},]"#;
        assert!(parse_step_sequence(raw).is_empty());
    }

    #[test]
    fn one_bad_step_discards_all_steps() {
        let raw = r#"[
            {"tool_id": "a", "parameters": {}, "reason": "r", "expected_output": "o"},
            {"tool_id": "b", "parameters": "not a record", "reason": "r", "expected_output": "o"}
        ]"#;
        assert!(parse_step_sequence(raw).is_empty());
    }

    #[test]
    fn garbage_yields_empty_not_error() {
        assert!(parse_step_sequence("").is_empty());
        assert!(parse_step_sequence("no array here").is_empty());
        assert!(parse_step_sequence("[{unclosed").is_empty());
        assert!(parse_step_sequence("[1, 2, 3]").is_empty());
    }

    #[test]
    fn individual_stages() {
        assert_eq!(strip_code_fences("```json\n[]\n```"), "[]\n");
        assert_eq!(strip_trailing_commas(r#"{"a": 1,}"#), r#"{"a": 1}"#);
        assert_eq!(normalize_quotes("{'a':\n 1}"), "{\"a\": 1}");
        assert_eq!(
            extract_array("x [ {\"a\": 1} ] y").as_deref(),
            Some("[ {\"a\": 1} ]")
        );
        assert!(extract_array("[1, 2]").is_none());
    }
}
