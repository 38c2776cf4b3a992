//! Events emitted by the Claude CLI in `--output-format stream-json` mode.

use serde::Deserialize;
use serde_json::Value;

use crate::util::truncate_chars;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        /// Present when the CLI validated output against `--json-schema`.
        #[serde(default)]
        structured_output: Option<Value>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// One-line description of a tool call for progress logs.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" | "Write" | "Edit" => {
            let path = field("file_path").map(last_two_components).unwrap_or("file");
            format!("{name}: {path}")
        }
        "Bash" => format!("Bash: {}", truncate_chars(field("command").unwrap_or("command"), 60)),
        "Glob" | "Grep" => {
            format!("{name}: {}", truncate_chars(field("pattern").unwrap_or("*"), 40))
        }
        "Skill" => format!("Skill: {}", field("skill").or(field("name")).unwrap_or("skill")),
        _ => name.to_string(),
    }
}

fn last_two_components(path: &str) -> &str {
    match path.rmatch_indices('/').nth(1) {
        Some((idx, _)) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_use() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/repo/src/lib.rs"},"id":"1"}]},"session_id":"s"}"#;
        let StreamEvent::Assistant { message, .. } = serde_json::from_str(json).unwrap() else {
            panic!("Expected Assistant event");
        };
        let ContentBlock::ToolUse { name, input } = &message.content[0] else {
            panic!("Expected ToolUse");
        };
        assert_eq!(describe_tool_use(name, input), "Read: src/lib.rs");
    }

    #[test]
    fn test_parse_result_with_structured_output() {
        let json = r#"{"type":"result","subtype":"success","is_error":false,"result":"done","structured_output":{"status":"SOLVED"}}"#;
        let StreamEvent::Result {
            structured_output,
            result,
            ..
        } = serde_json::from_str(json).unwrap()
        else {
            panic!("Expected Result event");
        };
        assert_eq!(result.as_deref(), Some("done"));
        assert_eq!(structured_output.unwrap()["status"], "SOLVED");
    }

    #[test]
    fn test_unknown_content_block_is_tolerated() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"hi"}]}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StreamEvent::Assistant { .. }));
    }

    #[test]
    fn test_user_and_system_events_parse() {
        let user = r#"{"type":"user","message":{"content":[]},"tool_use_result":{}}"#;
        assert!(matches!(serde_json::from_str(user).unwrap(), StreamEvent::User {}));
        let system = r#"{"type":"system","subtype":"init","cwd":"/x"}"#;
        assert!(matches!(serde_json::from_str(system).unwrap(), StreamEvent::System { .. }));
    }

    #[test]
    fn test_describe_bash_truncates() {
        let input = serde_json::json!({"command": "x".repeat(100)});
        let desc = describe_tool_use("Bash", &input);
        assert!(desc.ends_with("..."));
        assert!(desc.len() < 80);
    }
}
