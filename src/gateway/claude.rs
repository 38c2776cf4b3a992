use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::stream::{ContentBlock, StreamEvent, describe_tool_use};
use super::{AgentGateway, AgentRequest};
use crate::errors::GatewayError;
use crate::util::{extract_json_object, truncate_chars};

/// Runs each request as a one-shot `claude --print` process and reads the
/// stream-json events it writes to stdout.
#[derive(Debug, Clone)]
pub struct ClaudeGateway {
    cmd: String,
    skip_permissions: bool,
}

impl ClaudeGateway {
    pub fn new(cmd: impl Into<String>, skip_permissions: bool) -> Self {
        Self {
            cmd: cmd.into(),
            skip_permissions,
        }
    }

    pub fn command_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            request.model.clone(),
        ];
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        } else {
            args.push("--permission-mode".to_string());
            args.push("acceptEdits".to_string());
        }
        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }
        args.push("--json-schema".to_string());
        args.push(request.schema.to_string());
        args
    }

    /// Instructions plus the schema restated in the prompt, for CLI versions
    /// that ignore `--json-schema`.
    pub fn prompt_for(request: &AgentRequest) -> String {
        format!(
            "{}\n\nRespond with a single JSON object matching this schema:\n```json\n{}\n```\n",
            request.instructions,
            serde_json::to_string_pretty(&request.schema).unwrap_or_default()
        )
    }
}

/// Prefer the CLI's validated structured output, falling back to the first
/// JSON object in the final result text.
pub fn structured_from_result(
    structured: Option<Value>,
    result_text: Option<&str>,
) -> Option<Value> {
    structured.or_else(|| {
        result_text
            .and_then(extract_json_object)
            .and_then(|json| serde_json::from_str(json).ok())
    })
}

#[async_trait]
impl AgentGateway for ClaudeGateway {
    async fn invoke(&self, request: &AgentRequest) -> Result<Option<Value>, GatewayError> {
        let args = self.command_args(request);
        debug!(
            cmd = %self.cmd,
            model = %request.model,
            cwd = %request.cwd.display(),
            "Spawning agent"
        );

        let start = Instant::now();
        let mut child = Command::new(&self.cmd)
            .args(&args)
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GatewayError::Spawn {
                cmd: self.cmd.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(Self::prompt_for(request).as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let mut structured = None;
        let mut result_text = None;
        let mut reported_error = false;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<StreamEvent>(&line) else {
                    continue;
                };
                match event {
                    StreamEvent::Assistant { message, .. } => {
                        for block in message.content {
                            match block {
                                ContentBlock::ToolUse { name, input } => {
                                    debug!("{}", describe_tool_use(&name, &input));
                                }
                                ContentBlock::Text { text } => {
                                    debug!(text = %truncate_chars(text.trim(), 80), "Agent says");
                                }
                                ContentBlock::Other => {}
                            }
                        }
                    }
                    StreamEvent::Result {
                        result,
                        is_error,
                        structured_output,
                        ..
                    } => {
                        reported_error = is_error;
                        result_text = result;
                        structured = structured_output;
                    }
                    StreamEvent::User { .. } | StreamEvent::System { .. } => {}
                }
            }
        }

        let status = child.wait().await?;
        info!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            exit = status.code().unwrap_or(-1),
            "Agent finished"
        );
        if !status.success() {
            return Err(GatewayError::NonZeroExit {
                exit_code: status.code().unwrap_or(-1),
            });
        }
        if reported_error {
            warn!("Agent reported an error result");
            return Ok(None);
        }
        Ok(structured_from_result(structured, result_text.as_deref()))
    }
}
