use crate::error::Result;
use crate::traits::{
    ApprovalScope, Tool, ToolSpec, expand_home, optional_string, require_string, truncate_output,
};
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs one command through `/bin/sh -c` under a hard wall-clock timeout.
///
/// Spawn failures and timeouts are reported inside the payload as
/// `{error, command, workdir}` so the model sees them as a tool result.
pub struct ShellTool {
    timeout: Duration,
    max_chars: usize,
}

impl ShellTool {
    pub fn new(timeout: Duration, max_chars: usize) -> Self {
        Self { timeout, max_chars }
    }

    async fn run(&self, command: &str, workdir: Option<&str>) -> serde_json::Value {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = workdir {
            cmd.current_dir(expand_home(dir));
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return error_payload(e.to_string(), command, workdir),
        };

        // Dropping the `wait_with_output` future on timeout drops the child,
        // and `kill_on_drop` terminates it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "shell command timed out");
                error_payload(
                    format!("timed out after {}s", self.timeout.as_secs()),
                    command,
                    workdir,
                )
            }
            Ok(Err(e)) => error_payload(e.to_string(), command, workdir),
            Ok(Ok(output)) => json!({
                "command": command,
                "workdir": workdir,
                "returncode": output.status.code().unwrap_or(-1),
                "stdout": truncate_output(&String::from_utf8_lossy(&output.stdout), self.max_chars),
                "stderr": truncate_output(&String::from_utf8_lossy(&output.stderr), self.max_chars),
            }),
        }
    }
}

fn error_payload(error: String, command: &str, workdir: Option<&str>) -> serde_json::Value {
    json!({ "error": error, "command": command, "workdir": workdir })
}

#[async_trait]
impl Tool for ShellTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "run_shell".to_string(),
            description: "Run a shell command and return stdout, stderr, and exit code.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "workdir": { "type": "string" }
                },
                "required": ["command"]
            }),
            approval: ApprovalScope::ShellCommand,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let command = require_string(&arguments, "command")?;
        let workdir = optional_string(&arguments, "workdir")?;
        Ok(self.run(&command, workdir.as_deref()).await)
    }
}

/// How a `run_shell` payload ended, for failure notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutcome {
    Succeeded,
    Failed { code: i64, detail: String },
    Errored(String),
}

impl ShellOutcome {
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        if let Some(error) = payload.get("error").and_then(|v| v.as_str()) {
            return Self::Errored(error.to_string());
        }
        let code = payload
            .get("returncode")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if code == 0 {
            return Self::Succeeded;
        }
        let pick = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let detail = pick("stderr")
            .or_else(|| pick("stdout"))
            .unwrap_or_else(|| "no output".to_string());
        Self::Failed { code, detail }
    }
}
