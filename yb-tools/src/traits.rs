use crate::error::{Result, ToolError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 8000;
pub const TRUNCATION_MARKER: &str = "\n...(truncated)";

/// What a human must have granted before the tool may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalScope {
    /// Runs without approval.
    None,
    /// Exact `(command, workdir)` pair taken from the `command` and `workdir` arguments.
    ShellCommand,
    /// The directory named by the `path` argument.
    TargetDirectory,
    /// The parent directory of the `path` argument.
    ParentDirectory,
}

pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub approval: ApprovalScope,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

pub fn to_llm_tool_def(tool: &dyn Tool) -> yb_llm::ToolDefinition {
    let spec = tool.spec();
    yb_llm::ToolDefinition {
        name: spec.name,
        description: spec.description,
        parameters: spec.parameters_schema,
    }
}

/// Truncates on a char boundary and appends [`TRUNCATION_MARKER`].
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Expands a leading `~` using `HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    let home = || std::env::var_os("HOME").map(PathBuf::from);
    if path == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}

pub(crate) fn require_string(args: &serde_json::Value, key: &str) -> Result<String> {
    let Some(v) = args.get(key) else {
        return Err(ToolError::InvalidArguments(format!("missing key: {key}")));
    };
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        serde_json::Value::String(_) => Err(ToolError::InvalidArguments(format!(
            "key {key} must not be empty"
        ))),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other}"
        ))),
    }
}

pub(crate) fn optional_string(args: &serde_json::Value, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other}"
        ))),
    }
}

pub(crate) fn optional_bool(args: &serde_json::Value, key: &str) -> Result<bool> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(false),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "key {key} must be boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_output("short", 10), "short");
        assert_eq!(truncate_output("héllo", 2), format!("hé{TRUNCATION_MARKER}"));
        assert_eq!(truncate_output("abc", 3), "abc");
    }

    #[test]
    fn empty_strings_are_missing() {
        let args = serde_json::json!({ "path": "", "workdir": "" });
        assert!(require_string(&args, "path").is_err());
        assert_eq!(optional_string(&args, "workdir").unwrap(), None);
    }
}
