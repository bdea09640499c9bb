use crate::error::{Result, ToolError};
use crate::traits::{
    ApprovalScope, Tool, ToolSpec, expand_home, optional_bool, require_string, truncate_output,
};
use async_trait::async_trait;
use serde_json::json;

fn path_only_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string" } },
        "required": ["path"]
    })
}

/// Lists a directory as `{path, entries: [{name, type}]}`, sorted by name.
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_dir".to_string(),
            description: "List entries in a directory path.".to_string(),
            parameters_schema: path_only_schema(),
            approval: ApprovalScope::TargetDirectory,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(&arguments, "path")?;
        let dir = expand_home(&path);

        let listing = async {
            let mut rd = tokio::fs::read_dir(&dir).await?;
            let mut entries = Vec::new();
            while let Some(entry) = rd.next_entry().await? {
                // Follows symlinks, so a link to a directory lists as "dir".
                let kind = match tokio::fs::metadata(entry.path()).await {
                    Ok(meta) if meta.is_dir() => "dir",
                    Ok(meta) if meta.is_file() => "file",
                    _ => "other",
                };
                entries.push((entry.file_name().to_string_lossy().to_string(), kind));
            }
            entries.sort();
            Ok::<_, std::io::Error>(entries)
        };

        match listing.await {
            Ok(entries) => Ok(json!({
                "path": path,
                "entries": entries
                    .into_iter()
                    .map(|(name, kind)| json!({ "name": name, "type": kind }))
                    .collect::<Vec<_>>(),
            })),
            Err(e) => Ok(json!({ "error": e.to_string(), "path": path })),
        }
    }
}

pub struct ReadFileTool {
    max_chars: usize,
}

impl ReadFileTool {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read a text file from disk.".to_string(),
            parameters_schema: path_only_schema(),
            approval: ApprovalScope::ParentDirectory,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(&arguments, "path")?;
        let bytes = tokio::fs::read(expand_home(&path)).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(serde_json::Value::String(truncate_output(&text, self.max_chars)))
    }
}

/// Writes a text file. The parent directory must already exist.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Write a text file to disk.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
            approval: ApprovalScope::ParentDirectory,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(&arguments, "path")?;
        let content = match arguments.get("content") {
            Some(serde_json::Value::String(s)) => s.clone(),
            None | Some(serde_json::Value::Null) => String::new(),
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "key content must be string, got {other}"
                )));
            }
        };

        let target = expand_home(&path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !tokio::fs::try_exists(parent).await.unwrap_or(false) {
                return Err(ToolError::ExecutionFailed(format!(
                    "parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }
        tokio::fs::write(&target, content.as_bytes()).await?;
        Ok(serde_json::Value::String(format!(
            "OK: wrote {} bytes to {path}",
            content.len()
        )))
    }
}

pub struct CreateDirTool;

#[async_trait]
impl Tool for CreateDirTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_dir".to_string(),
            description: "Create a directory, optionally allowing it to exist.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "exist_ok": { "type": "boolean", "default": false }
                },
                "required": ["path"]
            }),
            approval: ApprovalScope::TargetDirectory,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let path = require_string(&arguments, "path")?;
        let exist_ok = optional_bool(&arguments, "exist_ok")?;
        let target = expand_home(&path);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) && !exist_ok {
            return Err(ToolError::ExecutionFailed(format!("already exists: {path}")));
        }
        tokio::fs::create_dir_all(&target).await?;
        Ok(serde_json::Value::String(format!("OK: created {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_dir_reports_sorted_typed_entries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir(tmp.path().join("a")).unwrap();

        let path = tmp.path().display().to_string();
        let out = ListDirTool
            .execute(json!({ "path": path }))
            .await
            .unwrap();
        assert_eq!(out["path"], path.as_str());
        assert_eq!(
            out["entries"],
            json!([{ "name": "a", "type": "dir" }, { "name": "b.txt", "type": "file" }])
        );
    }

    #[tokio::test]
    async fn list_dir_missing_path_is_reported_in_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope").display().to_string();
        let out = ListDirTool
            .execute(json!({ "path": missing }))
            .await
            .unwrap();
        assert!(out["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn write_requires_existing_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing/child.txt").display().to_string();
        let err = WriteFileTool
            .execute(json!({ "path": path, "content": "x" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("parent directory does not exist"));
    }

    #[tokio::test]
    async fn write_then_read_truncates_long_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt").display().to_string();
        let out = WriteFileTool
            .execute(json!({ "path": path, "content": "0123456789" }))
            .await
            .unwrap();
        assert_eq!(out, json!(format!("OK: wrote 10 bytes to {path}")));

        let read = ReadFileTool::new(4)
            .execute(json!({ "path": path }))
            .await
            .unwrap();
        assert_eq!(read, json!("0123\n...(truncated)"));
    }

    #[tokio::test]
    async fn create_dir_honors_exist_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x/y").display().to_string();
        CreateDirTool
            .execute(json!({ "path": path }))
            .await
            .unwrap();
        assert!(
            CreateDirTool
                .execute(json!({ "path": path }))
                .await
                .is_err()
        );
        CreateDirTool
            .execute(json!({ "path": path, "exist_ok": true }))
            .await
            .unwrap();
    }
}
