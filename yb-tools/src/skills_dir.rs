use crate::error::Result;
use crate::traits::{ApprovalScope, Tool, ToolSpec};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reports where skill files are loaded from, so the model can add new ones.
pub struct SkillsDirTool {
    dir: PathBuf,
}

impl SkillsDirTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Tool for SkillsDirTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_skills_dir".to_string(),
            description: "Return the local skills directory path.".to_string(),
            parameters_schema: serde_json::json!({ "type": "object", "properties": {} }),
            approval: ApprovalScope::None,
        }
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::Value::String(self.dir.display().to_string()))
    }
}
