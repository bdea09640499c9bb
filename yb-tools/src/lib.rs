//! Local tool capability set for yabot.
//!
//! Tools do I/O only. Approval is decided by the engine from each tool's
//! declared [`ApprovalScope`] before `execute` is ever called.

mod error;
mod filesystem;
mod shell;
mod skills_dir;
mod traits;

pub use error::{Result, ToolError};
pub use filesystem::{CreateDirTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use shell::{ShellOutcome, ShellTool};
pub use skills_dir::SkillsDirTool;
pub use traits::{
    ApprovalScope, DEFAULT_MAX_OUTPUT_CHARS, TRUNCATION_MARKER, Tool, ToolSpec, expand_home,
    to_llm_tool_def, truncate_output,
};
