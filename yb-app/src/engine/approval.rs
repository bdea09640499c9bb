//! Approval gate: maps tool calls to the scope a human must grant and finds
//! the first call in a batch that the room's ledger does not cover.

use crate::engine::dispatch::ToolCatalog;
use crate::engine::paths::canonicalize_lenient;
use crate::engine::state::{ApprovalLedger, ApprovalRequest};
use std::path::{Path, PathBuf};
use yb_llm::ToolCall;
use yb_tools::ApprovalScope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallScope {
    Shell {
        command: String,
        workdir: Option<String>,
    },
    Dir(PathBuf),
}

impl CallScope {
    pub fn is_covered_by(&self, ledger: &ApprovalLedger) -> bool {
        match self {
            CallScope::Shell { command, workdir } => {
                ledger.is_shell_approved(command, workdir.as_deref())
            }
            CallScope::Dir(dir) => ledger.is_dir_approved(dir),
        }
    }

    pub fn to_request(&self) -> ApprovalRequest {
        match self {
            CallScope::Shell { command, workdir } => ApprovalRequest::Shell {
                command: command.clone(),
                workdir: workdir.clone(),
            },
            CallScope::Dir(dir) => ApprovalRequest::Dir {
                dir: dir.display().to_string(),
            },
        }
    }

    /// Directory whose instruction file applies to this call.
    pub fn instruction_dir(&self) -> Option<PathBuf> {
        match self {
            CallScope::Shell { workdir, .. } => workdir
                .as_deref()
                .filter(|w| !w.is_empty())
                .map(PathBuf::from),
            CallScope::Dir(dir) => Some(dir.clone()),
        }
    }
}

/// Scope for one call, or `None` when the tool runs unapproved.
///
/// Unparseable arguments are treated as an empty object so a malformed shell
/// call still prompts instead of slipping through.
pub fn call_scope(scope: ApprovalScope, call: &ToolCall) -> Option<CallScope> {
    let args: serde_json::Value =
        serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::json!({}));
    let text = |key: &str| args.get(key).and_then(|v| v.as_str()).map(str::to_string);

    match scope {
        ApprovalScope::None => None,
        ApprovalScope::ShellCommand => Some(CallScope::Shell {
            command: text("command").unwrap_or_default(),
            workdir: text("workdir").filter(|w| !w.is_empty()),
        }),
        ApprovalScope::TargetDirectory => {
            let path = text("path").filter(|p| !p.is_empty())?;
            Some(CallScope::Dir(canonicalize_lenient(Path::new(&path))))
        }
        ApprovalScope::ParentDirectory => {
            let path = text("path").filter(|p| !p.is_empty())?;
            let target = canonicalize_lenient(Path::new(&path));
            let parent = target.parent().map(Path::to_path_buf).unwrap_or(target);
            Some(CallScope::Dir(parent))
        }
    }
}

/// First call, in emitted order, whose scope the ledger does not cover.
pub fn first_missing_approval(
    ledger: &ApprovalLedger,
    catalog: &ToolCatalog,
    calls: &[ToolCall],
) -> Option<ApprovalRequest> {
    calls
        .iter()
        .filter_map(|call| call_scope(catalog.approval_scope(&call.name), call))
        .find(|scope| !scope.is_covered_by(ledger))
        .map(|scope| scope.to_request())
}

/// Directories to check for instruction files before executing `calls`.
pub fn instruction_dirs(catalog: &ToolCatalog, calls: &[ToolCall]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for call in calls {
        let Some(dir) = call_scope(catalog.approval_scope(&call.name), call)
            .and_then(|scope| scope.instruction_dir())
        else {
            continue;
        };
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}
