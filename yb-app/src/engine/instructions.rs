use crate::engine::paths::canonicalize_lenient;
use std::collections::BTreeSet;
use std::path::PathBuf;
use yb_llm::ChatMessage;

pub fn instructions_message(path: &std::path::Path, content: &str) -> ChatMessage {
    ChatMessage::system(format!(
        "AGENTS.md instructions from {}:\n{content}",
        path.display()
    ))
}

/// Reads `file_name` from each directory and returns a system message for
/// every non-empty file not yet in `loaded`, recording it there.
pub async fn load_new_instructions(
    file_name: &str,
    loaded: &mut BTreeSet<String>,
    dirs: &[PathBuf],
) -> Vec<ChatMessage> {
    let mut injected = Vec::new();
    for dir in dirs {
        let path = canonicalize_lenient(dir).join(file_name);
        let key = path.display().to_string();
        if loaded.contains(&key) {
            continue;
        }
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => continue,
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        tracing::info!(path = %key, chars = content.len(), "instruction file injected");
        loaded.insert(key);
        injected.push(instructions_message(&path, content));
    }
    injected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injects_each_file_once() {
        let tmp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("AGENTS.md"), "  Run cargo fmt.\n").unwrap();
        std::fs::create_dir(tmp.path().join("empty")).unwrap();
        std::fs::write(tmp.path().join("empty/AGENTS.md"), "\n\n").unwrap();

        let mut loaded = BTreeSet::new();
        let dirs = vec![
            tmp.path().to_path_buf(),
            tmp.path().join("empty"),
            tmp.path().join("missing"),
        ];
        let first = load_new_instructions("AGENTS.md", &mut loaded, &dirs).await;
        assert_eq!(
            first,
            vec![ChatMessage::system(format!(
                "AGENTS.md instructions from {}:\nRun cargo fmt.",
                root.join("AGENTS.md").display()
            ))]
        );
        assert!(load_new_instructions("AGENTS.md", &mut loaded, &dirs).await.is_empty());
        assert_eq!(loaded.len(), 1);
    }
}
