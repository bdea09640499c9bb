use std::path::{Component, Path, PathBuf};

/// Canonical absolute form of `path` without requiring it to exist.
///
/// `~` is expanded and relative paths are joined onto the current directory.
/// Components are then resolved one at a time: each existing prefix goes
/// through the filesystem so symlinks map to their targets, and `..` pops the
/// already-resolved prefix. Only the missing tail is folded lexically.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    let expanded = match path.to_str() {
        Some(raw) => yb_tools::expand_home(raw),
        None => path.to_path_buf(),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(expanded)
    };

    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                resolved = std::fs::canonicalize(&candidate).unwrap_or(candidate);
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

/// True when `path` equals `root` or lies beneath it, compared by component.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
