//! Skill catalog: markdown instruction files exposed to the model as
//! argument-less tools named `skill__{slug}`.

use anyhow::Context;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use yb_llm::ToolDefinition;

pub const SKILL_TOOL_PREFIX: &str = "skill__";
const SKILL_FILE_NAME: &str = "SKILL.md";

static FRONTMATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)(.*)\z")
        .expect("Invalid frontmatter regex")
});
static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9]+").expect("Invalid slug regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub content: String,
    pub tool_name: String,
    pub source: PathBuf,
}

impl Skill {
    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    /// System message injected when the skill tool is called.
    pub fn instructions_message(&self) -> String {
        format!("Skill `{}` instructions:\n{}", self.name, self.content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
}

impl SkillCatalog {
    pub fn new(skills: Vec<Skill>) -> Self {
        Self { skills }
    }

    /// Loads `*.md` and `<dir>/SKILL.md` files from every existing directory,
    /// in directory order then file-name order. Unreadable files are skipped.
    pub fn load(dirs: &[PathBuf]) -> Self {
        let mut used = HashSet::new();
        let mut skills = Vec::new();
        for dir in dirs {
            let files = match skill_files(dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "skills directory skipped");
                    continue;
                }
            };
            for file in files {
                match load_skill_file(&file, &mut used) {
                    Ok(Some(skill)) => {
                        tracing::debug!(tool_name = %skill.tool_name, path = %file.display(), "skill loaded");
                        skills.push(skill);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %file.display(), error = %e, "failed to load skill")
                    }
                }
            }
        }
        tracing::info!(skills = skills.len(), dirs = dirs.len(), "skill catalog loaded");
        Self { skills }
    }

    pub fn get(&self, tool_name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.tool_name == tool_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Skill> {
        self.skills.iter()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.skills.iter().map(Skill::tool_definition).collect()
    }
}

fn skill_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let nested = path.join(SKILL_FILE_NAME);
            if nested.is_file() {
                files.push(nested);
            }
        } else if path.extension().is_some_and(|ext| ext == "md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_skill_file(path: &Path, used: &mut HashSet<String>) -> anyhow::Result<Option<Skill>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read skill file {}", path.display()))?;
    let (fields, body) = split_frontmatter(&text);
    let content = body.trim().to_string();
    if content.is_empty() {
        return Ok(None);
    }

    let name = field(&fields, "name").unwrap_or_else(|| default_name(path));
    let description = field(&fields, "description").unwrap_or_else(|| {
        content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(name.as_str())
            .trim_start_matches('#')
            .trim()
            .to_string()
    });
    let tool_name = unique_tool_name(&slugify(&name), used);
    used.insert(tool_name.clone());

    Ok(Some(Skill {
        name,
        description,
        content,
        tool_name,
        source: path.to_path_buf(),
    }))
}

fn split_frontmatter(text: &str) -> (Vec<(String, String)>, &str) {
    let Some(caps) = FRONTMATTER.captures(text) else {
        return (Vec::new(), text);
    };
    let header = caps.get(1).map_or("", |m| m.as_str());
    let body = caps.get(2).map_or("", |m| m.as_str());
    let fields = header
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect();
    (fields, body)
}

fn field(fields: &[(String, String)], key: &str) -> Option<String> {
    fields
        .iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.clone())
}

fn default_name(path: &Path) -> String {
    let stem_owner = if path.file_name().is_some_and(|n| n == SKILL_FILE_NAME) {
        path.parent()
    } else {
        Some(path)
    };
    stem_owner
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "skill".to_string())
}

fn slugify(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let slug = NON_SLUG.replace_all(&lower, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        format!("{SKILL_TOOL_PREFIX}skill")
    } else {
        format!("{SKILL_TOOL_PREFIX}{slug}")
    }
}

fn unique_tool_name(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    let mut idx = 2;
    while used.contains(&format!("{base}_{idx}")) {
        idx += 1;
    }
    format!("{base}_{idx}")
}
