//! Yabot configuration loader.
//!
//! Every field has a default, so a missing config file still yields a usable
//! configuration; environment variables override the file.

use crate::engine::EngineSettings;
use crate::engine::state::AgentName;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct YabotConfig {
    pub general: GeneralConfig,
    pub llm: LlmConfig,
    pub models: BTreeMap<String, ModelConfig>,
    pub tools: ToolsConfig,
    pub daemon: DaemonConfig,
    pub matrix: MatrixConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub default_model: String,
    pub available_models: Vec<String>,
    pub max_turns: usize,
    pub max_tool_rounds: usize,
    pub data_dir: Option<String>,
    pub default_agent: String,
    pub system_prompt: Option<String>,
    pub meta_system_prompt: Option<String>,
    pub instructions_file: String,
    /// Defaults to the process working directory.
    pub workdir: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            available_models: vec!["gpt-4o-mini".to_string(), "gpt-5.2".to_string()],
            max_turns: 30,
            max_tool_rounds: 25,
            data_dir: None,
            default_agent: "main".to_string(),
            system_prompt: None,
            meta_system_prompt: None,
            instructions_file: "AGENTS.md".to_string(),
            workdir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub context_window: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub shell_timeout_secs: u64,
    pub max_output_chars: usize,
    /// Extra skill directories; `<data_dir>/skills` is always searched.
    pub skills_dirs: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 60,
            max_output_chars: yb_tools::DEFAULT_MAX_OUTPUT_CHARS,
            skills_dirs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl DaemonConfig {
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub homeserver: String,
    pub access_token: String,
    pub user_id: String,
    /// Empty means anyone may talk to the bot.
    pub allowed_users: Vec<String>,
    pub auto_join: bool,
    pub sync_timeout_ms: u64,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver: "https://matrix.org".to_string(),
            access_token: String::new(),
            user_id: String::new(),
            allowed_users: Vec::new(),
            auto_join: true,
            sync_timeout_ms: 30_000,
        }
    }
}

impl YabotConfig {
    /// Loads `path` (or the default path), tolerating a missing file.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = var("YABOT_MODEL") {
            self.general.default_model = v;
        }
        if let Some(v) = var("YABOT_DATA_DIR") {
            self.general.data_dir = Some(v);
        }
        if let Some(v) = var("MATRIX_HOMESERVER") {
            self.matrix.homeserver = v;
        }
        if let Some(v) = var("MATRIX_ACCESS_TOKEN") {
            self.matrix.access_token = v;
        }
        if let Some(v) = var("MATRIX_USER_ID") {
            self.matrix.user_id = v;
        }
        if let Some(v) = var("ALLOWED_USERS") {
            self.matrix.allowed_users = split_list(&v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let general = &self.general;
        if general.available_models.is_empty() {
            return Err(anyhow::anyhow!("general.available_models must not be empty"));
        }
        if !general
            .available_models
            .iter()
            .any(|m| *m == general.default_model)
        {
            return Err(anyhow::anyhow!(
                "general.default_model `{}` is not in general.available_models",
                general.default_model
            ));
        }
        if general.max_turns == 0 {
            return Err(anyhow::anyhow!("general.max_turns must be > 0"));
        }
        if general.max_tool_rounds == 0 {
            return Err(anyhow::anyhow!("general.max_tool_rounds must be > 0"));
        }
        if AgentName::parse(&general.default_agent).is_none() {
            return Err(anyhow::anyhow!(
                "general.default_agent must be one of: main, meta (got {:?})",
                general.default_agent
            ));
        }
        if self.tools.shell_timeout_secs == 0 {
            return Err(anyhow::anyhow!("tools.shell_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.general
            .data_dir
            .as_deref()
            .map(yb_tools::expand_home)
            .unwrap_or_else(default_data_dir)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("yabot.sqlite")
    }

    pub fn skills_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .tools
            .skills_dirs
            .iter()
            .map(|d| yb_tools::expand_home(d))
            .collect();
        dirs.push(self.data_dir().join("skills"));
        dirs
    }

    pub fn api_key(&self) -> Option<String> {
        self.llm.api_key.clone().filter(|k| !k.trim().is_empty())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        let general = &self.general;
        EngineSettings {
            default_model: general.default_model.clone(),
            available_models: general.available_models.clone(),
            default_agent: AgentName::parse(&general.default_agent).unwrap_or(AgentName::Main),
            max_turns: general.max_turns,
            max_tool_rounds: general.max_tool_rounds,
            context_windows: self
                .models
                .iter()
                .filter_map(|(name, m)| m.context_window.map(|w| (name.clone(), w)))
                .collect(),
            main_prompt: general.system_prompt.clone().unwrap_or(defaults.main_prompt),
            meta_prompt: general
                .meta_system_prompt
                .clone()
                .unwrap_or(defaults.meta_prompt),
            instructions_file: general.instructions_file.clone(),
            workdir: general
                .workdir
                .as_deref()
                .map(yb_tools::expand_home)
                .unwrap_or(defaults.workdir),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

pub fn default_config_path() -> PathBuf {
    home_dir().join(".yabot").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    Path::new(&home_dir()).join(".yabot")
}
