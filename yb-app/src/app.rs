//! Wiring: config -> tools, skills, store and LLM client -> engine.

use crate::config::YabotConfig;
use crate::engine::Engine;
use crate::engine::dispatch::ToolCatalog;
use crate::skills::SkillCatalog;
use crate::store::RoomStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use yb_llm::LlmClient;
use yb_tools::{CreateDirTool, ListDirTool, ReadFileTool, ShellTool, SkillsDirTool, Tool, WriteFileTool};

pub fn build_tools(cfg: &YabotConfig) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListDirTool),
        Arc::new(ReadFileTool::new(cfg.tools.max_output_chars)),
        Arc::new(WriteFileTool),
        Arc::new(CreateDirTool),
        Arc::new(SkillsDirTool::new(cfg.data_dir().join("skills"))),
        Arc::new(ShellTool::new(
            Duration::from_secs(cfg.tools.shell_timeout_secs),
            cfg.tools.max_output_chars,
        )),
    ]
}

fn preflight_validate_tool_names(catalog: &ToolCatalog) -> Result<()> {
    let names = catalog
        .tool_names()
        .into_iter()
        .map(str::to_string)
        .chain(catalog.skills().iter().map(|s| s.tool_name.clone()));
    for name in names {
        yb_llm::validate_tool_name(&name)
            .map_err(|e| anyhow::anyhow!("preflight tool name validation failed for '{name}': {e}"))?;
    }
    Ok(())
}

fn build_catalog(cfg: &YabotConfig) -> Result<ToolCatalog> {
    let skills = SkillCatalog::load(&cfg.skills_dirs());
    let catalog = ToolCatalog::new(build_tools(cfg), skills);
    preflight_validate_tool_names(&catalog)?;
    Ok(catalog)
}

#[tracing::instrument(level = "info", skip_all)]
pub fn build_engine(cfg: &YabotConfig) -> Result<Engine> {
    let api_key = cfg
        .api_key()
        .ok_or_else(|| anyhow::anyhow!("no LLM API key: set OPENAI_API_KEY or llm.api_key"))?;
    let llm = LlmClient::new(
        &api_key,
        Some(&cfg.llm.base_url),
        Duration::from_secs(cfg.llm.timeout_secs),
    );
    let catalog = build_catalog(cfg)?;
    let store_path = cfg.store_path();
    let store = RoomStore::open(&store_path)?;

    tracing::info!(
        model = %cfg.general.default_model,
        base_url = %cfg.llm.base_url,
        store = %store_path.display(),
        tools = catalog.tool_names().len(),
        skills = catalog.skills().len(),
        "engine ready"
    );
    Ok(Engine::new(Arc::new(llm), catalog, cfg.engine_settings(), store))
}

/// Validates config, store and skills without contacting any service.
pub async fn doctor(cfg: &YabotConfig) -> Result<()> {
    let catalog = build_catalog(cfg)?;
    let store_path = cfg.store_path();
    let store = RoomStore::open(&store_path)?;
    let rooms = store.room_count().await?;
    let settings = cfg.engine_settings();

    tracing::info!(
        model = %settings.default_model,
        available_models = ?settings.available_models,
        default_agent = %settings.default_agent,
        api_key_set = cfg.api_key().is_some(),
        store = %store_path.display(),
        rooms,
        tools = ?catalog.tool_names(),
        skills = catalog.skills().len(),
        workdir = %settings.workdir.display(),
        matrix_configured = !cfg.matrix.access_token.is_empty(),
        "config ok"
    );
    if cfg.api_key().is_none() {
        tracing::warn!("no LLM API key configured; chat and daemon will refuse to start");
    }
    Ok(())
}
