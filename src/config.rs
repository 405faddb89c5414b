use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action_parser::{Factors, ParseMode, UiTarsVersion};
use crate::agent_engine::history::DEFAULT_MAX_IMAGES;
use crate::agent_engine::loop_control::{LoopConfig, DEFAULT_MAX_LOOP_COUNT, DEFAULT_MAX_SNAPSHOT_ERRORS};
use crate::agent_engine::retry::RetryPolicy;
use crate::errors::{AgentError, AgentResult};
use crate::llm::types::CallConfig;

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "gui-agent";
pub const API_KEY_ENV: &str = "GUI_AGENT_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub agent: AgentSettings,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Used in logs only.
    pub provider_id: String,
    /// Full chat-completions URL.
    pub api_base: String,
    /// Falls back to the `GUI_AGENT_API_KEY` env var, which wins when set.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub ui_tars_version: UiTarsVersion,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider_id: "default".into(),
            api_base: "http://localhost:8000/v1/chat/completions".into(),
            api_key: None,
            model: "ui-tars-1.5-7b".into(),
            temperature: 0.0,
            top_p: None,
            max_tokens: None,
            stream: false,
            ui_tars_version: UiTarsVersion::default(),
        }
    }
}

impl ModelConfig {
    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            model: self.model.clone(),
            stream: self.stream,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_loop_count: u32,
    pub max_snapshot_errors: u32,
    /// Pause after a screenshot that failed validation.
    pub snapshot_retry_interval_ms: u64,
    /// Pause between iterations.
    pub loop_interval_ms: u64,
    pub max_images: usize,
    pub parse_mode: ParseMode,
    /// Language the model should think in.
    pub language: String,
    pub factors: Factors,
    /// Replaces the built-in computer-use prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_loop_count: DEFAULT_MAX_LOOP_COUNT,
            max_snapshot_errors: DEFAULT_MAX_SNAPSHOT_ERRORS,
            snapshot_retry_interval_ms: 1000,
            loop_interval_ms: 0,
            max_images: DEFAULT_MAX_IMAGES,
            parse_mode: ParseMode::default(),
            language: "English".into(),
            factors: Factors::default(),
            system_prompt: None,
        }
    }
}

impl AgentSettings {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_loop_count: self.max_loop_count,
            max_snapshot_errors: self.max_snapshot_errors,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub screenshot: RetryPolicy,
    pub model: RetryPolicy,
    pub execute: RetryPolicy,
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

fn resolve_config_path() -> AgentResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(candidate) = user_config_path().filter(|p| p.exists()) {
        tracing::debug!(path = %candidate.display(), "config found in user config directory");
        return Ok(candidate);
    }

    Err(AgentError::Config(
        "config.toml not found next to executable, in working directory or in user config directory".into(),
    ))
}

fn apply_api_key_override(config: &mut AppConfig, env_key: Option<String>) {
    if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
        config.model.api_key = Some(key);
    }
}

/// Loads `.env`, then the first `config.toml` found.
pub fn load_config() -> AgentResult<AppConfig> {
    let _ = dotenvy::dotenv();
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> AgentResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config: AppConfig = toml::from_str(&content)?;
    apply_api_key_override(&mut config, std::env::var(API_KEY_ENV).ok());
    tracing::info!(
        path = %path.display(),
        model = %config.model.model,
        version = ?config.model.ui_tars_version,
        "config loaded"
    );
    Ok(config)
}

/// Saves over the resolved config file, or into the user config directory
/// when none exists yet.
pub fn save_config(config: &AppConfig) -> AgentResult<()> {
    let path = match resolve_config_path() {
        Ok(p) => p,
        Err(_) => user_config_path()
            .ok_or_else(|| AgentError::Config("no user config directory on this platform".into()))?,
    };
    save_config_to(config, &path)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> AgentResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [model]
            model = "doubao-1.5-ui-tars"
            ui_tars_version = "doubao-1.5-ui-tars-15"

            [agent]
            max_loop_count = 3

            [retry.model]
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.model.model, "doubao-1.5-ui-tars");
        assert_eq!(cfg.model.ui_tars_version, UiTarsVersion::Doubao15);
        assert_eq!(cfg.agent.max_loop_count, 3);
        assert_eq!(cfg.agent.max_snapshot_errors, DEFAULT_MAX_SNAPSHOT_ERRORS);
        assert_eq!(cfg.agent.max_images, DEFAULT_MAX_IMAGES);
        assert_eq!(cfg.agent.snapshot_retry_interval_ms, 1000);
        assert_eq!(cfg.retry.model.max_retries, 2);
        assert_eq!(cfg.retry.model.backoff_ms, 1000);
        assert_eq!(cfg.retry.screenshot, RetryPolicy::default());
    }

    #[test]
    fn test_empty_file_is_valid() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.agent.max_loop_count, DEFAULT_MAX_LOOP_COUNT);
        assert_eq!(cfg.agent.parse_mode, ParseMode::Bc);
        assert_eq!(cfg.agent.factors, Factors::default());
    }

    #[test]
    fn test_factors_and_mode_from_toml() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [agent]
            parse_mode = "o1"
            factors = [1280.0, 720.0]
            system_prompt = "custom"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.parse_mode, ParseMode::O1);
        assert_eq!(cfg.agent.factors, Factors::new(1280.0, 720.0));
        assert_eq!(cfg.agent.system_prompt.as_deref(), Some("custom"));
    }

    #[test]
    fn test_env_key_overrides_file() {
        let mut cfg = AppConfig::default();
        cfg.model.api_key = Some("from-file".into());
        apply_api_key_override(&mut cfg, None);
        assert_eq!(cfg.model.api_key.as_deref(), Some("from-file"));
        apply_api_key_override(&mut cfg, Some("  ".into()));
        assert_eq!(cfg.model.api_key.as_deref(), Some("from-file"));
        apply_api_key_override(&mut cfg, Some("from-env".into()));
        assert_eq!(cfg.model.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut cfg = AppConfig::default();
        cfg.agent.loop_interval_ms = 250;
        cfg.retry.execute = RetryPolicy::new(4, 10);

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.agent.loop_interval_ms, 250);
        assert_eq!(loaded.retry.execute, RetryPolicy::new(4, 10));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[agent\nmax_loop_count = ").unwrap();
        assert!(matches!(load_config_from(&path), Err(AgentError::TomlDe(_))));
    }
}
