use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use heavy_core::{Error, DEFAULT_MAX_ITERATIONS, DEFAULT_SYSTEM_PROMPT};
use heavy_orchestrator::{OrchestratorConfig, PromptTemplates};

const PROJECT_CONFIG: &str = "heavy.toml";
const ENV_PREFIX: &str = "HEAVY_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openrouter,
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Openrouter => f.write_str("openrouter"),
            ProviderKind::Gemini => f.write_str("gemini"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provider: ProviderKind,

    pub system_prompt: String,

    #[serde(default)]
    pub openrouter: ProviderSettings,

    #[serde(default)]
    pub gemini: ProviderSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub megamind: MegamindPrompts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Openrouter,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            openrouter: ProviderSettings::default(),
            gemini: ProviderSettings::default(),
            agent: AgentSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            megamind: MegamindPrompts::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub max_iterations: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Fan-out width of `heavy multi`
    pub parallel_agents: usize,

    /// Deadline in seconds for each parallel batch
    pub task_timeout: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            parallel_agents: 4,
            task_timeout: 300,
        }
    }
}

/// Optional replacements for the pipeline's prompt templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MegamindPrompts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_generation_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_prompt_1: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_prompt_2: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_synthesis_prompt: Option<String>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Later sources win:
    /// 1. Built-in defaults
    /// 2. `~/.config/heavy/config.toml`
    /// 3. `./heavy.toml`
    /// 4. `--config <path>`
    /// 5. `HEAVY_*` environment variables, `__` separating nested keys
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global) = Self::config_path() {
            if global.exists() {
                figment = figment.merge(Toml::file(&global));
            }
        }

        let project = PathBuf::from(PROJECT_CONFIG);
        if project.exists() {
            figment = figment.merge(Toml::file(&project));
        }

        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .context("Failed to load configuration")
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("heavy").join("config.toml"))
    }

    pub fn provider_settings(&self) -> &ProviderSettings {
        match self.provider {
            ProviderKind::Openrouter => &self.openrouter,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    pub fn provider_settings_mut(&mut self) -> &mut ProviderSettings {
        match self.provider {
            ProviderKind::Openrouter => &mut self.openrouter,
            ProviderKind::Gemini => &mut self.gemini,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.agent.max_iterations == 0 {
            return Err(Error::config("agent.max_iterations must be at least 1"));
        }
        if self.orchestrator.parallel_agents == 0 {
            return Err(Error::config("orchestrator.parallel_agents must be at least 1"));
        }
        if self.orchestrator.task_timeout == 0 {
            return Err(Error::config("orchestrator.task_timeout must be at least 1 second"));
        }
        let has_key = self
            .provider_settings()
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if !has_key {
            return Err(Error::config(format!(
                "No API key for provider '{}'. Set {}.api_key in the config file or {}{}__API_KEY",
                self.provider,
                self.provider,
                ENV_PREFIX,
                self.provider.to_string().to_uppercase()
            )));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            task_timeout: Duration::from_secs(self.orchestrator.task_timeout),
            parallel_agents: self.orchestrator.parallel_agents,
        }
    }

    pub fn prompt_templates(&self) -> PromptTemplates {
        let mut templates = PromptTemplates::default();
        let overrides = &self.megamind;
        let slots = [
            (&overrides.question_generation_prompt, &mut templates.question_generation),
            (&overrides.synthesis_prompt, &mut templates.synthesis),
            (&overrides.validation_prompt_1, &mut templates.accuracy_validation),
            (&overrides.validation_prompt_2, &mut templates.quality_validation),
            (&overrides.final_synthesis_prompt, &mut templates.final_synthesis),
        ];
        for (custom, slot) in slots {
            if let Some(custom) = custom {
                *slot = custom.clone();
            }
        }
        templates
    }

    /// The effective configuration with API keys masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for settings in [&mut config.openrouter, &mut config.gemini] {
            if let Some(key) = settings.api_key.as_mut() {
                *key = mask_key(key);
            }
        }
        config
    }
}

fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if key.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{}", tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            provider = "gemini"
            system_prompt = "Be brief."

            [gemini]
            api_key = "g-key"
            model = "gemini-2.5-pro"

            [orchestrator]
            parallel_agents = 6
            task_timeout = 120
        "#;

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.provider_settings().model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(config.agent.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.orchestrator_config().task_timeout, Duration::from_secs(120));
        assert_eq!(config.orchestrator_config().parallel_agents, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                PROJECT_CONFIG,
                r#"
                    [openrouter]
                    api_key = "file-key"

                    [orchestrator]
                    task_timeout = 120
                "#,
            )?;
            jail.set_env("HEAVY_ORCHESTRATOR__TASK_TIMEOUT", "30");

            let config = Config::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.orchestrator.task_timeout, 30);
            assert_eq!(config.openrouter.api_key.as_deref(), Some("file-key"));
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_missing_key_and_zero_values() {
        let mut config = Config::default();
        assert!(config.validate().unwrap_err().to_string().contains("openrouter"));

        config.openrouter.api_key = Some("key".into());
        assert!(config.validate().is_ok());

        config.orchestrator.task_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prompt_overrides() {
        let mut config = Config::default();
        config.megamind.synthesis_prompt = Some("Merge: {agent_responses}".into());

        let templates = config.prompt_templates();
        assert_eq!(templates.synthesis("x"), "Merge: x");
        assert_eq!(templates.final_synthesis, PromptTemplates::default().final_synthesis);
    }

    #[test]
    fn test_redacted_hides_keys() {
        let mut config = Config::default();
        config.openrouter.api_key = Some("sk-or-v1-abcdef123456".into());
        config.gemini.api_key = Some("short".into());

        let redacted = config.redacted();
        assert_eq!(redacted.openrouter.api_key.as_deref(), Some("****3456"));
        assert_eq!(redacted.gemini.api_key.as_deref(), Some("****"));
        assert_eq!(config.gemini.api_key.as_deref(), Some("short"));
    }
}
