use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::ImageStyle;
use crate::core::styles::builtin_styles;
use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_max_topic_length")]
    pub max_topic_length: usize,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub styles: Vec<ImageStyle>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            max_topic_length: default_max_topic_length(),
            llm: LlmConfig::default(),
            image: ImageConfig::default(),
            styles: Vec::new(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_max_topic_length() -> usize {
    500
}

impl Config {
    /// Loads `config.yml` from the working directory, falling back to defaults
    /// when the file is absent so the rest of the application still starts.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    /// The style catalog: configured styles, or the built-in presets.
    pub fn style_catalog(&self) -> Vec<ImageStyle> {
        if self.styles.is_empty() {
            builtin_styles()
        } else {
            self.styles.clone()
        }
    }
}

/// Whether this process may call the hosted models at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Enabled,
    Disabled { reason: String },
}

impl Capability {
    /// Checks once, at startup, that the credentials both providers need are present.
    pub fn detect(config: &Config) -> Self {
        Self::detect_with(config, |key| std::env::var(key).ok())
    }

    pub fn detect_with<F>(config: &Config, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Err(e) = config.llm.api_key(&env) {
            return Capability::Disabled { reason: e.to_string() };
        }
        if let Err(e) = config.image.api_key(&env) {
            return Capability::Disabled { reason: e.to_string() };
        }
        Capability::Enabled
    }
}

/// Config value if set, otherwise the first non-empty environment variable.
pub(crate) fn resolve_key<F>(configured: &str, vars: &[&str], env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !configured.trim().is_empty() {
        return Some(configured.trim().to_string());
    }
    vars.iter()
        .filter_map(|&v| env(v))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
