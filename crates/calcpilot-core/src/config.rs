//! Configuration management for calcpilot
//!
//! Loaded from `.calcpilot/config.toml` in the working directory. Every field
//! has a default, so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Result;

/// Directory holding the config file, relative to the working directory
pub const CONFIG_DIR: &str = ".calcpilot";
/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Top-level calcpilot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalcPilotConfig {
    /// Model backend selection and generation parameters
    #[serde(default)]
    pub model: ModelSettings,

    /// Live spreadsheet session endpoint
    #[serde(default)]
    pub session: SessionSettings,

    /// Loop execution defaults
    #[serde(default)]
    pub loop_defaults: LoopDefaults,
}

/// Model inference backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    Ollama,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Gemini => write!(f, "gemini"),
            Provider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "ollama" => Ok(Provider::Ollama),
            _ => Err(format!("Invalid provider: {}. Use gemini or ollama.", s)),
        }
    }
}

/// Model selection and fixed request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub provider: Provider,

    /// Model name as the provider knows it
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Environment variable holding the API credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Override for the provider base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// HTTP timeout per model request
    #[serde(default = "default_model_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub generation: GenerationSettings,

    /// Blocking threshold applied to every content-safety category
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: String,
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

/// Live session connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// `host:port` of the spreadsheet bridge
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_session_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Default loop execution parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefaults {
    /// Iterations before asking for an extension
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Iterations added by one accepted extension
    #[serde(default = "default_extension_step")]
    pub extension_step: usize,

    /// Cell tracked when the instruction names none
    #[serde(default = "default_cell")]
    pub default_cell: String,

    /// Feedback history characters embedded in a prompt
    #[serde(default = "default_history_window_chars")]
    pub history_window_chars: usize,

    /// Include every sheet name in snapshots
    #[serde(default)]
    pub observe_sheet_names: bool,
}

// Default value providers
fn default_model_name() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_safety_threshold() -> String {
    "BLOCK_MEDIUM_AND_ABOVE".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_top_k() -> u32 {
    1
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_endpoint() -> String {
    "127.0.0.1:2002".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_session_timeout_secs() -> u64 {
    30
}

fn default_max_iterations() -> usize {
    3
}

fn default_extension_step() -> usize {
    3
}

fn default_cell() -> String {
    "A1".to_string()
}

fn default_history_window_chars() -> usize {
    24_000
}

impl CalcPilotConfig {
    /// Path of the config file under `root`
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from `.calcpilot/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::path_in(root);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::CalcError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.calcpilot/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            crate::CalcError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.loop_defaults.max_iterations == 0 {
            return Err(crate::CalcError::Config(
                "loop_defaults.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.loop_defaults.default_cell.parse::<crate::CellRef>().is_err() {
            return Err(crate::CalcError::Config(format!(
                "loop_defaults.default_cell is not a cell reference: {}",
                self.loop_defaults.default_cell
            )));
        }
        if !(0.0..=2.0).contains(&self.model.generation.temperature) {
            return Err(crate::CalcError::Config(format!(
                "model.generation.temperature out of range: {}",
                self.model.generation.temperature
            )));
        }
        Ok(())
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            name: default_model_name(),
            api_key_env: default_api_key_env(),
            base_url: None,
            request_timeout_secs: default_model_timeout_secs(),
            generation: GenerationSettings::default(),
            safety_threshold: default_safety_threshold(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            extension_step: default_extension_step(),
            default_cell: default_cell(),
            history_window_chars: default_history_window_chars(),
            observe_sheet_names: false,
        }
    }
}
