//! Configuration management
//!
//! This module handles loading, validation, and management of the Agenti configuration.
//! Configuration is stored in TOML format at ~/.agenti/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, memory file name, log level
//! - **llm**: Language-generation provider settings
//! - **executor**: Shell, timeout and output cap for shell tasks
//! - **planner**: Context window and task coercion policy
//! - **autonomy**: Loop pacing
//! - **classifier**: Extra executables recognised as shell commands
//!
//! # Path Expansion
//!
//! The configuration system automatically expands ~ to the user's home
//! directory and creates the data directory if it doesn't exist.
//!
//! # Examples
//!
//! ```no_run
//! use agenti_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Memory file: {:?}", config.memory_path());
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Only the `core` and `llm` sections are required; every other section
/// falls back to its defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Shell task execution settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Autonomy loop settings
    #[serde(default)]
    pub autonomy: AutonomyConfig,

    /// Classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File name of the persisted memory inside `data_dir`
    #[serde(default = "default_memory_file")]
    pub memory_file: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used by the planner (openai, ollama, offline)
    pub default_provider: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Shell task execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Shell used for shell tasks; `$SHELL` or /bin/sh when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Timeout for a single shell task in seconds
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,

    /// Maximum characters of output kept per log entry
    #[serde(default = "default_output_limit")]
    pub output_limit_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: None,
            timeout_secs: default_shell_timeout(),
            output_limit_chars: default_output_limit(),
        }
    }
}

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Number of recent log entries given to the planner as context
    #[serde(default = "default_context_logs")]
    pub context_logs: usize,

    /// Maximum characters of each log output included in the context
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,

    /// Keep planned tasks that look like shell commands as shell tasks.
    /// When false every planned task is coerced to an `llm:` directive.
    #[serde(default = "default_true")]
    pub allow_shell_tasks: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            context_logs: default_context_logs(),
            context_chars: default_context_chars(),
            allow_shell_tasks: true,
        }
    }
}

/// Autonomy loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    /// Pause between iterations of the continuous loop (milliseconds)
    #[serde(default = "default_iteration_delay")]
    pub iteration_delay_ms: u64,

    /// Pause after an iteration that found nothing to do (milliseconds)
    #[serde(default = "default_idle_delay")]
    pub idle_delay_ms: u64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            iteration_delay_ms: default_iteration_delay(),
            idle_delay_ms: default_idle_delay(),
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Additional executable names treated as shell invocations
    #[serde(default)]
    pub extra_executables: Vec<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.agenti")
}

fn default_memory_file() -> String {
    "agent_memory.json".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    500
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_shell_timeout() -> u64 {
    60
}

fn default_output_limit() -> usize {
    10_000
}

fn default_context_logs() -> usize {
    5
}

fn default_context_chars() -> usize {
    500
}

fn default_iteration_delay() -> u64 {
    2000
}

fn default_idle_delay() -> u64 {
    2000
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_api_key_env(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            openai: OpenAIConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.agenti/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable `~` form
        let defaults = Self::default_config();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.agenti/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".agenti").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                data_dir: default_data_dir(),
                memory_file: default_memory_file(),
                log_level: default_log_level(),
            },
            llm: LLMConfig::default(),
            executor: ExecutorConfig::default(),
            planner: PlannerConfig::default(),
            autonomy: AutonomyConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }

    /// Configuration rooted at an explicit data directory.
    ///
    /// Used by tests and embedders that manage their own directories; no
    /// file is read or written.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default_config();
        config.core.data_dir = data_dir.into();
        config
    }

    /// Full path of the persisted memory file
    pub fn memory_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.core.memory_file)
    }

    /// Validate and process configuration
    ///
    /// Validates enumerated fields and ranges, expands ~ in the data
    /// directory and creates it if missing.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["openai", "ollama", "offline"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.llm.timeout_secs == 0 || self.executor.timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeouts must be at least 1 second".to_string(),
            ));
        }

        if self.executor.output_limit_chars == 0 {
            return Err(EngineError::Config(
                "output_limit_chars must be greater than 0".to_string(),
            ));
        }

        let memory_file = Path::new(&self.core.memory_file);
        if self.core.memory_file.is_empty() || memory_file.components().count() != 1 {
            return Err(EngineError::Config(format!(
                "memory_file must be a plain file name, got '{}'",
                self.core.memory_file
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
