use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound for every configured duration
pub const MAX_DURATION_MS: u64 = 86_400_000;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LifelineConfig {
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default = "default_vector_db_service")]
    pub vector_db: ServiceProcessConfig,
    #[serde(default = "default_llama_service")]
    pub llama: ServiceProcessConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StartupConfig {
    /// Wall-clock bound for the whole startup sequence
    #[serde(default = "default_startup_timeout_ms")]
    pub timeout_ms: u64,

    /// Period of the background health ticker
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ShutdownConfig {
    /// Wait after the termination signal before escalating
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Execution bound for the platform force-kill utility
    #[serde(default = "default_force_kill_timeout_ms")]
    pub force_kill_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// Directory holding locally available model files
    #[serde(default = "default_models_directory")]
    pub directory: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Companion projector the vision model cannot run without
    #[serde(default = "default_vision_projector")]
    pub vision_projector: String,
}

/// How to launch and probe one supervised service process
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServiceProcessConfig {
    /// Executable to spawn; the service fails to initialize when unset
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    pub working_dir: Option<String>,

    /// host:port that accepts TCP connections once the service is ready
    pub health_addr: Option<String>,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Compute backend reported by the service (cpu, cuda, metal, vulkan)
    pub backend: Option<String>,
}

impl StartupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn force_kill_timeout(&self) -> Duration {
        Duration::from_millis(self.force_kill_timeout_ms)
    }

    /// Bound on a single service's own `shutdown`, twice a full
    /// terminate-then-kill cycle
    pub fn service_shutdown_timeout(&self) -> Duration {
        self.grace_period()
            .saturating_add(self.force_kill_timeout())
            .saturating_mul(2)
    }
}

impl ServiceProcessConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl LifelineConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("lifeline.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("startup.timeout_ms", default_startup_timeout_ms())?
            .set_default(
                "startup.health_check_interval_ms",
                default_health_check_interval_ms(),
            )?
            .set_default("shutdown.grace_period_ms", default_grace_period_ms())?
            .set_default(
                "shutdown.force_kill_timeout_ms",
                default_force_kill_timeout_ms(),
            )?
            .set_default("models.directory", default_models_directory())?
            .set_default("models.text_model", default_text_model())?
            .set_default("models.embedding_model", default_embedding_model())?
            .set_default("models.vision_model", default_vision_model())?
            .set_default("models.vision_projector", default_vision_projector())?
            .add_source(File::with_name(&path_str).required(false))
            // LIFELINE_STARTUP__TIMEOUT_MS=90000
            .add_source(
                Environment::with_prefix("LIFELINE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: LifelineConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Startup timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.startup.health_check_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Startup health_check_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.shutdown.grace_period_ms == 0 {
            return Err(ConfigError::Message(
                "Shutdown grace_period_ms must be greater than 0".to_string(),
            ));
        }

        if self.shutdown.force_kill_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Shutdown force_kill_timeout_ms must be greater than 0".to_string(),
            ));
        }

        for (key, value) in [
            ("startup.timeout_ms", self.startup.timeout_ms),
            ("startup.health_check_interval_ms", self.startup.health_check_interval_ms),
            ("shutdown.grace_period_ms", self.shutdown.grace_period_ms),
            ("shutdown.force_kill_timeout_ms", self.shutdown.force_kill_timeout_ms),
            ("vector_db.ready_timeout_ms", self.vector_db.ready_timeout_ms),
            ("llama.ready_timeout_ms", self.llama.ready_timeout_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(ConfigError::Message(format!(
                    "{} must not exceed {} (one day)",
                    key, MAX_DURATION_MS
                )));
            }
        }

        if self.models.text_model.trim().is_empty() || self.models.embedding_model.trim().is_empty()
        {
            return Err(ConfigError::Message(
                "Text and embedding models must be named".to_string(),
            ));
        }

        for (name, service) in [("vector_db", &self.vector_db), ("llama", &self.llama)] {
            if let Some(command) = &service.command {
                if command.trim().is_empty() {
                    return Err(ConfigError::Message(format!(
                        "{} command must not be empty",
                        name
                    )));
                }
            }

            if service.ready_timeout_ms == 0 {
                return Err(ConfigError::Message(format!(
                    "{} ready_timeout_ms must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for LifelineConfig {
    fn default() -> Self {
        Self {
            startup: StartupConfig::default(),
            shutdown: ShutdownConfig::default(),
            models: ModelConfig::default(),
            vector_db: default_vector_db_service(),
            llama: default_llama_service(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_startup_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            force_kill_timeout_ms: default_force_kill_timeout_ms(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            directory: default_models_directory(),
            text_model: default_text_model(),
            embedding_model: default_embedding_model(),
            vision_model: default_vision_model(),
            vision_projector: default_vision_projector(),
        }
    }
}

// Default value functions
fn default_startup_timeout_ms() -> u64 {
    60_000
}
fn default_health_check_interval_ms() -> u64 {
    120_000
}

fn default_grace_period_ms() -> u64 {
    5_000
}
fn default_force_kill_timeout_ms() -> u64 {
    5_000
}

fn default_models_directory() -> String {
    "./models".to_string()
}
fn default_text_model() -> String {
    "Mistral-7B-Instruct-v0.3-Q4_K_M.gguf".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text-v1.5-Q8_0.gguf".to_string()
}
fn default_vision_model() -> String {
    "llava-v1.6-mistral-7b-Q4_K_M.gguf".to_string()
}
fn default_vision_projector() -> String {
    "mmproj-model-f16.gguf".to_string()
}

fn default_ready_timeout_ms() -> u64 {
    30_000
}

fn default_vector_db_service() -> ServiceProcessConfig {
    ServiceProcessConfig {
        command: None,
        args: Vec::new(),
        working_dir: None,
        health_addr: Some("127.0.0.1:8000".to_string()),
        ready_timeout_ms: default_ready_timeout_ms(),
        backend: None,
    }
}

fn default_llama_service() -> ServiceProcessConfig {
    ServiceProcessConfig {
        command: None,
        args: Vec::new(),
        working_dir: None,
        health_addr: Some("127.0.0.1:8080".to_string()),
        ready_timeout_ms: default_ready_timeout_ms(),
        backend: Some("cpu".to_string()),
    }
}
