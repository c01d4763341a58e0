use chatwire::server::StubHandler;
use chatwire::wire::actions;
use chatwire::{ActionRegistry, ClientConfig, ServerConfig};
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub stubs: Vec<StubConfig>,
}

/// Fixed reply for one catalog action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubConfig {
    pub action: String,
    pub reply: Vec<Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            stubs: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Registry with a stub handler for every configured stub.
    pub fn build_registry(&self) -> Result<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        for stub in &self.stubs {
            let spec = actions::lookup(&stub.action)
                .ok_or_else(|| eyre!("Stub for unknown action: {}", stub.action))?;
            if stub.reply.len() != spec.replies {
                return Err(eyre!(
                    "Stub for {} has {} reply values, the action replies with {}",
                    spec.name,
                    stub.reply.len(),
                    spec.replies
                ));
            }
            registry.register(spec, StubHandler::new(stub.reply.clone()))?;
        }
        Ok(registry)
    }
}
