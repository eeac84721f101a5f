use claudette::providers::ollama::{OLLAMA_HOST, OLLAMA_KEEP_ALIVE, OLLAMA_MODEL};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Configuration file not found: {0}")]
    MissingFile(PathBuf),

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub model: String,
    pub host: String,
    pub require_confirmation: bool,
    pub image_mode: bool,
    pub temperature: f32,
    pub enable_thinking: bool,
    pub keep_alive: String,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    pub tools: bool,
    /// Replaces the default system prompt when set
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Values given on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub host: Option<String>,
    pub temperature: Option<f32>,
    pub no_confirm: bool,
    pub thinking: bool,
}

impl Settings {
    /// Defaults, then the YAML file, then `CLAUDETTE_*` variables, then `overrides`.
    ///
    /// Without an explicit `config_file` a `config.yaml` in the working
    /// directory is used when present.
    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path.to_path_buf()));
                }
                File::from(path).format(FileFormat::Yaml).required(true)
            }
            None => File::new(CONFIG_FILE, FileFormat::Yaml).required(false),
        };

        let config = Config::builder()
            .set_default("model", OLLAMA_MODEL)?
            .set_default("host", OLLAMA_HOST)?
            .set_default("require_confirmation", true)?
            .set_default("image_mode", false)?
            .set_default("temperature", 0.0)?
            .set_default("enable_thinking", false)?
            .set_default("keep_alive", OLLAMA_KEEP_ALIVE)?
            .set_default("tools", true)?
            .add_source(file)
            .add_source(Environment::with_prefix("CLAUDETTE").try_parsing(true))
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply(overrides);
        settings.validate()?;
        tracing::debug!(?settings, "loaded settings");
        Ok(settings)
    }

    fn apply(&mut self, overrides: &Overrides) {
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(temperature) = overrides.temperature {
            self.temperature = temperature;
        }
        if overrides.no_confirm {
            self.require_confirmation = false;
        }
        if overrides.thinking {
            self.enable_thinking = true;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid {
                key: "temperature".to_string(),
                reason: format!("{} is outside 0.0 to 2.0", self.temperature),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "model".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !is_http_url(&self.host) {
            return Err(ConfigError::Invalid {
                key: "host".to_string(),
                reason: format!("'{}' is not a URL", self.host),
            });
        }
        if self.thinking_budget == Some(0) {
            return Err(ConfigError::Invalid {
                key: "thinking_budget".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn is_http_url(host: &str) -> bool {
    host.starts_with("http://") || host.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("CLAUDETTE_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.yaml");
        std::fs::write(&empty, "{}").unwrap();

        let settings = Settings::load(Some(&empty), &Overrides::default()).unwrap();
        assert_eq!(settings.model, "llama3.1");
        assert_eq!(settings.host, "http://localhost:11434");
        assert!(settings.require_confirmation);
        assert!(!settings.image_mode);
        assert_eq!(settings.temperature, 0.0);
        assert!(!settings.enable_thinking);
        assert_eq!(settings.keep_alive, "15m");
        assert_eq!(settings.thinking_budget, None);
        assert!(settings.tools);
        assert_eq!(settings.system_prompt, None);
    }

    #[test]
    #[serial]
    fn test_file_settings() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "model: qwen3:14b\nimage_mode: true\ntemperature: 0.7\nthinking_budget: 2500\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(settings.model, "qwen3:14b");
        assert!(settings.image_mode);
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.thinking_budget, Some(2500));
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "model: qwen3:14b\n").unwrap();
        env::set_var("CLAUDETTE_MODEL", "mistral");
        env::set_var("CLAUDETTE_REQUIRE_CONFIRMATION", "false");

        let settings = Settings::load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(settings.model, "mistral");
        assert!(!settings.require_confirmation);

        env::remove_var("CLAUDETTE_MODEL");
        env::remove_var("CLAUDETTE_REQUIRE_CONFIRMATION");
    }

    #[test]
    #[serial]
    fn test_cli_overrides_win() {
        clean_env();
        env::set_var("CLAUDETTE_MODEL", "mistral");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "temperature: 0.5\n").unwrap();

        let overrides = Overrides {
            model: Some("llama3.2".to_string()),
            temperature: Some(1.2),
            no_confirm: true,
            thinking: true,
            ..Default::default()
        };
        let settings = Settings::load(Some(&path), &overrides).unwrap();
        assert_eq!(settings.model, "llama3.2");
        assert_eq!(settings.temperature, 1.2);
        assert!(!settings.require_confirmation);
        assert!(settings.enable_thinking);

        env::remove_var("CLAUDETTE_MODEL");
    }

    #[test]
    #[serial]
    fn test_invalid_settings() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "temperature: 3.5\n").unwrap();

        let result = Settings::load(Some(&path), &Overrides::default());
        assert!(matches!(result, Err(ConfigError::Invalid { key, .. }) if key == "temperature"));

        std::fs::write(&path, "host: localhost:11434\n").unwrap();
        let result = Settings::load(Some(&path), &Overrides::default());
        assert!(matches!(result, Err(ConfigError::Invalid { key, .. }) if key == "host"));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file() {
        clean_env();
        let result = Settings::load(
            Some(Path::new("/definitely/not/here.yaml")),
            &Overrides::default(),
        );
        assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    }
}
