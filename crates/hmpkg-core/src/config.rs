use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::activate::HomeManagerSwitch;
use crate::process::ShellRunner;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(std::io::Error),
    #[error("failed to write config file: {0}")]
    Write(std::io::Error),
    #[error("failed to parse toml: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize toml: {0}")]
    Serialize(toml::ser::Error),
    #[error("configuration file not found or unreadable at {0}")]
    MissingTarget(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub hmpkg: HmpkgSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub apply: ApplySection,
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        if path.exists() {
            Config::load_from_path(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(ConfigError::Write)?;
        Ok(())
    }

    /// Resolves the managed configuration file; `override_path` wins over the config.
    pub fn target_path(
        &self,
        home: &Path,
        override_path: Option<&Path>,
    ) -> Result<PathBuf, ConfigError> {
        let path = match (override_path, &self.target.file) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(file)) => expand_tilde(file, home),
            (None, None) => home.join(".config").join("home-manager").join("home.nix"),
        };
        if std::fs::File::open(&path).is_err() || !path.is_file() {
            return Err(ConfigError::MissingTarget(path));
        }
        Ok(path)
    }

    pub fn activator(&self, home: &Path) -> HomeManagerSwitch<ShellRunner> {
        let profile = self
            .apply
            .source_profile
            .then(|| home.join(".profile"));
        let runner = ShellRunner::new(self.apply.shell.clone()).with_profile(profile);
        HomeManagerSwitch::new(runner, &self.apply)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HmpkgSection {
    pub version: String,
}

impl Default for HmpkgSection {
    fn default() -> Self {
        HmpkgSection {
            version: "0.1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default = "default_package_type")]
    pub default_type: String,
}

fn default_package_type() -> String {
    "home".to_string()
}

impl Default for TargetSection {
    fn default() -> Self {
        TargetSection {
            file: None,
            default_type: default_package_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApplySection {
    pub command: String,
    pub shell: String,
    pub source_profile: bool,
    pub insecure_env: String,
    pub error_prefix: String,
}

impl Default for ApplySection {
    fn default() -> Self {
        ApplySection {
            command: "home-manager switch".to_string(),
            shell: "bash".to_string(),
            source_profile: true,
            insecure_env: "NIXPKGS_ALLOW_INSECURE".to_string(),
            error_prefix: "error: attribute".to_string(),
        }
    }
}

fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if path == "~" => home.to_path_buf(),
        None => PathBuf::from(path),
    }
}
