use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::WizardError;
use crate::utils::{app_data_dir, persistence::write_atomic};

const CONFIG_FILE: &str = "config.json";
const DEFAULT_RESUME_FILE: &str = "discovery.yaml";
pub const DEFAULT_SERVO_IMAGE: &str = "opsani/servo-k8s-prom-vegeta:latest";

/// Which optimization the generated manifests target. Saturation adds a load
/// generator to the measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    #[default]
    Default,
    Saturation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub mode: OptimizationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_file: Option<PathBuf>,
}

/// Values given on the command line. Unset fields keep the file's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub account: Option<String>,
    pub app: Option<String>,
    pub token: Option<String>,
    pub mode: Option<OptimizationMode>,
    pub servo_image: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub resume_file: Option<PathBuf>,
}

impl BuilderConfig {
    /// Layers `overrides` on top of `self`; set fields win.
    pub fn merge(self, overrides: ConfigOverrides) -> Self {
        Self {
            account: overrides.account.or(self.account),
            app: overrides.app.or(self.app),
            token: overrides.token.or(self.token),
            mode: overrides.mode.unwrap_or(self.mode),
            servo_image: overrides.servo_image.or(self.servo_image),
            output_dir: overrides.output_dir.or(self.output_dir),
            resume_file: overrides.resume_file.or(self.resume_file),
        }
    }

    /// Copy safe to write to disk. Tokens only ever come from flags or the
    /// environment.
    pub fn without_token(&self) -> Self {
        Self {
            token: None,
            ..self.clone()
        }
    }

    /// Account, app and token are all known, so credentials need no prompt.
    pub fn has_credentials(&self) -> bool {
        self.account.is_some() && self.app.is_some() && self.token.is_some()
    }

    pub fn servo_image(&self) -> &str {
        self.servo_image.as_deref().unwrap_or(DEFAULT_SERVO_IMAGE)
    }

    pub fn output_root(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn resume_path(&self) -> PathBuf {
        self.resume_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RESUME_FILE))
    }

    /// Copy safe to print: the token is masked.
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::with_base_dir(app_data_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Self {
        Self {
            path: base.join(CONFIG_FILE),
        }
    }

    pub fn load(&self) -> Result<BuilderConfig, WizardError> {
        if !self.path.exists() {
            return Ok(BuilderConfig::default());
        }
        let data = fs::read_to_string(&self.path)?;
        serde_json::from_str(&data).map_err(|err| {
            WizardError::Config(format!("{} is not valid: {err}", self.path.display()))
        })
    }

    pub fn save(&self, config: &BuilderConfig) -> Result<(), WizardError> {
        let json = serde_json::to_string_pretty(config)?;
        write_atomic(&self.path, &json)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().to_path_buf());
        let config = manager.load().unwrap();
        assert_eq!(config, BuilderConfig::default());
        assert_eq!(config.servo_image(), DEFAULT_SERVO_IMAGE);
        assert_eq!(config.resume_path(), PathBuf::from("discovery.yaml"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().join("home"));
        let config = BuilderConfig {
            account: Some("acme.com".into()),
            mode: OptimizationMode::Saturation,
            ..BuilderConfig::default()
        };
        manager.save(&config).unwrap();
        assert_eq!(manager.load().unwrap(), config);
        let raw = fs::read_to_string(manager.path()).unwrap();
        assert!(raw.contains("\"saturation\""));
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().to_path_buf());
        fs::write(manager.path(), "{ not json").unwrap();
        assert!(matches!(manager.load(), Err(WizardError::Config(_))));
    }

    #[test]
    fn overrides_win_and_token_is_redacted() {
        let file = BuilderConfig {
            account: Some("from-file".into()),
            app: Some("web".into()),
            mode: OptimizationMode::Saturation,
            ..BuilderConfig::default()
        };
        let flags = ConfigOverrides {
            account: Some("from-flag".into()),
            token: Some("secret".into()),
            ..ConfigOverrides::default()
        };
        let merged = file.merge(flags);
        assert_eq!(merged.account.as_deref(), Some("from-flag"));
        assert_eq!(merged.app.as_deref(), Some("web"));
        assert_eq!(merged.mode, OptimizationMode::Saturation);
        assert!(merged.has_credentials());
        assert_eq!(merged.redacted().token.as_deref(), Some("********"));
    }

    #[test]
    fn explicit_default_mode_overrides_the_file() {
        let file = BuilderConfig {
            mode: OptimizationMode::Saturation,
            ..BuilderConfig::default()
        };
        let unset = file.clone().merge(ConfigOverrides::default());
        assert_eq!(unset.mode, OptimizationMode::Saturation);

        let explicit = file.merge(ConfigOverrides {
            mode: Some(OptimizationMode::Default),
            ..ConfigOverrides::default()
        });
        assert_eq!(explicit.mode, OptimizationMode::Default);
    }

    #[test]
    fn saved_settings_never_carry_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_base_dir(dir.path().to_path_buf());
        let config = BuilderConfig {
            account: Some("acme.com".into()),
            token: Some("s3cret".into()),
            ..BuilderConfig::default()
        };
        manager.save(&config.without_token()).unwrap();
        let raw = fs::read_to_string(manager.path()).unwrap();
        assert!(raw.contains("acme.com"));
        assert!(!raw.contains("s3cret"));
        assert_eq!(manager.load().unwrap().token, None);
    }
}
