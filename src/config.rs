use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::env_vars::CONFIG_PREFIX;
use crate::state::DEFAULT_STATE_FILE;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State document, relative to the working directory unless absolute
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Shell file sourced before every step script; `~` is expanded.
    /// An empty value disables sourcing.
    #[serde(default = "default_rcfile")]
    pub rcfile: String,
    /// Parent of the per-step scratch dirs (default: system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<String>,
}

fn default_state_file() -> String {
    DEFAULT_STATE_FILE.to_string()
}

fn default_rcfile() -> String {
    "~/.guided-setup/rc".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            rcfile: default_rcfile(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Shell invoked with `-c` for every step script
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether `run` logs to a file (false = stderr for debugging)
    #[serde(default = "default_log_to_file")]
    pub to_file: bool,

    /// Run log, appended to across runs
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_to_file() -> bool {
    true
}

fn default_log_file() -> String {
    "guided-setup.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: default_log_to_file(),
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Output format: asciidoc or markdown
    #[serde(default = "default_render_format")]
    pub format: String,
    #[serde(default = "default_render_title")]
    pub title: String,
}

fn default_render_format() -> String {
    "asciidoc".to_string()
}

fn default_render_title() -> String {
    "Workflow".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            format: default_render_format(),
            title: default_render_title(),
        }
    }
}

impl Config {
    /// Path to the project config file, relative to the working directory
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".guided-setup/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so guided-setup works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Project config in .guided-setup/
        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/guided-setup/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("guided-setup").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with GUIDED_SETUP_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix(CONFIG_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Save config to .guided-setup/config.toml
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::project_config_path();
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(config_path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    /// Get absolute path to the state document
    pub fn state_file_path(&self) -> PathBuf {
        absolute(PathBuf::from(&self.paths.state_file))
    }

    /// Shell rc file with `~` expanded, `None` when disabled
    pub fn rcfile_path(&self) -> Option<PathBuf> {
        let raw = self.paths.rcfile.trim();
        if raw.is_empty() {
            return None;
        }
        Some(expand_home(raw))
    }

    pub fn scratch_dir_path(&self) -> Option<PathBuf> {
        self.paths
            .scratch_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .map(|dir| absolute(expand_home(dir)))
    }

    /// Get absolute path to the run log
    pub fn log_file_path(&self) -> PathBuf {
        absolute(expand_home(&self.logging.file))
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(raw),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.paths.state_file, ".guided-setup-state.json");
        assert_eq!(config.paths.rcfile, "~/.guided-setup/rc");
        assert!(config.paths.scratch_dir.is_none());
        assert_eq!(config.execution.shell, "sh");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.to_file);
        assert_eq!(config.render.format, "asciidoc");
        assert_eq!(config.render.title, "Workflow");
    }

    #[test]
    fn test_load_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[execution]\nshell = \"bash\"\n\n[render]\nformat = \"markdown\"\n",
        )
        .unwrap();

        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.execution.shell, "bash");
        assert_eq!(config.render.format, "markdown");
        // Untouched sections keep their defaults
        assert_eq!(config.render.title, "Workflow");
        assert_eq!(config.paths.state_file, ".guided-setup-state.json");
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.paths.scratch_dir = Some("/var/tmp".to_string());
        config.logging.level = "debug".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(loaded.paths.scratch_dir.as_deref(), Some("/var/tmp"));
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/.guided-setup/rc"), home.join(".guided-setup/rc"));
        assert_eq!(expand_home("/etc/rc"), PathBuf::from("/etc/rc"));
        assert_eq!(expand_home("~other/rc"), PathBuf::from("~other/rc"));
    }

    #[test]
    fn test_rcfile_disabled_when_empty() {
        let mut config = Config::default();
        assert!(config.rcfile_path().is_some());
        config.paths.rcfile = String::new();
        assert!(config.rcfile_path().is_none());
    }

    #[test]
    fn test_paths_are_absolute() {
        let mut config = Config::default();
        config.paths.scratch_dir = Some("scratch".to_string());
        assert!(config.state_file_path().is_absolute());
        assert!(config.log_file_path().is_absolute());
        assert!(config.scratch_dir_path().unwrap().is_absolute());
    }
}
