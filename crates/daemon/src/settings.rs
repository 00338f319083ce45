// Daemon configuration
// Layering: defaults -> TOML file -> PLUGIN_RUNTIME_* environment -> CLI flags

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use plugin_runtime_core::application::constants::DEFAULT_EXIT_GRACE;
use plugin_runtime_core::application::{RestartPolicy, SupervisorConfig};
use plugin_runtime_core::port::LaunchCommand;

pub const ENV_PREFIX: &str = "PLUGIN_RUNTIME";
pub const DEFAULT_CONFIG_FILE: &str = "daemon.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let command = LaunchCommand::default();
        Self {
            program: command.program,
            args: command.args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub restart_on_clean_exit: bool,
}

impl Default for RestartConfig {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay_ms,
            backoff_factor: policy.backoff_factor,
            restart_on_clean_exit: policy.restart_on_clean_exit,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Plugin installation directory (tilde-expanded)
    pub plugin_dir: PathBuf,
    /// Plugin identity; the plugin directory name when empty
    pub identity: String,
    pub launch: LaunchConfig,
    pub exit_grace_ms: u64,
    pub restart: RestartConfig,
    /// Relay task cap (0 = unlimited)
    pub relay_concurrency: usize,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("."),
            identity: String::new(),
            launch: LaunchConfig::default(),
            exit_grace_ms: DEFAULT_EXIT_GRACE.as_millis() as u64,
            restart: RestartConfig::default(),
            relay_concurrency: 0,
            log_format: LogFormat::default(),
            log_dir: None,
        }
    }
}

/// Command-line values taking precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub identity: Option<String>,
}

impl DaemonConfig {
    /// Load configuration from the process environment and config file
    pub fn load(overrides: &Overrides) -> Result<Self> {
        Self::load_from(overrides, environment_source())
    }

    /// Load configuration with an explicit environment source
    ///
    /// # Errors
    /// - An explicitly requested config file is missing or malformed
    /// - The resulting configuration fails validation
    pub fn load_from(overrides: &Overrides, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        match &overrides.config {
            Some(path) => {
                let path = expand_path(path);
                builder = builder.add_source(File::from(path.as_path()).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        let mut config: DaemonConfig = builder
            .add_source(environment)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if let Some(plugin_dir) = &overrides.plugin_dir {
            config.plugin_dir = plugin_dir.clone();
        }
        if let Some(identity) = &overrides.identity {
            config.identity = identity.clone();
        }

        // The plugin runs with its absolute install path as working directory
        let plugin_dir = expand_path(&config.plugin_dir);
        config.plugin_dir = plugin_dir
            .canonicalize()
            .with_context(|| format!("plugin_dir {} is not accessible", plugin_dir.display()))?;
        config.log_dir = config.log_dir.as_deref().map(expand_path);
        if config.identity.is_empty() {
            config.identity = default_identity(&config.plugin_dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.plugin_dir.is_dir() {
            bail!("plugin_dir {} is not a directory", self.plugin_dir.display());
        }
        if self.identity.is_empty() {
            bail!("identity must not be empty");
        }
        if self.launch.program.is_empty() {
            bail!("launch.program must not be empty");
        }
        // Each attempt runs two relay tasks at once
        if self.relay_concurrency == 1 {
            bail!("relay_concurrency must be 0 (unlimited) or at least 2");
        }
        if self.restart.backoff_factor < 1.0 {
            bail!(
                "restart.backoff_factor must be >= 1.0, got {}",
                self.restart.backoff_factor
            );
        }
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.identity.clone(), self.plugin_dir.clone())
            .with_launch(
                LaunchCommand::new(self.launch.program.clone())
                    .with_args(self.launch.args.iter().cloned()),
            )
            .with_exit_grace(Duration::from_millis(self.exit_grace_ms))
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_attempts: self.restart.max_attempts,
            base_delay_ms: self.restart.base_delay_ms,
            backoff_factor: self.restart.backoff_factor,
            restart_on_clean_exit: self.restart.restart_on_clean_exit,
        }
    }
}

/// `PLUGIN_RUNTIME_*` variables; nested keys use `__` (`PLUGIN_RUNTIME_LAUNCH__PROGRAM`)
pub fn environment_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(" ")
        .with_list_parse_key("launch.args")
        .try_parsing(true)
}

/// `<config dir>/daemon.toml` of the platform's project directories
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "plugin-runtime", "plugin-runtime")
        .map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn default_identity(plugin_dir: &Path) -> String {
    plugin_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
