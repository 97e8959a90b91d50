use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

/// Directory under a project root holding config and the event store.
pub const STATE_DIR: &str = ".mentorbook";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// How protocol writes treat a row that changed since it was read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Compare-and-swap on the row version; mismatches fail with `StaleRead`.
    #[default]
    Conditional,
    /// Overwrite whatever is there.
    LastWriteWins,
}

impl WriteMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conditional => "conditional",
            Self::LastWriteWins => "last-write-wins",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the mutating session refreshes its cache after an acknowledged write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    /// Patch the one row returned by the repository.
    #[default]
    Patch,
    /// Reload the whole collection.
    Refetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default = "default_true")]
    pub enforce_capacity: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            enforce_capacity: default_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub strategy: SyncStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_required_mentor_count")]
    pub required_mentor_count: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            required_mentor_count: default_required_mentor_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    /// Identity token used when `--token` and `MENTORBOOK_TOKEN` are absent.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub engine: EngineConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

#[must_use]
pub fn store_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("events.sqlite3")
}

/// Load `<root>/.mentorbook/config.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or if
/// it sets `defaults.required_mentor_count` to zero.
pub fn load_engine_config(project_root: &Path) -> Result<EngineConfig> {
    let path = project_root.join(STATE_DIR).join("config.toml");
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    anyhow::ensure!(
        config.defaults.required_mentor_count >= 1,
        "{}: defaults.required_mentor_count must be at least 1",
        path.display()
    );
    Ok(config)
}

/// Load `~/.config/mentorbook/config.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("mentorbook/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// # Errors
///
/// Returns an error if either config file is unreadable or malformed.
pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let engine = load_engine_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        engine,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_true() -> bool {
    true
}

const fn default_required_mentor_count() -> u32 {
    1
}
