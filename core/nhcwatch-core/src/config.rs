//! Configuration loading.
//!
//! Layers, last wins:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, else `$NHC_CONFIG`, else `/etc/nhc/nhcwatch.toml`)
//! 3. Environment overrides (see [`Config::apply_env`])
//! 4. Command-line flags (applied by the binaries)
//!
//! ```toml
//! [wrapper]
//! program = "nhc"
//! expire = "1d"
//! loop_spec = "15mt"
//!
//! [notify]
//! transport = "command"
//! command = "/usr/libexec/nhc/slack-notify"
//! destination = "#hpc-alerts"
//!
//! [rm]
//! manager = "slurm"
//! ignore_empty_note = false
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{NhcError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nhc/nhcwatch.toml";
pub const CONFIG_ENV: &str = "NHC_CONFIG";
pub const DEFAULT_LEADER: &str = "NHC:";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub wrapper: WrapperConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub rm: RmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WrapperConfig {
    /// Health-check program to wrap.
    pub program: String,
    pub args: Vec<String>,
    /// Explicit state directory; otherwise `<tmp>/<state_dir_prefix>-<euid>`.
    pub state_dir: Option<PathBuf>,
    pub state_dir_prefix: String,
    /// Timespec after which a saved result is forgotten.
    pub expire: Option<String>,
    /// Loop spec (`<timespec>[ctr]`); unset runs once.
    pub loop_spec: Option<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            program: "nhc".to_string(),
            args: Vec::new(),
            state_dir: None,
            state_dir_prefix: "nhc-wrapper".to_string(),
            expire: None,
            loop_spec: None,
        }
    }
}

impl WrapperConfig {
    pub fn state_dir_for(&self, euid: u32) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("{}-{}", self.state_dir_prefix, euid))
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdout,
    Mail,
    Command,
}

impl FromStr for TransportKind {
    type Err = NhcError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" | "" => Ok(TransportKind::Stdout),
            "mail" | "email" => Ok(TransportKind::Mail),
            "command" | "webhook" => Ok(TransportKind::Command),
            other => Err(NhcError::InvalidArgument(format!(
                "unknown notification transport: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    pub transport: TransportKind,
    /// Channel (chat) or address (mail). Unset means the default recipient.
    pub destination: Option<String>,
    /// Sender program for the `command` transport.
    pub command: Option<String>,
    pub command_args: Vec<String>,
    pub mail_program: String,
    pub default_recipient: Option<String>,
    /// Also notify when a node stays offline for a reason we do not own.
    pub notify_foreign: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdout,
            destination: None,
            command: None,
            command_args: Vec::new(),
            mail_program: "mail".to_string(),
            default_recipient: None,
            notify_foreign: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RmConfig {
    /// `pbs`, `slurm`, `lsf`, `sge`...; unset means detect from PATH.
    pub manager: Option<String>,
    pub ignore_empty_note: bool,
    /// Leader tag marking notes this system owns.
    pub leader: String,
    pub commands: RmCommands,
}

impl Default for RmConfig {
    fn default() -> Self {
        Self {
            manager: None,
            ignore_empty_note: false,
            leader: DEFAULT_LEADER.to_string(),
            commands: RmCommands::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RmCommands {
    pub pbsnodes: String,
    pub sinfo: String,
    pub scontrol: String,
    pub bhosts: String,
    pub badmin: String,
}

impl Default for RmCommands {
    fn default() -> Self {
        Self {
            pbsnodes: "pbsnodes".to_string(),
            sinfo: "sinfo".to_string(),
            scontrol: "scontrol".to_string(),
            bhosts: "bhosts".to_string(),
            badmin: "badmin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file; unset logs to stderr.
    pub file: Option<PathBuf>,
    /// Filter directive used when neither `NHC_DEBUG_LOG` nor `RUST_LOG` is set.
    pub level: Option<String>,
}

pub fn default_config_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup(CONFIG_ENV)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Reads the TOML file; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| NhcError::io(format!("read config {}", path.display()), err))?;
    toml::from_str::<Config>(&content).map_err(|err| NhcError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim(),
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "Yes" | "on" | "ON"
    )
}

impl Config {
    /// Loads the file named by `path` (or the default path) and applies the
    /// process environment on top.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let lookup = |name: &str| std::env::var(name).ok();
        let path = path.unwrap_or_else(|| default_config_path(lookup));
        let mut config = load_config(&path)?;
        config.apply_env(lookup)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Environment overrides:
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `NHC_RM` | `rm.manager` |
    /// | `IGNORE_EMPTY_NOTE` | `rm.ignore_empty_note` |
    /// | `NHC_LEADER` | `rm.leader` |
    /// | `NHC_NOTIFY_DEST` | `notify.destination` |
    /// | `NHC_NOTIFY_TRANSPORT` | `notify.transport` |
    /// | `NHC_NOTIFY_COMMAND` | `notify.command` (implies `command` transport) |
    /// | `NHC_STATE_DIR` | `wrapper.state_dir` |
    /// | `NHC_PROGRAM` | `wrapper.program` |
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(manager) = get("NHC_RM") {
            self.rm.manager = Some(manager);
        }
        if let Some(value) = lookup("IGNORE_EMPTY_NOTE") {
            self.rm.ignore_empty_note = is_truthy(&value);
        }
        if let Some(leader) = get("NHC_LEADER") {
            self.rm.leader = leader;
        }
        if let Some(destination) = get("NHC_NOTIFY_DEST") {
            self.notify.destination = Some(destination);
        }
        if let Some(command) = get("NHC_NOTIFY_COMMAND") {
            self.notify.command = Some(command);
            self.notify.transport = TransportKind::Command;
        }
        if let Some(transport) = get("NHC_NOTIFY_TRANSPORT") {
            self.notify.transport = transport.parse()?;
        }
        if let Some(state_dir) = get("NHC_STATE_DIR") {
            self.wrapper.state_dir = Some(PathBuf::from(state_dir));
        }
        if let Some(program) = get("NHC_PROGRAM") {
            self.wrapper.program = program;
        }
        Ok(())
    }
}
