// Configuration file for the daemon.
//
// Global config: `~/.sitewatch/config.toml`
// Explicit config: `--config <path>`

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::{CommandLauncher, ServeTarget, ADDR_PLACEHOLDER};

/// Root directory for sitewatch global state: `~/.sitewatch/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".sitewatch"))
}

/// Path to the global config file: `~/.sitewatch/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub watch: WatchConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load `explicit` if given, otherwise the global file. A missing global
    /// file yields defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match global_config_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "watch.interval",
                message: "must be greater than zero".into(),
            });
        }
        if self.server.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server.program",
                message: "must not be empty".into(),
            });
        }
        if !self.server.args.iter().any(|arg| arg.contains(ADDR_PLACEHOLDER)) {
            return Err(ConfigError::Invalid {
                field: "server.args",
                message: format!("must pass the listen address via `{ADDR_PLACEHOLDER}`"),
            });
        }
        Ok(())
    }

    pub fn serve_target(&self) -> ServeTarget {
        ServeTarget { listen_addr: self.server.addr.clone(), workdir: self.watch.workdir.clone() }
    }

    pub fn launcher(&self) -> CommandLauncher {
        CommandLauncher::new(self.server.program.clone(), self.server.args.clone())
    }
}

/// Repository polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Time between polls, e.g. `30s`.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Repository checkout, also the served process's working directory.
    pub workdir: PathBuf,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), workdir: PathBuf::from(".") }
    }
}

/// The served documentation process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub program: String,
    /// Arguments; `{addr}` is replaced by `addr`.
    pub args: Vec<String>,
    pub addr: String,
    /// How long shutdown waits for the process to exit.
    #[serde(with = "duration_str")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: "pkgsite".into(),
            args: vec!["-http".into(), ADDR_PLACEHOLDER.into()],
            addr: ":8080".into(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub enabled: bool,
    /// Append to this file instead of stdout.
    pub file: Option<PathBuf>,
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { enabled: true, file: None, level: LogLevel::Info, format: LogFormat::Json }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Disabled,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(ConfigError::Invalid {
                field: "log.level",
                message: format!(
                    "unknown level `{other}`, expected disabled, error, warn, info, debug or trace"
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            other => Err(ConfigError::Invalid {
                field: "log.format",
                message: format!("unknown format `{other}`, expected json or text"),
            }),
        }
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};
    use sitewatch_common::duration::{format_duration, parse_duration};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.watch.interval, Duration::from_secs(30));
        assert_eq!(cfg.watch.workdir, PathBuf::from("."));
        assert_eq!(cfg.server.program, "pkgsite");
        assert_eq!(cfg.server.args, vec!["-http", "{addr}"]);
        assert_eq!(cfg.server.addr, ":8080");
        assert_eq!(cfg.server.shutdown_grace, Duration::from_secs(5));
        assert!(cfg.log.enabled);
        assert!(cfg.log.file.is_none());
        assert_eq!(cfg.log.level, LogLevel::Info);
        assert_eq!(cfg.log.format, LogFormat::Json);
        cfg.validate().expect("defaults should validate");
    }

    #[test]
    fn parse_from_toml() {
        let toml_str = r#"
[watch]
interval = "1m30s"
workdir = "/srv/docs"

[server]
program = "godoc"
args = ["-http={addr}", "-index"]
addr = "127.0.0.1:6060"
shutdown_grace = "500ms"

[log]
enabled = true
file = "/var/log/sitewatch.log"
level = "debug"
format = "text"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.watch.interval, Duration::from_secs(90));
        assert_eq!(cfg.watch.workdir, PathBuf::from("/srv/docs"));
        assert_eq!(cfg.server.program, "godoc");
        assert_eq!(cfg.server.shutdown_grace, Duration::from_millis(500));
        assert_eq!(cfg.log.file, Some(PathBuf::from("/var/log/sitewatch.log")));
        assert_eq!(cfg.log.level, LogLevel::Debug);
        assert_eq!(cfg.log.format, LogFormat::Text);
        cfg.validate().unwrap();

        assert_eq!(
            cfg.launcher().render_args(&cfg.server.addr),
            vec!["-http=127.0.0.1:6060", "-index"]
        );
        assert_eq!(
            cfg.serve_target(),
            ServeTarget { listen_addr: "127.0.0.1:6060".into(), workdir: PathBuf::from("/srv/docs") }
        );
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[server]
addr = ":9000"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.addr, ":9000");
        assert_eq!(cfg.server.program, "pkgsite"); // default
        assert_eq!(cfg.watch.interval, Duration::from_secs(30)); // default
    }

    #[test]
    fn empty_toml_is_default() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml_str = r#"
[watch]
intervall = "10s"
"#;
        let error = toml::from_str::<Config>(toml_str).expect_err("parse should fail");
        assert!(error.to_string().contains("unknown field `intervall`"));
    }

    #[test]
    fn rejects_malformed_duration() {
        let toml_str = r#"
[watch]
interval = "30 seconds"
"#;
        let error = toml::from_str::<Config>(toml_str).expect_err("parse should fail");
        assert!(error.to_string().contains("invalid duration"));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut cfg = Config::default();
        cfg.watch.interval = Duration::ZERO;
        match cfg.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "watch.interval"),
            other => panic!("expected invalid interval, got {other:?}"),
        }
    }

    #[test]
    fn validate_requires_addr_placeholder() {
        let mut cfg = Config::default();
        cfg.server.args = vec!["-http".into(), ":8080".into()];
        match cfg.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "server.args"),
            other => panic!("expected invalid args, got {other:?}"),
        }
    }

    #[test]
    fn load_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let error = Config::load(Some(&path)).expect_err("missing explicit config");
        assert!(matches!(error, ConfigError::Io { .. }));
        assert!(error.to_string().contains("missing.toml"));
    }

    #[test]
    fn load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch]\ninterval = \"5s\"\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.watch.interval, Duration::from_secs(5));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut cfg = Config::default();
        cfg.watch.interval = Duration::from_millis(1500);
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("interval = \"1500ms\""));
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), cfg);
    }

    #[test]
    fn log_level_and_format_from_str() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::Disabled);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn global_dir_is_under_home() {
        let dir = global_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with(".sitewatch"));
        assert!(global_config_path().unwrap().ends_with(".sitewatch/config.toml"));
    }
}
