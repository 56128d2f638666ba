//! Relay configuration: one source descriptor, one destination descriptor.
//!
//! Configuration is read from a TOML file:
//!
//! ```toml
//! log_to = "logs"
//!
//! [source]
//! host = "sftp.example.com"
//! port = 22
//! root_path = "outbound"
//! username = "relay"
//! password = "secret"
//! file_name_filter = "*.csv"
//! exclude_directories = ["archive"]
//! exclude_files = ["Thumbs.db"]
//! move_files = true
//!
//! [destination]
//! root_path = "/srv/inbound"
//! set_attributes = true
//! action = "email-summary"
//! ```
//!
//! A descriptor without a `host` addresses the local filesystem.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::names_match;
use crate::relay::FileNameFilter;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_filter() -> String {
    FileNameFilter::MATCH_ALL.to_string()
}

fn default_true() -> bool {
    true
}

/// Connection settings shared by source and destination.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Remote host; absent or blank selects the local filesystem.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root directory of the tree to relay.
    #[serde(default)]
    pub root_path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Record connection-level chatter in the run log.
    #[serde(default)]
    pub verbose_logging: bool,
}

impl ServiceDescriptor {
    /// Descriptor for a directory on the local filesystem.
    pub fn local(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    /// Descriptor for a directory on an SFTP host.
    pub fn remote(
        host: impl Into<String>,
        port: u16,
        root_path: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port,
            root_path: root_path.into(),
            username: username.into(),
            password: password.into(),
            verbose_logging: false,
        }
    }

    /// The configured host, if it is non-blank.
    pub fn remote_host(&self) -> Option<&str> {
        self.host.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    pub fn is_remote(&self) -> bool {
        self.remote_host().is_some()
    }
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            root_path: String::new(),
            username: String::new(),
            password: String::new(),
            verbose_logging: false,
        }
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("root_path", &self.root_path)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verbose_logging", &self.verbose_logging)
            .finish()
    }
}

/// Where files are relayed from, and which of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(flatten)]
    pub service: ServiceDescriptor,
    /// Glob selecting the files to relay.
    #[serde(default = "default_filter")]
    pub file_name_filter: String,
    #[serde(default = "default_true")]
    pub recurse_subdirectories: bool,
    /// Directory names skipped during recursion (case-insensitive).
    #[serde(default)]
    pub exclude_directories: Vec<String>,
    /// File names never listed from the source (case-insensitive).
    #[serde(default)]
    pub exclude_files: Vec<String>,
    /// Delete each source file once it has been copied.
    #[serde(default)]
    pub move_files: bool,
}

impl SourceDescriptor {
    pub fn new(service: ServiceDescriptor) -> Self {
        Self {
            service,
            file_name_filter: default_filter(),
            recurse_subdirectories: true,
            exclude_directories: Vec::new(),
            exclude_files: Vec::new(),
            move_files: false,
        }
    }

    pub fn is_directory_excluded(&self, name: &str) -> bool {
        self.exclude_directories
            .iter()
            .any(|d| names_match(d, name))
    }
}

/// Where files are relayed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    #[serde(flatten)]
    pub service: ServiceDescriptor,
    /// Stamp each written file with the source modification time.
    #[serde(default)]
    pub set_attributes: bool,
    /// Name of the action hook notified about relayed files.
    #[serde(default)]
    pub action: Option<String>,
}

impl DestinationDescriptor {
    pub fn new(service: ServiceDescriptor) -> Self {
        Self {
            service,
            set_attributes: false,
            action: None,
        }
    }
}

/// A complete relay job as read from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
    /// Directory receiving the rotating log files.
    #[serde(default)]
    pub log_to: Option<PathBuf>,
}

impl RelayConfig {
    /// Load and validate a config file.
    ///
    /// A relative `log_to` is resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: RelayConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(log_to) = &config.log_to
            && log_to.is_relative()
            && let Some(parent) = path.parent()
        {
            config.log_to = Some(parent.join(log_to));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check settings that would otherwise only fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FileNameFilter::parse(&self.source.file_name_filter)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.source.service.is_remote() && self.source.service.username.is_empty() {
            return Err(ConfigError::Invalid(
                "source host is set but no username is configured".into(),
            ));
        }
        if self.destination.service.is_remote() && self.destination.service.username.is_empty() {
            return Err(ConfigError::Invalid(
                "destination host is set but no username is configured".into(),
            ));
        }
        if let Some(action) = &self.destination.action
            && action.trim().is_empty()
        {
            return Err(ConfigError::Invalid("destination action is blank".into()));
        }
        Ok(())
    }
}
