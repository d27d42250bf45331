//! Server configuration: a TOML file merged with command-line arguments.
//!
//! The configuration file carries an ordered `[[servers]]` array. Host
//! arguments select matching entries by name or address; when none match,
//! every configured entry is used. Without a readable configuration file the
//! host arguments become descriptors directly, with credentials taken from
//! the command line.

use std::fs;
use std::path::Path;

use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/mtop.toml";
pub const DEFAULT_HOST: &str = "localhost:27017";
pub const DEFAULT_PORT: u16 = 27017;

/// Which blocks a server feeds. All on unless the configuration says
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub status: bool,
    pub replication_info: bool,
    pub replica_set: bool,
    pub operations: bool,
    /// When off, the server's operation listing is stripped of replication
    /// plumbing.
    pub replication_operations: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            status: true,
            replication_info: true,
            replica_set: true,
            operations: true,
            replication_operations: true,
        }
    }
}

/// Immutable identity of one monitored server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub features: FeatureFlags,
}

impl ServerDescriptor {
    /// Descriptor for a bare host argument: the address doubles as the name.
    pub fn from_host(host: &str, username: Option<&str>, password: Option<&str>) -> Self {
        ServerDescriptor {
            name: host.to_string(),
            address: host.to_string(),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            features: FeatureFlags::default(),
        }
    }

    /// True if free-form user input names this server: by display name, by
    /// address, or by address with the default port appended.
    pub fn same_identity(&self, candidate: &str) -> bool {
        if self.name == candidate || self.address == candidate {
            return true;
        }
        !self.address.contains(':')
            && format!("{}:{}", self.address, DEFAULT_PORT) == candidate
    }
}

/// Configuration failure: unreadable structure or values.
#[derive(Debug)]
pub struct ConfigError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration {}: {}", self.path, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    servers: Vec<ServerSection>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    name: String,
    address: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "enabled")]
    status: bool,
    #[serde(default = "enabled")]
    replication_info: bool,
    #[serde(default = "enabled")]
    replica_set: bool,
    #[serde(default = "enabled")]
    operations: bool,
    #[serde(default = "enabled")]
    replication_operations: bool,
}

impl ServerSection {
    fn into_descriptor(self) -> ServerDescriptor {
        ServerDescriptor {
            name: self.name,
            address: self.address,
            username: self.username,
            password: self.password,
            features: FeatureFlags {
                status: self.status,
                replication_info: self.replication_info,
                replica_set: self.replica_set,
                operations: self.operations,
                replication_operations: self.replication_operations,
            },
        }
    }
}

/// Builds the ordered server list from the configuration file and the
/// command-line host arguments.
pub fn load_servers(
    path: &Path,
    hosts: &[String],
    username: Option<&str>,
    password: Option<&str>,
) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        // No file: hosts stand on their own.
        Err(_) => {
            return Ok(hosts
                .iter()
                .map(|host| ServerDescriptor::from_host(host, username, password))
                .collect());
        }
    };
    let parsed: ConfigFile = toml::from_str(&text).map_err(|err| ConfigError {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;

    let mut sections = parsed.servers;
    let selected: Vec<bool> = sections
        .iter()
        .map(|section| {
            hosts
                .iter()
                .any(|host| *host == section.name || *host == section.address)
        })
        .collect();
    if selected.iter().any(|&keep| keep) {
        let mut keep = selected.into_iter();
        sections.retain(|_| keep.next().unwrap_or(false));
    }
    Ok(sections
        .into_iter()
        .map(ServerSection::into_descriptor)
        .collect())
}
