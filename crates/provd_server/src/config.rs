//! Broker configuration.

use provd_core::ProvResult;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which subset of adapters a broker process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instance {
    /// System-scoped settings (telephony).
    System,
    /// User-scoped settings (email accounts).
    Session,
}

impl Instance {
    /// Returns the instance name.
    pub fn name(&self) -> &'static str {
        match self {
            Instance::System => "system",
            Instance::Session => "session",
        }
    }

    /// Returns the default bus name the interface layer registers under.
    pub fn default_bus_name(&self) -> &'static str {
        match self {
            Instance::System => "org.provd.system",
            Instance::Session => "org.provd.session",
        }
    }

    /// Returns the default directory for map files and local stores.
    pub fn default_data_dir(&self) -> PathBuf {
        match self {
            Instance::System => PathBuf::from("/var/lib/provd"),
            Instance::Session => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir)
                .join(".local/share/provd"),
        }
    }
}

impl std::str::FromStr for Instance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Instance::System),
            "session" => Ok(Instance::Session),
            other => Err(format!("unknown instance {other:?}")),
        }
    }
}

/// Configuration for a broker process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hosted adapter subset.
    pub instance: Instance,
    /// How long the broker stays up without a session or request.
    pub idle_timeout: Duration,
    /// Directory holding map files and local stores.
    pub data_dir: PathBuf,
    /// Identity under which the interface layer registers.
    pub bus_name: String,
}

impl ServerConfig {
    /// Creates a configuration with the defaults of `instance`.
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            idle_timeout: Duration::from_secs(30),
            data_dir: instance.default_data_dir(),
            bus_name: instance.default_bus_name().to_string(),
        }
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the bus name.
    pub fn with_bus_name(mut self, name: impl Into<String>) -> Self {
        self.bus_name = name.into();
        self
    }

    /// Returns the path of the map file belonging to `adapter`.
    pub fn map_file_path(&self, adapter: &str) -> PathBuf {
        self.data_dir.join(format!("{adapter}-mapfile.json"))
    }

    /// Returns the path of a local store file in the data directory.
    pub fn store_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Creates the data directory if needed.
    pub fn ensure_data_dir(&self) -> ProvResult<&Path> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(&self.data_dir)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Instance::Session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::new(Instance::System);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/provd"));
        assert_eq!(config.bus_name, "org.provd.system");
    }

    #[test]
    fn builder() {
        let config = ServerConfig::default()
            .with_idle_timeout(Duration::from_millis(50))
            .with_data_dir("/tmp/provd")
            .with_bus_name("org.example.provd");

        assert_eq!(config.instance, Instance::Session);
        assert_eq!(config.idle_timeout, Duration::from_millis(50));
        assert_eq!(
            config.map_file_path("telephony"),
            PathBuf::from("/tmp/provd/telephony-mapfile.json")
        );
        assert_eq!(config.bus_name, "org.example.provd");
    }

    #[test]
    fn instance_parsing() {
        assert_eq!("system".parse::<Instance>().unwrap(), Instance::System);
        assert_eq!("session".parse::<Instance>().unwrap(), Instance::Session);
        assert!("user".parse::<Instance>().is_err());
    }

    #[test]
    fn data_dir_is_created() {
        let dir = provd_testkit::prelude::temp_data_dir();
        let config = ServerConfig::default().with_data_dir(dir.path().join("a/b"));
        assert!(config.ensure_data_dir().unwrap().is_dir());
    }
}
