//! Platform and deployment configuration.
//!
//! A platform file describes the hosts, the network between them, the VMs to
//! boot and the actors to deploy. YAML and JSON are both accepted.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   log_level: info
//!   max_time: 1000
//!
//! hosts:
//!   - name: Jupiter
//!     speed: 1e9
//!     cores: 4
//!     ram: 8e9
//!   - name: Tremblay
//!     speed: 1e9
//!
//! links:
//!   - name: backbone
//!     bandwidth: 1.25e8
//!     latency: 1e-4
//!
//! routes:
//!   - src: Jupiter
//!     dst: Tremblay
//!     links: [backbone]
//!
//! storages:
//!   - name: Disk1
//!     host: Jupiter
//!     size: 5e11
//!     read_bandwidth: 1e8
//!     write_bandwidth: 5e7
//!     content:
//!       /home/input.dat: 2e8
//!
//! vms:
//!   - name: VM00
//!     host: Jupiter
//!     vcpus: 1
//!     ram: 1e9
//!
//! actors:
//!   - name: master
//!     host: Jupiter
//!     function: master
//!     args: ["20"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::types::{Bytes, SimTime};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Unknown actor function: {0}")]
    UnknownFunction(String),

    #[error("Deployment error: {0}")]
    Deployment(#[from] crate::error::SimError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global simulation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Simulated time at which `run()` stops, if any
    #[serde(default)]
    pub max_time: Option<SimTime>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cores() -> u32 {
    1
}

fn default_vcpus() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_time: None,
        }
    }
}

/// A physical host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Unique host name
    pub name: String,

    /// Speed of one core, in flops per second
    pub speed: f64,

    /// Number of cores
    #[serde(default = "default_cores")]
    pub cores: u32,

    /// Memory available to VMs; unlimited when absent
    #[serde(default)]
    pub ram: Option<Bytes>,
}

/// How a link divides its bandwidth among flows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSharing {
    /// Flows share the bandwidth max-min fairly.
    #[default]
    Shared,
    /// Every flow gets the full bandwidth.
    Fatpipe,
}

/// A network link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Unique link name
    pub name: String,

    /// Bandwidth in bytes per second
    pub bandwidth: f64,

    /// Latency in seconds
    #[serde(default)]
    pub latency: SimTime,

    /// Sharing policy
    #[serde(default)]
    pub sharing: LinkSharing,
}

/// A route between two hosts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Source host name
    pub src: String,

    /// Destination host name
    pub dst: String,

    /// Link names, from source to destination
    #[serde(default)]
    pub links: Vec<String>,

    /// Whether the reverse route is declared too
    #[serde(default = "default_true")]
    pub symmetrical: bool,
}

/// A disk attached to a host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Unique storage name
    pub name: String,

    /// Host the storage is attached to
    pub host: String,

    /// Capacity in bytes
    pub size: Bytes,

    /// Read bandwidth in bytes per second
    pub read_bandwidth: f64,

    /// Write bandwidth in bytes per second
    pub write_bandwidth: f64,

    /// Files present at load time, path to size
    #[serde(default)]
    pub content: BTreeMap<String, Bytes>,
}

/// A VM created at load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Unique VM name
    pub name: String,

    /// Initial host name
    pub host: String,

    /// Virtual cores
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,

    /// Memory footprint in bytes
    #[serde(default)]
    pub ram: Bytes,

    /// Whether the VM is started right away
    #[serde(default = "default_true")]
    pub start: bool,
}

/// An actor deployed at load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Actor name
    pub name: String,

    /// Host or VM name the actor runs on
    pub host: String,

    /// Registered function name
    pub function: String,

    /// Argument vector handed to the actor
    #[serde(default)]
    pub args: Vec<String>,
}

/// Complete platform and deployment description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Global simulation parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Host definitions
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Link definitions
    #[serde(default)]
    pub links: Vec<LinkConfig>,

    /// Route definitions
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Links used between any pair of hosts without an explicit route
    #[serde(default)]
    pub default_route: Option<Vec<String>>,

    /// Storage definitions
    #[serde(default)]
    pub storages: Vec<StorageConfig>,

    /// VM definitions
    #[serde(default)]
    pub vms: Vec<VmConfig>,

    /// Actor deployment
    #[serde(default)]
    pub actors: Vec<ActorConfig>,
}

impl PlatformConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: PlatformConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: PlatformConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(t) = self.simulation.max_time {
            if !(t >= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "max_time must be non-negative, got {}",
                    t
                )));
            }
        }

        let mut hosts = HashSet::new();
        for h in &self.hosts {
            if !hosts.insert(h.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate host name: {}",
                    h.name
                )));
            }
            if !(h.speed > 0.0) || h.cores == 0 {
                return Err(ConfigError::Validation(format!(
                    "Host {} needs a positive speed and at least one core",
                    h.name
                )));
            }
            if h.ram.is_some_and(|r| !(r >= 0.0)) {
                return Err(ConfigError::Validation(format!(
                    "Host {} has a negative ram size",
                    h.name
                )));
            }
        }

        let mut links = HashSet::new();
        for l in &self.links {
            if !links.insert(l.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate link name: {}",
                    l.name
                )));
            }
            if !(l.bandwidth > 0.0) || !(l.latency >= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "Link {} needs a positive bandwidth and a non-negative latency",
                    l.name
                )));
            }
        }

        let check_links = |names: &[String], what: &str| -> ConfigResult<()> {
            for name in names {
                if !links.contains(name.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "{} references non-existent link: {}",
                        what, name
                    )));
                }
            }
            Ok(())
        };

        for r in &self.routes {
            for end in [&r.src, &r.dst] {
                if !hosts.contains(end.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "Route references non-existent host: {}",
                        end
                    )));
                }
            }
            check_links(&r.links, &format!("Route {} -> {}", r.src, r.dst))?;
        }
        if let Some(default) = &self.default_route {
            check_links(default, "Default route")?;
        }

        let mut storages = HashSet::new();
        for st in &self.storages {
            if !storages.insert(st.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate storage name: {}",
                    st.name
                )));
            }
            if !hosts.contains(st.host.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Storage {} references non-existent host: {}",
                    st.name, st.host
                )));
            }
            if !(st.size >= 0.0) || !(st.read_bandwidth > 0.0) || !(st.write_bandwidth > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "Storage {} needs a non-negative size and positive bandwidths",
                    st.name
                )));
            }
            if st.content.values().any(|size| !(*size >= 0.0)) {
                return Err(ConfigError::Validation(format!(
                    "Storage {} lists a file with a negative size",
                    st.name
                )));
            }
            let used: Bytes = st.content.values().sum();
            if used > st.size {
                return Err(ConfigError::Validation(format!(
                    "Storage {} content ({} bytes) exceeds its size ({} bytes)",
                    st.name, used, st.size
                )));
            }
        }

        let mut vms = HashSet::new();
        for vm in &self.vms {
            if hosts.contains(vm.name.as_str()) || !vms.insert(vm.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate VM name: {}",
                    vm.name
                )));
            }
            if !hosts.contains(vm.host.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "VM {} references non-existent host: {}",
                    vm.name, vm.host
                )));
            }
            if vm.vcpus == 0 || !(vm.ram >= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "VM {} needs at least one vcpu and a non-negative ram size",
                    vm.name
                )));
            }
        }

        for a in &self.actors {
            if !hosts.contains(a.host.as_str()) && !vms.contains(a.host.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Actor {} references non-existent host or VM: {}",
                    a.name, a.host
                )));
            }
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Finds a host by name.
    pub fn find_host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Finds a VM by name.
    pub fn find_vm(&self, name: &str) -> Option<&VmConfig> {
        self.vms.iter().find(|v| v.name == name)
    }

    /// Finds a storage by name.
    pub fn find_storage(&self, name: &str) -> Option<&StorageConfig> {
        self.storages.iter().find(|s| s.name == name)
    }
}

/// Builder for creating a `PlatformConfig` programmatically.
///
/// # Example
///
/// ```
/// use gridlet::config::PlatformBuilder;
///
/// let config = PlatformBuilder::new()
///     .host("alice", 1e9, 1)
///     .host("bob", 1e9, 1)
///     .link("wire", 1e6, 0.01)
///     .route("alice", "bob", &["wire"])
///     .build()
///     .unwrap();
/// assert_eq!(config.hosts.len(), 2);
/// ```
#[derive(Default)]
pub struct PlatformBuilder {
    config: PlatformConfig,
}

impl PlatformBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simulated time at which `run()` stops.
    pub fn max_time(mut self, time: SimTime) -> Self {
        self.config.simulation.max_time = Some(time);
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Adds a host with unlimited memory.
    pub fn host(mut self, name: impl Into<String>, speed: f64, cores: u32) -> Self {
        self.config.hosts.push(HostConfig {
            name: name.into(),
            speed,
            cores,
            ram: None,
        });
        self
    }

    /// Adds a host with a memory limit.
    pub fn host_with_ram(
        mut self,
        name: impl Into<String>,
        speed: f64,
        cores: u32,
        ram: Bytes,
    ) -> Self {
        self.config.hosts.push(HostConfig {
            name: name.into(),
            speed,
            cores,
            ram: Some(ram),
        });
        self
    }

    /// Adds a shared link.
    pub fn link(mut self, name: impl Into<String>, bandwidth: f64, latency: SimTime) -> Self {
        self.config.links.push(LinkConfig {
            name: name.into(),
            bandwidth,
            latency,
            sharing: LinkSharing::Shared,
        });
        self
    }

    /// Adds a fat-pipe link.
    pub fn fatpipe(mut self, name: impl Into<String>, bandwidth: f64, latency: SimTime) -> Self {
        self.config.links.push(LinkConfig {
            name: name.into(),
            bandwidth,
            latency,
            sharing: LinkSharing::Fatpipe,
        });
        self
    }

    /// Adds a symmetrical route.
    pub fn route(mut self, src: impl Into<String>, dst: impl Into<String>, links: &[&str]) -> Self {
        self.config.routes.push(RouteConfig {
            src: src.into(),
            dst: dst.into(),
            links: links.iter().map(|l| l.to_string()).collect(),
            symmetrical: true,
        });
        self
    }

    /// Sets the route used between hosts without an explicit one.
    pub fn default_route(mut self, links: &[&str]) -> Self {
        self.config.default_route = Some(links.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Attaches an empty storage to a host.
    pub fn storage(
        mut self,
        name: impl Into<String>,
        host: impl Into<String>,
        size: Bytes,
        read_bandwidth: f64,
        write_bandwidth: f64,
    ) -> Self {
        self.config.storages.push(StorageConfig {
            name: name.into(),
            host: host.into(),
            size,
            read_bandwidth,
            write_bandwidth,
            content: BTreeMap::new(),
        });
        self
    }

    /// Places a file on a storage declared earlier.
    ///
    /// Files on undeclared storages are ignored.
    pub fn file(mut self, storage: &str, path: impl Into<String>, size: Bytes) -> Self {
        if let Some(st) = self.config.storages.iter_mut().find(|s| s.name == storage) {
            st.content.insert(path.into(), size);
        }
        self
    }

    /// Adds a VM, started at load time.
    pub fn vm(mut self, name: impl Into<String>, host: impl Into<String>, vcpus: u32, ram: Bytes) -> Self {
        self.config.vms.push(VmConfig {
            name: name.into(),
            host: host.into(),
            vcpus,
            ram,
            start: true,
        });
        self
    }

    /// Deploys an actor.
    pub fn actor(
        mut self,
        name: impl Into<String>,
        host: impl Into<String>,
        function: impl Into<String>,
        args: &[&str],
    ) -> Self {
        self.config.actors.push(ActorConfig {
            name: name.into(),
            host: host.into(),
            function: function.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<PlatformConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlatformConfig::new();
        assert_eq!(config.simulation.log_level, "info");
        assert_eq!(config.simulation.max_time, None);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
simulation:
  log_level: debug
  max_time: 500

hosts:
  - name: Jupiter
    speed: 1e9
    cores: 4
    ram: 8e9
  - name: Tremblay
    speed: 2e9

links:
  - name: backbone
    bandwidth: 1.25e8
    latency: 1e-4
  - name: loopback
    bandwidth: 1e10
    sharing: fatpipe

routes:
  - src: Jupiter
    dst: Tremblay
    links: [backbone]

vms:
  - name: VM00
    host: Jupiter
    ram: 1e9

actors:
  - name: master
    host: Jupiter
    function: master
    args: ["20", "50000000"]
  - name: worker
    host: VM00
    function: worker
"#;

        let config = PlatformConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.simulation.max_time, Some(500.0));
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.find_host("Tremblay").unwrap().cores, 1);
        assert_eq!(config.links[1].sharing, LinkSharing::Fatpipe);
        assert!(config.routes[0].symmetrical);
        assert_eq!(config.find_vm("VM00").unwrap().vcpus, 1);
        assert!(config.find_vm("VM00").unwrap().start);
        assert_eq!(config.actors[0].args.len(), 2);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "hosts": [
                {"name": "a", "speed": 1e6},
                {"name": "b", "speed": 1e6}
            ],
            "links": [{"name": "l", "bandwidth": 1e3}],
            "default_route": ["l"]
        }"#;

        let config = PlatformConfig::from_json(json).unwrap();
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.default_route, Some(vec!["l".to_string()]));
    }

    #[test]
    fn test_builder() {
        let config = PlatformBuilder::new()
            .max_time(100.0)
            .host("a", 1e9, 2)
            .host_with_ram("b", 1e9, 4, 4e9)
            .fatpipe("fp", 1e9, 0.0)
            .route("a", "b", &["fp"])
            .vm("vm", "b", 2, 1e9)
            .actor("x", "vm", "worker", &["1"])
            .build()
            .unwrap();

        assert_eq!(config.simulation.max_time, Some(100.0));
        assert_eq!(config.vms.len(), 1);
        assert_eq!(config.actors[0].host, "vm");
    }

    #[test]
    fn test_validation_duplicate_host() {
        let yaml = r#"
hosts:
  - name: a
    speed: 1
  - name: a
    speed: 1
"#;
        assert!(PlatformConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_unknown_link() {
        let result = PlatformBuilder::new()
            .host("a", 1.0, 1)
            .host("b", 1.0, 1)
            .route("a", "b", &["missing"])
            .build();
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_actor_site() {
        let result = PlatformBuilder::new()
            .host("a", 1.0, 1)
            .actor("x", "nowhere", "f", &[])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_zero_speed() {
        let result = PlatformBuilder::new().host("a", 0.0, 1).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_config() {
        let yaml = r#"
hosts:
  - name: denise
    speed: 1e9
storages:
  - name: Disk1
    host: denise
    size: 1e6
    read_bandwidth: 1e5
    write_bandwidth: 5e4
    content:
      /home/a.txt: 1000
"#;
        let config = PlatformConfig::from_yaml(yaml).unwrap();
        let disk = config.find_storage("Disk1").unwrap();
        assert_eq!(disk.host, "denise");
        assert_eq!(disk.content.get("/home/a.txt"), Some(&1000.0));
    }

    #[test]
    fn test_validation_storage_overfull() {
        let result = PlatformBuilder::new()
            .host("h", 1.0, 1)
            .storage("d", "h", 100.0, 1.0, 1.0)
            .file("d", "/big", 150.0)
            .build();
        assert!(matches!(result, Err(ConfigError::Validation(msg)) if msg.contains("exceeds")));
    }

    #[test]
    fn test_validation_storage_host() {
        let result = PlatformBuilder::new()
            .host("h", 1.0, 1)
            .storage("d", "elsewhere", 100.0, 1.0, 1.0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_extension() {
        let result = PlatformConfig::from_file("platform.xml");
        assert!(matches!(result, Err(ConfigError::UnknownFormat(ext)) if ext == "xml"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = PlatformBuilder::new()
            .host("a", 1e9, 1)
            .link("l", 1e6, 0.5)
            .default_route(&["l"])
            .build()
            .unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = PlatformConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, restored);
    }
}
