//! Cluster configuration file
//!
//! A cluster is described by a single YAML document listing the hosts, the
//! control-plane endpoint and the Kubernetes/network choices:
//!
//! ```yaml
//! name: sample
//! hosts:
//!   - name: master1
//!     address: 203.0.113.10
//!     internalAddress: 10.0.0.10
//!     roles: [master, etcd, worker]
//!   - name: node1
//!     address: 203.0.113.11
//!     internalAddress: 10.0.0.11
//!     roles: [worker]
//!     labels:
//!       disk: ssd
//! controlPlaneEndpoint:
//!   domain: lb.kubeweave.local
//!   port: 6443
//! kubernetes:
//!   version: v1.18.6
//!   containerManager: docker
//! network:
//!   plugin: calico
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default kube image namespace on the registry
pub const DEFAULT_KUBE_IMAGE_NAMESPACE: &str = "kubesphere";
/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Default API server port
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;
/// Default control-plane endpoint domain
pub const DEFAULT_CONTROL_PLANE_DOMAIN: &str = "lb.kubeweave.local";
/// The default container runtime. Any other runtime counts as non-default.
pub const DEFAULT_CONTAINER_MANAGER: &str = "docker";

/// Role a host plays in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Control-plane member
    Master,
    /// Runs workloads
    Worker,
    /// Runs an etcd member
    Etcd,
}

/// A host taking part in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node name, used as the Kubernetes node name
    pub name: String,
    /// Address used to reach the host over SSH
    pub address: String,
    /// Address the node advertises inside the cluster
    #[serde(default)]
    pub internal_address: String,
    /// CPU architecture, selects the binaries to upload
    #[serde(default = "default_arch")]
    pub arch: String,
    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Optional SSH private key path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Roles of this host
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Labels applied to the Kubernetes node
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_arch() -> String {
    "amd64".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl Node {
    /// Create a node with the given roles and defaults for everything else.
    ///
    /// The internal address defaults to the SSH address.
    pub fn new(name: impl Into<String>, address: impl Into<String>, roles: &[Role]) -> Self {
        let address = address.into();
        Self {
            name: name.into(),
            internal_address: address.clone(),
            address,
            arch: default_arch(),
            user: default_user(),
            port: DEFAULT_SSH_PORT,
            private_key_path: None,
            roles: roles.to_vec(),
            labels: BTreeMap::new(),
        }
    }

    /// Whether the node is a control-plane member
    pub fn is_master(&self) -> bool {
        self.roles.contains(&Role::Master)
    }

    /// Whether the node runs workloads
    pub fn is_worker(&self) -> bool {
        self.roles.contains(&Role::Worker)
    }

    /// Whether the node runs etcd
    pub fn is_etcd(&self) -> bool {
        self.roles.contains(&Role::Etcd)
    }
}

/// Control-plane endpoint, usually a load balancer in front of the masters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneEndpoint {
    /// DNS name written into the cluster's kubeconfig
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Address reachable from the machine running kubeweave.
    /// Empty means "first master's internal address".
    #[serde(default)]
    pub address: String,
    /// API server port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_domain() -> String {
    DEFAULT_CONTROL_PLANE_DOMAIN.to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_SERVER_PORT
}

impl Default for ControlPlaneEndpoint {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            address: String::new(),
            port: DEFAULT_API_SERVER_PORT,
        }
    }
}

/// Kubernetes settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    /// Control-plane version, e.g. `v1.18.6`
    pub version: String,
    /// Container runtime (`docker`, `containerd`, `crio`, `isula`)
    #[serde(default)]
    pub container_manager: String,
    /// Cluster DNS domain
    #[serde(default = "default_dns_domain")]
    pub cluster_name: String,
}

fn default_dns_domain() -> String {
    "cluster.local".to_string()
}

/// Whether `container_manager` names a runtime other than the default docker
pub fn is_non_default_runtime(container_manager: &str) -> bool {
    !container_manager.is_empty() && container_manager != DEFAULT_CONTAINER_MANAGER
}

impl KubernetesSpec {
    /// The configured runtime, falling back to docker
    pub fn runtime(&self) -> &str {
        if self.container_manager.is_empty() {
            DEFAULT_CONTAINER_MANAGER
        } else {
            &self.container_manager
        }
    }
}

/// Network plugin settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Plugin name (`calico`, `flannel`, `cilium`, `kubeovn`, or `none`)
    #[serde(default = "default_plugin")]
    pub plugin: String,
    /// Pod CIDR
    #[serde(default = "default_pods_cidr")]
    pub pods_cidr: String,
    /// Service CIDR
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,
}

fn default_plugin() -> String {
    "calico".to_string()
}

fn default_pods_cidr() -> String {
    "10.233.64.0/18".to_string()
}

fn default_service_cidr() -> String {
    "10.233.0.0/18".to_string()
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            plugin: default_plugin(),
            pods_cidr: default_pods_cidr(),
            service_cidr: default_service_cidr(),
        }
    }
}

/// Image registry settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Private registry prefix for every image; empty means the public hub
    #[serde(default)]
    pub private_registry: String,
}

/// Full cluster description
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster identity, names the local kubeconfig file
    pub name: String,
    /// All hosts
    pub hosts: Vec<Node>,
    /// Control-plane endpoint
    #[serde(default)]
    pub control_plane_endpoint: ControlPlaneEndpoint,
    /// Kubernetes settings
    pub kubernetes: KubernetesSpec,
    /// Network settings
    #[serde(default)]
    pub network: NetworkSpec,
    /// Registry settings
    #[serde(default)]
    pub registry: RegistrySpec,
}

impl ClusterConfig {
    /// Read, parse and validate a cluster file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a cluster document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: ClusterConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse cluster YAML: {}", e)))?;
        config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    fn fill_defaults(&mut self) {
        for host in &mut self.hosts {
            if host.internal_address.is_empty() {
                host.internal_address = host.address.clone();
            }
        }
        if self.control_plane_endpoint.address.is_empty() {
            let first = self.masters().next().map(|m| m.internal_address.clone());
            if let Some(address) = first {
                self.control_plane_endpoint.address = address;
            }
        }
    }

    /// Check structural invariants the orchestration relies on
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("cluster name must not be empty"));
        }
        if self.kubernetes.version.trim().is_empty() {
            return Err(Error::config("kubernetes.version must be set"));
        }
        if self.masters().next().is_none() {
            return Err(Error::config("at least one host must have the master role"));
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if host.name.trim().is_empty() {
                return Err(Error::config("every host needs a name"));
            }
            if !seen.insert(host.name.as_str()) {
                return Err(Error::config(format!("duplicate host name: {}", host.name)));
            }
            if host.roles.is_empty() {
                return Err(Error::config(format!("host {} has no roles", host.name)));
            }
        }
        Ok(())
    }

    /// Hosts with the master role, in file order
    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.hosts.iter().filter(|h| h.is_master())
    }

    /// Hosts taking part in the Kubernetes cluster (masters and workers)
    pub fn k8s_nodes(&self) -> impl Iterator<Item = &Node> {
        self.hosts.iter().filter(|h| h.is_master() || h.is_worker())
    }

    /// Hosts in assembly order: masters first, then the rest, file order kept.
    ///
    /// The first entry is the driver host.
    pub fn assembly_order(&self) -> Vec<Node> {
        let (mut masters, others): (Vec<Node>, Vec<Node>) = self
            .k8s_nodes()
            .cloned()
            .partition(|h| h.is_master());
        masters.extend(others);
        masters
    }
}
