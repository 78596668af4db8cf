//! Container image manifest
//!
//! [`resolve`] decides which images a cluster needs from its version,
//! container runtime, network plugin and size. It is a pure function: call it
//! as often as needed. [`ImagePuller`] pre-pulls the images relevant to one
//! node before kubeadm runs, so init and join do not stall on registry pulls.

use semver::Version;
use tracing::{debug, info};

use crate::commands::sudo;
use crate::config::{is_non_default_runtime, ClusterConfig, Node, DEFAULT_KUBE_IMAGE_NAMESPACE};
use crate::executor::{ExecOptions, Runner};
use crate::{Error, Result};

/// Pause image selection boundary
pub const PAUSE_TAG_THRESHOLD: &str = "v1.18.0";
/// Namespace of official hub images
pub const OFFICIAL_NAMESPACE: &str = "library";
/// Clusters above this many Kubernetes nodes need calico-typha
pub const CALICO_TYPHA_NODE_THRESHOLD: usize = 50;

const DEFAULT_ETCD_VERSION: &str = "v3.4.13";
const DEFAULT_CALICO_VERSION: &str = "v3.16.3";
const DEFAULT_FLANNEL_VERSION: &str = "v0.12.0";
const DEFAULT_CILIUM_VERSION: &str = "v1.8.3";
const DEFAULT_KUBEOVN_VERSION: &str = "v1.5.0";
const COREDNS_VERSION: &str = "1.6.9";
const NODE_LOCAL_DNS_VERSION: &str = "1.15.12";
const OPENEBS_VERSION: &str = "2.9.0";

/// Which hosts need an image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageGroup {
    /// Every Kubernetes node
    K8s,
    /// Control-plane nodes
    Master,
    /// Worker nodes
    Worker,
    /// Etcd hosts
    Etcd,
}

impl ImageGroup {
    /// Whether a node with these roles needs images of this group
    pub fn applies_to(&self, node: &Node) -> bool {
        match self {
            ImageGroup::K8s => node.is_master() || node.is_worker(),
            ImageGroup::Master => node.is_master(),
            ImageGroup::Worker => node.is_worker(),
            ImageGroup::Etcd => node.is_etcd(),
        }
    }
}

/// One container image of the manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    /// Manifest key, e.g. `calico-typha`
    pub key: &'static str,
    /// Registry prefix; empty means the default hub
    pub registry: String,
    /// Registry namespace
    pub namespace: String,
    /// Repository name
    pub repository: String,
    /// Tag
    pub tag: String,
    /// Hosts that need this image
    pub group: ImageGroup,
    /// Whether the cluster uses this image at all
    pub enabled: bool,
}

impl Image {
    /// Full pullable reference, `[registry/]namespace/repository:tag`.
    ///
    /// Official hub images (`library` namespace, no registry) are written
    /// without their namespace.
    pub fn image_name(&self) -> String {
        let path = format!("{}/{}:{}", self.namespace, self.repository, self.tag);
        if self.registry.is_empty() {
            if self.namespace == OFFICIAL_NAMESPACE {
                format!("{}:{}", self.repository, self.tag)
            } else {
                path
            }
        } else {
            format!("{}/{}", self.registry.trim_end_matches('/'), path)
        }
    }
}

/// Inputs that decide the manifest
#[derive(Clone, Debug)]
pub struct ManifestInputs<'a> {
    /// Control-plane version
    pub version: &'a str,
    /// Container runtime (`docker` or empty is the default)
    pub container_manager: &'a str,
    /// Network plugin name
    pub network_plugin: &'a str,
    /// Number of Kubernetes nodes
    pub node_count: usize,
    /// Registry prefix
    pub registry: &'a str,
}

impl<'a> ManifestInputs<'a> {
    /// Inputs taken from a cluster file
    pub fn from_config(config: &'a ClusterConfig) -> Self {
        Self {
            version: &config.kubernetes.version,
            container_manager: &config.kubernetes.container_manager,
            network_plugin: &config.network.plugin,
            node_count: config.k8s_nodes().count(),
            registry: &config.registry.private_registry,
        }
    }
}

/// Parse a Kubernetes version, tolerating the leading `v`
pub fn parse_version(version: &str) -> Result<Version> {
    let trimmed = version.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).map_err(|e| Error::version(version, e.to_string()))
}

/// Pause image tag for a version and runtime.
///
/// Non-default runtimes need the newer pause image whatever the version.
pub fn pause_tag(version: &str, container_manager: &str) -> Result<&'static str> {
    let threshold = parse_version(PAUSE_TAG_THRESHOLD)?;
    let at_least_threshold = parse_version(version)? >= threshold;
    Ok(if at_least_threshold || is_non_default_runtime(container_manager) {
        "3.2"
    } else {
        "3.1"
    })
}

/// Resolve the ordered image manifest for a cluster
pub fn resolve(inputs: &ManifestInputs<'_>) -> Result<Vec<Image>> {
    let pause = pause_tag(inputs.version, inputs.container_manager)?;
    let plugin = |name: &str| inputs.network_plugin.eq_ignore_ascii_case(name);
    let calico = plugin("calico");

    let image = |key: &'static str,
                 namespace: &str,
                 repository: &str,
                 tag: &str,
                 group: ImageGroup,
                 enabled: bool| Image {
        key,
        registry: inputs.registry.to_string(),
        namespace: namespace.to_string(),
        repository: repository.to_string(),
        tag: tag.to_string(),
        group,
        enabled,
    };

    let kube_ns = DEFAULT_KUBE_IMAGE_NAMESPACE;
    let version = inputs.version;
    let images = vec![
        image("etcd", kube_ns, "etcd", DEFAULT_ETCD_VERSION, ImageGroup::Etcd, true),
        image("pause", kube_ns, "pause", pause, ImageGroup::K8s, true),
        image("kube-apiserver", kube_ns, "kube-apiserver", version, ImageGroup::Master, true),
        image(
            "kube-controller-manager",
            kube_ns,
            "kube-controller-manager",
            version,
            ImageGroup::Master,
            true,
        ),
        image("kube-scheduler", kube_ns, "kube-scheduler", version, ImageGroup::Master, true),
        image("kube-proxy", kube_ns, "kube-proxy", version, ImageGroup::K8s, true),
        // network
        image("coredns", "coredns", "coredns", COREDNS_VERSION, ImageGroup::K8s, true),
        image(
            "k8s-dns-node-cache",
            kube_ns,
            "k8s-dns-node-cache",
            NODE_LOCAL_DNS_VERSION,
            ImageGroup::K8s,
            true,
        ),
        image(
            "calico-kube-controllers",
            "calico",
            "kube-controllers",
            DEFAULT_CALICO_VERSION,
            ImageGroup::K8s,
            calico,
        ),
        image("calico-cni", "calico", "cni", DEFAULT_CALICO_VERSION, ImageGroup::K8s, calico),
        image("calico-node", "calico", "node", DEFAULT_CALICO_VERSION, ImageGroup::K8s, calico),
        image(
            "calico-flexvol",
            "calico",
            "pod2daemon-flexvol",
            DEFAULT_CALICO_VERSION,
            ImageGroup::K8s,
            calico,
        ),
        image(
            "calico-typha",
            "calico",
            "typha",
            DEFAULT_CALICO_VERSION,
            ImageGroup::K8s,
            calico && inputs.node_count > CALICO_TYPHA_NODE_THRESHOLD,
        ),
        image("cilium", "cilium", "cilium", DEFAULT_CILIUM_VERSION, ImageGroup::K8s, plugin("cilium")),
        image(
            "operator-generic",
            "cilium",
            "operator-generic",
            DEFAULT_CILIUM_VERSION,
            ImageGroup::K8s,
            plugin("cilium"),
        ),
        image("flannel", kube_ns, "flannel", DEFAULT_FLANNEL_VERSION, ImageGroup::K8s, plugin("flannel")),
        image("kubeovn", "kubeovn", "kube-ovn", DEFAULT_KUBEOVN_VERSION, ImageGroup::K8s, plugin("kubeovn")),
        // storage
        image(
            "provisioner-localpv",
            "openebs",
            "provisioner-localpv",
            OPENEBS_VERSION,
            ImageGroup::Worker,
            false,
        ),
        image("linux-utils", "openebs", "linux-utils", OPENEBS_VERSION, ImageGroup::Worker, false),
    ];

    debug!(
        version = %inputs.version,
        plugin = %inputs.network_plugin,
        enabled = images.iter().filter(|i| i.enabled).count(),
        "Resolved image manifest"
    );
    Ok(images)
}

/// Pre-pulls the images a node needs
pub struct ImagePuller {
    runner: Runner,
    images: Vec<Image>,
    container_manager: String,
}

impl ImagePuller {
    /// Resolve the manifest for `config` and prepare to pull it
    pub fn new(runner: Runner, config: &ClusterConfig) -> Result<Self> {
        Ok(Self {
            runner,
            images: resolve(&ManifestInputs::from_config(config))?,
            container_manager: config.kubernetes.runtime().to_string(),
        })
    }

    /// Enabled images whose group applies to `node`
    pub fn images_for<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Image> + 'a {
        self.images
            .iter()
            .filter(move |image| image.enabled && image.group.applies_to(node))
    }

    fn pull_command(&self, image: &Image) -> String {
        match self.container_manager.as_str() {
            "docker" => sudo(&format!("env PATH=$PATH docker pull {}", image.image_name())),
            _ => sudo(&format!("env PATH=$PATH crictl pull {}", image.image_name())),
        }
    }

    /// Pull every image `node` needs
    pub async fn pull(&self, node: &Node) -> Result<()> {
        for image in self.images_for(node) {
            let name = image.image_name();
            info!(host = %node.name, image = %name, "Pulling image");
            self.runner
                .run(
                    node,
                    &self.pull_command(image),
                    ExecOptions::fatal(2),
                    &format!("Failed to pull image {}", name),
                )
                .await?;
        }
        Ok(())
    }
}
