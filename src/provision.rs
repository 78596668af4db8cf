//! Kubernetes binaries and kubelet service on new hosts
//!
//! Binaries are taken from a local cache laid out as
//! `<binaries_dir>/<version>/<arch>/`, uploaded to a scratch directory on the
//! host and installed from there. Hosts that are already cluster members keep
//! what they run.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};

use crate::commands;
use crate::config::{ClusterConfig, Node};
use crate::executor::{ExecOptions, Runner};
use crate::state::MembershipRegistry;
use crate::templates::Templates;
use crate::{Error, Result};

/// Scratch directory on hosts
pub const REMOTE_TMP_DIR: &str = "/tmp/kubeweave";

/// Executables installed into `/usr/local/bin`
pub const KUBE_BINARIES: [&str; 4] = ["kubeadm", "kubelet", "kubectl", "helm"];

/// CNI plugins release shipped next to the binaries
pub const CNI_PLUGINS_VERSION: &str = "v0.8.6";

const KUBELET_SERVICE_PATH: &str = "/etc/systemd/system/kubelet.service";
const KUBELET_DROPIN_PATH: &str = "/etc/systemd/system/kubelet.service.d/10-kubeadm.conf";

/// CNI plugin archive name for an architecture
pub fn cni_archive(arch: &str) -> String {
    format!("cni-plugins-linux-{}-{}.tgz", arch, CNI_PLUGINS_VERSION)
}

/// Installs kube binaries and the kubelet unit on hosts
pub struct BinaryInstaller {
    runner: Runner,
    templates: Templates,
    binaries_dir: PathBuf,
    version: String,
    runtime: String,
}

impl BinaryInstaller {
    /// Create an installer reading binaries from `binaries_dir`
    pub fn new(runner: Runner, config: &ClusterConfig, binaries_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            templates: Templates::new(),
            binaries_dir: binaries_dir.into(),
            version: config.kubernetes.version.clone(),
            runtime: config.kubernetes.runtime().to_string(),
        }
    }

    /// Local directory holding binaries for `node`'s architecture
    pub fn local_dir(&self, node: &Node) -> PathBuf {
        self.binaries_dir.join(&self.version).join(&node.arch)
    }

    /// Install binaries and the kubelet service on `node` unless it is a member
    pub async fn install_kube_binaries(
        &self,
        node: &Node,
        registry: &MembershipRegistry,
    ) -> Result<()> {
        if registry.is_member(node) {
            debug!(host = %node.name, "Node is a cluster member, keeping its binaries");
            return Ok(());
        }

        info!(host = %node.name, version = %self.version, "Syncing kube binaries");
        let local_dir = self.local_dir(node);

        self.runner
            .run(
                node,
                &commands::recreate_dir(REMOTE_TMP_DIR),
                ExecOptions::fatal(1),
                "Failed to create tmp dir",
            )
            .await?;

        for binary in KUBE_BINARIES {
            let remote = self.upload(node, &local_dir, binary).await?;
            self.runner
                .run(
                    node,
                    &commands::install_binary(&remote, binary),
                    ExecOptions::fatal(2),
                    &format!("Failed to install {}", binary),
                )
                .await?;
        }

        let archive = cni_archive(&node.arch);
        let remote = self.upload(node, &local_dir, &archive).await?;
        self.runner
            .run(
                node,
                &commands::install_cni_plugins(&remote),
                ExecOptions::fatal(2),
                "Failed to install cni plugins",
            )
            .await?;

        self.install_kubelet_service(node).await
    }

    async fn upload(&self, node: &Node, local_dir: &Path, file: &str) -> Result<String> {
        let local = local_dir.join(file);
        if !tokio::fs::try_exists(&local).await? {
            return Err(Error::config(format!(
                "{} not found in {}",
                file,
                local_dir.display()
            )));
        }
        let remote = format!("{}/{}", REMOTE_TMP_DIR, file);
        debug!(host = %node.name, file = %file, "Uploading");
        self.runner
            .copy_file(node, &local, &remote, &format!("Failed to sync {}", file))
            .await?;
        Ok(remote)
    }

    /// Write the kubelet unit and drop-in, then enable the service
    pub async fn install_kubelet_service(&self, node: &Node) -> Result<()> {
        let service = self.templates.kubelet_service()?;
        self.runner
            .run(
                node,
                &commands::write_file(KUBELET_SERVICE_PATH, &STANDARD.encode(service)),
                ExecOptions::fatal(2),
                "Failed to generate kubelet service",
            )
            .await?;

        let dropin = self.templates.kubelet_env(node, &self.runtime)?;
        self.runner
            .run(
                node,
                &commands::write_file(KUBELET_DROPIN_PATH, &STANDARD.encode(dropin)),
                ExecOptions::fatal(2),
                "Failed to generate kubelet env",
            )
            .await?;

        self.runner
            .run(
                node,
                &commands::enable_kubelet(),
                ExecOptions::fatal(2),
                "Failed to enable kubelet service",
            )
            .await?;
        Ok(())
    }
}
