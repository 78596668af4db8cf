//! Admin kubeconfig distribution
//!
//! kubeadm writes `/etc/kubernetes/admin.conf` on every control-plane member.
//! This module copies it to the root and login user's profiles on hosts, syncs
//! it to workers (which have no admin.conf of their own), and keeps a local
//! copy in the work directory whose server URL points at an address the
//! machine running kubeweave can actually reach.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};

use crate::commands;
use crate::config::{ControlPlaneEndpoint, Node};
use crate::executor::{ExecOptions, Runner};
use crate::{Error, Result};

/// File mode of the local kubeconfig copy
pub const LOCAL_KUBECONFIG_MODE: u32 = 0o644;

/// Replace the kubeadm server line with one pointing at `address`.
///
/// Only exact `server: https://<domain>:<port>` occurrences change.
pub fn rewrite_server(kubeconfig: &str, domain: &str, address: &str, port: u16) -> String {
    let old_server = format!("server: https://{}:{}", domain, port);
    let new_server = format!("server: https://{}:{}", address, port);
    kubeconfig.replace(&old_server, &new_server)
}

/// Local kubeconfig path for a cluster
pub fn local_kubeconfig_path(work_dir: &Path, cluster_name: &str) -> PathBuf {
    work_dir.join(format!("config-{}", cluster_name))
}

/// Decode the base64 admin.conf carried in cluster state
pub fn decode_kubeconfig(kubeconfig_base64: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(kubeconfig_base64.trim())
        .map_err(|source| Error::Decode {
            what: "kubeconfig".to_string(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|e| Error::parse("kubeconfig", e.to_string()))
}

/// Copies and rewrites the admin credential
#[derive(Clone)]
pub struct KubeconfigDistributor {
    runner: Runner,
    endpoint: ControlPlaneEndpoint,
    work_dir: PathBuf,
    cluster_name: String,
}

impl KubeconfigDistributor {
    /// Create a distributor writing local copies under `work_dir`
    pub fn new(
        runner: Runner,
        endpoint: ControlPlaneEndpoint,
        work_dir: impl Into<PathBuf>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            endpoint,
            work_dir: work_dir.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Where [`load_locally`](Self::load_locally) writes
    pub fn local_path(&self) -> PathBuf {
        local_kubeconfig_path(&self.work_dir, &self.cluster_name)
    }

    /// Copy admin.conf to `/root/.kube/config` and `$HOME/.kube/config` on a
    /// control-plane host
    pub async fn distribute_admin_locally(&self, host: &Node) -> Result<()> {
        debug!(host = %host.name, "Copying admin.conf to kube config");
        self.runner
            .run(
                host,
                &commands::distribute_admin_kubeconfig(),
                ExecOptions::fatal(2),
                "Failed to copy admin.conf to kube config",
            )
            .await?;
        Ok(())
    }

    /// Write the cluster kubeconfig to a worker's root and user profiles
    pub async fn sync_to_worker(&self, host: &Node, kubeconfig_base64: &str) -> Result<()> {
        debug!(host = %host.name, "Syncing kubeconfig to worker");
        self.runner
            .run(
                host,
                &commands::create_kube_dirs(),
                ExecOptions::fatal(1),
                "Failed to create kube dir",
            )
            .await?;
        self.runner
            .run(
                host,
                &commands::write_root_kubeconfig(kubeconfig_base64),
                ExecOptions::fatal(1),
                "Failed to sync kube config",
            )
            .await?;
        self.runner
            .run(
                host,
                &commands::write_user_kubeconfig(kubeconfig_base64),
                ExecOptions::fatal(1),
                "Failed to sync kube config",
            )
            .await?;
        Ok(())
    }

    /// Decode the cluster kubeconfig, point it at the reachable endpoint
    /// address and write it to the work directory
    pub async fn load_locally(&self, kubeconfig_base64: &str) -> Result<PathBuf> {
        let kubeconfig = decode_kubeconfig(kubeconfig_base64)?;
        let rewritten = rewrite_server(
            &kubeconfig,
            &self.endpoint.domain,
            &self.endpoint.address,
            self.endpoint.port,
        );

        let path = self.local_path();
        tokio::fs::create_dir_all(&self.work_dir).await?;
        tokio::fs::write(&path, rewritten.as_bytes()).await?;
        set_mode(&path).await?;

        info!(path = %path.display(), "Wrote local kubeconfig");
        Ok(path)
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(LOCAL_KUBECONFIG_MODE))
        .await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path) -> Result<()> {
    Ok(())
}
