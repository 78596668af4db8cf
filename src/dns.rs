//! Cluster DNS installation
//!
//! The control plane is initialized with kubeadm's own CoreDNS. Operators that
//! ship their own DNS stack (node-local cache, custom CoreDNS config) hand a
//! manifest to [`ManifestDnsApplier`], which applies it from the driver right
//! after `kubeadm init`.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::commands;
use crate::config::Node;
use crate::executor::{ExecOptions, Runner};
use crate::Result;

/// Remote path the DNS manifest is copied to
pub const REMOTE_DNS_MANIFEST: &str = "/tmp/kubeweave/dns.yaml";

/// Installs cluster DNS once the control plane is up
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsApplier: Send + Sync {
    /// Apply DNS on the driver host
    async fn apply(&self, driver: &Node) -> Result<()>;
}

/// Applies a local manifest file with kubectl on the driver
pub struct ManifestDnsApplier {
    runner: Runner,
    manifest: PathBuf,
}

impl ManifestDnsApplier {
    /// Create an applier for the manifest at `manifest`
    pub fn new(runner: Runner, manifest: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            manifest: manifest.into(),
        }
    }
}

#[async_trait]
impl DnsApplier for ManifestDnsApplier {
    async fn apply(&self, driver: &Node) -> Result<()> {
        info!(host = %driver.name, manifest = %self.manifest.display(), "Applying cluster DNS");

        self.runner
            .run(
                driver,
                &commands::sudo("mkdir -p /tmp/kubeweave"),
                ExecOptions::fatal(1),
                "Failed to create manifest dir",
            )
            .await?;
        self.runner
            .copy_file(
                driver,
                &self.manifest,
                REMOTE_DNS_MANIFEST,
                "Failed to upload DNS manifest",
            )
            .await?;
        self.runner
            .run(
                driver,
                &commands::kubectl_apply(REMOTE_DNS_MANIFEST),
                ExecOptions::fatal(3),
                "Failed to apply DNS manifest",
            )
            .await?;
        Ok(())
    }
}
