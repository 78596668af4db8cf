//! End-to-end cluster creation
//!
//! # Flow
//!
//! 1. Pre-pull images on every host (optional)
//! 2. Detect an existing cluster from the driver host
//! 3. Install kube binaries on hosts that are not members yet
//! 4. `kubeadm init` on the driver if there was no cluster
//! 5. Seal the driver's results into a [`ClusterSnapshot`]
//! 6. Join the other masters one by one, then every worker concurrently
//! 7. Apply configured node labels
//!
//! The driver is the first host of [`ClusterConfig::assembly_order`]. Per-host
//! steps run concurrently; commands on one host run in sequence. The first
//! host failure aborts the run, named in the error.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tracing::info;

use crate::assembler::ClusterAssembler;
use crate::config::{ClusterConfig, Node};
use crate::dns::ManifestDnsApplier;
use crate::executor::{RemoteExecutor, Runner};
use crate::images::ImagePuller;
use crate::provision::BinaryInstaller;
use crate::state::ClusterSnapshot;
use crate::{Error, Result};

/// Local paths and switches for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Where the local kubeconfig (and optional kubeadm override) live
    pub work_dir: PathBuf,
    /// Cache of `<version>/<arch>/` binary directories
    pub binaries_dir: PathBuf,
    /// Skip the image pre-pull
    pub skip_pull_images: bool,
    /// DNS manifest applied after `kubeadm init`
    pub dns_manifest: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("kubeweave"),
            binaries_dir: PathBuf::from("kubeweave/binaries"),
            skip_pull_images: false,
            dns_manifest: None,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Whether this run created the control plane
    pub created: bool,
    /// Control-plane version found on an existing cluster
    pub version: Option<String>,
    /// Hosts joined during this run
    pub joined: Vec<String>,
    /// Local kubeconfig
    pub kubeconfig: PathBuf,
}

/// Assembles a cluster from its configuration
pub struct Pipeline {
    config: Arc<ClusterConfig>,
    runner: Runner,
    options: RunOptions,
}

impl Pipeline {
    /// Create a pipeline running commands through `executor`
    pub fn new(config: ClusterConfig, executor: Arc<dyn RemoteExecutor>, options: RunOptions) -> Self {
        Self::with_runner(config, Runner::new(executor), options)
    }

    /// Create a pipeline with a preconfigured runner
    pub fn with_runner(config: ClusterConfig, runner: Runner, options: RunOptions) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            options,
        }
    }

    /// Create or scale the cluster
    pub async fn run(&self) -> Result<AssemblyReport> {
        let order = self.config.assembly_order();
        let driver = order
            .first()
            .ok_or_else(|| Error::config("no kubernetes hosts configured"))?;

        info!(
            cluster = %self.config.name,
            driver = %driver.name,
            hosts = order.len(),
            "Assembling cluster"
        );

        if self.options.skip_pull_images {
            info!("Skipping image pre-pull");
        } else {
            self.pull_images().await?;
        }

        let mut assembler = ClusterAssembler::new(
            self.runner.clone(),
            self.config.clone(),
            &self.options.work_dir,
        );
        if let Some(manifest) = &self.options.dns_manifest {
            assembler = assembler.with_dns(Arc::new(ManifestDnsApplier::new(
                self.runner.clone(),
                manifest,
            )));
        }
        let assembler = &assembler;

        assembler
            .detect_existing_cluster(driver)
            .await
            .map_err(|e| e.on_host(&driver.name))?;
        let created = !assembler.state().exists();

        let installer = &BinaryInstaller::new(
            self.runner.clone(),
            &self.config,
            &self.options.binaries_dir,
        );
        try_join_all(order.iter().map(|host| async move {
            installer
                .install_kube_binaries(host, assembler.state().registry())
                .await
                .map_err(|e| e.on_host(&host.name))
        }))
        .await?;

        assembler
            .initialize_control_plane(driver)
            .await
            .map_err(|e| e.on_host(&driver.name))?;

        let snapshot = &assembler.state().seal()?;
        let joined = self.join_nodes(assembler, snapshot).await?;

        join_all(
            order
                .iter()
                .map(|host| assembler.apply_node_labels(driver, host)),
        )
        .await;

        let report = AssemblyReport {
            created,
            version: snapshot.record().version.clone(),
            joined,
            kubeconfig: assembler.kubeconfig_path(),
        };
        info!(
            created = report.created,
            joined = report.joined.len(),
            kubeconfig = %report.kubeconfig.display(),
            "Cluster assembled"
        );
        Ok(report)
    }

    async fn pull_images(&self) -> Result<()> {
        let puller = &ImagePuller::new(self.runner.clone(), &self.config)?;
        try_join_all(self.config.hosts.iter().map(|host| async move {
            puller.pull(host).await.map_err(|e| e.on_host(&host.name))
        }))
        .await?;
        Ok(())
    }

    /// Join every host but the driver.
    ///
    /// Control-plane members join one at a time in assembly order, since each
    /// adds a stacked etcd member. Workers then join concurrently.
    async fn join_nodes(
        &self,
        assembler: &ClusterAssembler,
        snapshot: &ClusterSnapshot,
    ) -> Result<Vec<String>> {
        let order = self.config.assembly_order();
        let (masters, workers): (Vec<&Node>, Vec<&Node>) =
            order.iter().skip(1).partition(|host| host.is_master());

        let mut joined = Vec::new();
        for host in masters {
            joined.extend(join_one(assembler, snapshot, host).await?);
        }

        let workers = try_join_all(
            workers
                .into_iter()
                .map(|host| join_one(assembler, snapshot, host)),
        )
        .await?;
        joined.extend(workers.into_iter().flatten());
        Ok(joined)
    }
}

/// Join `host`, returning its name when it was not a member before
async fn join_one(
    assembler: &ClusterAssembler,
    snapshot: &ClusterSnapshot,
    host: &Node,
) -> Result<Option<String>> {
    let member = snapshot.registry().is_member(host);
    assembler
        .join_node(host, snapshot)
        .await
        .map_err(|e| e.on_host(&host.name))?;
    Ok((!member).then(|| host.name.clone()))
}
