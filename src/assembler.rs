//! Control-plane bootstrap and node joins
//!
//! The [`ClusterAssembler`] drives kubeadm on hosts:
//!
//! 1. `detect_existing_cluster` on the driver decides whether admin.conf is
//!    already there and, if so, loads everything a join needs.
//! 2. `initialize_control_plane` runs `kubeadm init` on the driver when no
//!    cluster exists, resetting between failed attempts.
//! 3. `refresh_join_credentials` re-uploads certificates, mints a token and
//!    records which nodes the cluster already has.
//! 4. `join_node` runs the stored join command on every other host. It takes
//!    a [`ClusterSnapshot`], which only exists once steps 1-3 are done.
//!
//! Every step is safe to re-run against a partially assembled cluster: nodes
//! already listed by the API server are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};

use crate::commands::{self, CLUSTER_WILL_BE_CREATED, EXTERNAL_ETCD_CERT_FIELDS};
use crate::config::{ClusterConfig, Node};
use crate::dns::DnsApplier;
use crate::executor::{ExecOptions, Runner};
use crate::kubeconfig::KubeconfigDistributor;
use crate::parse::{
    extract_certificate_key, extract_worker_join_command, parse_apiserver_version,
    parse_node_listing,
};
use crate::retry::{best_effort, retry_with_compensation, KUBEADM_ATTEMPTS};
use crate::state::{ClusterSnapshot, ClusterState, JoinCommands};
use crate::templates::Templates;
use crate::{Error, Result};

/// File in the work directory that replaces the rendered kubeadm config
pub const KUBEADM_CONFIG_OVERRIDE: &str = "kubeadm-config.yaml";

const PROBE_FAILED: &str = "Failed to find /etc/kubernetes/admin.conf";

/// Retries for taint/label kubectl calls, which race the API server coming up
const KUBECTL_RETRIES: u32 = 5;

/// Brings up the control plane and joins nodes to it
pub struct ClusterAssembler {
    runner: Runner,
    config: Arc<ClusterConfig>,
    state: Arc<ClusterState>,
    kubeconfig: KubeconfigDistributor,
    templates: Templates,
    dns: Option<Arc<dyn DnsApplier>>,
    work_dir: PathBuf,
}

impl ClusterAssembler {
    /// Create an assembler with fresh state, writing local files to `work_dir`
    pub fn new(runner: Runner, config: Arc<ClusterConfig>, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let kubeconfig = KubeconfigDistributor::new(
            runner.clone(),
            config.control_plane_endpoint.clone(),
            work_dir.clone(),
            config.name.clone(),
        );
        Self {
            runner,
            config,
            state: Arc::new(ClusterState::new()),
            kubeconfig,
            templates: Templates::new(),
            dns: None,
            work_dir,
        }
    }

    /// Apply cluster DNS with `dns` after `kubeadm init`
    pub fn with_dns(mut self, dns: Arc<dyn DnsApplier>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Shared assembly state
    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// Cluster configuration
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Local kubeconfig written after the cluster is known
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig.local_path()
    }

    /// Probe `driver` for an existing control plane and load its state.
    ///
    /// A no-op when a previous call already recorded the node listing.
    pub async fn detect_existing_cluster(&self, driver: &Node) -> Result<()> {
        if !self.state.record().node_listing.is_empty() {
            debug!(host = %driver.name, "Cluster state already loaded, skipping detection");
            return Ok(());
        }

        let probe = self
            .runner
            .run(
                driver,
                &commands::probe_cluster(),
                ExecOptions::lenient(1),
                PROBE_FAILED,
            )
            .await?;
        if probe.stdout.contains(CLUSTER_WILL_BE_CREATED) {
            info!(host = %driver.name, "No existing cluster found");
            return Ok(());
        }
        if !probe.success {
            return Err(Error::exec(PROBE_FAILED, probe.combined()));
        }

        let lookup = self
            .runner
            .run(
                driver,
                &commands::apiserver_version(),
                ExecOptions::lenient(2),
                "Failed to find current version",
            )
            .await?;
        let version = parse_apiserver_version(&lookup)?;
        info!(
            host = %driver.name,
            version = version.as_deref().unwrap_or("unknown"),
            "Found existing cluster"
        );
        self.state.set_version(version);

        let kubeconfig = self.read_admin_kubeconfig(driver).await?;
        self.state.set_kubeconfig(kubeconfig);
        self.state.mark_exists();

        self.refresh_join_credentials(driver).await?;
        self.load_kubeconfig_locally().await?;
        Ok(())
    }

    /// Run `kubeadm init` on `driver` unless a cluster already exists
    pub async fn initialize_control_plane(&self, driver: &Node) -> Result<()> {
        if self.state.exists() {
            debug!(host = %driver.name, "Cluster exists, skipping kubeadm init");
            return Ok(());
        }

        info!(host = %driver.name, "Initializing kubernetes cluster");

        let document = self.kubeadm_config(driver).await?;
        self.runner
            .run(
                driver,
                &commands::upload_kubeadm_config(&STANDARD.encode(document)),
                ExecOptions::fatal(1),
                "Failed to generate kubeadm config",
            )
            .await?;

        let runner = &self.runner;
        let init = commands::kubeadm_init();
        let init = init.as_str();
        retry_with_compensation(
            KUBEADM_ATTEMPTS,
            "init kubernetes cluster",
            move || async move {
                runner
                    .run(driver, init, ExecOptions::fatal(0), "kubeadm init")
                    .await
            },
            move || async move { reset(runner, driver).await },
        )
        .await?;

        self.kubeconfig.distribute_admin_locally(driver).await?;
        if driver.is_worker() {
            self.remove_master_taint(driver).await?;
            self.add_worker_label(driver).await;
        }
        if let Some(dns) = &self.dns {
            dns.apply(driver).await?;
        }

        self.state.mark_exists();
        self.refresh_join_credentials(driver).await?;
        self.load_kubeconfig_locally().await?;

        info!(host = %driver.name, "Control plane initialized");
        Ok(())
    }

    /// Mint fresh join commands and reload membership from the API server
    pub async fn refresh_join_credentials(&self, driver: &Node) -> Result<()> {
        debug!(host = %driver.name, "Refreshing join credentials");

        let uploaded = self
            .runner
            .run(
                driver,
                &commands::upload_certs(),
                ExecOptions::fatal(1),
                "Failed to upload kubeadm certs",
            )
            .await?;
        let certificate_key = extract_certificate_key(&uploaded.stdout)?;

        for field in EXTERNAL_ETCD_CERT_FIELDS {
            self.runner
                .run(
                    driver,
                    &commands::patch_kubeadm_secret(field),
                    ExecOptions::fatal(1),
                    "Failed to patch kubeadm secret",
                )
                .await?;
        }

        let token = self
            .runner
            .run(
                driver,
                &commands::token_create(),
                ExecOptions::fatal(1),
                "Failed to get join node cmd",
            )
            .await?;
        let worker_join = extract_worker_join_command(&token.stdout)?;
        self.state
            .set_join_commands(JoinCommands::new(worker_join, &certificate_key));

        let listing = self
            .runner
            .run(
                driver,
                &commands::list_nodes(),
                ExecOptions::fatal(5),
                "Failed to get cluster nodes status",
            )
            .await?;
        self.state
            .registry()
            .record_listing(&parse_node_listing(&listing.stdout));
        self.state.set_node_listing(listing.stdout);

        let kubeconfig = self.read_admin_kubeconfig(driver).await?;
        self.state.set_kubeconfig(kubeconfig);
        Ok(())
    }

    /// Join `node` to the cluster described by `snapshot`.
    ///
    /// Nodes the cluster already knows are left alone.
    pub async fn join_node(&self, node: &Node, snapshot: &ClusterSnapshot) -> Result<()> {
        if snapshot.registry().is_member(node) {
            debug!(host = %node.name, "Node is already a cluster member");
            return Ok(());
        }

        if node.is_master() {
            self.add_master(node, snapshot).await?;
            if node.is_worker() {
                self.remove_master_taint(node).await?;
                self.add_worker_label(node).await;
            }
        } else {
            self.add_worker(node, snapshot).await?;
            self.add_worker_label(node).await;
        }

        snapshot.registry().record_joined(node);
        info!(host = %node.name, "Node joined cluster");
        Ok(())
    }

    /// Join `node` as an additional control-plane member
    pub async fn add_master(&self, node: &Node, snapshot: &ClusterSnapshot) -> Result<()> {
        info!(host = %node.name, "Adding master to cluster");
        self.run_join(node, snapshot.join().master(), "add master to cluster")
            .await?;
        self.kubeconfig.distribute_admin_locally(node).await
    }

    /// Join `node` as a worker and give it the cluster kubeconfig
    pub async fn add_worker(&self, node: &Node, snapshot: &ClusterSnapshot) -> Result<()> {
        info!(host = %node.name, "Adding worker to cluster");
        self.run_join(node, snapshot.join().worker(), "add worker to cluster")
            .await?;
        self.kubeconfig
            .sync_to_worker(node, snapshot.kubeconfig())
            .await
    }

    async fn run_join(&self, node: &Node, join_command: &str, operation: &str) -> Result<()> {
        let runner = &self.runner;
        let join = commands::join(join_command);
        let join = join.as_str();
        retry_with_compensation(
            KUBEADM_ATTEMPTS,
            operation,
            move || async move {
                runner
                    .run(node, join, ExecOptions::fatal(0), "kubeadm join")
                    .await
            },
            move || async move { reset(runner, node).await },
        )
        .await?;
        Ok(())
    }

    /// Allow workloads on a master that is also a worker
    pub async fn remove_master_taint(&self, node: &Node) -> Result<()> {
        self.runner
            .run(
                node,
                &commands::remove_master_taint(&node.name),
                ExecOptions::fatal(KUBECTL_RETRIES),
                "Failed to remove master taint",
            )
            .await?;
        Ok(())
    }

    /// Label `node` as a worker; failure is logged and ignored
    pub async fn add_worker_label(&self, node: &Node) {
        let result = self
            .runner
            .run(
                node,
                &commands::add_worker_label(&node.name),
                ExecOptions::fatal(KUBECTL_RETRIES),
                "Failed to add worker label",
            )
            .await;
        best_effort("add worker label", result);
    }

    /// Apply the labels configured for `node`, issuing kubectl on `via`.
    ///
    /// Each label is best-effort.
    pub async fn apply_node_labels(&self, via: &Node, node: &Node) {
        for (key, value) in &node.labels {
            debug!(host = %node.name, label = %key, "Applying node label");
            let result = self
                .runner
                .run(
                    via,
                    &commands::label_node(&node.name, key, value),
                    ExecOptions::fatal(2),
                    "Failed to add node label",
                )
                .await;
            best_effort("label node", result);
        }
    }

    /// Write the cluster kubeconfig to the work directory
    pub async fn load_kubeconfig_locally(&self) -> Result<PathBuf> {
        let kubeconfig = self.state.record().kubeconfig;
        self.kubeconfig.load_locally(&kubeconfig).await
    }

    async fn read_admin_kubeconfig(&self, driver: &Node) -> Result<String> {
        let output = self
            .runner
            .run(
                driver,
                &commands::admin_conf_base64(),
                ExecOptions::fatal(1),
                "Failed to get cluster kubeconfig",
            )
            .await?;
        Ok(output.text().to_string())
    }

    async fn kubeadm_config(&self, driver: &Node) -> Result<String> {
        let path = self.work_dir.join(KUBEADM_CONFIG_OVERRIDE);
        match read_override(&path).await? {
            Some(document) => {
                info!(path = %path.display(), "Using kubeadm config from work directory");
                Ok(document)
            }
            None => self.templates.kubeadm_config(&self.config, driver),
        }
    }
}

async fn read_override(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn reset(runner: &Runner, node: &Node) {
    let result = runner
        .run(
            node,
            &commands::kubeadm_reset(),
            ExecOptions::fatal(0),
            "Failed to reset kube cluster",
        )
        .await;
    best_effort("kubeadm reset", result);
}
