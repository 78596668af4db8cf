//! Shared cluster assembly state
//!
//! The driver host is the only writer of [`ClusterState`]. Once the driver
//! phase is done it seals the state into a [`ClusterSnapshot`], and join tasks
//! only ever see the snapshot. A joiner therefore cannot run before the join
//! commands and membership registry exist: it has nothing to call
//! [`join_node`](crate::assembler::ClusterAssembler::join_node) with.
//!
//! The membership registry stays shared (and concurrent) after sealing so a
//! node that joins during this run is recognised as a member afterwards.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::Node;
use crate::parse::ListedNode;
use crate::{Error, Result};

/// Worker and master join commands.
///
/// The master command is always the worker command plus the control-plane
/// flag and certificate key; [`JoinCommands::new`] is the only way to build one.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinCommands {
    worker: String,
    master: String,
}

impl JoinCommands {
    /// Derive both join commands from the worker command and certificate key
    pub fn new(worker: impl Into<String>, certificate_key: &str) -> Self {
        let worker = worker.into();
        let master = format!(
            "{} --control-plane --certificate-key {}",
            worker, certificate_key
        );
        Self { worker, master }
    }

    /// Command joining a worker
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Command joining an additional control-plane member
    pub fn master(&self) -> &str {
        &self.master
    }
}

impl std::fmt::Debug for JoinCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens and certificate keys are credentials
        f.debug_struct("JoinCommands").finish_non_exhaustive()
    }
}

/// Which nodes the cluster already knows about.
///
/// Keys are node names (value: kubelet version, possibly empty) and node
/// addresses (value: the address itself).
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    entries: DashMap<String, String>,
}

impl MembershipRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every row of a parsed node listing
    pub fn record_listing(&self, nodes: &[ListedNode]) {
        for node in nodes {
            if let Some(ip) = &node.ipv4 {
                self.entries.insert(ip.clone(), ip.clone());
            }
            if let Some(ip) = &node.ipv6 {
                self.entries.insert(ip.clone(), ip.clone());
            }
            self.entries.insert(node.name.clone(), node.version.clone());
        }
        debug!(entries = self.entries.len(), "Recorded node listing");
    }

    /// Record a single key
    pub fn record(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Record a node that joined during this run
    pub fn record_joined(&self, node: &Node) {
        self.record(node.internal_address.clone(), node.internal_address.clone());
    }

    /// Whether `node` is already part of the cluster.
    ///
    /// True when its name maps to a non-empty version, or its internal
    /// address is present at all. The address check is loose on purpose:
    /// listings whose name column is an address, or that lack a version,
    /// still count.
    pub fn is_member(&self, node: &Node) -> bool {
        let has_version = self
            .entries
            .get(&node.name)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        has_version || self.entries.contains_key(&node.internal_address)
    }
}

/// Everything the driver learns about the cluster
#[derive(Clone, Default)]
pub struct AssemblyRecord {
    /// Whether the control plane is up
    pub exists: bool,
    /// Running control-plane version, if known
    pub version: Option<String>,
    /// Join commands, present after a credential refresh
    pub join: Option<JoinCommands>,
    /// admin.conf as unwrapped base64
    pub kubeconfig: String,
    /// Raw node listing text
    pub node_listing: String,
}

impl std::fmt::Debug for AssemblyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblyRecord")
            .field("exists", &self.exists)
            .field("version", &self.version)
            .field("has_join_commands", &self.join.is_some())
            .field("kubeconfig_len", &self.kubeconfig.len())
            .finish()
    }
}

/// Mutable state written by the driver host
#[derive(Debug, Default)]
pub struct ClusterState {
    record: RwLock<AssemblyRecord>,
    registry: Arc<MembershipRegistry>,
}

impl ClusterState {
    /// Fresh state: no cluster known yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current record
    pub fn record(&self) -> AssemblyRecord {
        self.record.read().clone()
    }

    /// Whether the control plane exists
    pub fn exists(&self) -> bool {
        self.record.read().exists
    }

    /// The membership registry
    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    pub(crate) fn mark_exists(&self) {
        self.record.write().exists = true;
    }

    pub(crate) fn set_version(&self, version: Option<String>) {
        self.record.write().version = version;
    }

    pub(crate) fn set_kubeconfig(&self, kubeconfig_base64: String) {
        self.record.write().kubeconfig = kubeconfig_base64;
    }

    pub(crate) fn set_join_commands(&self, join: JoinCommands) {
        self.record.write().join = Some(join);
    }

    pub(crate) fn set_node_listing(&self, listing: String) {
        self.record.write().node_listing = listing;
    }

    /// Freeze the driver's results for join tasks.
    ///
    /// Fails if the cluster does not exist yet or join credentials are missing.
    pub fn seal(&self) -> Result<ClusterSnapshot> {
        let record = self.record();
        if !record.exists {
            return Err(Error::config(
                "cluster does not exist; the driver phase has not completed",
            ));
        }
        let join = record.join.clone().ok_or_else(|| {
            Error::config("join commands missing; credentials were never refreshed")
        })?;
        Ok(ClusterSnapshot {
            record: Arc::new(record),
            join,
            registry: self.registry.clone(),
        })
    }
}

/// Read-only view of the cluster handed to join tasks
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    record: Arc<AssemblyRecord>,
    join: JoinCommands,
    registry: Arc<MembershipRegistry>,
}

impl ClusterSnapshot {
    /// The sealed record
    pub fn record(&self) -> &AssemblyRecord {
        &self.record
    }

    /// Join commands
    pub fn join(&self) -> &JoinCommands {
        &self.join
    }

    /// admin.conf as base64
    pub fn kubeconfig(&self) -> &str {
        &self.record.kubeconfig
    }

    /// Membership registry shared with the driver
    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }
}
