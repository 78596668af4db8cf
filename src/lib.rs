//! kubeweave - assembles Kubernetes clusters with kubeadm over SSH
//!
//! kubeweave takes a YAML description of hosts and roles and drives kubeadm
//! and kubectl on them until the cluster exists and every host is a member.
//! Re-running against a partially assembled cluster picks up where it left
//! off: an existing control plane is detected, and nodes already listed by the
//! API server are skipped.
//!
//! # Architecture
//!
//! - One host, the driver (first master), owns the control plane. It detects
//!   or initializes the cluster and mints join credentials.
//! - The driver's results are sealed into a read-only snapshot; joining the
//!   remaining hosts requires that snapshot, so joins cannot start early.
//! - Remaining hosts join concurrently, one task per host.
//!
//! # Modules
//!
//! - [`config`] - Cluster file: hosts, roles, endpoint, versions
//! - [`executor`] - Remote command transport and retry policy
//! - [`commands`] - Shell command lines sent to hosts
//! - [`parse`] - Extraction of keys, join commands and listings from tool output
//! - [`state`] - Assembly state, membership registry and the sealed snapshot
//! - [`assembler`] - Control-plane init, credential refresh and node joins
//! - [`kubeconfig`] - admin.conf distribution and the local kubeconfig
//! - [`images`] - Image manifest resolution and pre-pull
//! - [`provision`] - Kube binaries and kubelet service installation
//! - [`dns`] - Cluster DNS manifest application
//! - [`templates`] - kubelet unit and kubeadm config templates
//! - [`pipeline`] - End-to-end create/scale flow
//! - [`retry`] - Backoff, compensating retries and best-effort steps
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod assembler;
pub mod commands;
pub mod config;
pub mod dns;
pub mod error;
pub mod executor;
pub mod images;
pub mod kubeconfig;
pub mod parse;
pub mod pipeline;
pub mod provision;
pub mod retry;
pub mod state;
pub mod templates;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
