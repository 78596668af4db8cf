//! Integration tests for kubeweave
//!
//! # Test Organization
//!
//! - `fake_cluster`: an executor emulating kubeadm/kubectl on a set of hosts
//! - `create_cluster`: stories about assembling a cluster from nothing
//! - `scale_cluster`: stories about re-running against an existing cluster

mod create_cluster;
mod fake_cluster;
mod scale_cluster;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kubeweave::config::ClusterConfig;
use kubeweave::executor::Runner;
use kubeweave::pipeline::{Pipeline, RunOptions};
use kubeweave::provision::{cni_archive, KUBE_BINARIES};

use fake_cluster::FakeCluster;

/// Two masters (the first also schedules workloads) and two workers
pub const CLUSTER_YAML: &str = r#"
name: sample
hosts:
  - name: master1
    address: 203.0.113.10
    internalAddress: 10.0.0.10
    roles: [master, etcd, worker]
  - name: master2
    address: 203.0.113.12
    internalAddress: 10.0.0.12
    roles: [master, etcd]
  - name: node1
    address: 203.0.113.11
    internalAddress: 10.0.0.11
    roles: [worker]
    labels:
      disk: ssd
  - name: node2
    address: 203.0.113.13
    internalAddress: 10.0.0.13
    roles: [worker]
controlPlaneEndpoint:
  domain: lb.kubeweave.local
  port: 6443
kubernetes:
  version: v1.18.6
network:
  plugin: calico
"#;

/// Three stacked masters and one worker
pub const HA_CLUSTER_YAML: &str = r#"
name: ha
hosts:
  - name: master1
    address: 203.0.113.10
    internalAddress: 10.0.0.10
    roles: [master, etcd]
  - name: master2
    address: 203.0.113.12
    internalAddress: 10.0.0.12
    roles: [master, etcd]
  - name: master3
    address: 203.0.113.14
    internalAddress: 10.0.0.14
    roles: [master, etcd]
  - name: node1
    address: 203.0.113.11
    internalAddress: 10.0.0.11
    roles: [worker]
controlPlaneEndpoint:
  domain: lb.kubeweave.local
  port: 6443
kubernetes:
  version: v1.18.6
"#;

/// Parsed sample cluster
pub fn cluster_config() -> ClusterConfig {
    ClusterConfig::from_yaml(CLUSTER_YAML).expect("sample cluster parses")
}

/// Populate `<dir>/v1.18.6/amd64` with placeholder binaries
pub fn seed_binaries(dir: &Path) {
    let arch_dir = dir.join("v1.18.6").join("amd64");
    std::fs::create_dir_all(&arch_dir).expect("create binaries dir");
    for binary in KUBE_BINARIES {
        std::fs::write(arch_dir.join(binary), b"\x7fELF").expect("write binary");
    }
    std::fs::write(arch_dir.join(cni_archive("amd64")), b"tgz").expect("write cni archive");
}

/// Pipeline over `fake` for the sample cluster with near-zero backoff
pub fn pipeline(fake: &Arc<FakeCluster>, work_dir: &Path, binaries_dir: &Path) -> Pipeline {
    pipeline_for(cluster_config(), fake, work_dir, binaries_dir)
}

/// Pipeline over `fake` for `config` with near-zero backoff
pub fn pipeline_for(
    config: ClusterConfig,
    fake: &Arc<FakeCluster>,
    work_dir: &Path,
    binaries_dir: &Path,
) -> Pipeline {
    let runner = Runner::new(fake.clone())
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2));
    Pipeline::with_runner(
        config,
        runner,
        RunOptions {
            work_dir: work_dir.to_path_buf(),
            binaries_dir: binaries_dir.to_path_buf(),
            skip_pull_images: false,
            dns_manifest: None,
        },
    )
}
