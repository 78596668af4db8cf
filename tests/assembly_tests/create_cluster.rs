//! Stories about assembling a cluster from empty hosts

use std::sync::Arc;

use kubeweave::config::ClusterConfig;
use kubeweave::Error;

use super::fake_cluster::FakeCluster;
use super::{pipeline, pipeline_for, seed_binaries, HA_CLUSTER_YAML};

/// Story: empty hosts become a four node cluster
///
/// The first master initializes the control plane, the second master joins
/// with the control-plane flag, and both workers join with the plain command.
#[tokio::test]
async fn story_empty_hosts_become_a_cluster() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new());

    let report = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();

    assert!(report.created);
    assert_eq!(report.version, None);
    let mut joined = report.joined.clone();
    joined.sort();
    assert_eq!(joined, vec!["master2", "node1", "node2"]);
    assert_eq!(fake.members().len(), 4);

    assert_eq!(fake.count_all("kubeadm init --config"), 1);
    assert_eq!(fake.count("master1", "kubeadm init --config"), 1);
    assert_eq!(fake.count("master2", "--control-plane --certificate-key"), 1);
    assert_eq!(fake.count("node1", "--control-plane"), 0);
    assert_eq!(fake.count("node1", "kubeadm join"), 1);

    // master1 is also a worker; master2 is not
    assert_eq!(fake.count("master1", "taint nodes master1"), 1);
    assert_eq!(fake.count_all("taint nodes master2"), 0);

    // node1's configured label is applied from the driver
    assert_eq!(fake.count("master1", "label --overwrite node node1 disk=ssd"), 1);

    // Every host got its binaries: four executables plus the CNI archive
    for host in ["master1", "master2", "node1", "node2"] {
        assert_eq!(fake.uploads_to(host), 5, "uploads to {}", host);
    }

    let kubeconfig = std::fs::read_to_string(&report.kubeconfig).unwrap();
    assert_eq!(report.kubeconfig, work_dir.path().join("config-sample"));
    assert!(kubeconfig.contains("server: https://10.0.0.10:6443"));
    assert!(!kubeconfig.contains("lb.kubeweave.local"));
}

/// Story: a failed init is reset and retried on the driver
#[tokio::test]
async fn story_failed_init_is_reset_and_retried() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new().fail_init(2));

    let report = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();

    assert!(report.created);
    assert_eq!(fake.count("master1", "kubeadm init --config"), 3);
    assert_eq!(fake.count("master1", "kubeadm reset -f"), 2);
    assert_eq!(fake.members().len(), 4);
}

/// Story: init failing every time aborts the run naming the driver
#[tokio::test]
async fn story_init_exhausted_aborts_before_joins() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new().fail_init(3));

    let err = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("host master1:"));
    match err {
        Error::Host { host, source } => {
            assert_eq!(host, "master1");
            assert!(matches!(*source, Error::RetryExhausted { attempts: 3, .. }));
        }
        other => panic!("expected host error, got {:?}", other),
    }
    assert_eq!(fake.count("master1", "kubeadm reset -f"), 2);
    assert_eq!(fake.count_all("kubeadm join"), 0);
    assert!(fake.members().is_empty());
}

/// Story: missing binaries stop the run before kubeadm touches any host
#[tokio::test]
async fn story_missing_binaries_abort_run() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeCluster::new());

    let err = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Host { .. }));
    assert!(err.to_string().contains("kubeadm not found"));
    assert_eq!(fake.count_all("kubeadm init --config"), 0);
}

/// Story: extra masters join one after another, never side by side
///
/// Each control-plane join adds a stacked etcd member, so master2 and master3
/// must not run `kubeadm join --control-plane` at the same time.
#[tokio::test]
async fn story_masters_join_one_at_a_time() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new());
    let config = ClusterConfig::from_yaml(HA_CLUSTER_YAML).unwrap();

    let report = pipeline_for(config, &fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();

    assert_eq!(report.joined, vec!["master2", "master3", "node1"]);
    assert_eq!(fake.count_all("--control-plane --certificate-key"), 2);
    assert_eq!(fake.max_concurrent_control_plane_joins(), 1);
    assert_eq!(fake.members().len(), 4);
}
