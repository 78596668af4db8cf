//! Stories about re-running against a cluster that already exists

use std::sync::Arc;

use super::fake_cluster::{FakeCluster, VERSION};
use super::{pipeline, seed_binaries};

/// Story: only hosts missing from the cluster are joined
///
/// master1 already runs the control plane and node1 is a member. The run
/// detects both, never runs `kubeadm init`, leaves node1's binaries alone and
/// joins master2 and node2.
#[tokio::test]
async fn story_existing_cluster_joins_only_new_hosts() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::existing("master1", "10.0.0.10").with_member("node1", "10.0.0.11"));

    let report = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();

    assert!(!report.created);
    assert_eq!(report.version.as_deref(), Some(VERSION));
    let mut joined = report.joined.clone();
    joined.sort();
    assert_eq!(joined, vec!["master2", "node2"]);

    assert_eq!(fake.count_all("kubeadm init --config"), 0);
    assert_eq!(fake.count("node1", "kubeadm join"), 0);
    assert_eq!(fake.uploads_to("master1"), 0);
    assert_eq!(fake.uploads_to("node1"), 0);
    assert_eq!(fake.uploads_to("node2"), 5);
    assert!(work_dir.path().join("config-sample").exists());
}

/// Story: a second run over a complete cluster changes nothing
#[tokio::test]
async fn story_rerun_is_idempotent() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new());

    pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();
    fake.clear_log();

    let report = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();

    assert!(!report.created);
    assert!(report.joined.is_empty());
    assert_eq!(fake.members().len(), 4);
    assert_eq!(fake.count_all("kubeadm init --config"), 0);
    assert_eq!(fake.count_all("kubeadm join"), 0);
    assert_eq!(fake.count_all("kubeadm reset"), 0);
    for host in ["master1", "master2", "node1", "node2"] {
        assert_eq!(fake.uploads_to(host), 0, "uploads to {}", host);
    }
}

/// Story: a worker that recovers after one failed join is reset once
#[tokio::test]
async fn story_flaky_join_recovers() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new().fail_join("node2", 1));

    let report = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap();

    assert!(report.joined.contains(&"node2".to_string()));
    assert_eq!(fake.count("node2", "kubeadm join"), 2);
    assert_eq!(fake.count("node2", "kubeadm reset -f"), 1);
}

/// Story: a worker that never joins fails the run with its name
#[tokio::test]
async fn story_failed_join_names_host() {
    let work_dir = tempfile::tempdir().unwrap();
    let binaries = tempfile::tempdir().unwrap();
    seed_binaries(binaries.path());
    let fake = Arc::new(FakeCluster::new().fail_join("node2", 3));

    let err = pipeline(&fake, work_dir.path(), binaries.path())
        .run()
        .await
        .unwrap_err();

    assert!(err
        .to_string()
        .starts_with("host node2: add worker to cluster failed after 3 attempts"));
    assert_eq!(fake.count("node2", "kubeadm reset -f"), 2);
}
