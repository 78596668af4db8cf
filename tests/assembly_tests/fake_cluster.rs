//! In-memory cluster answering kubeadm/kubectl like real hosts
//!
//! Hosts are identified by node name. A host "has admin.conf" once it ran
//! `kubeadm init` or joined as a control-plane member; a host is listed by
//! `kubectl get nodes` once it initialized or joined.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;

use kubeweave::config::Node;
use kubeweave::executor::{CommandOutput, RemoteExecutor};
use kubeweave::Result;

pub const CERTIFICATE_KEY: &str =
    "7d2c9f1e6b5a4d3c2b1a0f9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c";
pub const VERSION: &str = "v1.18.6";

const ADMIN_CONF: &str = "apiVersion: v1\nclusters:\n- cluster:\n    certificate-authority-data: LS0t\n    server: https://lb.kubeweave.local:6443\n  name: cluster.local\nkind: Config\n";

#[derive(Default)]
struct Inner {
    admin_conf: BTreeSet<String>,
    members: Vec<(String, String)>,
    init_failures: u32,
    join_failures: HashMap<String, u32>,
    commands: Vec<(String, String)>,
    uploads: Vec<(String, String)>,
    control_plane_joins_in_flight: u32,
    max_control_plane_joins_in_flight: u32,
}

/// Fake hosts sharing one emulated control plane
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cluster whose control plane already runs on `driver`
    pub fn existing(driver: &str, driver_ip: &str) -> Self {
        let fake = Self::new();
        {
            let mut inner = fake.inner.lock();
            inner.admin_conf.insert(driver.to_string());
            inner
                .members
                .push((driver.to_string(), driver_ip.to_string()));
        }
        fake
    }

    /// Add an already joined node
    pub fn with_member(self, name: &str, ip: &str) -> Self {
        self.inner
            .lock()
            .members
            .push((name.to_string(), ip.to_string()));
        self
    }

    /// Fail the next `n` `kubeadm init` runs
    pub fn fail_init(self, n: u32) -> Self {
        self.inner.lock().init_failures = n;
        self
    }

    /// Fail the next `n` `kubeadm join` runs on `host`
    pub fn fail_join(self, host: &str, n: u32) -> Self {
        self.inner.lock().join_failures.insert(host.to_string(), n);
        self
    }

    /// Names of listed nodes
    pub fn members(&self) -> Vec<String> {
        self.inner
            .lock()
            .members
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Commands that ran on `host` containing `needle`
    pub fn count(&self, host: &str, needle: &str) -> usize {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|(h, cmd)| h == host && cmd.contains(needle))
            .count()
    }

    /// Commands containing `needle` on any host
    pub fn count_all(&self, needle: &str) -> usize {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|(_, cmd)| cmd.contains(needle))
            .count()
    }

    /// Number of files uploaded to `host`
    pub fn uploads_to(&self, host: &str) -> usize {
        self.inner
            .lock()
            .uploads
            .iter()
            .filter(|(h, _)| h == host)
            .count()
    }

    /// Most control-plane joins that were running at the same time
    pub fn max_concurrent_control_plane_joins(&self) -> u32 {
        self.inner.lock().max_control_plane_joins_in_flight
    }

    /// Forget recorded commands and uploads
    pub fn clear_log(&self) {
        let mut inner = self.inner.lock();
        inner.commands.clear();
        inner.uploads.clear();
    }

    fn listing(inner: &Inner) -> String {
        inner
            .members
            .iter()
            .map(|(name, ip)| {
                format!(
                    "{}   {}   [map[address:{} type:InternalIP] map[address:{} type:Hostname]]\n",
                    name, VERSION, ip, name
                )
            })
            .collect()
    }

    fn respond(&self, host: &Node, cmd: &str) -> CommandOutput {
        let mut inner = self.inner.lock();
        inner.commands.push((host.name.clone(), cmd.to_string()));
        let has_admin_conf = inner.admin_conf.contains(&host.name);

        if cmd.contains("[ -f /etc/kubernetes/admin.conf ]") {
            CommandOutput::ok(if has_admin_conf {
                "Cluster already exists.\n"
            } else {
                "Cluster will be created.\n"
            })
        } else if cmd.contains("kube-apiserver.yaml | grep") {
            if has_admin_conf {
                CommandOutput::ok(format!("{}\n", VERSION))
            } else {
                CommandOutput {
                    success: true,
                    stdout: String::new(),
                    stderr: "cat: /etc/kubernetes/manifests/kube-apiserver.yaml: No such file or directory\n"
                        .to_string(),
                }
            }
        } else if cmd.contains("base64 --wrap=0") {
            if has_admin_conf {
                CommandOutput::ok(STANDARD.encode(ADMIN_CONF))
            } else {
                CommandOutput::failed("cat: /etc/kubernetes/admin.conf: No such file or directory")
            }
        } else if cmd.contains("kubeadm init --config") {
            if inner.init_failures > 0 {
                inner.init_failures -= 1;
                return CommandOutput::failed("[wait-control-plane] timed out waiting for the condition");
            }
            inner.admin_conf.insert(host.name.clone());
            inner
                .members
                .push((host.name.clone(), host.internal_address.clone()));
            CommandOutput::ok("Your Kubernetes control-plane has initialized successfully!\n")
        } else if cmd.contains("kubeadm reset") {
            inner.admin_conf.remove(&host.name);
            CommandOutput::ok("[reset] Deleting contents of stateful directories\n")
        } else if cmd.contains("upload-certs") {
            CommandOutput::ok(format!(
                "[upload-certs] Storing the certificates in Secret \"kubeadm-certs\" in the \"kube-system\" Namespace\n[upload-certs] Using certificate key:\n{}\n",
                CERTIFICATE_KEY
            ))
        } else if cmd.contains("token create --print-join-command") {
            CommandOutput::ok(
                "kubeadm join lb.kubeweave.local:6443 --token abcdef.0123456789abcdef     --discovery-token-ca-cert-hash sha256:5b1c9e\n",
            )
        } else if cmd.contains("get nodes") {
            CommandOutput::ok(Self::listing(&inner))
        } else if cmd.contains("kubeadm join") {
            if let Some(remaining) = inner.join_failures.get_mut(&host.name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return CommandOutput::failed("[preflight] couldn't validate the identity of the API Server");
                }
            }
            if cmd.contains("--control-plane") {
                if !cmd.contains(CERTIFICATE_KEY) {
                    return CommandOutput::failed("certificate key mismatch");
                }
                inner.admin_conf.insert(host.name.clone());
            }
            inner
                .members
                .push((host.name.clone(), host.internal_address.clone()));
            CommandOutput::ok("This node has joined the cluster\n")
        } else if cmd.contains("/root/.kube/config") && cmd.contains("cp -f") && !has_admin_conf {
            CommandOutput::failed("cp: cannot stat '/etc/kubernetes/admin.conf': No such file or directory")
        } else {
            CommandOutput::ok("")
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeCluster {
    async fn execute(&self, host: &Node, command: &str) -> Result<CommandOutput> {
        if !(command.contains("kubeadm join") && command.contains("--control-plane")) {
            return Ok(self.respond(host, command));
        }

        // Control-plane joins take a while so overlapping ones can be seen
        {
            let mut inner = self.inner.lock();
            inner.control_plane_joins_in_flight += 1;
            inner.max_control_plane_joins_in_flight = inner
                .max_control_plane_joins_in_flight
                .max(inner.control_plane_joins_in_flight);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let output = self.respond(host, command);
        self.inner.lock().control_plane_joins_in_flight -= 1;
        Ok(output)
    }

    async fn copy_file(&self, host: &Node, _local_path: &Path, remote_path: &str) -> Result<()> {
        self.inner
            .lock()
            .uploads
            .push((host.name.clone(), remote_path.to_string()));
        Ok(())
    }
}
