//! Command lines issued to hosts
//!
//! Every shell string the orchestrator sends lives here so the exact text can
//! be asserted in tests and emulated by fake executors.

/// kubeadm binary location on hosts
pub const KUBEADM: &str = "/usr/local/bin/kubeadm";
/// kubectl binary location on hosts
pub const KUBECTL: &str = "/usr/local/bin/kubectl";
/// Admin credential written by `kubeadm init`
pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";
/// Where the kubeadm configuration document is uploaded
pub const KUBEADM_CONFIG_PATH: &str = "/etc/kubernetes/kubeadm-config.yaml";

/// Probe output when admin.conf exists
pub const CLUSTER_EXISTS: &str = "Cluster already exists.";
/// Probe output when admin.conf is missing
pub const CLUSTER_WILL_BE_CREATED: &str = "Cluster will be created.";

/// Secret fields blanked so external etcd material never leaves via join bundles
pub const EXTERNAL_ETCD_CERT_FIELDS: [&str; 3] = [
    "external-etcd-ca.crt",
    "external-etcd.crt",
    "external-etcd.key",
];

/// Run `cmd` as root with the caller's environment
pub fn sudo(cmd: &str) -> String {
    format!("sudo -E /bin/sh -c \"{}\"", cmd)
}

/// Run `cmd` as root keeping the caller's PATH
pub fn sudo_path(cmd: &str) -> String {
    format!("sudo env PATH=$PATH /bin/sh -c \"{}\"", cmd)
}

/// Report whether admin.conf exists with one of two sentinel phrases
pub fn probe_cluster() -> String {
    sudo(&format!(
        "[ -f {} ] && echo '{}' || echo '{}'",
        ADMIN_CONF, CLUSTER_EXISTS, CLUSTER_WILL_BE_CREATED
    ))
}

/// Print the image tag of the running kube-apiserver static pod
pub fn apiserver_version() -> String {
    "sudo cat /etc/kubernetes/manifests/kube-apiserver.yaml | grep 'image:' | awk -F '[:]' '{print $(NF-0)}'"
        .to_string()
}

/// Print admin.conf as unwrapped base64
pub fn admin_conf_base64() -> String {
    sudo(&format!("cat {} | base64 --wrap=0", ADMIN_CONF))
}

/// Write a base64 payload to the kubeadm config path
pub fn upload_kubeadm_config(config_base64: &str) -> String {
    sudo(&format!(
        "mkdir -p /etc/kubernetes && echo {} | base64 -d > {}",
        config_base64, KUBEADM_CONFIG_PATH
    ))
}

/// Initialize the control plane from the uploaded config
pub fn kubeadm_init() -> String {
    sudo_path(&format!(
        "{} init --config={} --ignore-preflight-errors=FileExisting-crictl",
        KUBEADM, KUBEADM_CONFIG_PATH
    ))
}

/// Undo a partial init or join
pub fn kubeadm_reset() -> String {
    sudo_path(&format!("{} reset -f", KUBEADM))
}

/// Re-upload control-plane certificates and print the certificate key
pub fn upload_certs() -> String {
    sudo(&format!("{} init phase upload-certs --upload-certs", KUBEADM))
}

/// Blank one field of the kubeadm-certs secret
pub fn patch_kubeadm_secret(field: &str) -> String {
    let body = serde_json::json!({ "data": { field: "" } }).to_string();
    sudo(&format!(
        "{} patch -n kube-system secret kubeadm-certs -p '{}'",
        KUBECTL,
        body.replace('"', "\\\"")
    ))
}

/// Create a bootstrap token and print the matching join command
pub fn token_create() -> String {
    sudo(&format!("{} token create --print-join-command", KUBEADM))
}

/// List nodes as `name version addresses` without a header
pub fn list_nodes() -> String {
    sudo(&format!(
        "{} --no-headers=true get nodes -o custom-columns=:metadata.name,:status.nodeInfo.kubeletVersion,:status.addresses",
        KUBECTL
    ))
}

/// Copy admin.conf into the root and login user's kube config
pub fn distribute_admin_kubeconfig() -> String {
    sudo(&[
        "mkdir -p /root/.kube && mkdir -p $HOME/.kube",
        "cp -f /etc/kubernetes/admin.conf /root/.kube/config",
        "cp -f /etc/kubernetes/admin.conf $HOME/.kube/config",
        "chown $(id -u):$(id -g) $HOME/.kube/config",
    ]
    .join(" && "))
}

/// Create the kube config directories on a worker
pub fn create_kube_dirs() -> String {
    sudo("mkdir -p /root/.kube && mkdir -p $HOME/.kube")
}

/// Write a base64 kubeconfig into root's kube config
pub fn write_root_kubeconfig(kubeconfig_base64: &str) -> String {
    sudo(&format!(
        "echo {} | base64 -d > /root/.kube/config",
        kubeconfig_base64
    ))
}

/// Write a base64 kubeconfig into the login user's kube config and chown it
pub fn write_user_kubeconfig(kubeconfig_base64: &str) -> String {
    sudo(&format!(
        "echo {} | base64 -d > $HOME/.kube/config && chown $(id -u):$(id -g) -R $HOME/.kube",
        kubeconfig_base64
    ))
}

/// Run a stored join command
pub fn join(join_command: &str) -> String {
    sudo_path(join_command)
}

/// Allow scheduling on a master that is also a worker
pub fn remove_master_taint(node_name: &str) -> String {
    sudo(&format!(
        "{} taint nodes {} node-role.kubernetes.io/master=:NoSchedule-",
        KUBECTL, node_name
    ))
}

/// Label a node as worker
pub fn add_worker_label(node_name: &str) -> String {
    label_node(node_name, "node-role.kubernetes.io/worker", "")
}

/// Set one label on a node, overwriting any previous value
pub fn label_node(node_name: &str, key: &str, value: &str) -> String {
    sudo(&format!(
        "{} label --overwrite node {} {}={}",
        KUBECTL, node_name, key, value
    ))
}

/// Apply a manifest file on the host
pub fn kubectl_apply(path: &str) -> String {
    sudo(&format!("{} apply -f {}", KUBECTL, path))
}

/// Empty and recreate a scratch directory on the host
pub fn recreate_dir(dir: &str) -> String {
    sudo(&format!(
        "if [ -d {dir} ]; then rm -rf {dir}; fi && mkdir -p {dir}",
        dir = dir
    ))
}

/// Install an uploaded executable into `/usr/local/bin`
pub fn install_binary(uploaded: &str, name: &str) -> String {
    sudo(&format!("install -m 0755 {} /usr/local/bin/{}", uploaded, name))
}

/// Unpack the CNI plugin archive into `/opt/cni/bin`
pub fn install_cni_plugins(archive: &str) -> String {
    sudo(&format!(
        "mkdir -p /opt/cni/bin && tar -zxf {} -C /opt/cni/bin",
        archive
    ))
}

/// Write a base64 payload to `path`, creating the parent directory
pub fn write_file(path: &str, content_base64: &str) -> String {
    let parent = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
    sudo(&format!(
        "mkdir -p {} && echo {} | base64 -d > {}",
        parent, content_base64, path
    ))
}

/// Reload units and enable the kubelet at boot
pub fn enable_kubelet() -> String {
    sudo("ln -snf /usr/local/bin/kubelet /usr/bin/kubelet && systemctl daemon-reload && systemctl disable kubelet && systemctl enable kubelet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_mentions_both_sentinels() {
        let cmd = probe_cluster();
        assert!(cmd.contains("[ -f /etc/kubernetes/admin.conf ]"));
        assert!(cmd.contains(CLUSTER_EXISTS));
        assert!(cmd.contains(CLUSTER_WILL_BE_CREATED));
    }

    #[test]
    fn test_init_ignores_crictl_preflight() {
        assert_eq!(
            kubeadm_init(),
            "sudo env PATH=$PATH /bin/sh -c \"/usr/local/bin/kubeadm init --config=/etc/kubernetes/kubeadm-config.yaml --ignore-preflight-errors=FileExisting-crictl\""
        );
    }

    #[test]
    fn test_secret_patch_is_json_merge_literal() {
        let cmd = patch_kubeadm_secret("external-etcd.key");
        assert!(cmd.contains("secret kubeadm-certs"));
        assert!(cmd.contains(r#"-p '{\"data\":{\"external-etcd.key\":\"\"}}'"#));
    }

    #[test]
    fn test_worker_label_has_empty_value() {
        assert!(add_worker_label("node1")
            .ends_with("label --overwrite node node1 node-role.kubernetes.io/worker=\""));
    }

    #[test]
    fn test_taint_removal_targets_master_taint() {
        assert!(remove_master_taint("m1")
            .contains("taint nodes m1 node-role.kubernetes.io/master=:NoSchedule-"));
    }

    #[test]
    fn test_write_file_creates_parent() {
        assert_eq!(
            write_file("/etc/systemd/system/kubelet.service.d/10-kubeadm.conf", "eA=="),
            "sudo -E /bin/sh -c \"mkdir -p /etc/systemd/system/kubelet.service.d && echo eA== | base64 -d > /etc/systemd/system/kubelet.service.d/10-kubeadm.conf\""
        );
    }

    #[test]
    fn test_recreate_dir() {
        assert!(recreate_dir("/tmp/kubeweave")
            .contains("if [ -d /tmp/kubeweave ]; then rm -rf /tmp/kubeweave; fi && mkdir -p /tmp/kubeweave"));
    }
}
