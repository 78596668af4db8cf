//! Rendered host files
//!
//! The kubelet systemd unit, its kubeadm drop-in and the default kubeadm
//! configuration document are minijinja templates filled from the cluster
//! file.

use minijinja::{context, Environment};

use crate::config::{is_non_default_runtime, ClusterConfig, Node};
use crate::{Error, Result};

const KUBELET_SERVICE: &str = "kubelet.service";
const KUBELET_ENV: &str = "10-kubeadm.conf";
const KUBEADM_CONFIG: &str = "kubeadm-config.yaml";

const KUBELET_SERVICE_TEMPLATE: &str = r#"[Unit]
Description=kubelet: The Kubernetes Node Agent
Documentation=http://kubernetes.io/docs/

[Service]
ExecStart=/usr/local/bin/kubelet
Restart=always
StartLimitInterval=0
RestartSec=10

[Install]
WantedBy=multi-user.target
"#;

const KUBELET_ENV_TEMPLATE: &str = r#"# Note: This dropin only works with kubeadm and kubelet v1.11+
[Service]
Environment="KUBELET_KUBECONFIG_ARGS=--bootstrap-kubeconfig=/etc/kubernetes/bootstrap-kubelet.conf --kubeconfig=/etc/kubernetes/kubelet.conf"
Environment="KUBELET_CONFIG_ARGS=--config=/var/lib/kubelet/config.yaml"
# Written by "kubeadm init" and "kubeadm join", populates KUBELET_KUBEADM_ARGS
EnvironmentFile=-/var/lib/kubelet/kubeadm-flags.env
# Operator overrides of last resort, populates KUBELET_EXTRA_ARGS
EnvironmentFile=-/etc/default/kubelet
Environment="KUBELET_EXTRA_ARGS=--node-ip={{ node_ip }} --hostname-override={{ hostname }}{% if cri_socket %} --container-runtime=remote --container-runtime-endpoint=unix://{{ cri_socket }}{% endif %}"
ExecStart=
ExecStart=/usr/local/bin/kubelet $KUBELET_KUBECONFIG_ARGS $KUBELET_CONFIG_ARGS $KUBELET_KUBEADM_ARGS $KUBELET_EXTRA_ARGS
"#;

const KUBEADM_CONFIG_TEMPLATE: &str = r#"---
apiVersion: kubeadm.k8s.io/v1beta2
kind: ClusterConfiguration
clusterName: {{ dns_domain }}
kubernetesVersion: {{ version }}
imageRepository: {{ image_repository }}
controlPlaneEndpoint: {{ endpoint_domain }}:{{ endpoint_port }}
certificatesDir: /etc/kubernetes/pki
dns:
  type: CoreDNS
  imageRepository: {{ coredns_repository }}
  imageTag: 1.6.9
networking:
  dnsDomain: {{ dns_domain }}
  podSubnet: {{ pods_cidr }}
  serviceSubnet: {{ service_cidr }}
apiServer:
  certSANs:
{%- for san in cert_sans %}
    - {{ san }}
{%- endfor %}
---
apiVersion: kubeadm.k8s.io/v1beta2
kind: InitConfiguration
localAPIEndpoint:
  advertiseAddress: {{ advertise_address }}
  bindPort: {{ endpoint_port }}
nodeRegistration:
  name: {{ node_name }}
  criSocket: {{ cri_socket_path }}
---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
clusterDomain: {{ dns_domain }}
cgroupDriver: {{ cgroup_driver }}
rotateCertificates: true
---
apiVersion: kubeproxy.config.k8s.io/v1alpha1
kind: KubeProxyConfiguration
clusterCIDR: {{ pods_cidr }}
mode: ipvs
"#;

/// CRI socket path for a container runtime
pub fn cri_socket(runtime: &str) -> &'static str {
    match runtime {
        "containerd" => "/run/containerd/containerd.sock",
        "crio" => "/var/run/crio/crio.sock",
        "isula" => "/var/run/isulad.sock",
        _ => "/var/run/dockershim.sock",
    }
}

/// Template set for host files
pub struct Templates {
    env: Environment<'static>,
}

impl Default for Templates {
    fn default() -> Self {
        Self::new()
    }
}

impl Templates {
    /// Load the built-in templates
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template(KUBELET_SERVICE, KUBELET_SERVICE_TEMPLATE)
            .expect("kubelet service template should be valid");
        env.add_template(KUBELET_ENV, KUBELET_ENV_TEMPLATE)
            .expect("kubelet drop-in template should be valid");
        env.add_template(KUBEADM_CONFIG, KUBEADM_CONFIG_TEMPLATE)
            .expect("kubeadm config template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(|e| Error::template(name, e.to_string()))
    }

    /// systemd unit for the kubelet
    pub fn kubelet_service(&self) -> Result<String> {
        self.render(KUBELET_SERVICE, context! {})
    }

    /// kubeadm drop-in for the kubelet unit
    pub fn kubelet_env(&self, node: &Node, runtime: &str) -> Result<String> {
        let socket = if is_non_default_runtime(runtime) {
            cri_socket(runtime)
        } else {
            ""
        };
        self.render(
            KUBELET_ENV,
            context! {
                node_ip => &node.internal_address,
                hostname => &node.name,
                cri_socket => socket,
            },
        )
    }

    /// Default kubeadm configuration for initializing on `driver`
    pub fn kubeadm_config(&self, config: &ClusterConfig, driver: &Node) -> Result<String> {
        let registry = config.registry.private_registry.trim_end_matches('/');
        let prefixed = |namespace: &str| {
            if registry.is_empty() {
                namespace.to_string()
            } else {
                format!("{}/{}", registry, namespace)
            }
        };

        let endpoint = &config.control_plane_endpoint;
        let mut cert_sans = vec![
            endpoint.domain.clone(),
            "kubernetes".to_string(),
            "kubernetes.default".to_string(),
            "kubernetes.default.svc".to_string(),
            format!("kubernetes.default.svc.{}", config.kubernetes.cluster_name),
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ];
        if !endpoint.address.is_empty() {
            cert_sans.push(endpoint.address.clone());
        }
        for host in config.k8s_nodes() {
            cert_sans.push(host.name.clone());
            cert_sans.push(host.internal_address.clone());
        }
        cert_sans.dedup();

        let runtime = config.kubernetes.runtime();
        self.render(
            KUBEADM_CONFIG,
            context! {
                version => &config.kubernetes.version,
                dns_domain => &config.kubernetes.cluster_name,
                image_repository => prefixed(crate::config::DEFAULT_KUBE_IMAGE_NAMESPACE),
                coredns_repository => prefixed("coredns"),
                endpoint_domain => &endpoint.domain,
                endpoint_port => endpoint.port,
                pods_cidr => &config.network.pods_cidr,
                service_cidr => &config.network.service_cidr,
                cert_sans => cert_sans,
                advertise_address => &driver.internal_address,
                node_name => &driver.name,
                cri_socket_path => cri_socket(runtime),
                cgroup_driver => if is_non_default_runtime(runtime) { "systemd" } else { "cgroupfs" },
            },
        )
    }
}
