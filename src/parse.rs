//! Structured extraction from kubeadm/kubectl text output
//!
//! The tools only report state as free text. Each function here turns one
//! kind of output into a typed value or a [`Error::Parse`], so the
//! orchestration code never touches a regex.

use std::sync::LazyLock;

use regex::Regex;

use crate::commands::KUBEADM;
use crate::executor::CommandOutput;
use crate::{Error, Result};

static CERTIFICATE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9a-z]{64}").expect("valid certificate key regex"));

static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").expect("valid ipv4 regex"));

static IPV6: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[a-f0-9]{1,4}(:[a-f0-9]{1,4}){7}|[a-f0-9]{1,4}(:[a-f0-9]{1,4}){0,7}::[a-f0-9]{0,4}(:[a-f0-9]{1,4}){0,7}",
    )
    .expect("valid ipv6 regex")
});

const JOIN_VERB: &str = "kubeadm join";
const NO_SUCH_FILE: &str = "No such file or directory";

/// Pull the certificate key out of `kubeadm init phase upload-certs` output.
///
/// The first 64-character run of lowercase letters and digits wins.
pub fn extract_certificate_key(output: &str) -> Result<String> {
    CERTIFICATE_KEY
        .find(output)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            Error::parse(
                "certificate key",
                "no 64-character key in upload-certs output",
            )
        })
}

/// Rebuild the worker join command from `kubeadm token create --print-join-command`.
///
/// Everything after the first `kubeadm join` is kept as the argument tail.
pub fn extract_worker_join_command(output: &str) -> Result<String> {
    let (_, tail) = output.split_once(JOIN_VERB).ok_or_else(|| {
        Error::parse("join command", format!("'{}' not found in output", JOIN_VERB))
    })?;
    let tail = tail.trim();
    if tail.is_empty() {
        return Err(Error::parse("join command", "no arguments after join verb"));
    }
    Ok(format!("{} join {}", KUBEADM, tail))
}

/// Interpret the kube-apiserver image tag lookup.
///
/// A missing manifest means "version unknown" rather than an error; any
/// other failed lookup is.
pub fn parse_apiserver_version(output: &CommandOutput) -> Result<Option<String>> {
    if output.combined().contains(NO_SUCH_FILE) {
        return Ok(None);
    }
    if !output.success {
        return Err(Error::exec(
            "Failed to find current version",
            output.combined(),
        ));
    }
    let version = output.text();
    Ok((!version.is_empty()).then(|| version.to_string()))
}

/// One row of the custom-column node listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedNode {
    /// First column: node name
    pub name: String,
    /// Kubelet version, empty when the row is too short to trust
    pub version: String,
    /// First IPv4-shaped token on the row
    pub ipv4: Option<String>,
    /// First IPv6-shaped token on the row
    pub ipv6: Option<String>,
}

/// Parse `kubectl get nodes --no-headers -o custom-columns=name,version,addresses`.
///
/// Rows with more than three whitespace-separated fields carry a trusted
/// version in the second field; shorter rows only prove the name exists.
pub fn parse_node_listing(output: &str) -> Vec<ListedNode> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let name = fields.first()?;
            let version = if fields.len() > 3 { fields[1] } else { "" };
            Some(ListedNode {
                name: name.to_string(),
                version: version.to_string(),
                ipv4: IPV4.find(line).map(|m| m.as_str().to_string()),
                ipv6: IPV6.find(line).map(|m| m.as_str().to_string()),
            })
        })
        .collect()
}
