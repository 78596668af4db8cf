//! End-to-end assembly tests for kubeweave
//!
//! These tests run the full pipeline against an in-memory fake cluster that
//! answers kubeadm/kubectl commands the way real hosts do. No SSH or
//! Kubernetes is needed:
//!
//! ```bash
//! cargo test --test assembly
//! ```

mod assembly_tests;
