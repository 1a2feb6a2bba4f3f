//! # Cluster Topology
//!
//! The fixed set of backend accelerators the orchestrator dispatches to.
//! Configured once before startup; never mutated afterwards.

use std::collections::HashMap;
use std::net::SocketAddr;

/// One backend accelerator node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Address the orchestrator connects to at startup
    pub addr: SocketAddr,
    /// Accelerator type (e.g. "GPU", "TPU"). `None` = unspecified.
    pub accelerator_type: Option<String>,
}

/// The backend cluster: an ordered list of backends plus lookup indices.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    backends: Vec<Backend>,
    by_type: HashMap<String, Vec<u32>>,
    by_addr: HashMap<SocketAddr, u32>,
}

impl Cluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend. Indices are assigned in insertion order.
    pub fn add_backend(&mut self, addr: SocketAddr, accelerator_type: Option<String>) {
        let idx = self.backends.len() as u32;
        if let Some(kind) = &accelerator_type {
            self.by_type.entry(kind.clone()).or_default().push(idx);
        }
        self.by_addr.insert(addr, idx);
        self.backends.push(Backend {
            addr,
            accelerator_type,
        });
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the cluster has no backends.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backend at `idx`, if valid.
    pub fn get(&self, idx: u32) -> Option<&Backend> {
        self.backends.get(idx as usize)
    }

    /// Iterate all backends in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }

    /// Indices of backends with the given accelerator type.
    pub fn backends_by_type(&self, accelerator_type: &str) -> &[u32] {
        self.by_type
            .get(accelerator_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Reverse lookup of a backend index by address, used on disconnect.
    pub fn backend_index(&self, addr: &SocketAddr) -> Option<u32> {
        self.by_addr.get(addr).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_indices_follow_insertion_order() {
        let mut cluster = Cluster::new();
        cluster.add_backend(addr(9000), Some("GPU".into()));
        cluster.add_backend(addr(9001), Some("TPU".into()));
        cluster.add_backend(addr(9002), Some("GPU".into()));

        assert_eq!(cluster.len(), 3);
        assert_eq!(cluster.get(1).unwrap().addr, addr(9001));
        assert_eq!(cluster.backends_by_type("GPU"), &[0, 2]);
        assert_eq!(cluster.backends_by_type("FPGA"), &[] as &[u32]);
        assert_eq!(cluster.backend_index(&addr(9002)), Some(2));
        assert_eq!(cluster.backend_index(&addr(9999)), None);
    }

    #[test]
    fn test_untyped_backend_not_in_type_index() {
        let mut cluster = Cluster::new();
        cluster.add_backend(addr(9000), None);
        assert!(cluster.backends_by_type("GPU").is_empty());
        assert_eq!(cluster.backend_index(&addr(9000)), Some(0));
    }
}
