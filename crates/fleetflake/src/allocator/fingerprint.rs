use std::{
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{
    allocator::NodeIdAllocator,
    error::Result,
    partition::{NODES_PER_CATEGORY, NodeId, ServiceCategory, node_id},
};

/// Derives a node ID from the host it runs on, without any coordination.
///
/// The same host and category always map to the same node ID, so nothing
/// needs releasing. Two different hosts can hash onto the same slot; the
/// chance is small but nonzero, which is the price of running without a
/// coordination store.
///
/// The fingerprint is collected on first use and kept for the allocator's
/// lifetime, so even the process-id fallback stays stable across calls.
#[derive(Debug, Default)]
pub struct FingerprintAllocator {
    fingerprint: OnceLock<String>,
}

impl FingerprintAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `fingerprint` instead of probing the machine.
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: OnceLock::from(fingerprint.into()),
        }
    }

    pub fn fingerprint(&self) -> &str {
        self.fingerprint.get_or_init(machine_fingerprint)
    }

    /// The node ID `fingerprint` hashes to within `category`.
    pub fn derive(category: ServiceCategory, fingerprint: &str) -> Result<NodeId> {
        let digest = Sha256::new()
            .chain_update(category.as_str())
            .chain_update(fingerprint)
            .finalize();

        // Low 64 bits of the big-endian digest.
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest[digest.len() - 8..]);
        let offset = u64::from_be_bytes(low) % u64::from(NODES_PER_CATEGORY);

        node_id(category, offset as i64)
    }
}

#[async_trait]
impl NodeIdAllocator for FingerprintAllocator {
    async fn allocate_node_id(&self, category: ServiceCategory) -> Result<NodeId> {
        let id = Self::derive(category, self.fingerprint())?;
        tracing::info!(%category, node_id = %id, "derived node id from machine fingerprint");
        Ok(id)
    }

    async fn release_node_id(&self, _: ServiceCategory, _: NodeId) -> Result<()> {
        Ok(())
    }

    async fn refresh_lease(&self, _: ServiceCategory, _: NodeId) -> Result<()> {
        Ok(())
    }
}

/// Identifies this machine by the first available of: a non-loopback MAC
/// address, the hostname, the outbound IP address.
///
/// When none is available the result is `"<pid>-<unix nanos>"`, which is
/// unique per process but not stable across restarts.
pub fn machine_fingerprint() -> String {
    if let Some(mac) = hardware_address() {
        tracing::debug!(source = "mac", "collected machine fingerprint");
        return mac;
    }
    if let Some(host) = hostname() {
        tracing::debug!(source = "hostname", "collected machine fingerprint");
        return host;
    }
    if let Some(ip) = outbound_ip() {
        tracing::debug!(source = "ip", "collected machine fingerprint");
        return ip;
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    tracing::warn!("no stable machine fingerprint available, node id will change on restart");
    format!("{}-{nanos}", std::process::id())
}

fn hardware_address() -> Option<String> {
    // `get_mac_address` already skips loopback interfaces.
    match mac_address::get_mac_address() {
        Ok(Some(mac)) if mac.bytes() != [0; 6] => Some(mac.to_string()),
        _ => None,
    }
}

fn hostname() -> Option<String> {
    whoami::hostname()
        .ok()
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty() && h != "localhost")
}

fn outbound_ip() -> Option<String> {
    local_ip_address::local_ip()
        .ok()
        .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
}
