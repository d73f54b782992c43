//! Discovery list parsing.
//!
//! One server per line: `vm_name,ip,dns_name`. Extra fields are ignored.

use std::path::Path;

use fleetgraph_core::{IdentityCondition, Node};

use crate::error::{DiscoverError, Result};

/// A server to discover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub vm_name: String,
    pub ip: String,
    pub dns_name: String,
}

impl ServerEntry {
    /// The subject node: named after the VM, identified by IP.
    pub fn subject_node(&self, class: &str) -> Node {
        Node::new(class, self.vm_name.as_str())
            .with_condition(IdentityCondition::single("ip", self.ip.as_str()))
            .with_property("ip", self.ip.as_str())
    }
}

pub fn parse_inventory(text: &str) -> Result<Vec<ServerEntry>> {
    let mut servers = Vec::new();

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let [vm_name, ip, dns_name, ..] = parts.as_slice() else {
            return Err(DiscoverError::Inventory {
                line: i + 1,
                reason: format!("expected vm_name,ip,dns_name but got {} fields", parts.len()),
            });
        };
        if vm_name.is_empty() || ip.is_empty() {
            return Err(DiscoverError::Inventory {
                line: i + 1,
                reason: "vm_name and ip must not be empty".to_string(),
            });
        }

        servers.push(ServerEntry {
            vm_name: vm_name.to_string(),
            ip: ip.to_string(),
            dns_name: dns_name.to_string(),
        });
    }

    Ok(servers)
}

pub async fn load_inventory(path: &Path) -> Result<Vec<ServerEntry>> {
    let text = tokio::fs::read_to_string(path).await?;
    let servers = parse_inventory(&text)?;
    tracing::info!(path = %path.display(), servers = servers.len(), "Loaded inventory");
    Ok(servers)
}
