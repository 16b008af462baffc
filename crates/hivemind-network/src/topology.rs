//! Live service-node/swarm topology, refreshed from periodic or block-triggered
//! polls of the Oxen daemon.

use std::collections::{HashMap, HashSet};

use hivemind_core::{Account, ServiceNode, Swarm, NO_SWARM};

/// One `(x25519_pubkey, host, port, swarm_id)` tuple as reported by the daemon, prior to
/// filtering the `NO_SWARM` sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawNodeEntry {
    pub x25519_pubkey: [u8; 32],
    pub host: String,
    pub port: u16,
    pub swarm_id: u64,
}

/// Side effects a caller must carry out after a [`SwarmTopology::refresh`]: connections to
/// open/close, and which accounts need a swarm re-placement pass.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub swarms_changed: bool,
    pub to_connect: Vec<ServiceNode>,
    pub to_disconnect: Vec<ServiceNode>,
}

pub struct SwarmTopology {
    nodes: HashMap<[u8; 32], ServiceNode>,
    swarms: HashMap<u64, Swarm>,
    swarm_ids: Vec<u64>,
    pub block_hash: Option<String>,
    pub block_height: Option<u64>,
}

impl Default for SwarmTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmTopology {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            swarms: HashMap::new(),
            swarm_ids: Vec::new(),
            block_hash: None,
            block_height: None,
        }
    }

    pub fn swarm_ids(&self) -> &[u64] {
        &self.swarm_ids
    }

    pub fn node(&self, pubkey: &[u8; 32]) -> Option<&ServiceNode> {
        self.nodes.get(pubkey)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ServiceNode> {
        self.nodes.values()
    }

    pub fn swarm_members(&self, swarm_id: u64) -> Option<&HashSet<[u8; 32]>> {
        self.swarms.get(&swarm_id).map(|s| &s.members)
    }

    /// Applies a daemon refresh: computes which nodes newly appeared, moved (different
    /// address/swarm), or disappeared, and whether the sorted swarm id list changed.
    ///
    /// On success the daemon's block hash/height should be recorded by the caller. A failed
    /// poll must leave this topology untouched, so callers should not call `refresh` at all
    /// when a poll fails.
    pub fn refresh(&mut self, entries: &[RawNodeEntry]) -> RefreshOutcome {
        let mut new_nodes: HashMap<[u8; 32], ServiceNode> = HashMap::new();
        let mut swarm_id_set: HashSet<u64> = HashSet::new();

        for entry in entries {
            if entry.swarm_id == NO_SWARM {
                continue;
            }
            swarm_id_set.insert(entry.swarm_id);
            new_nodes.insert(
                entry.x25519_pubkey,
                ServiceNode {
                    x25519_pubkey: entry.x25519_pubkey,
                    host: entry.host.clone(),
                    port: entry.port,
                    swarm_id: entry.swarm_id,
                },
            );
        }

        let mut new_swarm_ids: Vec<u64> = swarm_id_set.into_iter().collect();
        new_swarm_ids.sort_unstable();
        let swarms_changed = new_swarm_ids != self.swarm_ids;

        let mut to_connect = Vec::new();
        let mut to_disconnect = Vec::new();

        for (pubkey, new_node) in &new_nodes {
            match self.nodes.get(pubkey) {
                None => to_connect.push(new_node.clone()),
                Some(old_node) => {
                    if old_node.host != new_node.host
                        || old_node.port != new_node.port
                        || old_node.swarm_id != new_node.swarm_id
                    {
                        to_disconnect.push(old_node.clone());
                        to_connect.push(new_node.clone());
                    }
                }
            }
        }
        for (pubkey, old_node) in &self.nodes {
            if !new_nodes.contains_key(pubkey) {
                to_disconnect.push(old_node.clone());
            }
        }

        let mut swarms: HashMap<u64, Swarm> = HashMap::new();
        for node in new_nodes.values() {
            swarms
                .entry(node.swarm_id)
                .or_insert_with(|| Swarm::new(node.swarm_id))
                .members
                .insert(node.x25519_pubkey);
        }

        self.nodes = new_nodes;
        self.swarms = swarms;
        self.swarm_ids = new_swarm_ids;

        RefreshOutcome { swarms_changed, to_connect, to_disconnect }
    }

    /// Re-places every given account against the current swarm id list, returning the ids of
    /// accounts whose swarm assignment changed.
    pub fn rebalance_accounts<'a>(&self, accounts: impl Iterator<Item = &'a mut Account>) -> Vec<[u8; 33]> {
        let mut moved = Vec::new();
        if self.swarm_ids.is_empty() {
            return moved;
        }
        for account in accounts {
            if account.update_swarm(&self.swarm_ids) {
                moved.push(*account.id());
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pubkey: u8, host: &str, port: u16, swarm_id: u64) -> RawNodeEntry {
        RawNodeEntry { x25519_pubkey: [pubkey; 32], host: host.into(), port, swarm_id }
    }

    #[test]
    fn refresh_detects_new_moved_and_removed_nodes() {
        let mut topo = SwarmTopology::new();
        let outcome = topo.refresh(&[entry(1, "a", 1, 10), entry(2, "b", 2, 20)]);
        assert!(outcome.swarms_changed);
        assert_eq!(outcome.to_connect.len(), 2);
        assert!(outcome.to_disconnect.is_empty());

        // node 1 moves to a new address; node 2 vanishes; node 3 appears.
        let outcome2 = topo.refresh(&[entry(1, "a2", 1, 10), entry(3, "c", 3, 30)]);
        assert!(outcome2.swarms_changed); // swarm 20 gone, swarm 30 new
        assert_eq!(outcome2.to_connect.len(), 2); // moved node 1, new node 3
        assert_eq!(outcome2.to_disconnect.len(), 2); // old node 1 address, removed node 2
    }

    #[test]
    fn no_swarm_sentinel_is_filtered_out() {
        let mut topo = SwarmTopology::new();
        topo.refresh(&[entry(1, "a", 1, NO_SWARM)]);
        assert!(topo.swarm_ids().is_empty());
        assert!(topo.node(&[1u8; 32]).is_none());
    }

    #[test]
    fn unchanged_topology_reports_no_swarm_change() {
        let mut topo = SwarmTopology::new();
        topo.refresh(&[entry(1, "a", 1, 10)]);
        let outcome = topo.refresh(&[entry(1, "a", 1, 10)]);
        assert!(!outcome.swarms_changed);
        assert!(outcome.to_connect.is_empty());
        assert!(outcome.to_disconnect.is_empty());
    }
}
