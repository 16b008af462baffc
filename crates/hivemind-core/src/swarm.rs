//! Swarm and service-node descriptors.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One service node ("snode") of the Oxen network.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceNode {
    /// Unique network identity key for this node.
    pub x25519_pubkey: [u8; 32],
    pub host: String,
    pub port: u16,
    pub swarm_id: u64,
}

impl ServiceNode {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A logical group of service nodes replicating a subset of accounts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Swarm {
    pub swarm_id: u64,
    pub members: HashSet<[u8; 32]>,
}

impl Swarm {
    pub fn new(swarm_id: u64) -> Self {
        Self {
            swarm_id,
            members: HashSet::new(),
        }
    }
}

/// The sentinel `swarm_id` value the Oxen daemon uses to mean "this node has no swarm yet".
pub const NO_SWARM: u64 = u64::MAX;
