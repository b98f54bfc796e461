//! Peer identity and advertised capabilities.

use bitflags::bitflags;
use meridian_chain::Hash;

/// Unique peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub Vec<u8>);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

bitflags! {
    /// Services a peer advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Services: u32 {
        /// Keeps headers only.
        const NANO = 0b001;
        /// Keeps a partial chain with trailing full blocks.
        const LIGHT = 0b010;
        /// Keeps the full chain.
        const FULL = 0b100;
    }
}

impl Services {
    /// Whether the peer can serve full blocks.
    pub fn provides_full_blocks(&self) -> bool {
        self.intersects(Services::LIGHT | Services::FULL)
    }

    /// Whether the peer keeps the complete history.
    pub fn is_full_node(&self) -> bool {
        self.contains(Services::FULL)
    }
}

/// What we know about the remote end of a connection.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer identifier.
    pub id: PeerId,
    /// Advertised services.
    pub services: Services,
    /// Head hash the peer claimed at handshake (updated by announcements).
    pub head_hash: Hash,
    /// Agent name.
    pub agent: Option<String>,
}

impl PeerInfo {
    /// Create peer info.
    pub fn new(id: PeerId, services: Services, head_hash: Hash) -> Self {
        Self {
            id,
            services,
            head_hash,
            agent: None,
        }
    }
}
