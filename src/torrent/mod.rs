use rand::Rng;
use std::fmt;

/// Identifies a torrent by its 20-byte info hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TorrentId([u8; 20]);

impl TorrentId {
    pub fn new(info_hash: [u8; 20]) -> Self {
        Self(info_hash)
    }

    /// A random id, for swarms that are not backed by a metainfo file
    pub fn random() -> Self {
        let mut info_hash = [0u8; 20];
        rand::thread_rng().fill(&mut info_hash);
        Self(info_hash)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for TorrentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
