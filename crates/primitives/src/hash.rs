//! Hash oracle used for identities and merkle roots.
//!
//! Every identity hash in the chain goes through `fast_hash`. The concrete
//! digest is SHA-256; callers only rely on the fixed 32-byte output.

use sha2::{Digest, Sha256};
use xid_consensus::Hash256;

pub const NULL_HASH: Hash256 = [0u8; 32];

pub fn fast_hash(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn fast_hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Merkle root where the leaves that do not fit a power of two are folded
/// pairwise first. One leaf is its own root; an empty list has no root.
pub fn tree_hash(hashes: &[Hash256]) -> Option<Hash256> {
    match hashes.len() {
        0 => None,
        1 => Some(hashes[0]),
        2 => Some(fast_hash_pair(&hashes[0], &hashes[1])),
        count => {
            let mut width = 1usize;
            while width * 2 < count {
                width *= 2;
            }
            let carried = 2 * width - count;
            let mut level: Vec<Hash256> = Vec::with_capacity(width);
            level.extend_from_slice(&hashes[..carried]);
            for pair in hashes[carried..].chunks_exact(2) {
                level.push(fast_hash_pair(&pair[0], &pair[1]));
            }
            while level.len() > 2 {
                level = level
                    .chunks_exact(2)
                    .map(|pair| fast_hash_pair(&pair[0], &pair[1]))
                    .collect();
            }
            Some(fast_hash_pair(&level[0], &level[1]))
        }
    }
}
