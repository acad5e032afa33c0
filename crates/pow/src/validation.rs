use primitive_types::U256;
use xid_consensus::Hash256;
use xid_primitives::block::BlockTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    ZeroDifficulty,
    HashMismatch,
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::ZeroDifficulty => write!(f, "difficulty must be positive"),
            PowError::HashMismatch => write!(f, "pow hash does not meet difficulty"),
        }
    }
}

impl std::error::Error for PowError {}

/// Proof-of-work hash oracle.
pub trait PowHasher: Send + Sync {
    fn pow_hash(&self, template: &BlockTemplate) -> Hash256;
}

/// Blake2b-256 over the block hashing blob.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake2bPowHasher;

impl PowHasher for Blake2bPowHasher {
    fn pow_hash(&self, template: &BlockTemplate) -> Hash256 {
        let hash = blake2b_simd::Params::new()
            .hash_length(32)
            .personal(b"xi-block-pow\0\0\0\0")
            .hash(&template.hashing_blob());
        let mut out = [0u8; 32];
        out.copy_from_slice(hash.as_bytes());
        out
    }
}

/// True when `hash * difficulty` fits in 256 bits, reading the hash as a
/// little-endian integer.
pub fn check_hash(hash: &Hash256, difficulty: u64) -> bool {
    let value = U256::from_little_endian(hash);
    let (_, overflow) = value.overflowing_mul(U256::from(difficulty));
    !overflow
}

pub fn validate_pow(
    hasher: &dyn PowHasher,
    template: &BlockTemplate,
    difficulty: u64,
) -> Result<Hash256, PowError> {
    if difficulty == 0 {
        return Err(PowError::ZeroDifficulty);
    }
    let hash = hasher.pow_hash(template);
    if !check_hash(&hash, difficulty) {
        return Err(PowError::HashMismatch);
    }
    Ok(hash)
}
