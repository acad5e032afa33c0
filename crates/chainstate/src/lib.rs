//! Chain state: block caches, checkpoints, block validation and the chain
//! manager that reorganizes onto the heaviest branch.

pub mod cache;
pub mod chain;
pub mod checkpoints;
pub mod context;
pub mod genesis;
pub mod memory;
pub mod persistent;
pub mod transaction;
pub mod validation;

pub use cache::{
    BlockchainCache, CacheError, CachedBlockInfo, ChainView, OutputReference, ParentState,
    PushedBlock, TransactionLocation,
};
pub use chain::{AddBlockOutcome, Blockchain, ChainError, ChainTip, ChainVoteTally};
pub use checkpoints::{Checkpoints, CheckpointsFileError};
pub use context::{ChainContext, ContextError};
pub use memory::{ForkView, MemoryBlockchainCache};
pub use persistent::{check_schema_version, PersistentBlockchainCache, CURRENT_DB_SCHEME_VERSION};
pub use transaction::{
    check_semantics, is_fusion_transaction, TransactionError, TransactionRejection,
    TransactionValidator,
};
pub use validation::{
    BlockValidator, SignatureVerifier, StructuralSignatureVerifier, ValidationError,
    ValidationFlags, ValidationReport, ValidationStage,
};
