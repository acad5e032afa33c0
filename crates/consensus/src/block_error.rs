//! Enumerated block rejection reasons.
//!
//! The numeric codes are stable: peers and sync logic key ban heuristics on
//! them, so new reasons are only ever appended.

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BlockValidationError {
    WrongVersion = 1,
    WrongUpgradeVote = 2,
    ParentBlockSizeTooBig = 3,
    ParentBlockWrongVersion = 4,
    TimestampTooFarInFuture = 5,
    TimestampTooFarInPast = 6,
    CumulativeBlockSizeTooBig = 7,
    DifficultyOverhead = 8,
    BlockRewardMismatch = 9,
    CheckpointBlockHashMismatch = 10,
    ProofOfWorkTooWeak = 11,
    TransactionAbsent = 12,
    TransactionDuplicates = 13,
    TransactionInconsistency = 14,
    UnexpectedStaticReward = 15,
    StaticRewardMismatch = 16,
    MergeMiningTagDisabled = 17,
    MergeMiningTagEmpty = 18,
    MergeMiningTagTooLarge = 19,
    MergeMiningTagInvalidType = 20,
    MergeMiningTagPruned = 21,
}

/// Code reported for a block that passed every check.
pub const VALIDATION_SUCCESS: u8 = 0;

impl BlockValidationError {
    pub const ALL: [BlockValidationError; 21] = [
        BlockValidationError::WrongVersion,
        BlockValidationError::WrongUpgradeVote,
        BlockValidationError::ParentBlockSizeTooBig,
        BlockValidationError::ParentBlockWrongVersion,
        BlockValidationError::TimestampTooFarInFuture,
        BlockValidationError::TimestampTooFarInPast,
        BlockValidationError::CumulativeBlockSizeTooBig,
        BlockValidationError::DifficultyOverhead,
        BlockValidationError::BlockRewardMismatch,
        BlockValidationError::CheckpointBlockHashMismatch,
        BlockValidationError::ProofOfWorkTooWeak,
        BlockValidationError::TransactionAbsent,
        BlockValidationError::TransactionDuplicates,
        BlockValidationError::TransactionInconsistency,
        BlockValidationError::UnexpectedStaticReward,
        BlockValidationError::StaticRewardMismatch,
        BlockValidationError::MergeMiningTagDisabled,
        BlockValidationError::MergeMiningTagEmpty,
        BlockValidationError::MergeMiningTagTooLarge,
        BlockValidationError::MergeMiningTagInvalidType,
        BlockValidationError::MergeMiningTagPruned,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|error| error.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WrongVersion => "WRONG_VERSION",
            Self::WrongUpgradeVote => "WRONG_UPGRADE_VOTE",
            Self::ParentBlockSizeTooBig => "PARENT_BLOCK_SIZE_TOO_BIG",
            Self::ParentBlockWrongVersion => "PARENT_BLOCK_WRONG_VERSION",
            Self::TimestampTooFarInFuture => "TIMESTAMP_TOO_FAR_IN_FUTURE",
            Self::TimestampTooFarInPast => "TIMESTAMP_TOO_FAR_IN_PAST",
            Self::CumulativeBlockSizeTooBig => "CUMULATIVE_BLOCK_SIZE_TOO_BIG",
            Self::DifficultyOverhead => "DIFFICULTY_OVERHEAD",
            Self::BlockRewardMismatch => "BLOCK_REWARD_MISMATCH",
            Self::CheckpointBlockHashMismatch => "CHECKPOINT_BLOCK_HASH_MISMATCH",
            Self::ProofOfWorkTooWeak => "PROOF_OF_WORK_TOO_WEAK",
            Self::TransactionAbsent => "TRANSACTION_ABSENT",
            Self::TransactionDuplicates => "TRANSACTION_DUPLICATES",
            Self::TransactionInconsistency => "TRANSACTION_INCONSISTENCY",
            Self::UnexpectedStaticReward => "UNEXPECTED_STATIC_REWARD",
            Self::StaticRewardMismatch => "STATIC_REWARD_MISMATCH",
            Self::MergeMiningTagDisabled => "MERGE_MINING_TAG_DISABLED",
            Self::MergeMiningTagEmpty => "MERGE_MINING_TAG_EMPTY",
            Self::MergeMiningTagTooLarge => "MERGE_MINING_TAG_TOO_LARGE",
            Self::MergeMiningTagInvalidType => "MERGE_MINING_TAG_INVALID_TYPE",
            Self::MergeMiningTagPruned => "MERGE_MINING_TAG_PRUNED",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::WrongVersion => "Wrong block version",
            Self::WrongUpgradeVote => "Wrong block upgrade vote",
            Self::ParentBlockSizeTooBig => "Parent block size is too big",
            Self::ParentBlockWrongVersion => "Parent block has wrong version",
            Self::TimestampTooFarInFuture => "Timestamp is too far in future",
            Self::TimestampTooFarInPast => "Timestamp is too far in past",
            Self::CumulativeBlockSizeTooBig => "Cumulative block size is too big",
            Self::DifficultyOverhead => "Block difficulty overhead occurred",
            Self::BlockRewardMismatch => "Block reward doesn't match expected reward",
            Self::CheckpointBlockHashMismatch => "Checkpoint block hash mismatch",
            Self::ProofOfWorkTooWeak => "Proof of work is too weak",
            Self::TransactionAbsent => "Block's transaction is absent",
            Self::TransactionDuplicates => "Block contains duplicated transactions",
            Self::TransactionInconsistency => {
                "Block template and raw block have inconsistent transactions"
            }
            Self::UnexpectedStaticReward => {
                "Block template contains a static reward but static rewards are disabled for the current block version"
            }
            Self::StaticRewardMismatch => {
                "Block static reward transaction hash does not match expected hash"
            }
            Self::MergeMiningTagDisabled => {
                "Block template contains a merge mining tag but merge mining is disabled"
            }
            Self::MergeMiningTagEmpty => {
                "Block template contains a merge mining tag without any hashes"
            }
            Self::MergeMiningTagTooLarge => "Block template contains too many merge mining hashes",
            Self::MergeMiningTagInvalidType => {
                "Block template contains an unknown or invalid merge mining tag type"
            }
            Self::MergeMiningTagPruned => "Block template contains a pruned merge mining tag",
        }
    }
}

impl fmt::Display for BlockValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message())
    }
}

impl std::error::Error for BlockValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_dense_and_round_trip() {
        for (position, error) in BlockValidationError::ALL.iter().enumerate() {
            assert_eq!(usize::from(error.code()), position + 1);
            assert_eq!(BlockValidationError::from_code(error.code()), Some(*error));
        }
        assert_eq!(BlockValidationError::from_code(VALIDATION_SUCCESS), None);
        assert_eq!(BlockValidationError::from_code(22), None);
    }

    #[test]
    fn display_names_the_code() {
        let text = BlockValidationError::CheckpointBlockHashMismatch.to_string();
        assert!(text.starts_with("CHECKPOINT_BLOCK_HASH_MISMATCH (10)"));
    }
}
