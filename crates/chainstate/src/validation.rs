//! Block acceptance pipeline.
//!
//! Stages run in order against a [`ChainView`] whose top block is the parent
//! of the candidate. The first failing stage rejects the block with a
//! [`BlockValidationError`] code; a block that passes every stage comes back
//! as a [`PushedBlock`] ready for the cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use xid_consensus::rules::{FEATURE_MERGE_MINING, FEATURE_UPGRADE_VOTING};
use xid_consensus::{block_reward, BlockValidationError, EligibleIndex, Hash256, RewardError};
use xid_pow::{next_difficulty, validate_pow, Blake2bPowHasher, PowHasher};
use xid_primitives::block::{BlockFeatures, BlockTemplate};
use xid_primitives::encoding::DecodeError;
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{PublicKey, Transaction};

use crate::cache::{CacheError, ChainView, PushedBlock};
use crate::checkpoints::Checkpoints;
use crate::context::ChainContext;
use crate::genesis::static_reward_transaction;
use crate::transaction::{check_semantics, TransactionError, TransactionValidator};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ValidationStage {
    Received,
    StructurallyChecked,
    VersionChecked,
    TimestampChecked,
    DifficultyChecked,
    TransactionsResolved,
    RewardChecked,
    Accepted,
}

impl ValidationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStage::Received => "received",
            ValidationStage::StructurallyChecked => "structurally_checked",
            ValidationStage::VersionChecked => "version_checked",
            ValidationStage::TimestampChecked => "timestamp_checked",
            ValidationStage::DifficultyChecked => "difficulty_checked",
            ValidationStage::TransactionsResolved => "transactions_resolved",
            ValidationStage::RewardChecked => "reward_checked",
            ValidationStage::Accepted => "accepted",
        }
    }
}

/// Last stage a rejected block reached and why it went no further.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidationReport {
    pub stage: ValidationStage,
    pub error: BlockValidationError,
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {}", self.error, self.stage.as_str())
    }
}

#[derive(Debug)]
pub enum ValidationError {
    Rejected(ValidationReport),
    Decode(DecodeError),
    Cache(CacheError),
}

impl ValidationError {
    pub fn rejection(&self) -> Option<BlockValidationError> {
        match self {
            ValidationError::Rejected(report) => Some(report.error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Rejected(report) => write!(f, "{report}"),
            ValidationError::Decode(err) => write!(f, "undecodable block template: {err}"),
            ValidationError::Cache(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<CacheError> for ValidationError {
    fn from(err: CacheError) -> Self {
        ValidationError::Cache(err)
    }
}

/// Ring signature oracle.
pub trait SignatureVerifier: Send + Sync {
    /// `rings` holds the public keys of every input's referenced outputs.
    fn verify(&self, transaction: &Transaction, rings: &[Vec<PublicKey>]) -> bool;
}

/// Accepts any full signature collection that has one signature per ring
/// member. The curve arithmetic itself is delegated elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralSignatureVerifier;

impl SignatureVerifier for StructuralSignatureVerifier {
    fn verify(&self, transaction: &Transaction, rings: &[Vec<PublicKey>]) -> bool {
        !transaction.signatures.is_pruned()
            && transaction.signatures_consistent()
            && rings.len() == transaction.key_inputs().count()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ValidationFlags {
    pub check_pow: bool,
    pub check_signatures: bool,
}

impl Default for ValidationFlags {
    fn default() -> Self {
        Self {
            check_pow: true,
            check_signatures: true,
        }
    }
}

pub struct BlockValidator {
    context: Arc<ChainContext>,
    hasher: Arc<dyn PowHasher>,
    verifier: Arc<dyn SignatureVerifier>,
    flags: ValidationFlags,
}

impl BlockValidator {
    pub fn new(context: Arc<ChainContext>) -> Self {
        Self {
            context,
            hasher: Arc::new(Blake2bPowHasher),
            verifier: Arc::new(StructuralSignatureVerifier),
            flags: ValidationFlags::default(),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PowHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_flags(mut self, flags: ValidationFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn context(&self) -> &ChainContext {
        &self.context
    }

    /// Runs every stage for `raw` on top of `view`. `now` is the local
    /// adjusted time in unix seconds.
    pub fn validate(
        &self,
        view: &dyn ChainView,
        raw: &RawBlock,
        now: u64,
    ) -> Result<PushedBlock, ValidationError> {
        self.validate_with(view, raw, now, &self.context.checkpoints)
    }

    /// [`validate`](Self::validate) against `checkpoints` instead of the
    /// context's. Ring signatures are not verified inside the checkpoint
    /// zone.
    pub fn validate_with(
        &self,
        view: &dyn ChainView,
        raw: &RawBlock,
        now: u64,
        checkpoints: &Checkpoints,
    ) -> Result<PushedBlock, ValidationError> {
        let template = raw.template().map_err(ValidationError::Decode)?;
        let mut run = Run {
            context: &self.context,
            checkpoints,
            view,
            stage: ValidationStage::Received,
        };

        let structure = run.structure(&template, raw)?;
        run.stage = ValidationStage::StructurallyChecked;

        run.version(&template, structure.index)?;
        run.stage = ValidationStage::VersionChecked;

        run.timestamp(&template, now)?;
        run.stage = ValidationStage::TimestampChecked;

        let difficulty = run.difficulty(&template, structure.index, |template, difficulty| {
            !self.flags.check_pow || validate_pow(self.hasher.as_ref(), template, difficulty).is_ok()
        })?;
        run.stage = ValidationStage::DifficultyChecked;

        let verify = self.flags.check_signatures
            && !checkpoints.is_in_checkpoint_zone(structure.index);
        let verifier = verify.then(|| &*self.verifier);
        let fees = run.transactions(&template, structure.index, &structure.listed, verifier)?;
        run.stage = ValidationStage::TransactionsResolved;

        let (static_reward, generated_coins) =
            run.reward(&template, structure.index, structure.blob_size, fees)?;
        run.stage = ValidationStage::RewardChecked;

        let mut transactions = Vec::with_capacity(structure.listed.len() + 2);
        transactions.push(template.base_transaction.clone());
        transactions.extend(static_reward);
        transactions.extend(structure.listed);
        xid_log::log_trace!(
            "block {} accepted at difficulty {difficulty}",
            structure.index
        );
        Ok(PushedBlock {
            template,
            transactions,
            raw_block: raw.clone(),
            block_difficulty: difficulty,
            blob_size: structure.blob_size,
            generated_coins,
        })
    }
}

struct Structure {
    index: u32,
    blob_size: u64,
    /// Listed transactions in template order.
    listed: Vec<Transaction>,
}

struct Run<'a> {
    context: &'a ChainContext,
    checkpoints: &'a Checkpoints,
    view: &'a dyn ChainView,
    stage: ValidationStage,
}

impl Run<'_> {
    fn reject(&self, error: BlockValidationError) -> ValidationError {
        xid_log::log_debug!("block rejected after {}: {}", self.stage.as_str(), error.name());
        ValidationError::Rejected(ValidationReport {
            stage: self.stage,
            error,
        })
    }

    fn rejected_transaction(&self, err: TransactionError) -> ValidationError {
        match err {
            TransactionError::Rejected(reason) => {
                xid_log::log_debug!("listed transaction rejected: {reason}");
                self.reject(reason.block_error())
            }
            TransactionError::Cache(err) => err.into(),
        }
    }

    fn structure(&self, template: &BlockTemplate, raw: &RawBlock) -> Result<Structure, ValidationError> {
        let params = &self.context.params;
        let parent = self.view.top_block_info()?;
        let parent_hash = parent.map(|info| info.hash).unwrap_or_default();
        if template.header.previous_block_hash != parent_hash {
            return Err(CacheError::ParentMismatch {
                expected: parent_hash,
                found: template.header.previous_block_hash,
            }
            .into());
        }
        let index = self.view.top_block_index().map_or(0, |top| top + 1);

        let blob_size = raw.blob_size();
        if blob_size > params.max_block_blob_size {
            return Err(self.reject(BlockValidationError::CumulativeBlockSizeTooBig));
        }
        let version = self.context.block_version(index);
        let median = size_median(self.context, self.view, version)?;
        if blob_size > median.saturating_mul(2) {
            return Err(self.reject(BlockValidationError::CumulativeBlockSizeTooBig));
        }

        let base = &template.base_transaction;
        if template.block_index() != Some(index)
            || base.prefix.unlock_time
                != u64::from(index) + u64::from(params.mined_money_unlock_window)
        {
            return Err(self.reject(BlockValidationError::TransactionInconsistency));
        }

        let mut seen = HashSet::with_capacity(template.transaction_hashes.len());
        if !template.transaction_hashes.iter().all(|hash| seen.insert(*hash)) {
            return Err(self.reject(BlockValidationError::TransactionDuplicates));
        }

        let max_transaction_size = params.max_transaction_size_for(version);
        let mut supplied: HashMap<Hash256, Transaction> = HashMap::with_capacity(raw.transactions.len());
        for bytes in &raw.transactions {
            let transaction = Transaction::from_bytes(bytes)
                .map_err(|_| self.reject(BlockValidationError::TransactionInconsistency))?;
            check_semantics(&transaction, bytes.len() as u64, max_transaction_size)
                .map_err(|reason| self.rejected_transaction(reason.into()))?;
            supplied.insert(transaction.hash(), transaction);
        }

        let mut listed = Vec::with_capacity(template.transaction_hashes.len());
        for hash in &template.transaction_hashes {
            match supplied.remove(hash) {
                Some(transaction) => listed.push(transaction),
                None => return Err(self.reject(BlockValidationError::TransactionAbsent)),
            }
        }
        if !supplied.is_empty() || raw.transactions.len() != listed.len() {
            return Err(self.reject(BlockValidationError::TransactionInconsistency));
        }

        Ok(Structure {
            index,
            blob_size,
            listed,
        })
    }

    fn version(&self, template: &BlockTemplate, index: u32) -> Result<(), ValidationError> {
        let expected = self.context.block_version(index);
        let header = &template.header;
        if header.major_version != expected {
            return Err(self.reject(BlockValidationError::WrongVersion));
        }

        let allowed = self.context.params.rules.block_versions.features(expected);
        if let Some(vote) = template.upgrade_vote {
            let next = self.context.upgrades.next_version(expected);
            if allowed & FEATURE_UPGRADE_VOTING == 0 || (vote != expected && Some(vote) != next) {
                return Err(self.reject(BlockValidationError::WrongUpgradeVote));
            }
        }
        if header.features.contains(BlockFeatures::MERGE_MINING)
            && allowed & FEATURE_MERGE_MINING == 0
        {
            return Err(self.reject(BlockValidationError::MergeMiningTagDisabled));
        }
        Ok(())
    }

    fn timestamp(&self, template: &BlockTemplate, now: u64) -> Result<(), ValidationError> {
        let time = &self.context.params.rules.time;
        let version = template.header.major_version;
        let timestamp = template.header.timestamp;
        if timestamp > now.saturating_add(time.future_time_limit(version)) {
            return Err(self.reject(BlockValidationError::TimestampTooFarInFuture));
        }

        let window = time.past_window_size(version) as usize;
        let timestamps = self.view.last_timestamps(window)?;
        if window > 0 && timestamps.len() == window && timestamp < median(timestamps) {
            return Err(self.reject(BlockValidationError::TimestampTooFarInPast));
        }
        Ok(())
    }

    fn difficulty(
        &self,
        template: &BlockTemplate,
        index: u32,
        proof_of_work: impl Fn(&BlockTemplate, u64) -> bool,
    ) -> Result<u64, ValidationError> {
        let params = &self.context.params;
        let version = template.header.major_version;
        let samples = params.rules.difficulty.window_size(version) as usize + 1;
        let timestamps = self.view.last_timestamps(samples)?;
        let cumulative = self.view.last_cumulative_difficulties(samples)?;
        let difficulty = next_difficulty(
            &params.rules.difficulty,
            version,
            &timestamps,
            &cumulative,
            params.block_time,
        )
        .map_err(|err| {
            xid_log::log_warn!("difficulty for block {index} unavailable: {err}");
            self.reject(BlockValidationError::DifficultyOverhead)
        })?;
        if difficulty == 0 {
            return Err(self.reject(BlockValidationError::DifficultyOverhead));
        }

        let checkpoints = self.checkpoints;
        if checkpoints.is_in_checkpoint_zone(index) {
            if !checkpoints.check_block(index, &template.hash()) {
                return Err(self.reject(BlockValidationError::CheckpointBlockHashMismatch));
            }
        } else if !proof_of_work(template, difficulty) {
            return Err(self.reject(BlockValidationError::ProofOfWorkTooWeak));
        }
        Ok(difficulty)
    }

    /// Resolves every key input against the chain and returns the fee total.
    fn transactions(
        &self,
        template: &BlockTemplate,
        index: u32,
        listed: &[Transaction],
        verifier: Option<&dyn SignatureVerifier>,
    ) -> Result<u64, ValidationError> {
        let current = EligibleIndex::new(index, template.header.timestamp);
        let mut validator = TransactionValidator::new(self.context, self.view);
        if let Some(verifier) = verifier {
            validator = validator.with_verifier(verifier);
        }
        let mut fees = 0u64;
        for transaction in listed {
            let fee = validator
                .check_inputs(transaction, &current)
                .map_err(|err| self.rejected_transaction(err))?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| self.reject(BlockValidationError::TransactionInconsistency))?;
        }
        Ok(fees)
    }

    /// Checks the static reward commitment and the miner payout. Returns the
    /// static reward transaction and the block's emission change.
    fn reward(
        &self,
        template: &BlockTemplate,
        index: u32,
        blob_size: u64,
        fees: u64,
    ) -> Result<(Option<Transaction>, i64), ValidationError> {
        let params = &self.context.params;
        let version = template.header.major_version;

        let expected = static_reward_transaction(params, version, index);
        match (&expected, template.static_reward_hash) {
            (Some(transaction), Some(hash)) if transaction.hash() == hash => {}
            (Some(_), _) => return Err(self.reject(BlockValidationError::StaticRewardMismatch)),
            (None, Some(_)) => return Err(self.reject(BlockValidationError::UnexpectedStaticReward)),
            (None, None) => {}
        }

        let window = params.rules.miner_reward.window(version) as usize;
        let median_size = median(self.view.last_blob_sizes(window)?);
        let generated = self
            .view
            .top_block_info()?
            .map(|info| info.already_generated_coins)
            .unwrap_or(0);
        let reward = block_reward(params, version, median_size, blob_size, generated, fees)
            .map_err(|err| match err {
                RewardError::BlockTooBig { .. } => {
                    self.reject(BlockValidationError::CumulativeBlockSizeTooBig)
                }
            })?;
        if template.base_transaction.output_amount() != Some(reward.reward) {
            return Err(self.reject(BlockValidationError::BlockRewardMismatch));
        }
        Ok((expected, reward.emission_change))
    }
}

fn size_median(
    context: &ChainContext,
    view: &dyn ChainView,
    version: u8,
) -> Result<u64, CacheError> {
    let rules = &context.params.rules.miner_reward;
    let sizes = view.last_blob_sizes(rules.window(version) as usize)?;
    Ok(median(sizes).max(rules.full_reward_zone(version)))
}

/// Middle value, or the mean of the two middle values for an even count.
pub fn median(mut values: Vec<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let middle = values.len() / 2;
    if values.len() % 2 == 1 {
        values[middle]
    } else {
        let (low, high) = (values[middle - 1], values[middle]);
        low / 2 + high / 2 + (low % 2 + high % 2) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_count_is_mean_of_middle() {
        assert_eq!(median(Vec::new()), 0);
        assert_eq!(median(vec![5]), 5);
        assert_eq!(median(vec![9, 1, 5]), 5);
        assert_eq!(median(vec![4, 1, 3, 2]), 2);
        assert_eq!(median(vec![u64::MAX, u64::MAX]), u64::MAX);
    }

    #[test]
    fn stages_are_ordered() {
        assert!(ValidationStage::Received < ValidationStage::StructurallyChecked);
        assert!(ValidationStage::RewardChecked < ValidationStage::Accepted);
        assert_eq!(ValidationStage::TimestampChecked.as_str(), "timestamp_checked");
    }
}
