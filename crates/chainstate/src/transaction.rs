//! Per-transaction checks shared by block validation and standalone
//! admission.
//!
//! [`check_semantics`] needs nothing but the transaction itself. The
//! [`TransactionValidator`] resolves inputs against a [`ChainView`] and
//! remembers the key images it has accepted, so one validator covers every
//! transaction of a block.

use std::collections::HashSet;

use xid_consensus::constants::MAX_RING_SIZE;
use xid_consensus::money::is_fusion_amounts;
use xid_consensus::{BlockValidationError, ConsensusParams, EligibleIndex};
use xid_primitives::transaction::{KeyImage, Transaction, TransactionInput};

use crate::cache::{CacheError, ChainView};
use crate::context::ChainContext;
use crate::validation::SignatureVerifier;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionRejection {
    TooLarge { size: u64, limit: u64 },
    EmptyInputs,
    UnexpectedBaseInput,
    ZeroAmountOutput,
    InputAmountOverflow,
    OutputAmountOverflow,
    InputsBelowOutputs,
    InvalidRingSize,
    DuplicateKeyImage,
    KeyImageSpent,
    OutputMissing,
    OutputLocked,
    InvalidSignatures,
    FeeTooLow { fee: u64, minimum: u64 },
    AlreadyInChain,
}

impl TransactionRejection {
    /// Block-level code reported when a listed transaction fails this check.
    pub fn block_error(self) -> BlockValidationError {
        match self {
            TransactionRejection::OutputMissing => BlockValidationError::TransactionAbsent,
            _ => BlockValidationError::TransactionInconsistency,
        }
    }
}

impl std::fmt::Display for TransactionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionRejection::TooLarge { size, limit } => {
                write!(f, "transaction of {size} bytes exceeds limit {limit}")
            }
            TransactionRejection::EmptyInputs => write!(f, "transaction has no inputs"),
            TransactionRejection::UnexpectedBaseInput => {
                write!(f, "base input outside a base transaction")
            }
            TransactionRejection::ZeroAmountOutput => write!(f, "output with zero amount"),
            TransactionRejection::InputAmountOverflow => write!(f, "input amounts overflow"),
            TransactionRejection::OutputAmountOverflow => write!(f, "output amounts overflow"),
            TransactionRejection::InputsBelowOutputs => write!(f, "outputs exceed inputs"),
            TransactionRejection::InvalidRingSize => write!(f, "invalid ring size"),
            TransactionRejection::DuplicateKeyImage => write!(f, "key image used twice"),
            TransactionRejection::KeyImageSpent => write!(f, "key image already spent"),
            TransactionRejection::OutputMissing => write!(f, "referenced output does not exist"),
            TransactionRejection::OutputLocked => write!(f, "referenced output is still locked"),
            TransactionRejection::InvalidSignatures => write!(f, "invalid signatures"),
            TransactionRejection::FeeTooLow { fee, minimum } => {
                write!(f, "fee {fee} is below the minimum {minimum}")
            }
            TransactionRejection::AlreadyInChain => write!(f, "transaction already in the chain"),
        }
    }
}

#[derive(Debug)]
pub enum TransactionError {
    Rejected(TransactionRejection),
    Cache(CacheError),
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionError::Rejected(reason) => write!(f, "{reason}"),
            TransactionError::Cache(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<TransactionRejection> for TransactionError {
    fn from(reason: TransactionRejection) -> Self {
        TransactionError::Rejected(reason)
    }
}

impl From<CacheError> for TransactionError {
    fn from(err: CacheError) -> Self {
        TransactionError::Cache(err)
    }
}

/// Checks a non-base transaction of `size` encoded bytes on its own.
pub fn check_semantics(
    transaction: &Transaction,
    size: u64,
    max_size: u64,
) -> Result<(), TransactionRejection> {
    if size > max_size {
        return Err(TransactionRejection::TooLarge {
            size,
            limit: max_size,
        });
    }
    if transaction.prefix.inputs.is_empty() {
        return Err(TransactionRejection::EmptyInputs);
    }
    let mut key_images = HashSet::with_capacity(transaction.prefix.inputs.len());
    for input in &transaction.prefix.inputs {
        let TransactionInput::Key(input) = input else {
            return Err(TransactionRejection::UnexpectedBaseInput);
        };
        if input.ring_size() == 0 || input.ring_size() > MAX_RING_SIZE {
            return Err(TransactionRejection::InvalidRingSize);
        }
        if !key_images.insert(input.key_image) {
            return Err(TransactionRejection::DuplicateKeyImage);
        }
    }
    if transaction.prefix.outputs.iter().any(|output| output.amount == 0) {
        return Err(TransactionRejection::ZeroAmountOutput);
    }
    let inputs = transaction
        .input_amount()
        .ok_or(TransactionRejection::InputAmountOverflow)?;
    let outputs = transaction
        .output_amount()
        .ok_or(TransactionRejection::OutputAmountOverflow)?;
    if inputs < outputs {
        return Err(TransactionRejection::InputsBelowOutputs);
    }
    Ok(())
}

/// Whether `transaction` qualifies for the zero-fee fusion exemption.
pub fn is_fusion_transaction(
    params: &ConsensusParams,
    version: u8,
    transaction: &Transaction,
    size: u64,
) -> bool {
    let inputs: Vec<u64> = transaction.key_inputs().map(|input| input.amount).collect();
    if inputs.len() != transaction.prefix.inputs.len() {
        return false;
    }
    let outputs: Vec<u64> = transaction
        .prefix
        .outputs
        .iter()
        .map(|output| output.amount)
        .collect();
    is_fusion_amounts(params, version, &inputs, &outputs, size)
}

pub struct TransactionValidator<'a> {
    context: &'a ChainContext,
    view: &'a dyn ChainView,
    verifier: Option<&'a dyn SignatureVerifier>,
    key_images: HashSet<KeyImage>,
}

impl<'a> TransactionValidator<'a> {
    /// Validator without a signature oracle; rings are resolved but not
    /// verified.
    pub fn new(context: &'a ChainContext, view: &'a dyn ChainView) -> Self {
        Self {
            context,
            view,
            verifier: None,
            key_images: HashSet::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: &'a dyn SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Resolves the inputs of a semantically checked transaction for a block
    /// at `current` and returns its fee. Key images accepted here count as
    /// spent for every later call on this validator.
    pub fn check_inputs(
        &mut self,
        transaction: &Transaction,
        current: &EligibleIndex,
    ) -> Result<u64, TransactionError> {
        if self.view.transaction_location(&transaction.hash())?.is_some() {
            return Err(TransactionRejection::AlreadyInChain.into());
        }

        let mut rings = Vec::new();
        let mut unlocks = Vec::new();
        for input in transaction.key_inputs() {
            if self.key_images.contains(&input.key_image) {
                return Err(TransactionRejection::DuplicateKeyImage.into());
            }
            if self.view.key_image_spent_at(&input.key_image)?.is_some() {
                return Err(TransactionRejection::KeyImageSpent.into());
            }
            let mut ring = Vec::with_capacity(input.ring_size());
            for global_index in input.absolute_output_indices() {
                let output = self
                    .view
                    .key_output(input.amount, global_index)?
                    .ok_or(TransactionRejection::OutputMissing)?;
                ring.push(output.public_key);
                unlocks.push(output.unlock);
            }
            rings.push(ring);
        }
        if !EligibleIndex::combine(unlocks).is_satisfied_by_index(current) {
            return Err(TransactionRejection::OutputLocked.into());
        }
        if let Some(verifier) = self.verifier {
            if !verifier.verify(transaction, &rings) {
                return Err(TransactionRejection::InvalidSignatures.into());
            }
        }
        let fee = transaction
            .fee()
            .ok_or(TransactionRejection::InputsBelowOutputs)?;
        self.key_images.extend(transaction.key_images().copied());
        Ok(fee)
    }

    /// Checks a transaction outside any block, as if it were included in
    /// the next block at `timestamp`. A fee below the configured minimum is
    /// only accepted for fusion transactions paying nothing.
    pub fn check_standalone(
        &mut self,
        transaction: &Transaction,
        size: u64,
        timestamp: u64,
    ) -> Result<u64, TransactionError> {
        let params = &self.context.params;
        let index = self.view.top_block_index().map_or(0, |top| top + 1);
        let version = self.context.block_version(index);
        check_semantics(transaction, size, params.max_transaction_size_for(version))?;
        let fee = self.check_inputs(transaction, &EligibleIndex::new(index, timestamp))?;
        if fee < params.minimum_fee
            && !(fee == 0 && is_fusion_transaction(params, version, transaction, size))
        {
            return Err(TransactionRejection::FeeTooLow {
                fee,
                minimum: params.minimum_fee,
            }
            .into());
        }
        Ok(fee)
    }
}
