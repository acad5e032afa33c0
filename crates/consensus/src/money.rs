//! Monetary units, money range rules and amount decomposition.

use crate::constants::{FUSION_TX_MIN_INPUT_COUNT, FUSION_TX_MIN_IN_OUT_COUNT_RATIO};
use crate::params::ConsensusParams;

/// Atomic units. Amounts are unsigned on the wire.
pub type Amount = u64;

pub const COIN_DECIMALS: u32 = 6;
pub const COIN: Amount = 1_000_000;

/// Total emission including the genesis premine.
pub const MONEY_SUPPLY: Amount = 55_000_000 * COIN;
pub const PREMINE: Amount = 3_300_000 * COIN;

/// Smallest fee a non-fusion transaction may pay.
pub const MINIMUM_FEE: Amount = 100;

pub fn money_range(value: Amount) -> bool {
    value <= MONEY_SUPPLY
}

/// Renders `amount` with the coin's fixed decimals, e.g. `1.500000`.
pub fn format_amount(amount: Amount) -> String {
    let divisor = 10u64.pow(COIN_DECIMALS);
    format!(
        "{}.{:0width$}",
        amount / divisor,
        amount % divisor,
        width = COIN_DECIMALS as usize
    )
}

/// Splits `amount` into its non-zero decimal digits, lowest first. Low
/// digits whose running sum stays within `dust_threshold` are merged into a
/// single leading dust chunk.
pub fn decompose_amount(amount: Amount, dust_threshold: Amount) -> Vec<Amount> {
    let mut chunks = Vec::new();
    let mut remaining = amount;
    let mut order: Amount = 1;
    let mut dust: Amount = 0;
    let mut dust_emitted = false;
    while remaining != 0 {
        let chunk = (remaining % 10).saturating_mul(order);
        remaining /= 10;
        order = order.saturating_mul(10);

        if !dust_emitted && dust.saturating_add(chunk) <= dust_threshold {
            dust += chunk;
            continue;
        }
        if !dust_emitted && dust != 0 {
            chunks.push(dust);
        }
        dust_emitted = true;
        if chunk != 0 {
            chunks.push(chunk);
        }
    }
    if !dust_emitted && dust != 0 {
        chunks.push(dust);
    }
    chunks
}

/// Whether a transaction with these amounts and blob `size` only merges
/// small outputs into the canonical decomposition of its input total. Such
/// transactions may pay no fee.
pub fn is_fusion_amounts(
    params: &ConsensusParams,
    version: u8,
    inputs: &[Amount],
    outputs: &[Amount],
    size: u64,
) -> bool {
    if size > params.max_fusion_transaction_size_for(version)
        || inputs.len() < FUSION_TX_MIN_INPUT_COUNT
        || inputs.len() < outputs.len().saturating_mul(FUSION_TX_MIN_IN_OUT_COUNT_RATIO)
    {
        return false;
    }
    let dust = params.rules.fusion_dust.dust(version);
    let mut total: Amount = 0;
    for amount in inputs {
        if *amount < dust {
            return false;
        }
        total = match total.checked_add(*amount) {
            Some(total) => total,
            None => return false,
        };
    }
    let mut expected = decompose_amount(total, dust);
    expected.sort_unstable();
    let mut outputs = outputs.to_vec();
    outputs.sort_unstable();
    expected == outputs
}
