//! LWMA difficulty retargeting.
//!
//! Both algorithms consume `window + 1` samples ordered oldest first and
//! return the difficulty for the block following the newest sample.

use xid_consensus::rules::{DifficultyAlgorithm, DifficultyTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    ZeroWindow,
    ZeroTimeLimit,
    InsufficientData {
        needed: usize,
        timestamps: usize,
        difficulties: usize,
    },
    DecreasingCumulativeDifficulty,
}

impl std::fmt::Display for DifficultyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifficultyError::ZeroWindow => write!(f, "difficulty window must not be empty"),
            DifficultyError::ZeroTimeLimit => write!(f, "solve time limit must be positive"),
            DifficultyError::InsufficientData {
                needed,
                timestamps,
                difficulties,
            } => write!(
                f,
                "lwma needs {needed} samples, got {timestamps} timestamps and {difficulties} cumulative difficulties"
            ),
            DifficultyError::DecreasingCumulativeDifficulty => {
                write!(f, "cumulative difficulties must not decrease")
            }
        }
    }
}

impl std::error::Error for DifficultyError {}

/// Difficulty for the block after the given samples.
///
/// Falls back to the configured initial difficulty while the chain is
/// shorter than `window_size + 1` blocks; otherwise runs the algorithm
/// selected for `version` over the trailing samples, with solve times capped
/// at the checkpoint's time limit.
pub fn next_difficulty(
    table: &DifficultyTable,
    version: u8,
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    block_time: u16,
) -> Result<u64, DifficultyError> {
    let window = table.window_size(version) as usize;
    let needed = window + 1;
    if timestamps.len() < needed || cumulative_difficulties.len() < needed {
        return Ok(table.configured_initial_value(version));
    }
    let timestamps = &timestamps[timestamps.len() - needed..];
    let cumulative_difficulties = &cumulative_difficulties[cumulative_difficulties.len() - needed..];
    let window = window as u32;
    let time_limit = table.time_limit(version);
    match table.algorithm(version) {
        DifficultyAlgorithm::Lwma2 => {
            lwma2(timestamps, cumulative_difficulties, window, block_time, time_limit)
        }
        DifficultyAlgorithm::Lwma3 => {
            lwma3(timestamps, cumulative_difficulties, window, block_time, time_limit)
        }
    }
}

/// LWMA-3: timestamps are forced monotonic, solve times capped at
/// `time_limit` seconds (`6T` on every shipped network).
pub fn lwma3(
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    window: u32,
    block_time: u16,
    time_limit: u64,
) -> Result<u64, DifficultyError> {
    let (n, work, previous) = window_work(timestamps, cumulative_difficulties, window, time_limit)?;
    let t = u128::from(block_time);
    let cap = u128::from(time_limit);

    let mut weighted: u128 = 0;
    let mut recent: u128 = 0;
    let mut last_time = timestamps[0];
    for i in 1..=n {
        let next_time = if timestamps[i] > last_time {
            timestamps[i]
        } else {
            last_time.saturating_add(1)
        };
        let solve_time = cap.min(u128::from(next_time - last_time));
        last_time = next_time;
        weighted += solve_time * i as u128;
        if i + 3 > n {
            recent += solve_time;
        }
    }

    let next = work * t * (n as u128 + 1) * 99 / (200 * weighted);
    Ok(clamp_to_previous(next, previous, recent < 9 * t / 10))
}

/// LWMA-2: signed solve times clamped to `[-4T, time_limit]`.
pub fn lwma2(
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    window: u32,
    block_time: u16,
    time_limit: u64,
) -> Result<u64, DifficultyError> {
    let (n, work, previous) = window_work(timestamps, cumulative_difficulties, window, time_limit)?;
    let t = i128::from(block_time);
    let cap = i128::from(time_limit);

    let mut weighted: i128 = 0;
    let mut recent: i128 = 0;
    for i in 1..=n {
        let solve_time = (i128::from(timestamps[i]) - i128::from(timestamps[i - 1])).clamp(-4 * t, cap);
        weighted += solve_time * i as i128;
        if i + 3 > n {
            recent += solve_time;
        }
    }

    // Non-positive weights land on the lower clamp.
    let next = if weighted > 0 {
        (work as i128 * t * (n as i128 + 1) * 99 / (200 * weighted)) as u128
    } else {
        0
    };
    Ok(clamp_to_previous(next, previous, recent < 8 * t / 10))
}

fn window_work(
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    window: u32,
    time_limit: u64,
) -> Result<(usize, u128, u128), DifficultyError> {
    if window == 0 {
        return Err(DifficultyError::ZeroWindow);
    }
    if time_limit == 0 {
        return Err(DifficultyError::ZeroTimeLimit);
    }
    let n = window as usize;
    if timestamps.len() < n + 1 || cumulative_difficulties.len() < n + 1 {
        return Err(DifficultyError::InsufficientData {
            needed: n + 1,
            timestamps: timestamps.len(),
            difficulties: cumulative_difficulties.len(),
        });
    }
    let work = cumulative_difficulties[n]
        .checked_sub(cumulative_difficulties[0])
        .ok_or(DifficultyError::DecreasingCumulativeDifficulty)?;
    let previous = cumulative_difficulties[n]
        .checked_sub(cumulative_difficulties[n - 1])
        .ok_or(DifficultyError::DecreasingCumulativeDifficulty)?;
    Ok((n, u128::from(work), u128::from(previous)))
}

fn clamp_to_previous(next: u128, previous: u128, recent_blocks_fast: bool) -> u64 {
    let lower = previous * 67 / 100;
    let upper = previous * 150 / 100;
    let mut next = lower.max(next.min(upper));
    if recent_blocks_fast {
        next = next.max(previous * 108 / 100);
    }
    u64::try_from(next).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xid_consensus::rules::{CheckpointTable, DifficultyCheckpoint};

    const T: u16 = 60;
    const N: u32 = 60;
    const LIMIT: u64 = 6 * T as u64;

    fn samples(count: usize, spacing: u64, difficulty: u64) -> (Vec<u64>, Vec<u64>) {
        let timestamps = (0..count as u64).map(|i| 1_000_000 + i * spacing).collect();
        let cumulative = (0..count as u64).map(|i| (i + 1) * difficulty).collect();
        (timestamps, cumulative)
    }

    fn table(algorithm: DifficultyAlgorithm, time_limit: u64) -> DifficultyTable {
        CheckpointTable::new(
            "difficulty",
            vec![DifficultyCheckpoint {
                index: 0,
                version: 1,
                window_size: N,
                initial_value: 12_345,
                time_limit,
                algorithm,
            }],
        )
    }

    #[test]
    fn perfect_spacing_settles_just_below_previous() {
        let (timestamps, cumulative) = samples(N as usize + 1, u64::from(T), 1_000);
        assert_eq!(lwma3(&timestamps, &cumulative, N, T, LIMIT), Ok(990));
        assert_eq!(lwma2(&timestamps, &cumulative, N, T, LIMIT), Ok(990));
    }

    #[test]
    fn fast_blocks_hit_upper_clamp() {
        let (timestamps, cumulative) = samples(N as usize + 1, 1, 1_000);
        assert_eq!(lwma3(&timestamps, &cumulative, N, T, LIMIT), Ok(1_500));
        assert_eq!(lwma2(&timestamps, &cumulative, N, T, LIMIT), Ok(1_500));
    }

    #[test]
    fn slow_blocks_hit_lower_clamp() {
        let (timestamps, cumulative) = samples(N as usize + 1, 10 * u64::from(T), 1_000);
        assert_eq!(lwma3(&timestamps, &cumulative, N, T, LIMIT), Ok(670));
        assert_eq!(lwma2(&timestamps, &cumulative, N, T, LIMIT), Ok(670));
    }

    #[test]
    fn lwma3_forces_monotonic_timestamps() {
        let (_, cumulative) = samples(N as usize + 1, 0, 1_000);
        let timestamps = vec![5_000u64; N as usize + 1];
        assert_eq!(lwma3(&timestamps, &cumulative, N, T, LIMIT), Ok(1_500));
    }

    #[test]
    fn lwma2_backwards_timestamps_land_on_lower_clamp() {
        let (_, cumulative) = samples(N as usize + 1, 0, 1_000);
        let timestamps: Vec<u64> = (0..=u64::from(N)).map(|i| 1_000_000 - i * 10).collect();
        assert_eq!(lwma2(&timestamps, &cumulative, N, T, LIMIT), Ok(1_080));
    }

    #[test]
    fn direct_call_rejects_short_input() {
        let (timestamps, cumulative) = samples(N as usize, u64::from(T), 1_000);
        assert_eq!(
            lwma3(&timestamps, &cumulative, N, T, LIMIT),
            Err(DifficultyError::InsufficientData {
                needed: N as usize + 1,
                timestamps: N as usize,
                difficulties: N as usize,
            })
        );
        assert_eq!(lwma2(&[], &[], 0, T, LIMIT), Err(DifficultyError::ZeroWindow));
    }

    #[test]
    fn decreasing_cumulative_difficulty_is_an_error() {
        let (timestamps, mut cumulative) = samples(N as usize + 1, u64::from(T), 1_000);
        cumulative.reverse();
        assert_eq!(
            lwma3(&timestamps, &cumulative, N, T, LIMIT),
            Err(DifficultyError::DecreasingCumulativeDifficulty)
        );
    }

    #[test]
    fn next_difficulty_uses_initial_value_until_window_fills() {
        let table = table(DifficultyAlgorithm::Lwma3, LIMIT);
        let (timestamps, cumulative) = samples(N as usize, u64::from(T), 1_000);
        assert_eq!(
            next_difficulty(&table, 1, &timestamps, &cumulative, T),
            Ok(12_345)
        );
    }

    #[test]
    fn next_difficulty_uses_trailing_window() {
        let table = table(DifficultyAlgorithm::Lwma2, LIMIT);
        let (mut timestamps, mut cumulative) = samples(N as usize + 1, u64::from(T), 1_000);
        // Older history with very different spacing must not matter.
        timestamps.insert(0, 0);
        cumulative.insert(0, 0);
        assert_eq!(
            next_difficulty(&table, 1, &timestamps, &cumulative, T),
            Ok(990)
        );
    }

    #[test]
    fn checkpoint_time_limit_caps_solve_times() {
        let (timestamps, cumulative) = samples(N as usize + 1, 72, 1_000);
        for algorithm in [DifficultyAlgorithm::Lwma2, DifficultyAlgorithm::Lwma3] {
            assert_eq!(
                next_difficulty(&table(algorithm, LIMIT), 1, &timestamps, &cumulative, T),
                Ok(825)
            );
            assert_eq!(
                next_difficulty(&table(algorithm, u64::from(T)), 1, &timestamps, &cumulative, T),
                Ok(990)
            );
            assert_eq!(
                next_difficulty(&table(algorithm, 0), 1, &timestamps, &cumulative, T),
                Err(DifficultyError::ZeroTimeLimit)
            );
        }
    }
}
