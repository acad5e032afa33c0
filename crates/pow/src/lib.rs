//! Difficulty retargeting and proof-of-work checks.

pub mod difficulty;
pub mod validation;

pub use difficulty::{lwma2, lwma3, next_difficulty, DifficultyError};
pub use validation::{check_hash, validate_pow, Blake2bPowHasher, PowError, PowHasher};
