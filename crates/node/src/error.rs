use xid_chainstate::ChainError;
use xid_primitives::encoding::DecodeError;

#[derive(Debug)]
pub enum SyncError {
    Io(std::io::Error),
    BadMagic,
    /// Dump written by a newer or unknown format revision.
    UnsupportedVersion { found: u8, supported: u8 },
    Decode { position: u64, error: DecodeError },
    /// Dump ended before the announced block count.
    Truncated { expected: u64, read: u64 },
    /// Block `position` (0-based within the dump) was not accepted.
    Rejected { position: u64, error: ChainError },
    Orphaned { position: u64 },
    Chain(ChainError),
    EmptyRange { start: u32, top: u32 },
    EmptyBatch { start: u32 },
    /// Batch would run past the last representable block index.
    IndexOverflow { start: u32 },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Io(err) => write!(f, "dump i/o failed: {err}"),
            SyncError::BadMagic => write!(f, "not a block dump (bad magic)"),
            SyncError::UnsupportedVersion { found, supported } => write!(
                f,
                "unsupported dump version {found} (this build reads version {supported})"
            ),
            SyncError::Decode { position, error } => {
                write!(f, "dump block {position} is malformed: {error}")
            }
            SyncError::Truncated { expected, read } => {
                write!(f, "dump truncated: expected {expected} blocks, read {read}")
            }
            SyncError::Rejected { position, error } => {
                write!(f, "dump block {position} rejected: {error}")
            }
            SyncError::Orphaned { position } => {
                write!(f, "dump block {position} does not connect to the chain")
            }
            SyncError::Chain(err) => write!(f, "{err}"),
            SyncError::EmptyRange { start, top } => {
                write!(f, "export start {start} is above the chain tip {top}")
            }
            SyncError::EmptyBatch { start } => {
                write!(f, "dump batch at {start} holds no blocks")
            }
            SyncError::IndexOverflow { start } => {
                write!(f, "dump batch at {start} runs past the last block index")
            }
        }
    }
}

impl std::error::Error for SyncError {}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err)
    }
}

impl From<ChainError> for SyncError {
    fn from(err: ChainError) -> Self {
        SyncError::Chain(err)
    }
}
