use xid_consensus::{CheckpointError, ConsensusParams, UpgradeManager};

use crate::checkpoints::{Checkpoints, CheckpointsFileError};

#[derive(Debug)]
pub enum ContextError {
    Rules(CheckpointError),
    Checkpoints(CheckpointsFileError),
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Rules(err) => write!(f, "invalid rule tables: {err}"),
            ContextError::Checkpoints(err) => write!(f, "invalid checkpoints: {err}"),
        }
    }
}

impl std::error::Error for ContextError {}

impl From<CheckpointError> for ContextError {
    fn from(err: CheckpointError) -> Self {
        ContextError::Rules(err)
    }
}

impl From<CheckpointsFileError> for ContextError {
    fn from(err: CheckpointsFileError) -> Self {
        ContextError::Checkpoints(err)
    }
}

/// Everything consensus code consults besides the chain itself.
#[derive(Clone, Debug)]
pub struct ChainContext {
    pub params: ConsensusParams,
    pub upgrades: UpgradeManager,
    pub checkpoints: Checkpoints,
}

impl ChainContext {
    /// Validates the rule tables once and loads the built-in checkpoints.
    pub fn new(params: ConsensusParams) -> Result<Self, ContextError> {
        params.validate()?;
        let checkpoints = Checkpoints::from_builtin(&params.checkpoints)?;
        Ok(Self {
            upgrades: params.upgrade_manager(),
            params,
            checkpoints,
        })
    }

    pub fn with_checkpoints(mut self, checkpoints: Checkpoints) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn block_version(&self, index: u32) -> u8 {
        self.upgrades.block_version(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xid_consensus::rules::{CheckpointTable, DustCheckpoint};
    use xid_consensus::{consensus_params, Network};

    #[test]
    fn rejects_broken_tables() {
        let mut params = consensus_params(Network::Localnet);
        params.rules.dust = CheckpointTable::new(
            "dust",
            vec![DustCheckpoint {
                index: 0,
                version: 9,
                dust: 10,
            }],
        );
        assert!(matches!(
            ChainContext::new(params),
            Err(ContextError::Rules(_))
        ));
    }
}
