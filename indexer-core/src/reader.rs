//! Revert-tolerant reads of contract state, used to refresh checkpoint
//! fields while folding events.

pub mod hardcoded;

pub use self::hardcoded::HardcodedReader;

use crate::models::Address;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The contract views the applier refreshes checkpoint fields from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadKind {
    BalanceOf,
    SharesOf,
    UserRewards,
    WithdrawableRewards,
    WithdrawableRewardsWrapped,
    RewardPerTokenPaid,
}

impl ReadKind {
    /// The name of the contract view backing this read.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BalanceOf => "balanceOf",
            Self::SharesOf => "sharesOf",
            Self::UserRewards => "userRewards",
            Self::WithdrawableRewards => "withdrawableRewards",
            Self::WithdrawableRewardsWrapped => "withdrawableRewardsWrapped",
            Self::RewardPerTokenPaid => "userRewardPerTokenPaid",
        }
    }
}

impl fmt::Display for ReadKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The only failure an external read can produce. A revert is an expected
/// operating condition and never aborts event application.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
#[error("contract call reverted")]
pub struct Reverted;

pub type ReadResult = Result<U256, Reverted>;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ExternalReader: Send + Sync {
    /// Reads one view for an account as of the given block.
    async fn read(&self, kind: ReadKind, account: Address, at_block: u64) -> ReadResult;
}

/// Bounds a read with a deadline. A read that neither completes nor reverts
/// in time is reported as a revert.
pub async fn read_with_timeout(
    reader: &dyn ExternalReader,
    kind: ReadKind,
    account: Address,
    at_block: u64,
    deadline: Duration,
) -> ReadResult {
    match async_std::future::timeout(deadline, reader.read(kind, account, at_block)).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!(
                "{} read for {:?} at block {} timed out after {:?}",
                kind,
                account,
                at_block,
                deadline,
            );
            Err(Reverted)
        }
    }
}
