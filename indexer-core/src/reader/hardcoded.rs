//! A reader backed by fixture data instead of a node connection. Used by the
//! replayer when refresh values are supplied up front, and in tests.

use super::{ExternalReader, ReadKind, ReadResult, Reverted};
use crate::models::Address;
use anyhow::{Context, Error};
use primitive_types::U256;
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr};

/// Fixture read values for one account. A missing entry reverts, which is
/// what the backing contract calls do for accounts they do not know.
#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReads {
    pub balance_of: Option<U256>,
    pub shares_of: Option<U256>,
    pub user_rewards: Option<U256>,
    pub withdrawable_rewards: Option<U256>,
    pub withdrawable_rewards_wrapped: Option<U256>,
    pub reward_per_token_paid: Option<U256>,
}

impl AccountReads {
    fn get(&self, kind: ReadKind) -> Option<U256> {
        match kind {
            ReadKind::BalanceOf => self.balance_of,
            ReadKind::SharesOf => self.shares_of,
            ReadKind::UserRewards => self.user_rewards,
            ReadKind::WithdrawableRewards => self.withdrawable_rewards,
            ReadKind::WithdrawableRewardsWrapped => self.withdrawable_rewards_wrapped,
            ReadKind::RewardPerTokenPaid => self.reward_per_token_paid,
        }
    }
}

/// Hardcoded read values keyed by account address.
#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct HardcodedReader(HashMap<Address, AccountReads>);

#[async_trait::async_trait]
impl ExternalReader for HardcodedReader {
    /// The fixture has no notion of history, so `at_block` is ignored.
    async fn read(&self, kind: ReadKind, account: Address, _at_block: u64) -> ReadResult {
        self.0
            .get(&account)
            .and_then(|reads| reads.get(kind))
            .ok_or(Reverted)
    }
}

impl From<HashMap<Address, AccountReads>> for HardcodedReader {
    fn from(reads: HashMap<Address, AccountReads>) -> Self {
        HardcodedReader(reads)
    }
}

impl FromStr for HardcodedReader {
    type Err = Error;

    fn from_str(reader_data: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(reader_data)
            .context("failed to parse reader data from JSON string")?)
    }
}
