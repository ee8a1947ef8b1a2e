//! Account and protocol aggregates and the balance arithmetic applied to them.

use super::event::{Address, Provenance};
use super::record::Warning;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The store key for an account: the 0x-prefixed lowercase hex of its
/// address.
pub fn account_key(account: Address) -> String {
    format!("0x{}", hex::encode(account))
}

/// The numeric fields tracked per account. The first two are folded from
/// transfer arithmetic, the rest are checkpoints refreshed from external
/// reads or distribution credits.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BalanceField {
    Balance,
    WrappedTokenBalance,
    Shares,
    RewardsAccumulated,
    WrappedRewards,
    WithdrawableRewards,
    WithdrawableRewardsWrapped,
    RewardPerTokenPaid,
}

impl BalanceField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::WrappedTokenBalance => "wrappedTokenBalance",
            Self::Shares => "shares",
            Self::RewardsAccumulated => "rewardsAccumulated",
            Self::WrappedRewards => "wrappedRewards",
            Self::WithdrawableRewards => "withdrawableRewards",
            Self::WithdrawableRewardsWrapped => "withdrawableRewardsWrapped",
            Self::RewardPerTokenPaid => "rewardPerTokenPaid",
        }
    }
}

impl fmt::Display for BalanceField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-account state folded from events.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAggregate {
    pub account: Address,
    balance: U256,
    wrapped_token_balance: U256,
    shares: U256,
    rewards_accumulated: U256,
    wrapped_rewards: U256,
    withdrawable_rewards: U256,
    withdrawable_rewards_wrapped: U256,
    reward_per_token_paid: U256,
    pub last_updated: Option<Provenance>,
}

impl AccountAggregate {
    /// A fresh aggregate with every field at zero, the state any account has
    /// before the first event touches it.
    pub fn new(account: Address) -> Self {
        Self {
            account,
            balance: U256::zero(),
            wrapped_token_balance: U256::zero(),
            shares: U256::zero(),
            rewards_accumulated: U256::zero(),
            wrapped_rewards: U256::zero(),
            withdrawable_rewards: U256::zero(),
            withdrawable_rewards_wrapped: U256::zero(),
            reward_per_token_paid: U256::zero(),
            last_updated: None,
        }
    }

    pub fn key(&self) -> String {
        account_key(self.account)
    }

    pub fn read(&self, field: BalanceField) -> U256 {
        *self.field(field)
    }

    pub fn set(&mut self, field: BalanceField, value: U256) {
        *self.field_mut(field) = value;
    }

    /// Adds to a field, saturating at the numeric bound.
    pub fn credit(&mut self, field: BalanceField, amount: U256) {
        log::debug!("crediting {} of {} by {}", field, self.key(), amount);
        let value = self.read(field).saturating_add(amount);
        self.set(field, value);
    }

    /// Subtracts from a field. A debit larger than the current value clamps
    /// the field to zero and reports the underflow instead of going negative.
    pub fn debit(&mut self, field: BalanceField, amount: U256) -> Option<Warning> {
        log::debug!("debiting {} of {} by {}", field, self.key(), amount);
        let available = self.read(field);
        if amount > available {
            self.set(field, U256::zero());
            Some(Warning::BalanceUnderflow {
                account: self.account,
                field,
                requested: amount,
                available,
            })
        } else {
            self.set(field, available - amount);
            None
        }
    }

    pub fn touch(&mut self, provenance: Provenance) {
        self.last_updated = Some(provenance);
    }

    fn field(&self, field: BalanceField) -> &U256 {
        match field {
            BalanceField::Balance => &self.balance,
            BalanceField::WrappedTokenBalance => &self.wrapped_token_balance,
            BalanceField::Shares => &self.shares,
            BalanceField::RewardsAccumulated => &self.rewards_accumulated,
            BalanceField::WrappedRewards => &self.wrapped_rewards,
            BalanceField::WithdrawableRewards => &self.withdrawable_rewards,
            BalanceField::WithdrawableRewardsWrapped => &self.withdrawable_rewards_wrapped,
            BalanceField::RewardPerTokenPaid => &self.reward_per_token_paid,
        }
    }

    fn field_mut(&mut self, field: BalanceField) -> &mut U256 {
        match field {
            BalanceField::Balance => &mut self.balance,
            BalanceField::WrappedTokenBalance => &mut self.wrapped_token_balance,
            BalanceField::Shares => &mut self.shares,
            BalanceField::RewardsAccumulated => &mut self.rewards_accumulated,
            BalanceField::WrappedRewards => &mut self.wrapped_rewards,
            BalanceField::WithdrawableRewards => &mut self.withdrawable_rewards,
            BalanceField::WithdrawableRewardsWrapped => &mut self.withdrawable_rewards_wrapped,
            BalanceField::RewardPerTokenPaid => &mut self.reward_per_token_paid,
        }
    }
}

/// Protocol-wide totals, a singleton aggregate.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolAggregate {
    total_rewards_distributed: U256,
    total_staked: U256,
    pub last_updated: Option<Provenance>,
}

impl ProtocolAggregate {
    pub fn total_rewards_distributed(&self) -> U256 {
        self.total_rewards_distributed
    }

    pub fn total_staked(&self) -> U256 {
        self.total_staked
    }

    /// Folds one distribution into the totals. `total_rewards_distributed`
    /// only ever grows; `total_staked` is replaced by the staked amount the
    /// pool reported with the distribution.
    pub fn apply_distribution(&mut self, amount: U256, amount_staked: U256, provenance: Provenance) {
        self.total_rewards_distributed = self.total_rewards_distributed.saturating_add(amount);
        self.total_staked = amount_staked;
        self.last_updated = Some(provenance);
    }
}
