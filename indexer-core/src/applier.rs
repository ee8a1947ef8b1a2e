//! Per-event transitions over the aggregates. Each application loads the
//! current snapshots through the store, folds exactly one event and returns
//! the resulting write set; committing it is the sequencer's job.

use crate::models::{
    AccountAggregate, Address, BalanceField, DecodedEvent, DistributeRewards, EventData,
    EventMetadata, EventRecord, Transfer, Warning, Withdraw,
};
use crate::reader::{read_with_timeout, ExternalReader, ReadKind, Reverted};
use crate::store::{AggregateStore, StoreError, Transition};
use std::sync::Arc;
use std::time::Duration;

arg_enum! {
    /// The account field a withdrawal debits. The deployed contracts are
    /// inconsistent about which balance a withdrawal leaves from, so this is
    /// operator configuration rather than a constant.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum WithdrawalTarget {
        Balance,
        Rewards,
    }
}

impl WithdrawalTarget {
    fn field(self) -> BalanceField {
        match self {
            Self::Balance => BalanceField::Balance,
            Self::Rewards => BalanceField::RewardsAccumulated,
        }
    }
}

impl Default for WithdrawalTarget {
    fn default() -> Self {
        Self::Rewards
    }
}

/// Deployment parameters of the applier. Token addresses are supplied by the
/// operator, never compiled in.
#[derive(Clone, Debug)]
pub struct ApplierConfig {
    /// The staked token contract. Its transfers move the `balance` field.
    pub staked_token: Address,
    /// The wrapped token contract. Its transfers move the
    /// `wrappedTokenBalance` field.
    pub wrapped_token: Address,
    pub withdrawal_target: WithdrawalTarget,
    /// Bound on each external read. A read that misses it counts as reverted.
    pub read_timeout: Duration,
}

/// Folds decoded events into aggregate snapshots. The applier holds no state
/// between invocations; every transition reads the current snapshots, applies
/// one event and hands the write set back untouched by any store write.
pub struct EventApplier {
    config: ApplierConfig,
    reader: Option<Arc<dyn ExternalReader>>,
}

impl EventApplier {
    /// Creates an applier. Without a reader every checkpoint refresh becomes
    /// a no-op and events fold from their payloads alone.
    pub fn new(config: ApplierConfig, reader: Option<Arc<dyn ExternalReader>>) -> Self {
        Self { config, reader }
    }

    /// Computes the write set for one event.
    pub async fn apply(
        &self,
        store: &dyn AggregateStore,
        event: &DecodedEvent,
    ) -> Result<Transition, StoreError> {
        let mut transition = Transition::new(EventRecord::new(event));
        match &event.data {
            EventData::Transfer(transfer) => {
                self.apply_transfer(store, transfer, &event.meta, &mut transition)
                    .await?
            }
            EventData::DistributeRewards(distribution) => {
                self.apply_distribution(store, distribution, &event.meta, &mut transition)
                    .await?
            }
            EventData::Withdraw(withdraw) => {
                self.apply_withdraw(store, withdraw, &event.meta, &mut transition)
                    .await?
            }
            EventData::AdminChanged(admin_change) => {
                // Best effort refresh of the incoming admin's balance. If it
                // cannot be read the event is still recorded.
                self.refresh(
                    store,
                    &mut transition,
                    admin_change.new_admin,
                    ReadKind::BalanceOf,
                    BalanceField::Balance,
                    &event.meta,
                )
                .await?
            }
            // Approvals and proxy upgrade notices change no aggregate.
            EventData::Approval(_) | EventData::BeaconUpgraded(_) | EventData::Upgraded(_) => {}
        }
        Ok(transition)
    }

    async fn apply_transfer(
        &self,
        store: &dyn AggregateStore,
        transfer: &Transfer,
        meta: &EventMetadata,
        transition: &mut Transition,
    ) -> Result<(), StoreError> {
        let field = match transfer.token {
            token if token == self.config.staked_token => BalanceField::Balance,
            token if token == self.config.wrapped_token => BalanceField::WrappedTokenBalance,
            token => {
                transition.warn(Warning::UnknownToken { token });
                return Ok(());
            }
        };

        let provenance = meta.provenance();
        if transfer.from == transfer.to {
            // A self transfer nets out to zero. Only the provenance stamp
            // changes, and no underflow can be triggered by it.
            if !transfer.from.is_zero() {
                let mut account = store.account_or_default(transfer.from)?;
                account.touch(provenance);
                transition.stage_account(account);
            }
        } else {
            // The zero address marks a mint or burn; only the real side of
            // such a transfer holds a balance.
            if !transfer.from.is_zero() {
                let mut from = store.account_or_default(transfer.from)?;
                if let Some(warning) = from.debit(field, transfer.value) {
                    transition.warn(warning);
                }
                from.touch(provenance);
                transition.stage_account(from);
            }
            if !transfer.to.is_zero() {
                let mut to = store.account_or_default(transfer.to)?;
                to.credit(field, transfer.value);
                to.touch(provenance);
                transition.stage_account(to);
            }
        }

        if field == BalanceField::WrappedTokenBalance {
            // Wrapped transfers shift the share distribution as well.
            let mut participants = vec![transfer.from, transfer.to];
            participants.dedup();
            for account in participants {
                if !account.is_zero() {
                    self.refresh(
                        store,
                        transition,
                        account,
                        ReadKind::SharesOf,
                        BalanceField::Shares,
                        meta,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_distribution(
        &self,
        store: &dyn AggregateStore,
        distribution: &DistributeRewards,
        meta: &EventMetadata,
        transition: &mut Transition,
    ) -> Result<(), StoreError> {
        let provenance = meta.provenance();

        let mut sender = store.account_or_default(distribution.sender)?;
        sender.credit(BalanceField::RewardsAccumulated, distribution.amount);
        sender.touch(provenance);
        transition.stage_account(sender);

        let mut protocol = store.protocol_or_default()?;
        protocol.apply_distribution(distribution.amount, distribution.amount_staked, provenance);
        transition.protocol = Some(protocol);

        for &(kind, field) in &[
            (ReadKind::UserRewards, BalanceField::WrappedRewards),
            (
                ReadKind::WithdrawableRewards,
                BalanceField::WithdrawableRewards,
            ),
            (
                ReadKind::WithdrawableRewardsWrapped,
                BalanceField::WithdrawableRewardsWrapped,
            ),
            (ReadKind::RewardPerTokenPaid, BalanceField::RewardPerTokenPaid),
        ] {
            self.refresh(store, transition, distribution.sender, kind, field, meta)
                .await?;
        }
        Ok(())
    }

    async fn apply_withdraw(
        &self,
        store: &dyn AggregateStore,
        withdraw: &Withdraw,
        meta: &EventMetadata,
        transition: &mut Transition,
    ) -> Result<(), StoreError> {
        let mut account = store.account_or_default(withdraw.account)?;
        if let Some(warning) = account.debit(self.config.withdrawal_target.field(), withdraw.amount)
        {
            transition.warn(warning);
        }
        account.touch(meta.provenance());
        transition.stage_account(account);

        for &(kind, field) in &[
            (
                ReadKind::WithdrawableRewards,
                BalanceField::WithdrawableRewards,
            ),
            (
                ReadKind::WithdrawableRewardsWrapped,
                BalanceField::WithdrawableRewardsWrapped,
            ),
        ] {
            self.refresh(store, transition, withdraw.account, kind, field, meta)
                .await?;
        }
        Ok(())
    }

    /// Refreshes one checkpoint field from an external read. A revert or
    /// timeout leaves the field at its previous value and flags the record;
    /// without a configured reader this does nothing at all.
    async fn refresh(
        &self,
        store: &dyn AggregateStore,
        transition: &mut Transition,
        account: Address,
        kind: ReadKind,
        field: BalanceField,
        meta: &EventMetadata,
    ) -> Result<(), StoreError> {
        let reader = match &self.reader {
            Some(reader) => reader,
            None => return Ok(()),
        };
        let result = read_with_timeout(
            reader.as_ref(),
            kind,
            account,
            meta.block_number,
            self.config.read_timeout,
        )
        .await;
        match result {
            Ok(value) => {
                let mut aggregate = self.current_account(store, transition, account)?;
                aggregate.set(field, value);
                aggregate.touch(meta.provenance());
                transition.stage_account(aggregate);
            }
            Err(Reverted) => transition.warn(Warning::ReadReverted { kind, account }),
        }
        Ok(())
    }

    /// The working snapshot of an account: the one already staged by this
    /// event if there is one, otherwise the stored one.
    fn current_account(
        &self,
        store: &dyn AggregateStore,
        transition: &Transition,
        account: Address,
    ) -> Result<AccountAggregate, StoreError> {
        match transition.staged_account(account) {
            Some(staged) => Ok(staged.clone()),
            None => store.account_or_default(account),
        }
    }
}
