//! The aggregate store contract and the write set committed through it.

pub mod memory;

pub use self::memory::MemoryStore;

use crate::models::{
    AccountAggregate, Address, EventOrdinal, EventRecord, ProtocolAggregate, RecordKey, Warning,
};
use thiserror::Error;

/// A failure of the store itself. Unlike soft failures these abort the event
/// being applied, and with it the rest of the batch.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding failed: {0}")]
    Codec(#[from] bincode::Error),
}

/// The complete write set of one event: every account snapshot it produced,
/// the protocol snapshot if it touched one, and the event's record. Committed
/// as a single logical operation so that a failed batch can be retried whole.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub accounts: Vec<AccountAggregate>,
    pub protocol: Option<ProtocolAggregate>,
    pub record: EventRecord,
}

impl Transition {
    pub fn new(record: EventRecord) -> Self {
        Self {
            accounts: Vec::new(),
            protocol: None,
            record,
        }
    }

    /// Stages an account snapshot, replacing any earlier snapshot of the same
    /// account.
    pub fn stage_account(&mut self, aggregate: AccountAggregate) {
        match self
            .accounts
            .iter_mut()
            .find(|staged| staged.account == aggregate.account)
        {
            Some(staged) => *staged = aggregate,
            None => self.accounts.push(aggregate),
        }
    }

    /// The staged snapshot for an account, if this write set already touched
    /// it.
    pub fn staged_account(&self, account: Address) -> Option<&AccountAggregate> {
        self.accounts.iter().find(|staged| staged.account == account)
    }

    /// Flags a soft failure on the event's record.
    pub fn warn(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.record.flag(warning);
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait AggregateStore: Send + Sync {
    fn account(&self, account: Address) -> Result<Option<AccountAggregate>, StoreError>;

    fn protocol(&self) -> Result<Option<ProtocolAggregate>, StoreError>;

    fn record(&self, key: &RecordKey) -> Result<Option<EventRecord>, StoreError>;

    /// The ordinal of the newest committed event, if any. This seeds the
    /// sequencer's watermark after a restart.
    fn last_ordinal(&self) -> Result<Option<EventOrdinal>, StoreError>;

    /// Applies one event's write set.
    fn commit(&mut self, transition: Transition) -> Result<(), StoreError>;

    /// The stored aggregate for an account, or a zeroed one if no event has
    /// touched the account yet.
    fn account_or_default(&self, account: Address) -> Result<AccountAggregate, StoreError> {
        Ok(self
            .account(account)?
            .unwrap_or_else(|| AccountAggregate::new(account)))
    }

    fn protocol_or_default(&self) -> Result<ProtocolAggregate, StoreError> {
        Ok(self.protocol()?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BalanceField, DecodedEvent, EventData, EventMetadata, Transfer};

    fn record() -> EventRecord {
        EventRecord::new(&DecodedEvent {
            data: EventData::Transfer(Transfer::default()),
            meta: EventMetadata::default(),
        })
    }

    #[test]
    fn staging_replaces_earlier_snapshots_of_the_same_account() {
        let mut transition = Transition::new(record());
        let account = Address::from_low_u64_be(1);

        let mut first = AccountAggregate::new(account);
        first.set(BalanceField::Balance, 1.into());
        transition.stage_account(first);

        let mut second = AccountAggregate::new(account);
        second.set(BalanceField::Balance, 2.into());
        transition.stage_account(second.clone());

        transition.stage_account(AccountAggregate::new(Address::from_low_u64_be(2)));

        assert_eq!(transition.accounts.len(), 2);
        assert_eq!(transition.accounts[0], second);
    }

    #[test]
    fn warnings_accumulate_on_the_record() {
        let mut transition = Transition::new(record());
        assert!(transition.record.warnings.is_empty());
        transition.warn(Warning::UnknownToken {
            token: Address::from_low_u64_be(9),
        });
        assert_eq!(transition.record.warnings.len(), 1);
    }
}
