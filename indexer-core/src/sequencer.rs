//! The ordering and idempotence gate in front of the applier. Batches are
//! validated as a whole before any write, then folded event by event with
//! fail-fast semantics.

use crate::applier::EventApplier;
use crate::metrics::SequencerMetrics;
use crate::models::{DecodedEvent, EventOrdinal, RecordKey, Warning};
use crate::store::{AggregateStore, StoreError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A failure that rejects the whole batch before anything is written. The
/// caller has to resynchronize with its event source before retrying.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("event at {ordinal} is not past the applied watermark {watermark}")]
    OutOfOrder {
        ordinal: EventOrdinal,
        watermark: EventOrdinal,
    },
    #[error("batch contains event {key} at {ordinal} twice")]
    DuplicateEvent {
        key: RecordKey,
        ordinal: EventOrdinal,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a single event of a batch.
#[derive(Debug)]
pub enum Disposition {
    /// Folded into the aggregates and committed.
    Applied { warnings: Vec<Warning> },
    /// A record with this key already existed, so reapplying was a no-op.
    Skipped,
    /// The store failed while applying this event; the batch stopped here.
    Failed(StoreError),
    /// Not attempted because an earlier event in the batch failed.
    Unprocessed,
}

impl Disposition {
    /// All outcome labels, for initializing labelled metrics.
    pub const OUTCOMES: &'static [&'static str] =
        &["applied", "skipped", "failed", "unprocessed"];

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
            Self::Unprocessed => "unprocessed",
        }
    }
}

#[derive(Debug)]
pub struct EventOutcome {
    pub key: RecordKey,
    pub ordinal: EventOrdinal,
    pub kind: &'static str,
    pub disposition: Disposition,
}

/// The per-event outcomes of one batch application, in batch order.
#[derive(Debug, Default)]
pub struct ApplyResult {
    pub outcomes: Vec<EventOutcome>,
}

impl ApplyResult {
    pub fn applied(&self) -> usize {
        self.count(|disposition| matches!(disposition, Disposition::Applied { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|disposition| matches!(disposition, Disposition::Skipped))
    }

    pub fn unprocessed(&self) -> usize {
        self.count(|disposition| matches!(disposition, Disposition::Unprocessed))
    }

    /// The event the batch stopped at, if it stopped.
    pub fn failure(&self) -> Option<&EventOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| matches!(outcome.disposition, Disposition::Failed(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.failure().is_none()
    }

    fn count(&self, predicate: impl Fn(&Disposition) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.disposition))
            .count()
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "applied {}, skipped {}, failed {}, unprocessed {} of {} events",
            self.applied(),
            self.skipped(),
            self.count(|disposition| matches!(disposition, Disposition::Failed(_))),
            self.unprocessed(),
            self.outcomes.len(),
        )
    }
}

/// Applies batches of decoded events to the store, in order, exactly once.
///
/// The sequencer owns the single writer position for its store's key space:
/// the watermark of the newest applied event, recovered from the store on
/// construction. Batches are checked against it as a whole first so that a
/// rejected batch leaves no partial write behind.
pub struct IngestionSequencer<S> {
    store: S,
    applier: EventApplier,
    metrics: Arc<SequencerMetrics>,
    watermark: Option<EventOrdinal>,
}

impl<S: AggregateStore> IngestionSequencer<S> {
    pub fn new(
        store: S,
        applier: EventApplier,
        metrics: Arc<SequencerMetrics>,
    ) -> Result<Self, StoreError> {
        let watermark = store.last_ordinal()?;
        if let Some(watermark) = watermark {
            log::info!("resuming from applied watermark {}", watermark);
        }
        Ok(Self {
            store,
            applier,
            metrics,
            watermark,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// The ordinal of the newest applied event.
    pub fn watermark(&self) -> Option<EventOrdinal> {
        self.watermark
    }

    /// Applies one batch. Validation runs over the whole batch first; an
    /// ordering violation or in-batch duplicate rejects the batch before any
    /// write. During application a store failure stops the batch at the
    /// failing event and reports the rest as unprocessed. Reapplying a batch
    /// is safe either way since recorded events are skipped.
    pub async fn apply(&mut self, batch: &[DecodedEvent]) -> Result<ApplyResult, SequencerError> {
        match self.try_apply(batch).await {
            Ok(result) => {
                self.metrics.batch_processed(&result);
                log::info!("batch outcome: {}", result);
                Ok(result)
            }
            Err(err) => {
                self.metrics.batch_rejected();
                Err(err)
            }
        }
    }

    async fn try_apply(&mut self, batch: &[DecodedEvent]) -> Result<ApplyResult, SequencerError> {
        let plan = self.validate(batch)?;

        let mut outcomes = Vec::with_capacity(batch.len());
        let mut stopped = false;
        for (event, skip) in batch.iter().zip(plan) {
            let disposition = if skip {
                Disposition::Skipped
            } else if stopped {
                Disposition::Unprocessed
            } else {
                match self.apply_event(event).await {
                    Ok(warnings) => Disposition::Applied { warnings },
                    Err(err) => {
                        stopped = true;
                        log::error!("batch stopped at {}: {}", event.meta.ordinal(), err);
                        Disposition::Failed(err)
                    }
                }
            };
            self.metrics.event_processed(event.data.kind(), &disposition);
            outcomes.push(EventOutcome {
                key: event.meta.record_key(),
                ordinal: event.meta.ordinal(),
                kind: event.data.kind(),
                disposition,
            });
        }
        Ok(ApplyResult { outcomes })
    }

    /// Decides for every event whether it is to be applied or skipped.
    /// Novel events must be strictly ascending and strictly past the
    /// watermark; already recorded events are exempt so that replays of
    /// applied batches stay valid.
    fn validate(&self, batch: &[DecodedEvent]) -> Result<Vec<bool>, SequencerError> {
        let mut plan = Vec::with_capacity(batch.len());
        let mut seen = HashSet::new();
        let mut cursor = self.watermark;
        for event in batch {
            let key = event.meta.record_key();
            let ordinal = event.meta.ordinal();
            if !seen.insert(key) {
                return Err(SequencerError::DuplicateEvent { key, ordinal });
            }
            if self.store.record(&key)?.is_some() {
                plan.push(true);
                continue;
            }
            match cursor {
                Some(watermark) if ordinal <= watermark => {
                    return Err(SequencerError::OutOfOrder { ordinal, watermark });
                }
                _ => cursor = Some(ordinal),
            }
            plan.push(false);
        }
        Ok(plan)
    }

    async fn apply_event(&mut self, event: &DecodedEvent) -> Result<Vec<Warning>, StoreError> {
        let transition = self.applier.apply(&self.store, event).await?;
        let warnings = transition.record.warnings.clone();
        self.store.commit(transition)?;
        let ordinal = event.meta.ordinal();
        self.watermark = self.watermark.max(Some(ordinal));
        log::debug!(
            "applied {} at {} as {}",
            event.data.kind(),
            ordinal,
            event.meta.record_key(),
        );
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::{ApplierConfig, WithdrawalTarget};
    use crate::models::{
        AccountAggregate, Address, BalanceField, DistributeRewards, EventData, EventMetadata,
        EventRecord, ProtocolAggregate, Transfer, Withdraw,
    };
    use crate::store::{MemoryStore, MockAggregateStore, Transition};
    use futures::FutureExt as _;
    use primitive_types::H256;
    use std::io;
    use std::time::Duration;

    fn sequencer<S: AggregateStore>(store: S) -> IngestionSequencer<S> {
        let applier = EventApplier::new(
            ApplierConfig {
                staked_token: Address::from_low_u64_be(0xaa),
                wrapped_token: Address::from_low_u64_be(0xbb),
                withdrawal_target: WithdrawalTarget::Rewards,
                read_timeout: Duration::from_secs(1),
            },
            None,
        );
        IngestionSequencer::new(store, applier, Arc::new(SequencerMetrics::default())).unwrap()
    }

    fn meta(block_number: u64, log_index: u64) -> EventMetadata {
        EventMetadata {
            block_number,
            block_timestamp: block_number * 12,
            transaction_hash: H256::from_low_u64_be(block_number),
            transaction_index: 0,
            log_index,
        }
    }

    fn mint(block_number: u64, log_index: u64, value: u64) -> DecodedEvent {
        DecodedEvent {
            data: EventData::Transfer(Transfer {
                token: Address::from_low_u64_be(0xaa),
                from: Address::zero(),
                to: Address::from_low_u64_be(1),
                value: value.into(),
            }),
            meta: meta(block_number, log_index),
        }
    }

    fn distribution(block_number: u64, log_index: u64, amount: u64) -> DecodedEvent {
        DecodedEvent {
            data: EventData::DistributeRewards(DistributeRewards {
                sender: Address::from_low_u64_be(1),
                amount_staked: amount.into(),
                amount: amount.into(),
            }),
            meta: meta(block_number, log_index),
        }
    }

    fn withdrawal(block_number: u64, log_index: u64, amount: u64) -> DecodedEvent {
        DecodedEvent {
            data: EventData::Withdraw(Withdraw {
                account: Address::from_low_u64_be(1),
                amount: amount.into(),
            }),
            meta: meta(block_number, log_index),
        }
    }

    fn outcomes(result: &ApplyResult) -> Vec<&'static str> {
        result
            .outcomes
            .iter()
            .map(|outcome| outcome.disposition.outcome())
            .collect()
    }

    #[test]
    fn replayed_batches_are_skipped_and_change_nothing() {
        let batch = vec![mint(10, 0, 100), distribution(10, 1, 234), withdrawal(11, 0, 50)];
        let mut sequencer = sequencer(MemoryStore::new());

        let first = sequencer.apply(&batch).now_or_never().unwrap().unwrap();
        assert_eq!(outcomes(&first), vec!["applied"; 3]);
        let snapshot = sequencer.store().clone();

        let second = sequencer.apply(&batch).now_or_never().unwrap().unwrap();
        assert_eq!(outcomes(&second), vec!["skipped"; 3]);
        assert_eq!(sequencer.store(), &snapshot);
    }

    #[test]
    fn out_of_order_batches_are_rejected_without_writes() {
        let mut sequencer = sequencer(MemoryStore::new());
        let result = sequencer
            .apply(&[mint(10, 0, 5), mint(9, 0, 5)])
            .now_or_never()
            .unwrap();

        match result {
            Err(SequencerError::OutOfOrder { ordinal, watermark }) => {
                assert_eq!(ordinal, meta(9, 0).ordinal());
                assert_eq!(watermark, meta(10, 0).ordinal());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sequencer.store(), &MemoryStore::new());
        assert_eq!(sequencer.watermark(), None);
    }

    #[test]
    fn novel_events_behind_the_watermark_are_rejected() {
        let mut sequencer = sequencer(MemoryStore::new());
        sequencer
            .apply(&[mint(10, 0, 5)])
            .now_or_never()
            .unwrap()
            .unwrap();

        let result = sequencer.apply(&[mint(9, 0, 5)]).now_or_never().unwrap();
        match result {
            Err(SequencerError::OutOfOrder { ordinal, watermark }) => {
                assert_eq!(ordinal, meta(9, 0).ordinal());
                assert_eq!(watermark, meta(10, 0).ordinal());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sequencer.store().record_count(), 1);
    }

    #[test]
    fn batches_with_duplicate_events_are_rejected() {
        let event = mint(10, 0, 5);
        let mut sequencer = sequencer(MemoryStore::new());

        let result = sequencer
            .apply(&[event.clone(), event.clone()])
            .now_or_never()
            .unwrap();

        match result {
            Err(SequencerError::DuplicateEvent { key, ordinal }) => {
                assert_eq!(key, event.meta.record_key());
                assert_eq!(ordinal, event.meta.ordinal());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sequencer.store(), &MemoryStore::new());
    }

    #[test]
    fn distributions_seed_account_and_protocol_aggregates() {
        let mut sequencer = sequencer(MemoryStore::new());
        let event = distribution(1, 0, 234);

        let result = sequencer
            .apply(&[event.clone()])
            .now_or_never()
            .unwrap()
            .unwrap();

        assert_eq!(result.applied(), 1);
        let store = sequencer.store();
        let account = store
            .account(Address::from_low_u64_be(1))
            .unwrap()
            .unwrap();
        assert_eq!(account.read(BalanceField::RewardsAccumulated), 234.into());
        let protocol = store.protocol().unwrap().unwrap();
        assert_eq!(protocol.total_rewards_distributed(), 234.into());
        assert!(store.record(&event.meta.record_key()).unwrap().is_some());
        assert_eq!(sequencer.watermark(), Some(event.meta.ordinal()));
    }

    #[test]
    fn watermark_recovers_from_the_stored_records() {
        let mut first = sequencer(MemoryStore::new());
        first
            .apply(&[mint(10, 0, 5), mint(12, 1, 6)])
            .now_or_never()
            .unwrap()
            .unwrap();
        let store = first.into_store();

        let recovered = sequencer(store);
        assert_eq!(recovered.watermark(), Some(meta(12, 1).ordinal()));
    }

    #[test]
    fn store_failures_during_validation_reject_the_batch() {
        let mut store = MockAggregateStore::new();
        store.expect_last_ordinal().return_once(|| Ok(None));
        store.expect_record().returning(|_| {
            Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "backend gone",
            )))
        });

        let mut sequencer = sequencer(store);
        let result = sequencer.apply(&[mint(10, 0, 5)]).now_or_never().unwrap();
        assert!(matches!(result, Err(SequencerError::Store(_))));
    }

    /// Delegates to a `MemoryStore` but fails one commit by index.
    struct FlakyStore {
        inner: MemoryStore,
        commits: usize,
        fail_on: Option<usize>,
    }

    impl AggregateStore for FlakyStore {
        fn account(&self, account: Address) -> Result<Option<AccountAggregate>, StoreError> {
            self.inner.account(account)
        }

        fn protocol(&self) -> Result<Option<ProtocolAggregate>, StoreError> {
            self.inner.protocol()
        }

        fn record(&self, key: &RecordKey) -> Result<Option<EventRecord>, StoreError> {
            self.inner.record(key)
        }

        fn last_ordinal(&self) -> Result<Option<EventOrdinal>, StoreError> {
            self.inner.last_ordinal()
        }

        fn commit(&mut self, transition: Transition) -> Result<(), StoreError> {
            let index = self.commits;
            self.commits += 1;
            if self.fail_on == Some(index) {
                self.fail_on = None;
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "commit rejected",
                )));
            }
            self.inner.commit(transition)
        }
    }

    #[test]
    fn failed_batches_stop_early_and_retry_cleanly() {
        let batch = vec![mint(10, 0, 5), distribution(11, 0, 100), withdrawal(12, 0, 40)];

        let mut expected = sequencer(MemoryStore::new());
        expected.apply(&batch).now_or_never().unwrap().unwrap();

        let mut sequencer = sequencer(FlakyStore {
            inner: MemoryStore::new(),
            commits: 0,
            fail_on: Some(1),
        });
        let partial = sequencer.apply(&batch).now_or_never().unwrap().unwrap();
        assert_eq!(outcomes(&partial), vec!["applied", "failed", "unprocessed"]);
        assert!(!partial.is_complete());
        assert_eq!(partial.failure().map(|failure| failure.ordinal), Some(meta(11, 0).ordinal()));
        assert_eq!(sequencer.watermark(), Some(meta(10, 0).ordinal()));
        assert_eq!(sequencer.store().inner.record_count(), 1);

        let retry = sequencer.apply(&batch).now_or_never().unwrap().unwrap();
        assert_eq!(outcomes(&retry), vec!["skipped", "applied", "applied"]);
        assert_eq!(&sequencer.store().inner, expected.store());
    }

    #[test]
    fn apply_result_summarizes_outcomes() {
        let event = mint(10, 0, 5);
        let outcome = |disposition| EventOutcome {
            key: event.meta.record_key(),
            ordinal: event.meta.ordinal(),
            kind: event.data.kind(),
            disposition,
        };
        let result = ApplyResult {
            outcomes: vec![
                outcome(Disposition::Applied { warnings: vec![] }),
                outcome(Disposition::Skipped),
                outcome(Disposition::Failed(StoreError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "gone",
                )))),
                outcome(Disposition::Unprocessed),
            ],
        };
        assert_eq!(
            result.to_string(),
            "applied 1, skipped 1, failed 1, unprocessed 1 of 4 events",
        );
        assert_eq!(result.applied(), 1);
        assert_eq!(result.skipped(), 1);
        assert_eq!(result.unprocessed(), 1);
        assert!(!result.is_complete());
    }
}
