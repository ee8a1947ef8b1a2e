//! Write-once application records. A record existing for an event's key is
//! what makes replaying that event a no-op.

use super::aggregate::BalanceField;
use super::event::{Address, DecodedEvent, EventData, EventOrdinal, Provenance};
use crate::reader::ReadKind;
use byteorder::{BigEndian, ByteOrder};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The identity of one event application, derived from the emitting
/// transaction hash and the log index within that transaction's receipt.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct RecordKey(H256);

impl RecordKey {
    pub fn derive(transaction_hash: H256, log_index: u64) -> Self {
        let mut index = [0u8; 8];
        BigEndian::write_u64(&mut index, log_index);
        let mut hasher = Sha256::new();
        hasher.update(transaction_hash.as_bytes());
        hasher.update(&index);
        RecordKey(H256::from_slice(&hasher.finalize()))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// What was applied for one event: its payload, its position in the chain
/// order and any soft failures flagged while folding it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub key: RecordKey,
    pub ordinal: EventOrdinal,
    pub data: EventData,
    pub provenance: Provenance,
    pub warnings: Vec<Warning>,
}

impl EventRecord {
    pub fn new(event: &DecodedEvent) -> Self {
        Self {
            key: event.meta.record_key(),
            ordinal: event.meta.ordinal(),
            data: event.data.clone(),
            provenance: event.meta.provenance(),
            warnings: Vec::new(),
        }
    }

    pub fn flag(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }
}

/// A soft failure. These never abort event application; they are flagged on
/// the event's record and counted in metrics.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Warning {
    /// A debit asked for more than the account held; the field was clamped to
    /// zero instead of going negative.
    #[serde(rename_all = "camelCase")]
    BalanceUnderflow {
        account: Address,
        field: BalanceField,
        requested: U256,
        available: U256,
    },
    /// An external read reverted or timed out; the checkpoint field keeps its
    /// previous value.
    #[serde(rename_all = "camelCase")]
    ReadReverted { kind: ReadKind, account: Address },
    /// A transfer from a token contract that is neither the staked nor the
    /// wrapped token; only the record was written.
    #[serde(rename_all = "camelCase")]
    UnknownToken { token: Address },
}

impl Warning {
    /// All reason labels, for initializing labelled metrics.
    pub const REASONS: &'static [&'static str] =
        &["balance_underflow", "read_reverted", "unknown_token"];

    pub fn reason(&self) -> &'static str {
        match self {
            Self::BalanceUnderflow { .. } => "balance_underflow",
            Self::ReadReverted { .. } => "read_reverted",
            Self::UnknownToken { .. } => "unknown_token",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BalanceUnderflow {
                account,
                field,
                requested,
                available,
            } => write!(
                f,
                "{} underflow for {:?}: requested {} but only {} available",
                field, account, requested, available
            ),
            Self::ReadReverted { kind, account } => {
                write!(f, "{} read for {:?} reverted", kind, account)
            }
            Self::UnknownToken { token } => {
                write!(f, "transfer from untracked token {:?}", token)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventMetadata;
    use crate::models::Transfer;

    #[test]
    fn record_key_digest_is_stable() {
        let key = RecordKey::derive(H256::repeat_byte(0x42), 5);
        assert_eq!(
            key.to_string(),
            "0x56e13a9be7ab170d2a7feb037ebd74c544ce141e3221a439648b58143abd6be4",
        );
    }

    #[test]
    fn record_keys_differ_by_log_index() {
        let hash = H256::repeat_byte(0x42);
        assert_ne!(RecordKey::derive(hash, 5), RecordKey::derive(hash, 6));
    }

    #[test]
    fn record_captures_event_coordinates() {
        let event = DecodedEvent {
            data: EventData::Transfer(Transfer::default()),
            meta: EventMetadata {
                block_number: 7,
                block_timestamp: 1234,
                transaction_hash: H256::repeat_byte(0x11),
                transaction_index: 3,
                log_index: 1,
            },
        };
        let record = EventRecord::new(&event);
        assert_eq!(record.key, event.meta.record_key());
        assert_eq!(record.ordinal, event.meta.ordinal());
        assert_eq!(record.provenance, event.meta.provenance());
        assert!(record.warnings.is_empty());
    }
}
