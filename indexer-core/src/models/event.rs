//! Decoded protocol events and their chain coordinates.

use super::record::RecordKey;
use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Address = H160;

/// An ERC-20 style transfer emitted by one of the tracked token contracts.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// The token contract that emitted the event. Both the staked and the
    /// wrapped token emit transfers; which balance field changes depends on
    /// this address.
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
}

/// A reward distribution by the rewards pool. `amount_staked` carries the
/// pool's total staked amount at the time of the distribution.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeRewards {
    pub sender: Address,
    pub amount_staked: U256,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdraw {
    pub account: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChanged {
    pub previous_admin: Address,
    pub new_admin: Address,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconUpgraded {
    pub beacon: Address,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgraded {
    pub implementation: Address,
}

/// The payload of any event this crate knows how to fold into aggregates.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum EventData {
    Transfer(Transfer),
    Approval(Approval),
    DistributeRewards(DistributeRewards),
    Withdraw(Withdraw),
    AdminChanged(AdminChanged),
    BeaconUpgraded(BeaconUpgraded),
    Upgraded(Upgraded),
}

impl EventData {
    /// All kind labels in declaration order, for initializing labelled metrics.
    pub const KINDS: &'static [&'static str] = &[
        "transfer",
        "approval",
        "distribute_rewards",
        "withdraw",
        "admin_changed",
        "beacon_upgraded",
        "upgraded",
    ];

    /// The label used for this payload's kind in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transfer(_) => "transfer",
            Self::Approval(_) => "approval",
            Self::DistributeRewards(_) => "distribute_rewards",
            Self::Withdraw(_) => "withdraw",
            Self::AdminChanged(_) => "admin_changed",
            Self::BeaconUpgraded(_) => "beacon_upgraded",
            Self::Upgraded(_) => "upgraded",
        }
    }
}

/// Chain coordinates of an emitted event.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: H256,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl EventMetadata {
    pub fn ordinal(&self) -> EventOrdinal {
        EventOrdinal {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            block_number: self.block_number,
            block_timestamp: self.block_timestamp,
            transaction_hash: self.transaction_hash,
        }
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey::derive(self.transaction_hash, self.log_index)
    }
}

/// The position of an event in the total chain order. The derived `Ord`
/// compares block number first, then transaction index, then log index.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct EventOrdinal {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl fmt::Display for EventOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.block_number, self.transaction_index, self.log_index
        )
    }
}

/// The coordinates stamped onto aggregates when an event touches them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: H256,
}

/// A decoded event together with the coordinates it was emitted at.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedEvent {
    pub data: EventData,
    pub meta: EventMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordinal(block_number: u64, transaction_index: u64, log_index: u64) -> EventOrdinal {
        EventOrdinal {
            block_number,
            transaction_index,
            log_index,
        }
    }

    #[test]
    fn ordinals_sort_by_block_then_transaction_then_log() {
        assert!(ordinal(1, 7, 7) < ordinal(2, 0, 0));
        assert!(ordinal(2, 1, 5) < ordinal(2, 2, 0));
        assert!(ordinal(2, 2, 3) < ordinal(2, 2, 4));
        assert_eq!(ordinal(3, 1, 1), ordinal(3, 1, 1));
    }

    #[test]
    fn ordinal_display() {
        assert_eq!(ordinal(12, 0, 3).to_string(), "12:0:3");
    }

    #[test]
    fn kind_labels_cover_all_variants() {
        let samples = vec![
            EventData::Transfer(Transfer::default()),
            EventData::Approval(Approval::default()),
            EventData::DistributeRewards(DistributeRewards::default()),
            EventData::Withdraw(Withdraw::default()),
            EventData::AdminChanged(AdminChanged::default()),
            EventData::BeaconUpgraded(BeaconUpgraded::default()),
            EventData::Upgraded(Upgraded::default()),
        ];
        let labels = samples.iter().map(EventData::kind).collect::<Vec<_>>();
        assert_eq!(labels, EventData::KINDS);
    }

    #[test]
    fn decoded_event_from_json() {
        let json = r#"{
            "data": {
                "Transfer": {
                    "token": "0x000000000000000000000000000000000000000a",
                    "from": "0x0000000000000000000000000000000000000001",
                    "to": "0x0000000000000000000000000000000000000002",
                    "value": "0x64"
                }
            },
            "meta": {
                "blockNumber": 5,
                "blockTimestamp": 1600000000,
                "transactionHash": "0x4242424242424242424242424242424242424242424242424242424242424242",
                "transactionIndex": 1,
                "logIndex": 2
            }
        }"#;
        let event: DecodedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.data,
            EventData::Transfer(Transfer {
                token: Address::from_low_u64_be(10),
                from: Address::from_low_u64_be(1),
                to: Address::from_low_u64_be(2),
                value: 100.into(),
            })
        );
        assert_eq!(event.meta.ordinal(), ordinal(5, 1, 2));
        assert_eq!(event.meta.provenance().block_timestamp, 1600000000);
    }
}
