pub mod aggregate;
pub mod event;
pub mod record;

pub use self::aggregate::{account_key, AccountAggregate, BalanceField, ProtocolAggregate};
pub use self::event::{
    Address, AdminChanged, Approval, BeaconUpgraded, DecodedEvent, DistributeRewards, EventData,
    EventMetadata, EventOrdinal, Provenance, Transfer, Upgraded, Withdraw,
};
pub use self::record::{EventRecord, RecordKey, Warning};
