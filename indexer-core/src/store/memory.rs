//! In-memory aggregate store with versioned bincode snapshot persistence.

use super::{AggregateStore, StoreError, Transition};
use crate::models::{
    account_key, AccountAggregate, Address, EventOrdinal, EventRecord, ProtocolAggregate,
    RecordKey,
};
use crate::serialization::Version;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    convert::TryFrom,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};
use typenum::U1;

/// Aggregates and records held in sorted maps. The whole store serializes as
/// one versioned bincode blob, which is how the replayer persists state
/// between runs.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemoryStore {
    version: Version<U1>,
    accounts: BTreeMap<String, AccountAggregate>,
    protocol: Option<ProtocolAggregate>,
    records: BTreeMap<String, EventRecord>,
    last_ordinal: Option<EventOrdinal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(reader: impl Read) -> Result<Self> {
        Ok(bincode::deserialize_from(reader)?)
    }

    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        // Write to tmp file until complete and then rename.
        let temp_path = path.as_ref().with_extension("temp");
        {
            let temp_file = File::create(&temp_path)
                .with_context(|| format!("couldn't create {}", temp_path.display()))?;

            let mut buffered_writer = BufWriter::new(temp_file);
            self.write_to(&mut buffered_writer)?;
            buffered_writer.flush()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl AggregateStore for MemoryStore {
    fn account(&self, account: Address) -> Result<Option<AccountAggregate>, StoreError> {
        Ok(self.accounts.get(&account_key(account)).cloned())
    }

    fn protocol(&self) -> Result<Option<ProtocolAggregate>, StoreError> {
        Ok(self.protocol.clone())
    }

    fn record(&self, key: &RecordKey) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.records.get(&key.to_string()).cloned())
    }

    fn last_ordinal(&self) -> Result<Option<EventOrdinal>, StoreError> {
        Ok(self.last_ordinal)
    }

    fn commit(&mut self, transition: Transition) -> Result<(), StoreError> {
        let Transition {
            accounts,
            protocol,
            record,
        } = transition;
        for aggregate in accounts {
            self.accounts.insert(aggregate.key(), aggregate);
        }
        if let Some(protocol) = protocol {
            self.protocol = Some(protocol);
        }
        let ordinal = record.ordinal;
        self.records.insert(record.key.to_string(), record);
        self.last_ordinal = self.last_ordinal.max(Some(ordinal));
        Ok(())
    }
}

impl TryFrom<File> for MemoryStore {
    type Error = anyhow::Error;

    fn try_from(mut file: File) -> Result<Self> {
        let buffered_reader = BufReader::new(&mut file);
        let store = MemoryStore::read(buffered_reader)
            .with_context(|| format!("Failed to read file: {:?}", file))?;

        log::info!(
            "Successfully loaded {} accounts and {} records in {} bytes from snapshot file",
            store.account_count(),
            store.record_count(),
            file.metadata()?.len(),
        );

        Ok(store)
    }
}

impl TryFrom<&Path> for MemoryStore {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("couldn't open {}", path.display()))?;
        MemoryStore::try_from(file)
    }
}
