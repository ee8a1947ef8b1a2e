use anyhow::{Context, Result};
use indexer_core::applier::{ApplierConfig, EventApplier, WithdrawalTarget};
use indexer_core::logging;
use indexer_core::metrics::SequencerMetrics;
use indexer_core::models::{Address, DecodedEvent};
use indexer_core::reader::{ExternalReader, HardcodedReader};
use indexer_core::sequencer::IngestionSequencer;
use indexer_core::store::MemoryStore;
use indexer_core::util::FutureWaitExt as _;

use log::info;
use prometheus::Registry;
use std::convert::TryFrom;
use std::fs::File;
use std::io::BufReader;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "replayer",
    about = "Applies a batch of decoded chain events to an aggregate snapshot.",
    rename_all = "kebab"
)]
struct Options {
    /// The log filter to use.
    ///
    /// This follows the `slog-envlogger` syntax (e.g. 'info,replayer=debug').
    #[structopt(long, env = "INDEXER_LOG", default_value = "info")]
    log_filter: String,

    /// Path of a JSON file holding the event batch to apply, as an array of
    /// decoded events in chain order.
    #[structopt(long, env = "INDEXER_EVENTS", parse(from_os_str))]
    events: PathBuf,

    /// Use a snapshot file for persisting the aggregate store between runs.
    /// A missing file starts from an empty store; reapplying batches that are
    /// already in the snapshot is a no-op.
    #[structopt(long, env = "INDEXER_SNAPSHOT", parse(from_os_str))]
    snapshot: Option<PathBuf>,

    /// The address of the staked token contract whose transfers move account
    /// balances (hex, without 0x prefix).
    #[structopt(long, env = "INDEXER_STAKED_TOKEN")]
    staked_token: Address,

    /// The address of the wrapped token contract whose transfers move wrapped
    /// balances (hex, without 0x prefix).
    #[structopt(long, env = "INDEXER_WRAPPED_TOKEN")]
    wrapped_token: Address,

    /// The account field withdrawals are debited from, 'balance' or
    /// 'rewards'.
    #[structopt(long, env = "INDEXER_WITHDRAWAL_TARGET", default_value = "rewards")]
    withdrawal_target: WithdrawalTarget,

    /// The timeout in milliseconds of external contract reads.
    #[structopt(
        long,
        env = "INDEXER_READ_TIMEOUT",
        default_value = "10000",
        parse(try_from_str = duration_millis),
    )]
    read_timeout: Duration,

    /// JSON encoded contract read values keyed by account address. When given,
    /// checkpoint fields are refreshed from these values while applying;
    /// without it no refreshes are attempted.
    ///
    /// For example: '{
    ///   "0x000000000000000000000000000000000000000a": {
    ///     "balanceOf": "0x64",
    ///     "sharesOf": "0x32"
    ///   }
    /// }'
    #[structopt(long, env = "INDEXER_READER_DATA")]
    reader_data: Option<HardcodedReader>,
}

fn main() {
    let options = Options::from_args();
    let (_, _guard) = logging::init(&options.log_filter);
    info!("Starting replayer with runtime options: {:#?}", options);

    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(SequencerMetrics::new(registry));

    let store = match &options.snapshot {
        Some(path) if path.exists() => {
            MemoryStore::try_from(path.as_path()).expect("couldn't restore snapshot")
        }
        _ => MemoryStore::new(),
    };

    let events = read_events(&options.events).unwrap();
    info!(
        "loaded {} events from {}",
        events.len(),
        options.events.display(),
    );

    let reader = options
        .reader_data
        .map(|fixtures| Arc::new(fixtures) as Arc<dyn ExternalReader>);
    let applier = EventApplier::new(
        ApplierConfig {
            staked_token: options.staked_token,
            wrapped_token: options.wrapped_token,
            withdrawal_target: options.withdrawal_target,
            read_timeout: options.read_timeout,
        },
        reader,
    );

    let mut sequencer = IngestionSequencer::new(store, applier, metrics)
        .expect("couldn't recover the applied watermark");
    let result = sequencer.apply(&events).wait().expect("batch rejected");

    let store = sequencer.into_store();
    info!(
        "store now holds {} accounts and {} records",
        store.account_count(),
        store.record_count(),
    );
    if let Some(path) = &options.snapshot {
        store.write_to_file(path).expect("couldn't write snapshot");
        info!("wrote snapshot to {}", path.display());
    }

    if let Some(failure) = result.failure() {
        // The applied prefix is persisted, so rerunning resumes after it.
        panic!("batch stopped at event {}", failure.ordinal);
    }
}

fn read_events(path: &Path) -> Result<Vec<DecodedEvent>> {
    let file = File::open(path).with_context(|| format!("couldn't open {}", path.display()))?;
    Ok(serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("couldn't parse events in {}", path.display()))?)
}

fn duration_millis(s: &str) -> Result<Duration, ParseIntError> {
    Ok(Duration::from_millis(s.parse()?))
}
