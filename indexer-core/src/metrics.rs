//! Prometheus counters tracking what the sequencer did to each event and
//! batch.

use crate::models::{EventData, Warning};
use crate::sequencer::{ApplyResult, Disposition};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::Arc;

pub struct SequencerMetrics {
    events: IntCounterVec,
    warnings: IntCounterVec,
    batches: IntCounterVec,
}

impl SequencerMetrics {
    const BATCH_OUTCOMES: &'static [&'static str] = &["completed", "failed", "rejected"];

    pub fn new(registry: Arc<Registry>) -> Self {
        let event_opts = Opts::new("indexer_events", "number of events by kind and outcome");
        let events = IntCounterVec::new(event_opts, &["kind", "outcome"]).unwrap();
        for kind in EventData::KINDS {
            for outcome in Disposition::OUTCOMES {
                events.with_label_values(&[kind, outcome]).inc_by(0);
            }
        }
        registry.register(Box::new(events.clone())).unwrap();

        let warning_opts = Opts::new(
            "indexer_event_warnings",
            "number of soft failures flagged on event records by reason",
        );
        let warnings = IntCounterVec::new(warning_opts, &["reason"]).unwrap();
        for reason in Warning::REASONS {
            warnings.with_label_values(&[reason]).inc_by(0);
        }
        registry.register(Box::new(warnings.clone())).unwrap();

        let batch_opts = Opts::new("indexer_batches", "number of batches by outcome");
        let batches = IntCounterVec::new(batch_opts, &["outcome"]).unwrap();
        for outcome in Self::BATCH_OUTCOMES {
            batches.with_label_values(&[outcome]).inc_by(0);
        }
        registry.register(Box::new(batches.clone())).unwrap();

        Self {
            events,
            warnings,
            batches,
        }
    }

    pub fn event_processed(&self, kind: &str, disposition: &Disposition) {
        self.events
            .with_label_values(&[kind, disposition.outcome()])
            .inc();
        if let Disposition::Applied { warnings } = disposition {
            for warning in warnings {
                self.warnings.with_label_values(&[warning.reason()]).inc();
            }
        }
    }

    pub fn batch_processed(&self, result: &ApplyResult) {
        let outcome = if result.is_complete() {
            "completed"
        } else {
            "failed"
        };
        self.batches.with_label_values(&[outcome]).inc();
    }

    /// A batch that never reached the application phase because validation
    /// rejected it.
    pub fn batch_rejected(&self) {
        self.batches.with_label_values(&["rejected"]).inc();
    }
}

#[cfg(test)]
impl Default for SequencerMetrics {
    fn default() -> Self {
        Self::new(Arc::new(Registry::new()))
    }
}
