use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::{TraceId, root_span};
use corelib::SettingsProvider;
use tracing::{Instrument, info, warn};

use crate::store::{MarketStateStore, PruneStats};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub store: PruneStats,
    /// `None` when the settings cleanup failed.
    pub purged_suppressions: Option<u64>,
}

/// Bounds memory: drops market state past the retention horizon and lets the
/// settings backend clear expired suppressions.
pub struct Pruner {
    store: MarketStateStore,
    settings: Arc<dyn SettingsProvider>,
    retention: Duration,
}

impl Pruner {
    /// `retention` must exceed any analysis window or references get pruned
    /// out from under the pass.
    pub fn new(
        store: MarketStateStore,
        settings: Arc<dyn SettingsProvider>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            settings,
            retention,
        }
    }

    pub async fn run_pass(&self, now: DateTime<Utc>) -> PruneReport {
        let span = root_span("prune_pass", &TraceId::new());
        self.prune(now).instrument(span).await
    }

    async fn prune(&self, now: DateTime<Utc>) -> PruneReport {
        let store = self.store.prune_older_than(self.retention, now);

        let purged_suppressions = match self.settings.purge_expired(now).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "suppression cleanup failed");
                None
            }
        };

        info!(
            samples = store.samples_removed,
            accumulators = store.accumulators_removed,
            symbols = store.symbols_removed,
            suppressions = ?purged_suppressions,
            remaining = self.store.len(),
            "prune pass complete"
        );

        PruneReport {
            store,
            purged_suppressions,
        }
    }
}
