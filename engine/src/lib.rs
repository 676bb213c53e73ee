pub mod analysis;
pub mod errors;
pub mod ingest;
pub mod pruning;
pub mod runner;
pub mod store;

pub use analysis::{AnalysisEngine, PassReport, SkipReason, percent_change};
pub use errors::StoreError;
pub use ingest::attach_store;
pub use pruning::{DEFAULT_RETENTION, PruneReport, Pruner};
pub use runner::{spawn_analysis_loop, spawn_pruning_loop};
pub use store::{MarketStateStore, PriceSample, PruneStats, VolumeAccumulator, WindowSnapshot};
