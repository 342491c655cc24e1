//! Aggregators that distill an archive's records into snapshots.

pub mod aggregator;
pub mod aggregators;
pub mod error;
pub mod set;

pub use aggregator::{Aggregator, AggregatorKind, Snapshot};
pub use aggregators::{
    CloudAggregator, ImagesAggregator, MapAggregator, RawAggregator, SearchAggregator,
    StatisticsAggregator,
};
pub use error::AggregateError;
pub use set::{archive_artifacts_dir, artifacts_size, AggregatorSet};
