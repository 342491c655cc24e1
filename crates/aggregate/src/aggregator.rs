use std::fmt;
use std::path::PathBuf;

use archivist_core::Record;
use serde_json::Value;

use crate::error::AggregateError;

/// The closed set of aggregators a consumption worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregatorKind {
    Raw,
    Cloud,
    Images,
    Map,
    Search,
    Statistics,
}

impl AggregatorKind {
    pub fn name(self) -> &'static str {
        match self {
            AggregatorKind::Raw => "raw",
            AggregatorKind::Cloud => "cloud",
            AggregatorKind::Images => "images",
            AggregatorKind::Map => "map",
            AggregatorKind::Search => "search",
            AggregatorKind::Statistics => "statistics",
        }
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What `generate()` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// An in-band summary stored on the archive.
    Value(Value),
    /// A file written under the artifacts directory, given relative to it.
    Artifact(PathBuf),
    /// Nothing new to write.
    Empty,
}

impl Snapshot {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Snapshot::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_artifact(self) -> Option<PathBuf> {
        match self {
            Snapshot::Artifact(p) => Some(p),
            _ => None,
        }
    }
}

/// An accumulator fed one record at a time.
///
/// `generate` may be called repeatedly; accumulators that summarise keep their
/// state across calls, accumulators that spill to disk drain their buffer.
pub trait Aggregator: Send {
    fn kind(&self) -> AggregatorKind;

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError>;

    fn generate(&mut self) -> Result<Snapshot, AggregateError>;
}
