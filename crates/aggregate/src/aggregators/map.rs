use std::fs;
use std::path::PathBuf;

use archivist_core::{ArchiveId, Record};
use serde_json::{json, Value};

use crate::aggregator::{Aggregator, AggregatorKind, Snapshot};
use crate::error::AggregateError;

const FILE_NAME: &str = "map.geojson";

/// Collects geotagged records into a GeoJSON feature collection.
pub struct MapAggregator {
    archive: ArchiveId,
    artifacts_dir: PathBuf,
    features: Vec<Value>,
}

impl MapAggregator {
    pub fn new(archive: ArchiveId, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive,
            artifacts_dir: artifacts_dir.into(),
            features: Vec::new(),
        }
    }

    pub fn points(&self) -> usize {
        self.features.len()
    }
}

impl Aggregator for MapAggregator {
    fn kind(&self) -> AggregatorKind {
        AggregatorKind::Map
    }

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError> {
        if let Some((lon, lat)) = record.coordinates() {
            self.features.push(json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {
                    "id": record.id(),
                    "author": record.author(),
                    "created_at": record.created_at_raw(),
                },
            }));
        }
        Ok(())
    }

    /// Rewrites the whole collection each time.
    fn generate(&mut self) -> Result<Snapshot, AggregateError> {
        let relative = PathBuf::from(self.archive.to_string()).join(FILE_NAME);
        let path = self.artifacts_dir.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let collection = json!({
            "type": "FeatureCollection",
            "features": self.features,
        });
        let tmp = path.with_extension("geojson.tmp");
        fs::write(&tmp, serde_json::to_vec(&collection)?)?;
        fs::rename(&tmp, &path)?;

        Ok(Snapshot::Artifact(relative))
    }
}
