use super::{Recording, RecordingFilter, RecordingState};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("could not read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate recording: {0}")]
    DuplicateRecording(String),
}

/// A change applied to every recording matching `filter`.
#[derive(Clone, Debug, PartialEq)]
pub enum CatalogMutation {
    SetPublished {
        filter: RecordingFilter,
        published: bool,
    },
    UpdateMetadata {
        filter: RecordingFilter,
        upserts: Vec<(String, String)>,
        removals: Vec<String>,
    },
}

#[async_trait]
pub trait RecordingCatalog: Send + Sync {
    /// Matching recordings in catalog order.
    async fn find(&self, filter: &RecordingFilter) -> Result<Vec<Recording>, CatalogError>;

    /// Applies `mutation` to all matching recordings as one transaction and
    /// returns how many matched. Either every match is updated or none is.
    async fn apply(&self, mutation: &CatalogMutation) -> Result<usize, CatalogError>;
}

#[derive(Default)]
pub struct InMemoryRecordingCatalog {
    recordings: RwLock<IndexMap<String, Recording>>,
}

impl InMemoryRecordingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recordings(recordings: Vec<Recording>) -> Result<Self, CatalogError> {
        let mut map = IndexMap::with_capacity(recordings.len());
        for mut recording in recordings {
            recording.metadata = recording
                .metadata
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect();
            if map.contains_key(&recording.record_id) {
                return Err(CatalogError::DuplicateRecording(recording.record_id));
            }
            map.insert(recording.record_id.clone(), recording);
        }
        Ok(InMemoryRecordingCatalog {
            recordings: RwLock::new(map),
        })
    }

    /// Loads a JSON array of recordings.
    pub fn from_snapshot(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read(path)?;
        let recordings: Vec<Recording> = serde_json::from_slice(&contents)?;
        let catalog = Self::with_recordings(recordings)?;
        tracing::info!(
            path = %path.display(),
            count = catalog.len(),
            "Loaded recordings snapshot"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.recordings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordingCatalog for InMemoryRecordingCatalog {
    async fn find(&self, filter: &RecordingFilter) -> Result<Vec<Recording>, CatalogError> {
        Ok(self
            .recordings
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn apply(&self, mutation: &CatalogMutation) -> Result<usize, CatalogError> {
        let mut recordings = self.recordings.write();

        // Stage every change before writing any of them back
        let filter = match mutation {
            CatalogMutation::SetPublished { filter, .. } => filter,
            CatalogMutation::UpdateMetadata { filter, .. } => filter,
        };
        let staged: Vec<Recording> = recordings
            .values()
            .filter(|r| filter.matches(r))
            .map(|r| {
                let mut updated = r.clone();
                mutate(&mut updated, mutation);
                updated
            })
            .collect();

        let count = staged.len();
        for recording in staged {
            recordings.insert(recording.record_id.clone(), recording);
        }
        Ok(count)
    }
}

fn mutate(recording: &mut Recording, mutation: &CatalogMutation) {
    match mutation {
        CatalogMutation::SetPublished { published, .. } => {
            recording.published = *published;
            recording.state = if *published {
                RecordingState::Published
            } else {
                RecordingState::Unpublished
            };
        }
        CatalogMutation::UpdateMetadata {
            upserts, removals, ..
        } => {
            for (key, value) in upserts {
                recording.metadata.insert(key.clone(), value.clone());
            }
            for key in removals {
                recording.metadata.remove(key);
            }
        }
    }
}
