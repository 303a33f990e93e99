//! Recordings of finished sessions.
//!
//! Recordings are held locally in a [`RecordingCatalog`]. They are produced by
//! an external ingestion process; the gateway only lists them and mutates
//! their publication flag and metadata through the [`RecordingOrchestrator`].

pub mod catalog;
pub mod orchestrator;

pub use catalog::{CatalogError, CatalogMutation, InMemoryRecordingCatalog, RecordingCatalog};
pub use orchestrator::{MetadataChanges, RecordingOrchestrator, partition_metadata};

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Processing,
    Processed,
    Published,
    Unpublished,
    Deleted,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Processing => "processing",
            RecordingState::Processed => "processed",
            RecordingState::Published => "published",
            RecordingState::Unpublished => "unpublished",
            RecordingState::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "processing" => Some(RecordingState::Processing),
            "processed" => Some(RecordingState::Processed),
            "published" => Some(RecordingState::Published),
            "unpublished" => Some(RecordingState::Unpublished),
            "deleted" => Some(RecordingState::Deleted),
            _ => None,
        }
    }

    /// States in which the publication flag may be changed.
    pub fn is_publishable(&self) -> bool {
        matches!(self, RecordingState::Published | RecordingState::Unpublished)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PlaybackFormat {
    pub format: String,
    pub url: String,
    /// Length in minutes
    #[serde(default)]
    pub length: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Recording {
    pub record_id: String,
    pub meeting_id: String,
    #[serde(default)]
    pub name: String,
    pub state: RecordingState,
    #[serde(default)]
    pub published: bool,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub start_time: u64,
    #[serde(default)]
    pub end_time: u64,
    #[serde(default)]
    pub playback_formats: Vec<PlaybackFormat>,
    /// Keys are lower-cased
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Recording {
    pub fn new(record_id: &str, meeting_id: &str, state: RecordingState) -> Self {
        Recording {
            record_id: record_id.to_string(),
            meeting_id: meeting_id.to_string(),
            name: String::new(),
            state,
            published: state == RecordingState::Published,
            start_time: 0,
            end_time: 0,
            playback_formats: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Which recordings an operation applies to. Empty lists match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordingFilter {
    pub record_ids: Vec<String>,
    pub meeting_ids: Vec<String>,
    pub states: Vec<RecordingState>,
}

impl RecordingFilter {
    pub fn matches(&self, recording: &Recording) -> bool {
        (self.record_ids.is_empty() || self.record_ids.contains(&recording.record_id))
            && (self.meeting_ids.is_empty() || self.meeting_ids.contains(&recording.meeting_id))
            && (self.states.is_empty() || self.states.contains(&recording.state))
    }
}
