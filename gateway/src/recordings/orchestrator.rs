use super::catalog::{CatalogMutation, RecordingCatalog};
use super::{Recording, RecordingFilter, RecordingState};
use crate::calls::{MEETING_ID, PUBLISH, RECORD_ID, STATE};
use crate::document::{Element, MESSAGE, MESSAGE_KEY};
use crate::errors::ApiError;
use crate::params::Params;
use std::sync::Arc;

pub const META_PREFIX: &str = "meta_";

const RECORDINGS: &str = "recordings";

/// Metadata changes requested through `meta_<key>` parameters.
#[derive(Debug, Default, PartialEq)]
pub struct MetadataChanges {
    pub upserts: Vec<(String, String)>,
    pub removals: Vec<String>,
}

impl MetadataChanges {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// Metadata keys become element names in listings, so they are limited to
/// `[a-z_][a-z0-9_.-]*`.
pub fn is_metadata_key(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.')
        }),
        _ => false,
    }
}

/// Splits `meta_<key>` parameters into upserts (non-blank value) and
/// removals (blank value). Keys are lower-cased with the prefix stripped;
/// keys that are not valid element names are ignored.
pub fn partition_metadata(params: &Params) -> MetadataChanges {
    let mut changes = MetadataChanges::default();
    for (key, value) in params.iter() {
        let key = key.to_lowercase();
        let Some(name) = key.strip_prefix(META_PREFIX) else {
            continue;
        };
        if !is_metadata_key(name) {
            if !name.is_empty() {
                tracing::debug!(key = name, "Ignoring invalid metadata key");
            }
            continue;
        }
        if value.trim().is_empty() {
            changes.removals.push(name.to_string());
        } else {
            changes.upserts.push((name.to_string(), value.to_string()));
        }
    }
    changes
}

pub struct RecordingOrchestrator {
    catalog: Arc<dyn RecordingCatalog>,
}

impl RecordingOrchestrator {
    pub fn new(catalog: Arc<dyn RecordingCatalog>) -> Self {
        RecordingOrchestrator { catalog }
    }

    pub async fn list(&self, params: &Params) -> Result<Element, ApiError> {
        let states = match params.list(STATE) {
            requested if requested.is_empty() => {
                vec![RecordingState::Published, RecordingState::Unpublished]
            }
            requested if requested.iter().any(|s| s.eq_ignore_ascii_case("any")) => Vec::new(),
            requested => {
                let parsed: Vec<_> = requested
                    .iter()
                    .filter_map(|s| RecordingState::parse(s))
                    .collect();
                // Only unknown states were asked for, nothing can match
                if parsed.is_empty() {
                    return Ok(no_recordings());
                }
                parsed
            }
        };
        let filter = RecordingFilter {
            record_ids: params.list(RECORD_ID),
            meeting_ids: params.list(MEETING_ID),
            states,
        };

        let recordings = self.catalog.find(&filter).await.map_err(internal)?;
        if recordings.is_empty() {
            return Ok(no_recordings());
        }

        let mut list = Element::new(RECORDINGS);
        for recording in &recordings {
            list.push(render(recording));
        }
        Ok(Element::success().child_element(list))
    }

    /// Sets the publication flag of the listed recordings that are in a
    /// publishable state. Fails if none are.
    pub async fn publish(&self, params: &Params) -> Result<Element, ApiError> {
        let record_ids = record_ids(params)?;
        let published = params
            .get_nonblank(PUBLISH)
            .ok_or(ApiError::MissingParameter(PUBLISH))?
            .trim()
            .eq_ignore_ascii_case("true");

        let mutation = CatalogMutation::SetPublished {
            filter: RecordingFilter {
                record_ids,
                states: vec![RecordingState::Published, RecordingState::Unpublished],
                ..Default::default()
            },
            published,
        };
        let updated = self.catalog.apply(&mutation).await.map_err(internal)?;
        if updated == 0 {
            return Err(ApiError::RecordingNotFound);
        }

        tracing::info!(count = updated, published, "Changed recording publication");
        Ok(Element::success()
            .child_element(Element::with_text("published", published.to_string())))
    }

    /// Applies `meta_<key>` upserts then removals to the listed recordings.
    /// Unknown record identifiers are not an error.
    pub async fn update_metadata(&self, params: &Params) -> Result<Element, ApiError> {
        let record_ids = record_ids(params)?;
        let changes = partition_metadata(params);
        let updated = !changes.is_empty();

        if updated {
            let mutation = CatalogMutation::UpdateMetadata {
                filter: RecordingFilter {
                    record_ids,
                    ..Default::default()
                },
                upserts: changes.upserts,
                removals: changes.removals,
            };
            let count = self.catalog.apply(&mutation).await.map_err(internal)?;
            tracing::debug!(count, "Updated recording metadata");
        }

        Ok(Element::success()
            .child_element(Element::with_text("updated", updated.to_string())))
    }
}

fn record_ids(params: &Params) -> Result<Vec<String>, ApiError> {
    let ids = params.list(RECORD_ID);
    if ids.is_empty() {
        return Err(ApiError::MissingParameter(RECORD_ID));
    }
    Ok(ids)
}

fn no_recordings() -> Element {
    Element::success()
        .child_element(Element::new(RECORDINGS))
        .child_element(Element::with_text(MESSAGE_KEY, "noRecordings"))
        .child_element(Element::with_text(
            MESSAGE,
            "There are no recordings for the meeting(s).",
        ))
}

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError::Internal(e.to_string())
}

fn render(recording: &Recording) -> Element {
    let mut metadata = Element::new("metadata");
    for (key, value) in recording.metadata.iter().filter(|(k, _)| is_metadata_key(k)) {
        metadata.push(Element::with_text(key.as_str(), value.as_str()));
    }

    let mut playback = Element::new("playback");
    for format in &recording.playback_formats {
        playback.push(
            Element::new("format")
                .child_element(Element::with_text("type", format.format.as_str()))
                .child_element(Element::with_text("url", format.url.as_str()))
                .child_element(Element::with_text("length", format.length.to_string())),
        );
    }

    Element::new("recording")
        .child_element(Element::with_text("recordID", recording.record_id.as_str()))
        .child_element(Element::with_text("meetingID", recording.meeting_id.as_str()))
        .child_element(Element::with_text("name", recording.name.as_str()))
        .child_element(Element::with_text("published", recording.published.to_string()))
        .child_element(Element::with_text("state", recording.state.as_str()))
        .child_element(Element::with_text("startTime", recording.start_time.to_string()))
        .child_element(Element::with_text("endTime", recording.end_time.to_string()))
        .child_element(metadata)
        .child_element(playback)
}
