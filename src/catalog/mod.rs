//! Media Catalog Abstraction
//!
//! The catalog owns media records: title, privacy flag, category, folder and
//! the download counter. The upload core only needs a single atomic insert
//! of an `ArtifactDescriptor`; the read operations back the small catalog API.

pub mod mock_store;
pub mod sqlite_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MediaResult;
use crate::media::MediaKind;

/// Record identifier assigned by the catalog
pub type RecordId = i64;

/// Everything the catalog needs to register a merged artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    /// Location relative to the storage root (`folder/file_name`)
    pub path: String,
    /// URL the artifact is streamed from
    pub url: String,
    pub folder: String,
    pub file_name: String,
    /// File name declared by the client
    pub original_name: String,
    pub kind: MediaKind,
    pub size: u64,
    /// Hex MD5 of the artifact bytes
    pub checksum: String,
    pub title: String,
    pub category: Option<String>,
    pub is_private: bool,
}

/// A media record as stored in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: RecordId,
    pub title: String,
    pub url: String,
    pub path: String,
    pub folder: String,
    pub file_name: String,
    pub original_name: String,
    pub kind: MediaKind,
    pub size: u64,
    pub checksum: String,
    pub is_private: bool,
    pub category: Option<String>,
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    pub fn from_descriptor(id: RecordId, descriptor: &ArtifactDescriptor, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: descriptor.title.clone(),
            url: descriptor.url.clone(),
            path: descriptor.path.clone(),
            folder: descriptor.folder.clone(),
            file_name: descriptor.file_name.clone(),
            original_name: descriptor.original_name.clone(),
            kind: descriptor.kind,
            size: descriptor.size,
            checksum: descriptor.checksum.clone(),
            is_private: descriptor.is_private,
            category: descriptor.category.clone(),
            downloads: 0,
            created_at,
        }
    }
}

/// Trait defining the catalog interface
pub trait MediaCatalog: Send + Sync {
    /// Insert the record for a merged artifact in a single atomic write.
    /// Registering the same artifact path again returns the existing id.
    fn insert_artifact_record(&self, descriptor: &ArtifactDescriptor) -> MediaResult<RecordId>;

    /// Fetch one record
    fn get_record(&self, id: RecordId) -> MediaResult<Option<MediaRecord>>;

    /// List records, newest first, optionally restricted to one folder
    fn list_records(&self, folder: Option<&str>) -> MediaResult<Vec<MediaRecord>>;

    /// Increment the download counter and return its new value
    fn increment_downloads(&self, id: RecordId) -> MediaResult<u64>;
}

#[cfg(test)]
pub(crate) fn sample_descriptor(file_name: &str) -> ArtifactDescriptor {
    ArtifactDescriptor {
        path: format!("videos/{}", file_name),
        url: format!("/stream/videos/{}", file_name),
        folder: "videos".to_string(),
        file_name: file_name.to_string(),
        original_name: "holiday.mp4".to_string(),
        kind: MediaKind::Video,
        size: 1000,
        checksum: "00ff".to_string(),
        title: "Holiday".to_string(),
        category: Some("travel".to_string()),
        is_private: false,
    }
}
