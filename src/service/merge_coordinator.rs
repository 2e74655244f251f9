//! Merge Coordinator
//!
//! Turns the chunk units of one upload session into a single artifact and
//! registers it with the catalog. Chunks are appended strictly in index
//! order into an output that only becomes visible on commit; chunk units are
//! released only after the commit, so any failure leaves the session intact
//! and the client can simply retry completion. Chunk 0 is released first and
//! the commit is rolled back if that fails, so a finished session can never
//! be merged a second time.

use std::io::{self, Read};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::io::AsyncReadExt;

use crate::catalog::{ArtifactDescriptor, MediaCatalog, MediaRecord, RecordId};
use crate::error::{MediaError, MediaResult};
use crate::media::{artifact_file_name, sanitize_folder, MediaKind};
use crate::service::chunk_receiver::ChunkReceiver;
use crate::service::session_lock::SessionLocks;
use crate::storage::{artifact_location, is_safe_segment, MediaStorage, OpenArtifact};

/// A JSON form field that clients send either as a string or as a plain value.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FormValue {
    Flag(bool),
    Number(serde_json::Number),
    Text(String),
}

impl FormValue {
    fn is_blank(&self) -> bool {
        matches!(self, FormValue::Text(text) if text.trim().is_empty())
    }

    fn as_positive_count(&self) -> Option<u64> {
        let count = match self {
            FormValue::Text(text) => text.trim().parse::<u64>().ok(),
            FormValue::Number(number) => number.as_u64(),
            FormValue::Flag(_) => None,
        };
        count.filter(|count| *count > 0)
    }

    fn is_true(&self) -> bool {
        match self {
            FormValue::Flag(flag) => *flag,
            FormValue::Text(text) => text.trim().eq_ignore_ascii_case("true"),
            FormValue::Number(_) => false,
        }
    }
}

/// Body of a completion request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub upload_id: Option<String>,
    pub file_name: Option<String>,
    pub total_chunks: Option<FormValue>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub is_private: Option<FormValue>,
    pub folder: Option<String>,
    pub category: Option<String>,
}

/// Validated completion parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub token: String,
    pub declared_name: String,
    pub total_chunks: u64,
    pub title: String,
    pub kind: MediaKind,
    pub is_private: bool,
    pub folder: String,
    pub category: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CompletionRequest {
    /// Check every field before any I/O happens
    pub fn validate(self, default_folder: &str) -> MediaResult<CompletionParams> {
        let upload_id = present(self.upload_id);
        let file_name = present(self.file_name);
        let total_chunks = self.total_chunks.filter(|value| !value.is_blank());

        let (upload_id, file_name, total_chunks) = match (upload_id, file_name, total_chunks) {
            (Some(upload_id), Some(file_name), Some(total_chunks)) => (upload_id, file_name, total_chunks),
            (upload_id, file_name, total_chunks) => {
                let mut missing = Vec::new();
                if upload_id.is_none() {
                    missing.push("uploadId");
                }
                if file_name.is_none() {
                    missing.push("fileName");
                }
                if total_chunks.is_none() {
                    missing.push("totalChunks");
                }
                return Err(MediaError::MissingParameters(missing.join(", ")));
            }
        };

        let token = ChunkReceiver::validate_token(Some(&upload_id))?;
        let total_chunks = total_chunks.as_positive_count().ok_or_else(|| {
            MediaError::InvalidParameter("totalChunks must be a positive integer".to_string())
        })?;

        Ok(CompletionParams {
            token,
            kind: MediaKind::resolve(self.media_type.as_deref(), &file_name),
            title: present(self.title).unwrap_or_else(|| file_name.clone()),
            is_private: self.is_private.map(|value| value.is_true()).unwrap_or(false),
            folder: sanitize_folder(self.folder.as_deref(), default_folder),
            category: present(self.category),
            declared_name: file_name,
            total_chunks,
        })
    }
}

/// Result of a successful completion
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub record_id: RecordId,
    pub record: MediaRecord,
}

/// Feeds everything read through an MD5 context.
struct DigestReader<'a> {
    inner: Box<dyn Read + Send>,
    digest: &'a mut md5::Context,
}

impl Read for DigestReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.consume(&buf[..n]);
        Ok(n)
    }
}

pub struct MergeCoordinator {
    storage: Arc<dyn MediaStorage>,
    catalog: Arc<dyn MediaCatalog>,
    locks: SessionLocks,
    default_folder: String,
}

impl MergeCoordinator {
    pub fn new(
        storage: Arc<dyn MediaStorage>,
        catalog: Arc<dyn MediaCatalog>,
        locks: SessionLocks,
        default_folder: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            catalog,
            locks,
            default_folder: default_folder.into(),
        }
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Merge the session's chunks and register the result.
    ///
    /// Only one completion per session token runs at a time. The merge runs
    /// on the blocking pool and keeps the session lock until it has finished,
    /// even if the caller stops waiting.
    pub async fn complete(&self, request: CompletionRequest) -> MediaResult<CompletedUpload> {
        let params = request.validate(&self.default_folder)?;
        let guard = self.locks.acquire(&params.token).await;
        debug!("Acquired merge lock for session {}", guard.token());

        let storage = Arc::clone(&self.storage);
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || {
            log_mdc::insert("upload", guard.token());
            let result = merge_chunks(storage.as_ref(), &params)
                .and_then(|descriptor| register_descriptor(catalog.as_ref(), descriptor));
            log_mdc::remove("upload");
            drop(guard);
            result
        })
        .await?
    }

    /// Retry the catalog insert for an artifact that was merged earlier.
    ///
    /// The descriptor comes back from the client, so its size and checksum
    /// are checked against the stored bytes first.
    pub async fn register(&self, descriptor: ArtifactDescriptor) -> MediaResult<CompletedUpload> {
        let known_location = is_safe_segment(&descriptor.folder)
            && is_safe_segment(&descriptor.file_name)
            && descriptor.path == artifact_location(&descriptor.folder, &descriptor.file_name);
        if !known_location {
            return Err(MediaError::ArtifactNotFound(descriptor.path));
        }

        let storage = Arc::clone(&self.storage);
        let (folder, file_name) = (descriptor.folder.clone(), descriptor.file_name.clone());
        let artifact = tokio::task::spawn_blocking(move || storage.open_artifact(&folder, &file_name)).await??;
        verify_descriptor(&descriptor, artifact).await?;

        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || register_descriptor(catalog.as_ref(), descriptor)).await?
    }
}

async fn verify_descriptor(descriptor: &ArtifactDescriptor, artifact: OpenArtifact) -> MediaResult<()> {
    if artifact.size != descriptor.size {
        warn!(
            "Rejecting registration of {}: declared {} bytes, stored {}",
            descriptor.path, descriptor.size, artifact.size
        );
        return Err(MediaError::InvalidParameter(format!(
            "size {} does not match the stored artifact ({} bytes)",
            descriptor.size, artifact.size
        )));
    }

    let mut source = artifact.source;
    let mut digest = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| MediaError::Internal(format!("failed to read {}: {}", descriptor.path, e)))?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }

    let checksum = format!("{:x}", digest.compute());
    if !checksum.eq_ignore_ascii_case(descriptor.checksum.trim()) {
        warn!("Rejecting registration of {}: checksum mismatch", descriptor.path);
        return Err(MediaError::InvalidParameter(
            "checksum does not match the stored artifact".to_string(),
        ));
    }
    Ok(())
}

/// Append chunks 0..total in order into a fresh artifact and commit it.
/// Blocking.
pub fn merge_chunks(storage: &dyn MediaStorage, params: &CompletionParams) -> MediaResult<ArtifactDescriptor> {
    let file_name = artifact_file_name(&params.declared_name);
    info!(
        "Merging {} chunks of session {} into {}/{}",
        params.total_chunks, params.token, params.folder, file_name
    );

    // Dropping the writer on an early return discards the partial output.
    let mut writer = storage.create_artifact(&params.folder, &file_name)?;
    let mut digest = md5::Context::new();
    for index in 0..params.total_chunks {
        let chunk = match storage.open_chunk(&params.token, index)? {
            Some(chunk) => chunk,
            None => {
                warn!("Session {} is missing chunk {}", params.token, index);
                return Err(MediaError::ChunkMissing(index));
            }
        };
        let mut reader = DigestReader {
            inner: chunk,
            digest: &mut digest,
        };
        let copied = writer.append(&mut reader)?;
        debug!("Appended chunk {} ({} bytes)", index, copied);
    }
    let committed = writer.commit()?;

    if let Err(e) = storage.remove_chunk(&params.token, 0) {
        error!(
            "Failed to release chunk 0 of session {}, rolling back {}: {}",
            params.token, committed.path, e
        );
        if let Err(e) = storage.remove_artifact(&params.folder, &file_name) {
            error!("Failed to roll back {}: {}", committed.path, e);
        }
        return Err(e);
    }
    release_chunks(storage, &params.token, params.total_chunks);

    Ok(ArtifactDescriptor {
        url: format!("/stream/{}", committed.path),
        path: committed.path,
        folder: params.folder.clone(),
        file_name,
        original_name: params.declared_name.clone(),
        kind: params.kind,
        size: committed.size,
        checksum: format!("{:x}", digest.compute()),
        title: params.title.clone(),
        category: params.category.clone(),
        is_private: params.is_private,
    })
}

/// Best effort; leftovers are picked up by the sweeper.
fn release_chunks(storage: &dyn MediaStorage, token: &str, total_chunks: u64) {
    for index in 1..total_chunks {
        if let Err(e) = storage.remove_chunk(token, index) {
            warn!("Failed to remove merged chunk {} of session {}: {}", index, token, e);
        }
    }
    if let Err(e) = storage.finish_session(token) {
        warn!("Failed to clean up session {}: {}", token, e);
    }
}

/// Single catalog insert for a committed artifact. Blocking.
pub fn register_descriptor(
    catalog: &dyn MediaCatalog,
    descriptor: ArtifactDescriptor,
) -> MediaResult<CompletedUpload> {
    let record_id = match catalog.insert_artifact_record(&descriptor) {
        Ok(id) => id,
        Err(e) => {
            error!("Catalog insert failed for {}: {}", descriptor.path, e);
            return Err(MediaError::CatalogWriteFailed {
                message: e.to_string(),
                descriptor: Box::new(descriptor),
            });
        }
    };
    info!("Registered {} as media record {}", descriptor.path, record_id);

    let record = catalog
        .get_record(record_id)
        .ok()
        .flatten()
        .unwrap_or_else(|| MediaRecord::from_descriptor(record_id, &descriptor, Utc::now()));
    Ok(CompletedUpload { record_id, record })
}
