//! Chunk ingestion: validates an incoming chunk and persists it under its
//! (session token, index) key.

use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::config::UploadConfig;
use crate::error::{MediaError, MediaResult};
use crate::storage::{is_safe_segment, MediaStorage};

/// Acknowledgement returned for a stored chunk
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedChunk {
    pub upload_id: String,
    pub chunk_index: u64,
    pub size: u64,
    /// Hex MD5 of the stored payload
    pub etag: String,
}

pub struct ChunkReceiver {
    storage: Arc<dyn MediaStorage>,
    max_chunk_size: u64,
}

impl ChunkReceiver {
    pub fn new(storage: Arc<dyn MediaStorage>, config: &UploadConfig) -> Self {
        Self {
            storage,
            max_chunk_size: config.max_chunk_size,
        }
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Check an upload token taken from the request.
    pub fn validate_token(raw: Option<&str>) -> MediaResult<String> {
        let token = raw.map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Err(MediaError::InvalidSession("uploadId is required".to_string()));
        }
        if !is_safe_segment(token) {
            return Err(MediaError::InvalidSession(format!(
                "uploadId '{}' may only contain letters, digits, '-', '_' and '.'",
                token
            )));
        }
        Ok(token.to_string())
    }

    /// Parse a chunk index; it must be a non-negative integer.
    pub fn parse_index(raw: Option<&str>) -> MediaResult<u64> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MediaError::InvalidIndex("chunkIndex is required".to_string()))?;
        raw.parse::<u64>()
            .map_err(|_| MediaError::InvalidIndex(format!("'{}' is not a non-negative integer", raw)))
    }

    /// Fails once a payload being collected grows past the configured ceiling.
    pub fn check_size(&self, received: usize) -> MediaResult<()> {
        if received as u64 > self.max_chunk_size {
            return Err(MediaError::ChunkTooLarge {
                limit: self.max_chunk_size,
            });
        }
        Ok(())
    }

    /// Store a chunk, replacing any earlier payload with the same key.
    /// Performs blocking I/O.
    pub fn receive(&self, token: &str, index: u64, payload: &[u8]) -> MediaResult<ReceivedChunk> {
        if payload.is_empty() {
            return Err(MediaError::PayloadMissing);
        }
        self.check_size(payload.len())?;

        self.storage.write_chunk(token, index, payload)?;
        let etag = hex::encode(md5::compute(payload).0);
        debug!("Chunk {} of session {} has etag {}", index, token, etag);
        info!("Stored chunk {} for session {} ({} bytes)", index, token, payload.len());

        Ok(ReceivedChunk {
            upload_id: token.to_string(),
            chunk_index: index,
            size: payload.len() as u64,
            etag,
        })
    }
}
