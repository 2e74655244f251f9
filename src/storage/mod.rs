//! Byte Storage Layer Abstraction
//!
//! This module provides an abstraction over the durable byte storage used by
//! the upload and streaming paths: transient chunk units keyed by
//! (session token, chunk index) and finished artifacts grouped in folders.
//! Higher-level services only talk to the `MediaStorage` trait, so the local
//! filesystem backend can be swapped for the in-memory mock in tests.

pub mod local_store;
pub mod mock_store;
pub mod sweeper;

use std::io::Read;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::error::MediaResult;

/// Readable, seekable handle on a stored artifact.
pub trait ArtifactSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ArtifactSource for T {}

/// An opened artifact together with its length in bytes.
pub struct OpenArtifact {
    pub source: Box<dyn ArtifactSource>,
    pub size: u64,
}

/// Exclusive hold on an upload session, released when dropped.
pub type SessionClaim = Box<dyn Send>;

/// Outcome of a committed artifact write
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedArtifact {
    /// Filesystem-like location of the artifact
    pub path: String,
    pub size: u64,
}

/// Output handle for a merge in progress.
///
/// Implementations must discard everything written so far when the writer is
/// dropped without `commit`, so an aborted merge never leaves a visible or
/// partial artifact behind.
pub trait ArtifactWriter: Send {
    /// Append the full contents of `reader`, returning the number of bytes copied
    fn append(&mut self, reader: &mut dyn Read) -> MediaResult<u64>;

    /// Make the artifact durable and visible under its final name
    fn commit(self: Box<Self>) -> MediaResult<CommittedArtifact>;
}

/// Counts reported by one orphan sweep pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub sessions_removed: usize,
    pub partials_removed: usize,
}

/// Trait defining the media storage interface
pub trait MediaStorage: Send + Sync {
    /// Persist a chunk unit, replacing any previous payload under the same key
    fn write_chunk(&self, token: &str, index: u64, data: &[u8]) -> MediaResult<()>;

    /// Open a chunk unit for reading; `None` when it was never received
    fn open_chunk(&self, token: &str, index: u64) -> MediaResult<Option<Box<dyn Read + Send>>>;

    /// Remove a chunk unit that has been folded into a committed artifact
    fn remove_chunk(&self, token: &str, index: u64) -> MediaResult<()>;

    /// Drop whatever bookkeeping is left for a session once its chunks are consumed
    fn finish_session(&self, token: &str) -> MediaResult<()>;

    /// Start writing a new artifact `file_name` inside `folder`
    fn create_artifact(&self, folder: &str, file_name: &str) -> MediaResult<Box<dyn ArtifactWriter>>;

    /// Open a finished artifact; fails with `ArtifactNotFound` when absent
    fn open_artifact(&self, folder: &str, file_name: &str) -> MediaResult<OpenArtifact>;

    /// Remove a committed artifact whose merge could not be finished
    fn remove_artifact(&self, folder: &str, file_name: &str) -> MediaResult<()>;

    /// Remove abandoned sessions and leftover partial artifacts older than `max_age`.
    /// A session is only removed while `claim` returns a hold on it, and only if
    /// it is still stale once that hold is taken.
    fn sweep_stale(&self, max_age: Duration, claim: &dyn Fn(&str) -> Option<SessionClaim>) -> MediaResult<SweepReport>;
}

/// Location stored in descriptors and records for an artifact
pub fn artifact_location(folder: &str, file_name: &str) -> String {
    format!("{}/{}", folder, file_name)
}

/// Rejects names that could escape their directory or address in-progress files.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_segments() {
        assert!(is_safe_segment("1718000000000-abc.mp4"));
        assert!(is_safe_segment("upload_42"));
        assert!(!is_safe_segment(""));
        assert!(!is_safe_segment(".."));
        assert!(!is_safe_segment(".hidden.partial"));
        assert!(!is_safe_segment("a/b"));
        assert!(!is_safe_segment("a\\b"));
    }

    #[test]
    fn test_artifact_location() {
        assert_eq!(artifact_location("uploads", "a.mp4"), "uploads/a.mp4");
    }
}
