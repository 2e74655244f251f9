//! Mock implementation of MediaStorage for testing

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::info;

use crate::error::{MediaError, MediaResult};
use crate::storage::{
    artifact_location, ArtifactWriter, CommittedArtifact, MediaStorage, OpenArtifact, SessionClaim,
    SweepReport,
};

type ArtifactMap = Arc<Mutex<HashMap<(String, String), Vec<u8>>>>;

/// In-memory storage with switchable write failures
pub struct MockMediaStore {
    // token -> index -> payload
    chunks: Mutex<HashMap<String, HashMap<u64, Vec<u8>>>>,
    touched: Mutex<HashMap<String, Instant>>,
    artifacts: ArtifactMap,
    fail_artifact_writes: Arc<AtomicBool>,
    fail_chunk_removal: AtomicBool,
}

impl MockMediaStore {
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            touched: Mutex::new(HashMap::new()),
            artifacts: Arc::new(Mutex::new(HashMap::new())),
            fail_artifact_writes: Arc::new(AtomicBool::new(false)),
            fail_chunk_removal: AtomicBool::new(false),
        }
    }

    /// Make every subsequent artifact append fail with `WriteFailure`
    pub fn set_fail_artifact_writes(&self, fail: bool) {
        self.fail_artifact_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent chunk removal fail with `WriteFailure`
    pub fn set_fail_chunk_removal(&self, fail: bool) {
        self.fail_chunk_removal.store(fail, Ordering::SeqCst);
    }

    /// Number of chunk units currently held for a session
    pub fn chunk_count(&self, token: &str) -> usize {
        let chunks = self.chunks.lock().unwrap();
        chunks.get(token).map(|session| session.len()).unwrap_or(0)
    }

    /// Number of committed artifacts
    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }

    /// Raw bytes of a committed artifact
    pub fn artifact_bytes(&self, folder: &str, file_name: &str) -> Option<Vec<u8>> {
        let artifacts = self.artifacts.lock().unwrap();
        artifacts
            .get(&(folder.to_string(), file_name.to_string()))
            .cloned()
    }

    /// Store an artifact directly, bypassing the merge path
    pub fn insert_artifact(&self, folder: &str, file_name: &str, data: Vec<u8>) {
        let mut artifacts = self.artifacts.lock().unwrap();
        artifacts.insert((folder.to_string(), file_name.to_string()), data);
    }
}

impl Default for MockMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaStorage for MockMediaStore {
    fn write_chunk(&self, token: &str, index: u64, data: &[u8]) -> MediaResult<()> {
        let mut chunks = self.chunks.lock().unwrap();
        chunks
            .entry(token.to_string())
            .or_default()
            .insert(index, data.to_vec());
        self.touched
            .lock()
            .unwrap()
            .insert(token.to_string(), Instant::now());
        info!("Mock: stored chunk {} for session {} ({} bytes)", index, token, data.len());
        Ok(())
    }

    fn open_chunk(&self, token: &str, index: u64) -> MediaResult<Option<Box<dyn Read + Send>>> {
        let chunks = self.chunks.lock().unwrap();
        Ok(chunks
            .get(token)
            .and_then(|session| session.get(&index))
            .map(|data| Box::new(Cursor::new(data.clone())) as Box<dyn Read + Send>))
    }

    fn remove_chunk(&self, token: &str, index: u64) -> MediaResult<()> {
        if self.fail_chunk_removal.load(Ordering::SeqCst) {
            return Err(MediaError::WriteFailure("mock chunk removal failure".to_string()));
        }
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(session) = chunks.get_mut(token) {
            session.remove(&index);
        }
        Ok(())
    }

    fn finish_session(&self, token: &str) -> MediaResult<()> {
        let mut chunks = self.chunks.lock().unwrap();
        if chunks.get(token).map(|session| session.is_empty()).unwrap_or(false) {
            chunks.remove(token);
            self.touched.lock().unwrap().remove(token);
        }
        Ok(())
    }

    fn create_artifact(&self, folder: &str, file_name: &str) -> MediaResult<Box<dyn ArtifactWriter>> {
        Ok(Box::new(MockArtifactWriter {
            key: (folder.to_string(), file_name.to_string()),
            buffer: Vec::new(),
            artifacts: Arc::clone(&self.artifacts),
            fail_writes: Arc::clone(&self.fail_artifact_writes),
        }))
    }

    fn open_artifact(&self, folder: &str, file_name: &str) -> MediaResult<OpenArtifact> {
        let data = self
            .artifact_bytes(folder, file_name)
            .ok_or_else(|| MediaError::ArtifactNotFound(artifact_location(folder, file_name)))?;
        let size = data.len() as u64;
        Ok(OpenArtifact {
            source: Box::new(Cursor::new(data)),
            size,
        })
    }

    fn remove_artifact(&self, folder: &str, file_name: &str) -> MediaResult<()> {
        let mut artifacts = self.artifacts.lock().unwrap();
        artifacts.remove(&(folder.to_string(), file_name.to_string()));
        Ok(())
    }

    fn sweep_stale(&self, max_age: Duration, claim: &dyn Fn(&str) -> Option<SessionClaim>) -> MediaResult<SweepReport> {
        let stale: Vec<String> = self
            .touched
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, touched)| touched.elapsed() >= max_age)
            .map(|(token, _)| token.clone())
            .collect();

        let mut sessions_removed = 0;
        for token in &stale {
            let Some(_claim) = claim(token) else {
                continue;
            };
            let mut chunks = self.chunks.lock().unwrap();
            let mut touched = self.touched.lock().unwrap();
            if touched.get(token).map(|at| at.elapsed() >= max_age).unwrap_or(false) {
                chunks.remove(token);
                touched.remove(token);
                sessions_removed += 1;
            }
        }

        Ok(SweepReport {
            sessions_removed,
            partials_removed: 0,
        })
    }
}

/// Buffers appended bytes and publishes them only on commit
struct MockArtifactWriter {
    key: (String, String),
    buffer: Vec<u8>,
    artifacts: ArtifactMap,
    fail_writes: Arc<AtomicBool>,
}

impl ArtifactWriter for MockArtifactWriter {
    fn append(&mut self, reader: &mut dyn Read) -> MediaResult<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MediaError::WriteFailure("mock write failure".to_string()));
        }
        let copied = reader
            .read_to_end(&mut self.buffer)
            .map_err(MediaError::write_failure)?;
        Ok(copied as u64)
    }

    fn commit(self: Box<Self>) -> MediaResult<CommittedArtifact> {
        let size = self.buffer.len() as u64;
        let path = artifact_location(&self.key.0, &self.key.1);
        self.artifacts.lock().unwrap().insert(self.key, self.buffer);
        Ok(CommittedArtifact { path, size })
    }
}
