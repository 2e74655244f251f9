//! Local filesystem storage implementation
//!
//! Layout:
//! - `<temp_path>/chunks/<token>/<index>.chunk` holds in-flight chunk units
//! - `<base_path>/<folder>/<artifact>` holds finished artifacts
//! - `<base_path>/<folder>/.<artifact>.partial` exists only while a merge runs

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{MediaError, MediaResult};
use crate::storage::{
    artifact_location, is_safe_segment, ArtifactWriter, CommittedArtifact, MediaStorage,
    OpenArtifact, SessionClaim, SweepReport,
};

const CHUNK_DIR: &str = "chunks";
const CHUNK_EXTENSION: &str = "chunk";
const PARTIAL_EXTENSION: &str = "partial";

fn ensure_directory(path: &Path) -> MediaResult<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            MediaError::WriteFailure(format!("failed to create {}: {}", path.display(), e))
        })?;
        info!("Created storage directory: {}", path.display());
    }
    Ok(())
}

fn age_of(metadata: &fs::Metadata, now: SystemTime) -> Option<Duration> {
    metadata
        .modified()
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
}

/// Local filesystem storage implementation
pub struct LocalMediaStore {
    storage_path: PathBuf,
    chunk_path: PathBuf,
}

impl LocalMediaStore {
    pub fn new(config: &StorageConfig) -> MediaResult<Self> {
        let storage_path = PathBuf::from(&config.base_path);
        let chunk_path = PathBuf::from(&config.temp_path).join(CHUNK_DIR);
        ensure_directory(&storage_path)?;
        ensure_directory(&chunk_path)?;
        info!(
            "Using local storage with artifacts in {} and chunks in {}",
            storage_path.display(),
            chunk_path.display()
        );
        Ok(Self {
            storage_path,
            chunk_path,
        })
    }

    fn session_dir(&self, token: &str) -> PathBuf {
        self.chunk_path.join(token)
    }

    fn chunk_file_path(&self, token: &str, index: u64) -> PathBuf {
        self.session_dir(token).join(format!("{}.{}", index, CHUNK_EXTENSION))
    }

    fn artifact_path(&self, folder: &str, file_name: &str) -> MediaResult<PathBuf> {
        if !is_safe_segment(folder) || !is_safe_segment(file_name) {
            return Err(MediaError::ArtifactNotFound(artifact_location(folder, file_name)));
        }
        Ok(self.storage_path.join(folder).join(file_name))
    }

    fn sweep_sessions(
        &self,
        now: SystemTime,
        max_age: Duration,
        claim: &dyn Fn(&str) -> Option<SessionClaim>,
    ) -> io::Result<usize> {
        let is_stale = |metadata: &fs::Metadata| {
            age_of(metadata, now).map(|age| age >= max_age).unwrap_or(false)
        };

        let mut removed = 0;
        for entry in fs::read_dir(&self.chunk_path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() || !is_stale(&metadata) {
                continue;
            }
            let token = entry.file_name().to_string_lossy().to_string();
            let Some(_claim) = claim(&token) else {
                debug!("Skipping sweep of session {} with a merge in progress", token);
                continue;
            };

            // A chunk may have landed since the listing.
            let path = entry.path();
            match fs::metadata(&path) {
                Ok(current) if is_stale(&current) => {}
                _ => {
                    debug!("Session {} was touched during the sweep, keeping it", token);
                    continue;
                }
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Removed abandoned upload session {}", token);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale session {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    fn sweep_partials(&self, now: SystemTime, max_age: Duration) -> io::Result<usize> {
        let mut removed = 0;
        for folder in fs::read_dir(&self.storage_path)? {
            let folder = folder?;
            if !folder.metadata()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(folder.path())? {
                let entry = entry?;
                let path = entry.path();
                let is_partial = path
                    .extension()
                    .map(|ext| ext == PARTIAL_EXTENSION)
                    .unwrap_or(false);
                if !is_partial {
                    continue;
                }
                let stale = age_of(&entry.metadata()?, now)
                    .map(|age| age >= max_age)
                    .unwrap_or(false);
                if stale {
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            info!("Removed leftover partial artifact {}", path.display());
                            removed += 1;
                        }
                        Err(e) => warn!("Failed to remove partial artifact {}: {}", path.display(), e),
                    }
                }
            }
        }
        Ok(removed)
    }
}

impl MediaStorage for LocalMediaStore {
    fn write_chunk(&self, token: &str, index: u64, data: &[u8]) -> MediaResult<()> {
        let session_dir = self.session_dir(token);
        fs::create_dir_all(&session_dir).map_err(MediaError::write_failure)?;

        // Write beside the target and rename so readers never observe a torn chunk
        // and a resubmission replaces the previous payload in one step.
        let staging = session_dir.join(format!("{}.{}.tmp", index, Uuid::new_v4().simple()));
        let target = self.chunk_file_path(token, index);
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&staging)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&staging, &target)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&staging);
            return Err(MediaError::WriteFailure(format!(
                "failed to store chunk {} of {}: {}",
                index, token, e
            )));
        }

        debug!("Stored chunk {} for session {} ({} bytes)", index, token, data.len());
        Ok(())
    }

    fn open_chunk(&self, token: &str, index: u64) -> MediaResult<Option<Box<dyn Read + Send>>> {
        match File::open(self.chunk_file_path(token, index)) {
            Ok(file) => Ok(Some(Box::new(BufReader::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MediaError::WriteFailure(format!(
                "failed to open chunk {} of {}: {}",
                index, token, e
            ))),
        }
    }

    fn remove_chunk(&self, token: &str, index: u64) -> MediaResult<()> {
        match fs::remove_file(self.chunk_file_path(token, index)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediaError::write_failure(e)),
        }
    }

    fn finish_session(&self, token: &str) -> MediaResult<()> {
        // Only an empty directory is removed; stray chunks beyond the declared
        // total stay behind for the sweeper.
        if let Err(e) = fs::remove_dir(self.session_dir(token)) {
            debug!("Session directory for {} not removed: {}", token, e);
        }
        Ok(())
    }

    fn create_artifact(&self, folder: &str, file_name: &str) -> MediaResult<Box<dyn ArtifactWriter>> {
        let final_path = self
            .artifact_path(folder, file_name)
            .map_err(|_| MediaError::WriteFailure(format!("invalid artifact name {}/{}", folder, file_name)))?;
        let folder_path = self.storage_path.join(folder);
        ensure_directory(&folder_path)?;

        let partial_path = folder_path.join(format!(".{}.{}", file_name, PARTIAL_EXTENSION));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
            .map_err(|e| {
                MediaError::WriteFailure(format!("failed to create {}: {}", partial_path.display(), e))
            })?;

        Ok(Box::new(LocalArtifactWriter {
            writer: Some(BufWriter::new(file)),
            partial_path,
            final_path,
            location: artifact_location(folder, file_name),
            size: 0,
            committed: false,
        }))
    }

    fn open_artifact(&self, folder: &str, file_name: &str) -> MediaResult<OpenArtifact> {
        let path = self.artifact_path(folder, file_name)?;
        let not_found = || MediaError::ArtifactNotFound(artifact_location(folder, file_name));

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(MediaError::Internal(format!("failed to open {}: {}", path.display(), e))),
        };
        let metadata = file
            .metadata()
            .map_err(|e| MediaError::Internal(e.to_string()))?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        Ok(OpenArtifact {
            source: Box::new(tokio::fs::File::from_std(file)),
            size: metadata.len(),
        })
    }

    fn remove_artifact(&self, folder: &str, file_name: &str) -> MediaResult<()> {
        let path = self.artifact_path(folder, file_name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed artifact {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediaError::write_failure(e)),
        }
    }

    fn sweep_stale(&self, max_age: Duration, claim: &dyn Fn(&str) -> Option<SessionClaim>) -> MediaResult<SweepReport> {
        let now = SystemTime::now();
        let sessions_removed = self
            .sweep_sessions(now, max_age, claim)
            .map_err(|e| MediaError::Internal(format!("session sweep failed: {}", e)))?;
        let partials_removed = self
            .sweep_partials(now, max_age)
            .map_err(|e| MediaError::Internal(format!("partial artifact sweep failed: {}", e)))?;
        Ok(SweepReport {
            sessions_removed,
            partials_removed,
        })
    }
}

/// Writes into a hidden `.partial` file and renames it into place on commit.
struct LocalArtifactWriter {
    writer: Option<BufWriter<File>>,
    partial_path: PathBuf,
    final_path: PathBuf,
    location: String,
    size: u64,
    committed: bool,
}

impl ArtifactWriter for LocalArtifactWriter {
    fn append(&mut self, reader: &mut dyn Read) -> MediaResult<u64> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MediaError::Internal("artifact writer already closed".to_string()))?;
        let copied = io::copy(reader, writer).map_err(MediaError::write_failure)?;
        self.size += copied;
        Ok(copied)
    }

    fn commit(mut self: Box<Self>) -> MediaResult<CommittedArtifact> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| MediaError::Internal("artifact writer already closed".to_string()))?;
        let file = writer
            .into_inner()
            .map_err(|e| MediaError::write_failure(e.error()))?;
        file.sync_all().map_err(MediaError::write_failure)?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path).map_err(MediaError::write_failure)?;
        self.committed = true;
        info!("Committed artifact {} ({} bytes)", self.final_path.display(), self.size);

        Ok(CommittedArtifact {
            path: self.location.clone(),
            size: self.size,
        })
    }
}

impl Drop for LocalArtifactWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.writer.take();
        match fs::remove_file(&self.partial_path) {
            Ok(()) => info!("Discarded partial artifact {}", self.partial_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to discard partial artifact {}: {}",
                self.partial_path.display(),
                e
            ),
        }
    }
}
