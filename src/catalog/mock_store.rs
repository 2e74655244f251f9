//! Mock implementation of MediaCatalog for testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::catalog::{ArtifactDescriptor, MediaCatalog, MediaRecord, RecordId};
use crate::error::{MediaError, MediaResult};

/// In-memory catalog with a switchable insert failure
pub struct MockMediaCatalog {
    records: Arc<Mutex<BTreeMap<RecordId, MediaRecord>>>,
    fail_inserts: AtomicBool,
}

impl MockMediaCatalog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
            fail_inserts: AtomicBool::new(false),
        }
    }

    /// Make every subsequent insert fail with a catalog error
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of records in the catalog
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Clear all records
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl Default for MockMediaCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaCatalog for MockMediaCatalog {
    fn insert_artifact_record(&self, descriptor: &ArtifactDescriptor) -> MediaResult<RecordId> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(MediaError::Catalog("mock catalog unavailable".to_string()));
        }

        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.values().find(|record| record.path == descriptor.path) {
            return Ok(existing.id);
        }

        let id = records.keys().next_back().map(|last| last + 1).unwrap_or(1);
        records.insert(id, MediaRecord::from_descriptor(id, descriptor, Utc::now()));
        Ok(id)
    }

    fn get_record(&self, id: RecordId) -> MediaResult<Option<MediaRecord>> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    fn list_records(&self, folder: Option<&str>) -> MediaResult<Vec<MediaRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .rev()
            .filter(|record| folder.map(|f| record.folder == f).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn increment_downloads(&self, id: RecordId) -> MediaResult<u64> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(MediaError::RecordNotFound(id))?;
        record.downloads += 1;
        Ok(record.downloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_descriptor;

    #[test]
    fn test_mock_catalog_operations() {
        let catalog = MockMediaCatalog::new();
        let id = catalog.insert_artifact_record(&sample_descriptor("a.mp4")).unwrap();
        assert_eq!(catalog.record_count(), 1);
        assert_eq!(catalog.insert_artifact_record(&sample_descriptor("a.mp4")).unwrap(), id);

        let second = catalog.insert_artifact_record(&sample_descriptor("b.mp4")).unwrap();
        let listed = catalog.list_records(Some("videos")).unwrap();
        assert_eq!(listed[0].id, second);
        assert!(catalog.list_records(Some("images")).unwrap().is_empty());

        assert_eq!(catalog.increment_downloads(id).unwrap(), 1);
        catalog.clear();
        assert_eq!(catalog.record_count(), 0);
    }

    #[test]
    fn test_mock_catalog_failure_switch() {
        let catalog = MockMediaCatalog::new();
        catalog.set_fail_inserts(true);
        assert!(catalog.insert_artifact_record(&sample_descriptor("a.mp4")).is_err());
        assert_eq!(catalog.record_count(), 0);

        catalog.set_fail_inserts(false);
        assert!(catalog.insert_artifact_record(&sample_descriptor("a.mp4")).is_ok());
    }
}
