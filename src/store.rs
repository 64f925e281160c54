//! On-disk upload persistence and the per-report-type "latest" pointer.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<report_type>/<report_type>-<seq>.xlsx
//! <root>/<report_type>/<report_type>-<seq>.json   (UploadDescriptor manifest)
//! ```
//!
//! The workbook file is persisted before its manifest, so a manifest on disk
//! always refers to a complete file unless something removed it afterwards.

use crate::error::{ReportError, ReportResult};
use crate::model::{UploadDescriptor, UploadId};
use crate::utils::{sha256_hex, split_upload_id};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where uploads live on disk. Cheap to clone into blocking tasks.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_dir(&self, report_type: &str) -> PathBuf {
        self.root.join(report_type)
    }

    pub fn workbook_path(&self, descriptor: &UploadDescriptor) -> PathBuf {
        self.report_dir(&descriptor.report_type)
            .join(format!("{}.xlsx", descriptor.id))
    }

    pub fn manifest_path(&self, descriptor: &UploadDescriptor) -> PathBuf {
        self.report_dir(&descriptor.report_type)
            .join(format!("{}.json", descriptor.id))
    }

    /// Writes the workbook bytes then the manifest, each via temp file + rename.
    /// Blocking; run off the async executor.
    pub fn persist(&self, descriptor: &UploadDescriptor, bytes: &[u8]) -> ReportResult<()> {
        let dir = self.report_dir(&descriptor.report_type);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &self.workbook_path(descriptor), bytes)?;
        let manifest = serde_json::to_vec_pretty(descriptor)?;
        write_atomic(&dir, &self.manifest_path(descriptor), &manifest)?;
        debug!(upload_id = %descriptor.id, bytes = bytes.len(), "upload persisted");
        Ok(())
    }

    /// Reads a persisted workbook back, verifying it against its manifest.
    /// Missing or altered content is `FileNotFound`. Blocking.
    pub fn read_bytes(&self, descriptor: &UploadDescriptor) -> ReportResult<Vec<u8>> {
        let path = self.workbook_path(descriptor);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ReportError::FileNotFound {
                    upload_id: descriptor.id.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        if sha256_hex(&bytes) != descriptor.sha256 {
            warn!(upload_id = %descriptor.id, path = %path.display(), "stored workbook digest mismatch");
            return Err(ReportError::FileNotFound {
                upload_id: descriptor.id.to_string(),
            });
        }
        Ok(bytes)
    }

    fn remove_files(&self, descriptor: &UploadDescriptor) {
        for path in [self.manifest_path(descriptor), self.workbook_path(descriptor)] {
            if let Err(err) = fs::remove_file(&path)
                && err.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %err, "failed to remove old upload");
            }
        }
        debug!(upload_id = %descriptor.id, "upload dropped from history");
    }
}

#[derive(Debug, Default)]
struct ReportUploads {
    /// Last sequence number handed out
    last_seq: u64,
    /// Oldest first; the back entry is the latest upload
    history: VecDeque<Arc<UploadDescriptor>>,
}

impl ReportUploads {
    fn latest(&self) -> Option<&Arc<UploadDescriptor>> {
        self.history.back()
    }

    /// Inserts keeping `history` ordered by sequence number.
    fn insert(&mut self, descriptor: Arc<UploadDescriptor>) {
        let pos = self
            .history
            .iter()
            .position(|existing| existing.seq > descriptor.seq)
            .unwrap_or(self.history.len());
        self.history.insert(pos, descriptor);
    }

    fn trim(&mut self, limit: usize) -> Vec<Arc<UploadDescriptor>> {
        let excess = self.history.len().saturating_sub(limit);
        self.history.drain(..excess).collect()
    }
}

/// Keyed store of report type to upload history, latest last.
pub struct UploadStore {
    layout: StorageLayout,
    history_limit: usize,
    reports: RwLock<AHashMap<String, ReportUploads>>,
}

impl UploadStore {
    /// Opens the store and restores latest pointers and history from the
    /// manifests found under `root`.
    pub fn open(root: impl Into<PathBuf>, history_limit: usize) -> ReportResult<Self> {
        let layout = StorageLayout::new(root);
        fs::create_dir_all(layout.root())?;
        let store = Self {
            layout,
            history_limit: history_limit.max(1),
            reports: RwLock::new(AHashMap::new()),
        };
        store.rescan();
        Ok(store)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn rescan(&self) {
        let mut restored = 0usize;
        let mut reports: AHashMap<String, ReportUploads> = AHashMap::new();

        for entry in WalkDir::new(self.layout.root()).min_depth(2).max_depth(2) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable storage entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let descriptor = match read_manifest(path) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable manifest");
                    continue;
                }
            };
            let dir_matches = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                == Some(descriptor.report_type.as_str());
            let id_matches = split_upload_id(descriptor.id.as_str())
                == Some((descriptor.report_type.as_str(), descriptor.seq));
            if !dir_matches || !id_matches {
                warn!(path = %path.display(), "manifest does not match its location");
                continue;
            }
            let uploads = reports.entry(descriptor.report_type.clone()).or_default();
            uploads.last_seq = uploads.last_seq.max(descriptor.seq);
            uploads.insert(Arc::new(descriptor));
            restored += 1;
        }

        let mut evicted = Vec::new();
        for uploads in reports.values_mut() {
            evicted.extend(uploads.trim(self.history_limit));
        }
        for descriptor in &evicted {
            self.layout.remove_files(descriptor);
        }

        info!(
            root = %self.layout.root().display(),
            restored,
            report_types = reports.len(),
            evicted = evicted.len(),
            "upload store restored"
        );
        *self.reports.write() = reports;
    }

    /// Hands out the next sequence number for `report_type`.
    pub fn reserve_seq(&self, report_type: &str) -> u64 {
        let mut reports = self.reports.write();
        let uploads = reports.entry(report_type.to_string()).or_default();
        uploads.last_seq += 1;
        uploads.last_seq
    }

    /// Registers a persisted upload. It becomes the latest for its report type
    /// unless a higher sequence number is already committed. Returns uploads
    /// that fell out of history; their files are already removed.
    pub fn commit(&self, descriptor: UploadDescriptor) -> Vec<Arc<UploadDescriptor>> {
        let evicted = {
            let mut reports = self.reports.write();
            let uploads = reports.entry(descriptor.report_type.clone()).or_default();
            uploads.last_seq = uploads.last_seq.max(descriptor.seq);
            uploads.insert(Arc::new(descriptor));
            uploads.trim(self.history_limit)
        };
        for old in &evicted {
            self.layout.remove_files(old);
        }
        evicted
    }

    pub fn latest(&self, report_type: &str) -> Option<Arc<UploadDescriptor>> {
        self.reports
            .read()
            .get(report_type)
            .and_then(|uploads| uploads.latest().cloned())
    }

    /// Retained uploads, newest first.
    pub fn history(&self, report_type: &str) -> Vec<Arc<UploadDescriptor>> {
        self.reports
            .read()
            .get(report_type)
            .map(|uploads| uploads.history.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, upload_id: &UploadId) -> Option<Arc<UploadDescriptor>> {
        let (report_type, seq) = split_upload_id(upload_id.as_str())?;
        self.reports
            .read()
            .get(report_type)?
            .history
            .iter()
            .find(|d| d.seq == seq)
            .cloned()
    }
}

fn read_manifest(path: &Path) -> ReportResult<UploadDescriptor> {
    let contents = fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> ReportResult<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::format_upload_id;

    fn descriptor(report_type: &str, seq: u64, bytes: &[u8]) -> UploadDescriptor {
        UploadDescriptor {
            id: UploadId(format_upload_id(report_type, seq)),
            report_type: report_type.to_string(),
            seq,
            original_file_name: "book.xlsx".to_string(),
            sheet_names: vec!["Sheet1".to_string()],
            default_sheet: "Sheet1".to_string(),
            created_at: "2024-05-01T08:00:00Z".to_string(),
            bytes: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        }
    }

    fn save(store: &UploadStore, report_type: &str, bytes: &[u8]) -> UploadDescriptor {
        let seq = store.reserve_seq(report_type);
        let d = descriptor(report_type, seq, bytes);
        store.layout().persist(&d, bytes).unwrap();
        store.commit(d.clone());
        d
    }

    #[test]
    fn commit_replaces_latest_and_trims_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path(), 2).unwrap();
        let first = save(&store, "payroll", b"one");
        let second = save(&store, "payroll", b"two");
        let third = save(&store, "payroll", b"three");

        assert_eq!(store.latest("payroll").unwrap().id, third.id);
        let history: Vec<_> = store.history("payroll").iter().map(|d| d.seq).collect();
        assert_eq!(history, vec![3, 2]);
        assert!(store.get(&first.id).is_none());
        assert!(!store.layout().workbook_path(&first).exists());
        assert!(!store.layout().manifest_path(&first).exists());
        assert!(store.get(&second.id).is_some());
        assert!(store.latest("overtime").is_none());
    }

    #[test]
    fn late_commit_of_older_sequence_does_not_replace_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path(), 5).unwrap();
        let slow_seq = store.reserve_seq("overtime");
        let fast = save(&store, "overtime", b"fast");
        let slow = descriptor("overtime", slow_seq, b"slow");
        store.layout().persist(&slow, b"slow").unwrap();
        store.commit(slow);
        assert_eq!(store.latest("overtime").unwrap().id, fast.id);
    }

    #[test]
    fn reopening_restores_pointers_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UploadStore::open(dir.path(), 5).unwrap();
            save(&store, "payroll", b"a");
            save(&store, "payroll", b"b");
            save(&store, "headcount", b"c");
        }
        fs::write(dir.path().join("payroll").join("junk.json"), b"{not json").unwrap();

        let store = UploadStore::open(dir.path(), 5).unwrap();
        assert_eq!(store.latest("payroll").unwrap().id.as_str(), "payroll-000002");
        assert_eq!(store.latest("headcount").unwrap().seq, 1);
        assert_eq!(store.reserve_seq("payroll"), 3);
    }

    #[test]
    fn reopening_with_smaller_history_drops_oldest_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let store = UploadStore::open(dir.path(), 5).unwrap();
            let first = save(&store, "overtime", b"1");
            save(&store, "overtime", b"2");
            first
        };
        let store = UploadStore::open(dir.path(), 1).unwrap();
        assert_eq!(store.history("overtime").len(), 1);
        assert!(!store.layout().workbook_path(&first).exists());
    }

    #[test]
    fn missing_or_altered_file_reads_as_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path(), 5).unwrap();
        let d = save(&store, "payroll", b"payload");
        let layout = store.layout();
        assert_eq!(layout.read_bytes(&d).unwrap(), b"payload");

        fs::write(layout.workbook_path(&d), b"tampered").unwrap();
        assert!(matches!(
            layout.read_bytes(&d),
            Err(ReportError::FileNotFound { .. })
        ));

        fs::remove_file(layout.workbook_path(&d)).unwrap();
        assert!(matches!(
            layout.read_bytes(&d),
            Err(ReportError::FileNotFound { .. })
        ));
    }
}
