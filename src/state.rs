use crate::analysis::{LabelSet, ScanBounds, StatsRegistry};
use crate::catalog::ReportCatalog;
use crate::config::ServerConfig;
use crate::error::{ReportError, ReportResult};
use crate::metrics::METRICS;
use crate::model::{UploadDescriptor, UploadId};
use crate::store::UploadStore;
use crate::utils::{format_upload_id, sha256_hex};
use crate::workbook::ParsedWorkbook;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task;
use tracing::{debug, info};

/// Shared state behind every operation.
pub struct AppState {
    config: Arc<ServerConfig>,
    catalog: ReportCatalog,
    registry: StatsRegistry,
    markers: LabelSet,
    store: UploadStore,
    /// Parsed uploads keyed by upload id
    cache: RwLock<LruCache<UploadId, Arc<ParsedWorkbook>>>,
    cache_ops: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl AppState {
    /// Builds state and restores persisted uploads from the storage root.
    pub fn new(config: Arc<ServerConfig>) -> ReportResult<Self> {
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| ReportError::InvalidRequest("cache_capacity must be at least 1".into()))?;
        let catalog = ReportCatalog::from_config(&config);
        let registry = StatsRegistry::from_catalog(&catalog);
        let markers = LabelSet::new(&config.marker_synonyms);
        let store = UploadStore::open(&config.storage_root, config.history_limit)?;

        info!(
            storage_root = %config.storage_root.display(),
            report_types = catalog.iter().count(),
            cache_capacity = config.cache_capacity,
            "application state ready"
        );

        Ok(Self {
            config,
            catalog,
            registry,
            markers,
            store,
            cache: RwLock::new(LruCache::new(capacity)),
            cache_ops: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn catalog(&self) -> &ReportCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &StatsRegistry {
        &self.registry
    }

    pub fn markers(&self) -> &LabelSet {
        &self.markers
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    pub fn scan_bounds(&self) -> ScanBounds {
        ScanBounds::from_config(&self.config)
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.read();
        CacheStats {
            operations: self.cache_ops.load(Ordering::Relaxed),
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            size: cache.len(),
            capacity: cache.cap().get(),
        }
    }

    fn update_cache_metrics(&self) {
        METRICS.update_cached_workbooks(self.cache.read().len());
    }

    /// Parses, persists and registers an upload as the latest for its report
    /// type. Parsing and file writes run on the blocking pool; the latest
    /// pointer only moves once both succeeded.
    pub async fn accept_upload(
        &self,
        report_type: &str,
        original_file_name: &str,
        bytes: Vec<u8>,
    ) -> ReportResult<UploadDescriptor> {
        let report = self.catalog.get(report_type)?;
        let limit = self.config.max_upload_bytes;
        if bytes.len() > limit {
            debug!(size = bytes.len(), limit, "upload over size limit");
            return Err(ReportError::PayloadTooLarge { limit });
        }
        if bytes.is_empty() {
            return Err(ReportError::InvalidRequest("uploaded file is empty".into()));
        }

        let seq = self.store.reserve_seq(report_type);
        let preferred = report.preferred_sheet.clone();
        let report_type = report_type.to_string();
        let original_file_name = original_file_name.to_string();

        let (descriptor, workbook) = {
            let layout = self.store.layout().clone();
            task::spawn_blocking(move || {
                let workbook = ParsedWorkbook::parse(&bytes)?;
                let descriptor = UploadDescriptor {
                    id: UploadId(format_upload_id(&report_type, seq)),
                    report_type,
                    seq,
                    original_file_name,
                    sheet_names: workbook.sheet_names(),
                    default_sheet: workbook.default_sheet(preferred.as_deref()),
                    created_at: chrono::Utc::now()
                        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    bytes: bytes.len() as u64,
                    sha256: sha256_hex(&bytes),
                };
                layout.persist(&descriptor, &bytes)?;
                Ok::<_, ReportError>((descriptor, workbook))
            })
            .await??
        };

        let workbook = Arc::new(workbook);
        let evicted = self.store.commit(descriptor.clone());
        {
            let mut cache = self.cache.write();
            for old in &evicted {
                cache.pop(&old.id);
            }
        }
        self.cache_if_current(&descriptor.id, workbook);

        info!(
            upload_id = %descriptor.id,
            report_type = %descriptor.report_type,
            sheets = descriptor.sheet_names.len(),
            default_sheet = %descriptor.default_sheet,
            bytes = descriptor.bytes,
            "upload accepted"
        );
        Ok(descriptor)
    }

    /// Parsed content of an upload, from cache or re-read from disk.
    pub async fn open_upload(
        &self,
        upload_id: &UploadId,
    ) -> ReportResult<(Arc<UploadDescriptor>, Arc<ParsedWorkbook>)> {
        let descriptor = self
            .store
            .get(upload_id)
            .ok_or_else(|| ReportError::upload(upload_id.as_str()))?;
        let workbook = self.open_descriptor(&descriptor).await?;
        Ok((descriptor, workbook))
    }

    pub async fn open_descriptor(
        &self,
        descriptor: &Arc<UploadDescriptor>,
    ) -> ReportResult<Arc<ParsedWorkbook>> {
        if !self.backing_file_present(descriptor).await {
            self.evict(&descriptor.id);
            return Err(ReportError::FileNotFound {
                upload_id: descriptor.id.to_string(),
            });
        }

        self.cache_ops.fetch_add(1, Ordering::Relaxed);
        {
            let mut cache = self.cache.write();
            if let Some(entry) = cache.get(&descriptor.id) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                METRICS.record_cache_hit();
                debug!(upload_id = %descriptor.id, "cache hit");
                return Ok(entry.clone());
            }
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        METRICS.record_cache_miss();
        debug!(upload_id = %descriptor.id, "cache miss");

        let layout = self.store.layout().clone();
        let owned = descriptor.clone();
        let workbook = task::spawn_blocking(move || {
            let bytes = layout.read_bytes(&owned)?;
            ParsedWorkbook::parse(&bytes).map_err(|err| {
                tracing::warn!(upload_id = %owned.id, error = %err, "stored workbook no longer parses");
                ReportError::FileNotFound {
                    upload_id: owned.id.to_string(),
                }
            })
        })
        .await??;
        let workbook = Arc::new(workbook);

        if self.cache_if_current(&descriptor.id, workbook.clone()) {
            debug!(upload_id = %descriptor.id, "upload loaded and cached");
        }
        Ok(workbook)
    }

    /// Caches a parsed upload unless it already left the history. The store
    /// check runs under the cache lock.
    fn cache_if_current(&self, upload_id: &UploadId, workbook: Arc<ParsedWorkbook>) -> bool {
        let cached = {
            let mut cache = self.cache.write();
            if self.store.get(upload_id).is_some() {
                cache.put(upload_id.clone(), workbook);
                true
            } else {
                false
            }
        };
        if cached {
            self.update_cache_metrics();
        } else {
            debug!(upload_id = %upload_id, "upload evicted before caching, not cached");
        }
        cached
    }

    /// Whether the persisted workbook still exists with its recorded size.
    pub async fn backing_file_present(&self, descriptor: &UploadDescriptor) -> bool {
        let path = self.store.layout().workbook_path(descriptor);
        tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file() && meta.len() == descriptor.bytes)
            .unwrap_or(false)
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
        self.update_cache_metrics();
    }

    /// Drops a parsed upload from memory; the next read goes back to disk.
    pub fn evict(&self, upload_id: &UploadId) {
        self.cache.write().pop(upload_id);
        self.update_cache_metrics();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.hits as f64 / self.operations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workbook_bytes() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let mut book = umya_spreadsheet::new_file();
        book.get_sheet_by_name_mut("Sheet1")
            .unwrap()
            .get_cell_mut("A1")
            .set_value("Tổng");
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::fs::read(path).unwrap()
    }

    fn state_with_history(root: &std::path::Path, history_limit: usize) -> AppState {
        let mut config = ServerConfig::with_storage_root(root);
        config.history_limit = history_limit;
        AppState::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn evicted_upload_never_takes_a_cache_slot() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_history(dir.path(), 1);
        let first = state
            .accept_upload("payroll", "a.xlsx", workbook_bytes())
            .await
            .unwrap();
        let second = state
            .accept_upload("payroll", "b.xlsx", workbook_bytes())
            .await
            .unwrap();
        assert!(state.store().get(&first.id).is_none());
        assert_eq!(state.cache_stats().size, 1);

        // a parse of the first upload finishing after its eviction
        let late = Arc::new(ParsedWorkbook::parse(&workbook_bytes()).unwrap());
        assert!(!state.cache_if_current(&first.id, late.clone()));
        assert_eq!(state.cache_stats().size, 1);

        assert!(state.cache_if_current(&second.id, late));
        assert_eq!(state.cache_stats().size, 1);
    }

    #[tokio::test]
    async fn reload_after_cache_clear_repopulates_current_upload() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_history(dir.path(), 5);
        let descriptor = state
            .accept_upload("payroll", "a.xlsx", workbook_bytes())
            .await
            .unwrap();
        state.clear_cache();
        assert_eq!(state.cache_stats().size, 0);

        state.open_upload(&descriptor.id).await.unwrap();
        assert_eq!(state.cache_stats().size, 1);
        assert_eq!(state.cache_stats().misses, 1);
    }
}
