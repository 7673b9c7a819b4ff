//! Incremental scan orchestration.
//!
//! A session reconciles the asset table with the library, re-queues assets
//! analyzed by an outdated algorithm, then walks pending assets in
//! (capture time, id) order after the persisted cursor. Each asset's
//! results and the advanced cursor commit in one transaction, so a stop or
//! crash loses at most the asset in flight.

pub mod signature;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::analysis::{self, BlurVerdict, Signals};
use crate::config::{BlurConfig, Config, ScannerConfig, SimilarityConfig};
use crate::db::{
    AssetRecord, AssetRepo, Database, DoneSignals, FaceRepo, GroupRepo, MetaRepo, NewAsset,
};
use crate::duplicates;
use crate::enrichment::{Enricher, EnrichmentOutcome};
use crate::error::{Error, Result};
use crate::library::LibraryProvider;

pub use signature::file_signature;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatus {
    pub total_pending: u64,
    pub total_done: u64,
    pub total_error: u64,
    pub current_batch: u64,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetOutcome {
    Analyzed {
        blurry: bool,
        group_id: Option<String>,
    },
    Failed {
        message: String,
    },
}

impl AssetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AssetOutcome::Analyzed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Progress(ScanStatus),
    AssetScanned {
        asset_id: String,
        outcome: AssetOutcome,
    },
    BatchComplete {
        batch: u64,
    },
    Completed,
    Failed {
        message: String,
    },
}

/// Counts from one library reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub new_assets: usize,
    pub changed_assets: usize,
}

/// Cloneable handle that requests a cooperative stop.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Clears the running flag when the session ends, however it ends.
pub(crate) struct Session<'a>(&'a AtomicBool);

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

type Events<'a> = Option<&'a mpsc::Sender<ScanEvent>>;

fn emit(events: Events<'_>, event: ScanEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

pub struct ScanEngine {
    db: Mutex<Database>,
    library: Arc<dyn LibraryProvider>,
    enricher: Enricher,
    scanner: ScannerConfig,
    blur: BlurConfig,
    similarity: SimilarityConfig,
    running: AtomicBool,
    stop_requested: Arc<AtomicBool>,
    current_batch: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ScanEngine {
    /// Wrap an already initialized database.
    pub fn new(
        db: Database,
        library: Arc<dyn LibraryProvider>,
        enricher: Enricher,
        config: &Config,
    ) -> Self {
        Self {
            db: Mutex::new(db),
            library,
            enricher,
            scanner: config.scanner.clone(),
            blur: config.blur.clone(),
            similarity: config.similarity.clone(),
            running: AtomicBool::new(false),
            stop_requested: Arc::new(AtomicBool::new(false)),
            current_batch: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Open and migrate the configured database.
    pub fn open(
        config: &Config,
        library: Arc<dyn LibraryProvider>,
        enricher: Enricher,
    ) -> Result<Self> {
        let mut db = Database::open(&config.db_path)?;
        db.initialize()?;
        Ok(Self::new(db, library, enricher, config))
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with the database locked.
    pub fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        f(&mut self.db())
    }

    pub(crate) fn begin_session(&self) -> Option<Session<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Session(&self.running))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Request a cooperative stop. The asset in flight still completes.
    pub fn stop(&self) {
        info!("Scan stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop_requested))
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_last_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = message;
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Sync with the library and process batches until no pending work is
    /// left or a stop is requested. A no-op while another session runs.
    pub fn start(&self, events: Events<'_>) -> Result<()> {
        let Some(_session) = self.begin_session() else {
            info!("Scan already running");
            return Ok(());
        };
        info!("Starting scan");
        self.stop_requested.store(false, Ordering::SeqCst);
        self.current_batch.store(0, Ordering::SeqCst);
        self.set_last_error(None);

        let result = self.run_to_completion(events);
        self.finish(result, events)
    }

    /// Process exactly one batch without syncing the library. A no-op while
    /// another session runs.
    pub fn resume_once(&self, events: Events<'_>) -> Result<()> {
        let Some(_session) = self.begin_session() else {
            info!("Scan already running");
            return Ok(());
        };
        info!("Resuming scan for one batch");
        self.stop_requested.store(false, Ordering::SeqCst);
        self.set_last_error(None);

        let result = (|| {
            self.reset_outdated()?;
            self.process_batch(events)?;
            self.report(events)
        })();
        self.finish(result, events)
    }

    fn finish(&self, result: Result<()>, events: Events<'_>) -> Result<()> {
        match &result {
            Ok(()) => {
                info!(batches = self.current_batch.load(Ordering::SeqCst), "Scan session finished");
                emit(events, ScanEvent::Completed);
            }
            Err(e) => {
                error!(error = %e, "Scan session failed");
                self.set_last_error(Some(e.to_string()));
                emit(events, ScanEvent::Failed { message: e.to_string() });
            }
        }
        result
    }

    fn run_to_completion(&self, events: Events<'_>) -> Result<()> {
        self.sync_library()?;
        self.pause();
        if self.stopping() {
            return Ok(());
        }
        self.reset_outdated()?;
        self.report(events)?;

        let mut new_generation = false;
        while !self.stopping() {
            let more = self.process_batch(events)?;
            self.report(events)?;
            if more {
                continue;
            }
            // Assets re-queued behind the cursor are only reachable from the
            // beginning.
            if !new_generation && !self.stopping() && self.has_pending_behind_cursor()? {
                info!("Pending assets behind the cursor; starting a new scan generation");
                self.db().meta().reset_scan_cursor()?;
                new_generation = true;
                continue;
            }
            break;
        }
        Ok(())
    }

    fn has_pending_behind_cursor(&self) -> Result<bool> {
        let db = self.db();
        if db.meta().scan_cursor()?.is_none() {
            return Ok(false);
        }
        Ok(db.assets().status_counts()?.pending > 0)
    }

    /// Insert newly seen library assets as pending and re-queue known assets
    /// whose file signature changed.
    pub fn sync_library(&self) -> Result<SyncSummary> {
        info!("Syncing library");
        let mut summary = SyncSummary::default();
        let mut after: Option<String> = None;

        loop {
            let page = self
                .library
                .list_assets(after.as_deref(), self.scanner.sync_page_size.max(1))?;

            let mut observed = Vec::with_capacity(page.assets.len());
            for asset in &page.assets {
                let signature = match self.library.resolve_path(&asset.id)? {
                    Some(path) => file_signature(&path),
                    None => String::new(),
                };
                observed.push(NewAsset {
                    asset_id: asset.id.clone(),
                    taken_at: asset.taken_at,
                    width: asset.width,
                    height: asset.height,
                    file_signature: signature,
                });
            }

            let (new_assets, changed_assets) = self.db().transaction(|conn| {
                let repo = AssetRepo::new(conn);
                let (mut new_assets, mut changed_assets) = (0, 0);
                for asset in &observed {
                    if repo.get(&asset.asset_id)?.is_some() {
                        let id = &asset.asset_id;
                        if repo.reset_if_signature_changed(id, &asset.file_signature)? {
                            debug!(asset_id = %id, "File changed; re-queued");
                            changed_assets += 1;
                        }
                    } else if repo.insert_pending(asset)? {
                        new_assets += 1;
                    }
                }
                Ok((new_assets, changed_assets))
            })?;
            summary.new_assets += new_assets;
            summary.changed_assets += changed_assets;

            self.pause();
            match page.next {
                Some(next) if !page.assets.is_empty() && !self.stopping() => after = Some(next),
                _ => break,
            }
        }

        info!(
            new = summary.new_assets,
            changed = summary.changed_assets,
            "Library sync complete"
        );
        Ok(summary)
    }

    /// Re-queue done assets analyzed by an algorithm older than the stored
    /// global version.
    fn reset_outdated(&self) -> Result<usize> {
        let db = self.db();
        let version = db.meta().global_algo_version()?;
        let reset = db.assets().reset_outdated(version)?;
        if reset > 0 {
            info!(reset, version, "Re-queued outdated assets");
        }
        Ok(reset)
    }

    /// Process one batch after the cursor. Returns false when there was
    /// nothing to do or a stop was requested.
    fn process_batch(&self, events: Events<'_>) -> Result<bool> {
        let batch = {
            let db = self.db();
            let cursor = db.meta().scan_cursor()?;
            db.assets()
                .pending_batch(cursor.as_ref(), self.scanner.batch_size.max(1))?
        };
        if batch.is_empty() {
            return Ok(false);
        }

        let batch_no = self.current_batch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(batch = batch_no, size = batch.len(), "Processing batch");

        for asset in &batch {
            if self.stopping() {
                info!(asset_id = %asset.asset_id, "Stopping before next asset");
                return Ok(false);
            }
            let outcome = self.process_asset(asset)?;
            emit(
                events,
                ScanEvent::AssetScanned {
                    asset_id: asset.asset_id.clone(),
                    outcome,
                },
            );
            self.pause();
        }

        emit(events, ScanEvent::BatchComplete { batch: batch_no });
        Ok(!self.stopping())
    }

    /// Analyze one asset and commit its results together with the cursor.
    /// Analysis failures are recorded on the asset; persistence failures are
    /// returned.
    fn process_asset(&self, asset: &AssetRecord) -> Result<AssetOutcome> {
        let cursor = asset.cursor();

        let (signals, enrichment) = match self.analyze(asset) {
            Ok(analyzed) => analyzed,
            Err(e) => {
                let message = e.to_string();
                warn!(asset_id = %asset.asset_id, error = %message, "Asset analysis failed");
                self.db().transaction(|conn| {
                    AssetRepo::new(conn).mark_error(&asset.asset_id, &message)?;
                    MetaRepo::new(conn).set_scan_cursor(&cursor)
                })?;
                return Ok(AssetOutcome::Failed { message });
            }
        };

        let verdict: BlurVerdict =
            analysis::classify(signals.sharpness, signals.mean_luma, &self.blur);
        let phash = signals.phash.to_hex();
        let labels_json = match &enrichment {
            Some(outcome) => outcome.labels_json()?,
            None => None,
        };

        let group_id = self.db().transaction(|conn| {
            let assets = AssetRepo::new(conn);
            duplicates::detach(conn, &asset.asset_id)?;
            assets.mark_done(
                &asset.asset_id,
                &DoneSignals {
                    blur_score: signals.sharpness,
                    mean_luma: signals.mean_luma,
                    phash: &phash,
                    algo_version: MetaRepo::new(conn).global_algo_version()?,
                },
            )?;
            if let Some(outcome) = &enrichment {
                assets.set_enrichment(
                    &asset.asset_id,
                    outcome.face_count(),
                    labels_json.as_deref(),
                )?;
                FaceRepo::new(conn).replace_face_instances(&asset.asset_id, &outcome.faces)?;
            }

            let matches = analysis::find_matches(
                &assets,
                &signals.phash,
                asset.taken_at,
                Some(&asset.asset_id),
                &self.similarity,
            )?;
            let group_id = duplicates::assign(conn, &asset.asset_id, &matches)?;
            MetaRepo::new(conn).set_scan_cursor(&cursor)?;
            Ok(group_id)
        })?;

        debug!(
            asset_id = %asset.asset_id,
            sharpness = signals.sharpness,
            blurry = verdict.is_blurry,
            group = ?group_id,
            "Asset analyzed"
        );
        Ok(AssetOutcome::Analyzed {
            blurry: verdict.is_blurry,
            group_id,
        })
    }

    /// Everything that touches the file. Runs without the database lock.
    fn analyze(&self, asset: &AssetRecord) -> Result<(Signals, Option<EnrichmentOutcome>)> {
        let path: PathBuf = self
            .library
            .resolve_path(&asset.asset_id)
            .map_err(|e| Error::AssetUnavailable(format!("{}: {}", asset.asset_id, e)))?
            .ok_or_else(|| Error::AssetUnavailable(asset.asset_id.clone()))?;

        let signals = analysis::extract_signals(&path)?;
        let enrichment = self.enricher.enrich(&path, asset.width);
        Ok((signals, enrichment))
    }

    fn report(&self, events: Events<'_>) -> Result<()> {
        let status = self.status()?;
        debug!(
            pending = status.total_pending,
            done = status.total_done,
            error = status.total_error,
            "Scan progress"
        );
        emit(events, ScanEvent::Progress(status));
        Ok(())
    }

    /// Yield between assets, sleeping when throttling is configured.
    fn pause(&self) {
        if self.scanner.throttle_ms > 0 {
            thread::sleep(Duration::from_millis(self.scanner.throttle_ms));
        } else {
            thread::yield_now();
        }
    }

    pub fn status(&self) -> Result<ScanStatus> {
        let counts = self.db().assets().status_counts()?;
        Ok(ScanStatus {
            total_pending: counts.pending,
            total_done: counts.done,
            total_error: counts.error,
            current_batch: self.current_batch.load(Ordering::SeqCst),
            is_running: self.is_running(),
        })
    }

    /// Restart incremental scanning from the beginning.
    pub fn reset_cursor(&self) -> Result<()> {
        self.db().meta().reset_scan_cursor()?;
        info!("Scan cursor reset");
        Ok(())
    }

    /// Clear the cursor, every asset's progress, all duplicate groups and
    /// stored faces. Waits for a running session to stop first.
    pub fn reset_all_progress(&self) -> Result<()> {
        if self.is_running() {
            self.stop();
            while self.is_running() {
                thread::sleep(Duration::from_millis(10));
            }
        }
        self.db().transaction(|conn| {
            MetaRepo::new(conn).reset_scan_cursor()?;
            AssetRepo::new(conn).reset_all()?;
            duplicates::delete_all(conn)?;
            FaceRepo::new(conn).clear_faces()
        })?;
        self.current_batch.store(0, Ordering::SeqCst);
        info!("All scan progress reset");
        Ok(())
    }

    /// Re-elect the best shot of every group. Returns how many changed.
    pub fn recalculate_all_best_shots(&self) -> Result<usize> {
        let changed = self.db().transaction(|conn| analysis::recalculate_all(conn))?;
        info!(changed, "Best shots recalculated");
        Ok(changed)
    }

    /// Fold `source` into `target`. Both groups must exist.
    pub fn merge_groups(&self, target: &str, source: &str) -> Result<usize> {
        self.db().transaction(|conn| {
            let groups = GroupRepo::new(conn);
            for id in [target, source] {
                if groups.get_group(id)?.is_none() {
                    return Err(Error::UnknownGroup(id.to_string()));
                }
            }
            duplicates::merge_groups(conn, target, source)
        })
    }

    /// Done assets currently classified as blurry, blurriest first.
    pub fn blurry_assets(&self, limit: usize) -> Result<Vec<(AssetRecord, BlurVerdict)>> {
        analysis::list_blurry(&self.db().assets(), &self.blur, limit)
    }

    /// Delete assets through the library, drop them from their duplicate
    /// groups and tombstone their rows so they never match again. Returns how
    /// many the library removed.
    pub fn delete_assets(&self, asset_ids: &[String]) -> Result<usize> {
        let deleted = self.library.delete_assets(asset_ids)?;
        self.db().transaction(|conn| {
            let assets = AssetRepo::new(conn);
            for id in asset_ids {
                assets.mark_deleted(id)?;
                if let Some(group_id) = duplicates::detach(conn, id)? {
                    debug!(
                        asset_id = %id,
                        group_id = %group_id,
                        "Removed deleted asset from group"
                    );
                }
            }
            Ok(())
        })?;
        info!(requested = asset_ids.len(), deleted, "Assets deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AssetStatus, ALGO_VERSION};
    use crate::enrichment::test_support::FakeEnrichment;
    use crate::config::EnrichmentConfig;
    use crate::library::test_support::MemoryLibrary;
    use crate::library::AssetPage;
    use image::{DynamicImage, ImageBuffer, Luma};
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const FAR: i64 = 10_000_000;

    fn write_rising(path: &Path) {
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(64, 64, |x, _| Luma([(x * 4) as u8])))
            .save(path)
            .unwrap();
    }

    fn write_falling(path: &Path) {
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(64, 64, |x, _| Luma([255 - (x * 4) as u8])))
            .save(path)
            .unwrap();
    }

    struct Fixture {
        dir: TempDir,
        library: Arc<MemoryLibrary>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                library: Arc::new(MemoryLibrary::default()),
            }
        }

        fn add(&self, id: &str, taken_at: Option<i64>, rising: bool) -> PathBuf {
            let path = self.dir.path().join(format!("{}.png", id));
            if rising {
                write_rising(&path);
            } else {
                write_falling(&path);
            }
            self.library.add(id, taken_at, path.clone());
            path
        }

        fn add_spaced(&self, count: usize) -> Vec<String> {
            (1..=count)
                .map(|i| {
                    let id = format!("a{:02}", i);
                    self.add(&id, Some(i as i64 * FAR), i % 2 == 0);
                    id
                })
                .collect()
        }

        fn engine_with(
            &self,
            library: Arc<dyn LibraryProvider>,
            batch_size: usize,
            enricher: Enricher,
        ) -> ScanEngine {
            let mut config = Config::default();
            config.scanner.batch_size = batch_size;
            config.scanner.sync_page_size = 3;
            ScanEngine::new(crate::db::test_db(), library, enricher, &config)
        }

        fn engine(&self, batch_size: usize) -> ScanEngine {
            self.engine_with(self.library.clone(), batch_size, Enricher::disabled())
        }
    }

    fn scanned(rx: &mpsc::Receiver<ScanEvent>) -> Vec<String> {
        rx.try_iter()
            .filter_map(|e| match e {
                ScanEvent::AssetScanned { asset_id, .. } => Some(asset_id),
                _ => None,
            })
            .collect()
    }

    fn record(engine: &ScanEngine, id: &str) -> AssetRecord {
        engine.with_db(|db| db.assets().get(id)).unwrap().unwrap()
    }

    #[test]
    fn test_full_scan_groups_near_duplicates() {
        let fx = Fixture::new();
        fx.add("burst1", Some(1_000), true);
        fx.add("burst2", Some(2_000), true);
        fx.add("other", Some(3_000), false);
        fx.add("later", Some(FAR), true);
        let engine = fx.engine(20);
        let (tx, rx) = mpsc::channel();

        engine.start(Some(&tx)).unwrap();

        let status = engine.status().unwrap();
        assert_eq!((status.total_done, status.total_pending, status.total_error), (4, 0, 0));
        assert!(!status.is_running);

        let groups = engine.with_db(|db| db.groups().all_groups()).unwrap();
        assert_eq!(groups.len(), 1);
        let members: Vec<String> = engine
            .with_db(|db| db.groups().members(&groups[0].group_id))
            .unwrap()
            .into_iter()
            .map(|m| m.asset_id)
            .collect();
        assert_eq!(members, vec!["burst1", "burst2"]);
        assert!(engine.with_db(|db| db.groups().group_of("other")).unwrap().is_none());
        assert!(engine.with_db(|db| db.groups().group_of("later")).unwrap().is_none());

        let cursor = engine.with_db(|db| db.meta().scan_cursor()).unwrap().unwrap();
        assert_eq!(cursor.asset_id, "later");

        let events: Vec<ScanEvent> = rx.try_iter().collect();
        assert!(matches!(events.last(), Some(ScanEvent::Completed)));
        assert!(events.iter().any(|e| matches!(e, ScanEvent::BatchComplete { batch: 1 })));
        assert!(events.iter().any(|e| matches!(e, ScanEvent::Progress(_))));
        assert_eq!(record(&engine, "burst1").algo_version, Some(ALGO_VERSION));
    }

    /// Library that requests a stop while the trigger asset is resolved.
    struct StopOn {
        inner: Arc<MemoryLibrary>,
        trigger: String,
        handle: Mutex<Option<StopHandle>>,
    }

    impl LibraryProvider for StopOn {
        fn list_assets(&self, after: Option<&str>, limit: usize) -> Result<AssetPage> {
            self.inner.list_assets(after, limit)
        }

        fn resolve_path(&self, asset_id: &str) -> Result<Option<PathBuf>> {
            if asset_id == self.trigger {
                if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                    handle.stop();
                }
            }
            self.inner.resolve_path(asset_id)
        }

        fn delete_assets(&self, asset_ids: &[String]) -> Result<usize> {
            self.inner.delete_assets(asset_ids)
        }
    }

    #[test]
    fn test_stop_mid_batch_then_resume() {
        let fx = Fixture::new();
        let ids = fx.add_spaced(20);
        let library = Arc::new(StopOn {
            inner: fx.library.clone(),
            trigger: ids[6].clone(),
            handle: Mutex::new(None),
        });
        let engine = fx.engine_with(library.clone(), 20, Enricher::disabled());
        let (tx, rx) = mpsc::channel();

        // Sync resolves every asset; arm the trigger only for the batch.
        engine.sync_library().unwrap();
        *library.handle.lock().unwrap() = Some(engine.stop_handle());
        engine.resume_once(Some(&tx)).unwrap();

        assert_eq!(scanned(&rx), ids[..7].to_vec());
        let cursor = engine.with_db(|db| db.meta().scan_cursor()).unwrap().unwrap();
        assert_eq!(cursor.asset_id, ids[6]);
        assert_eq!(engine.status().unwrap().total_done, 7);

        *library.handle.lock().unwrap() = None;
        engine.start(Some(&tx)).unwrap();
        assert_eq!(scanned(&rx), ids[7..].to_vec());
        assert_eq!(engine.status().unwrap().total_done, 20);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let fx = Fixture::new();
        fx.add_spaced(5);
        let engine = fx.engine(2);
        engine.start(None).unwrap();
        let before = record(&engine, "a03");

        let (tx, rx) = mpsc::channel();
        engine.reset_cursor().unwrap();
        engine.start(Some(&tx)).unwrap();

        assert!(scanned(&rx).is_empty());
        assert_eq!(record(&engine, "a03"), before);
    }

    #[test]
    fn test_algo_version_bump_requeues_done_assets() {
        let fx = Fixture::new();
        fx.add_spaced(4);
        let engine = fx.engine(10);
        engine.start(None).unwrap();

        engine
            .with_db(|db| db.meta().set_global_algo_version(ALGO_VERSION + 1))
            .unwrap();
        let (tx, rx) = mpsc::channel();
        // Cursor sits at the end; the re-queued assets need a new generation.
        engine.start(Some(&tx)).unwrap();

        assert_eq!(scanned(&rx).len(), 4);
        assert_eq!(record(&engine, "a01").algo_version, Some(ALGO_VERSION + 1));
        assert_eq!(engine.status().unwrap().total_pending, 0);
    }

    #[test]
    fn test_file_change_requeues_asset() {
        let fx = Fixture::new();
        fx.add_spaced(3);
        let engine = fx.engine(10);
        engine.start(None).unwrap();

        // Different content and size.
        let path = fx.dir.path().join("a02.png");
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(100, 80, |x, y| {
            Luma([((x * y) % 256) as u8])
        }))
        .save(&path)
        .unwrap();

        let (tx, rx) = mpsc::channel();
        engine.start(Some(&tx)).unwrap();
        assert_eq!(scanned(&rx), vec!["a02".to_string()]);
    }

    #[test]
    fn test_corrupt_asset_is_recorded_not_fatal() {
        let fx = Fixture::new();
        fx.add("good", Some(1_000), true);
        let broken = fx.dir.path().join("broken.jpg");
        std::fs::write(&broken, b"definitely not a jpeg").unwrap();
        fx.library.add("broken", Some(FAR), broken);
        fx.library.add("missing", Some(2 * FAR), fx.dir.path().join("nowhere.png"));
        let engine = fx.engine(10);
        let (tx, rx) = mpsc::channel();

        engine.start(Some(&tx)).unwrap();

        let status = engine.status().unwrap();
        assert_eq!((status.total_done, status.total_error), (1, 2));
        let broken = record(&engine, "broken");
        assert_eq!(broken.status, AssetStatus::Error);
        assert!(broken.error_message.unwrap().contains("broken.jpg"));

        let failed = rx
            .try_iter()
            .filter(|e| {
                matches!(e, ScanEvent::AssetScanned { outcome, .. } if !outcome.is_success())
            })
            .count();
        assert_eq!(failed, 2);
        assert_eq!(engine.last_error(), None);
    }

    #[test]
    fn test_library_failure_is_fatal() {
        let fx = Fixture::new();
        fx.add_spaced(2);
        fx.library
            .fail_listing
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let engine = fx.engine(10);
        let (tx, rx) = mpsc::channel();

        let result = engine.start(Some(&tx));
        assert!(matches!(result, Err(Error::LibraryFailure(_))));
        assert!(engine.last_error().unwrap().contains("permission"));
        assert!(!engine.is_running());
        assert!(matches!(rx.try_iter().last(), Some(ScanEvent::Failed { .. })));
    }

    #[test]
    fn test_start_is_noop_while_running() {
        let fx = Fixture::new();
        fx.add_spaced(3);
        let engine = fx.engine(10);

        let session = engine.begin_session().unwrap();
        engine.start(None).unwrap();
        engine.resume_once(None).unwrap();
        assert_eq!(engine.status().unwrap().total_pending, 0);
        assert_eq!(engine.status().unwrap().total_done, 0);
        assert!(engine.status().unwrap().is_running);

        drop(session);
        assert!(!engine.is_running());
        engine.start(None).unwrap();
        assert_eq!(engine.status().unwrap().total_done, 3);
    }

    #[test]
    fn test_resume_once_processes_one_batch() {
        let fx = Fixture::new();
        fx.add_spaced(5);
        let engine = fx.engine(2);
        engine.sync_library().unwrap();

        engine.resume_once(None).unwrap();
        let status = engine.status().unwrap();
        assert_eq!((status.total_done, status.total_pending), (2, 3));
        assert_eq!(status.current_batch, 1);
    }

    #[test]
    fn test_reset_all_progress() {
        let fx = Fixture::new();
        fx.add("a", Some(1_000), true);
        fx.add("b", Some(2_000), true);
        let engine = fx.engine(10);
        engine.start(None).unwrap();
        assert_eq!(engine.with_db(|db| db.groups().all_groups()).unwrap().len(), 1);

        engine.reset_all_progress().unwrap();
        let status = engine.status().unwrap();
        assert_eq!((status.total_pending, status.total_done), (2, 0));
        assert!(engine.with_db(|db| db.groups().all_groups()).unwrap().is_empty());
        assert!(engine.with_db(|db| db.meta().scan_cursor()).unwrap().is_none());
    }

    #[test]
    fn test_reanalysis_does_not_duplicate_membership() {
        let fx = Fixture::new();
        fx.add("a", Some(1_000), true);
        fx.add("b", Some(2_000), true);
        let engine = fx.engine(10);
        engine.start(None).unwrap();

        engine
            .with_db(|db| db.meta().set_global_algo_version(ALGO_VERSION + 1))
            .unwrap();
        engine.start(None).unwrap();

        let groups = engine.with_db(|db| db.groups().all_groups()).unwrap();
        assert_eq!(groups.len(), 1);
        let members = engine.with_db(|db| db.groups().members(&groups[0].group_id)).unwrap();
        assert_eq!(members.len(), 2);
        let best = groups[0].best_asset_id.clone().unwrap();
        assert!(members.iter().any(|m| m.asset_id == best));
    }

    #[test]
    fn test_failing_enrichment_trips_breaker_but_scan_succeeds() {
        let fx = Fixture::new();
        fx.add_spaced(6);
        let config = EnrichmentConfig { enabled: true, ..EnrichmentConfig::default() };
        let enricher = Enricher::new(Arc::new(FakeEnrichment::failing()), config);
        let engine = fx.engine_with(fx.library.clone(), 10, enricher);

        engine.start(None).unwrap();
        assert_eq!(engine.status().unwrap().total_done, 6);
        assert!(engine.enricher().breaker().is_open());
    }

    #[test]
    fn test_blurry_listing_and_recalc() {
        let fx = Fixture::new();
        fx.add("a", Some(1_000), true);
        fx.add("b", Some(2_000), true);
        let engine = fx.engine(10);
        engine.start(None).unwrap();

        // Smooth gradients have almost no edge energy.
        let blurry = engine.blurry_assets(10).unwrap();
        assert_eq!(blurry.len(), 2);
        assert_eq!(engine.recalculate_all_best_shots().unwrap(), 0);
    }

    #[test]
    fn test_delete_assets_leaves_groups_consistent() {
        let fx = Fixture::new();
        fx.add("a", Some(1_000), true);
        fx.add("b", Some(2_000), true);
        fx.add("c", Some(3_000), true);
        let engine = fx.engine(10);
        engine.start(None).unwrap();
        let group_id = engine.with_db(|db| db.groups().group_of("a")).unwrap().unwrap();

        assert_eq!(engine.delete_assets(&["c".to_string()]).unwrap(), 1);
        let members = engine.with_db(|db| db.groups().members(&group_id)).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.asset_id != "c"));

        engine.delete_assets(&["a".to_string(), "b".to_string()]).unwrap();
        assert!(engine.with_db(|db| db.groups().get_group(&group_id)).unwrap().is_none());
        assert_eq!(record(&engine, "a").status, AssetStatus::Deleted);
    }

    #[test]
    fn test_deleted_asset_stays_out_after_rescan() {
        let fx = Fixture::new();
        fx.add("a", Some(1_000), true);
        let b = fx.add("b", Some(2_000), true);
        fx.add("c", Some(3_000), true);
        let engine = fx.engine(10);
        engine.start(None).unwrap();
        engine.delete_assets(&["c".to_string()]).unwrap();

        // Same gradient at a new size: the file changes, the hash does not.
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(128, 128, |x, _| Luma([(x * 2) as u8])))
            .save(&b)
            .unwrap();
        engine.start(None).unwrap();

        assert_eq!(record(&engine, "b").status, AssetStatus::Done);
        let group_id = engine.with_db(|db| db.groups().group_of("b")).unwrap().unwrap();
        let mut members: Vec<String> = engine
            .with_db(|db| db.groups().members(&group_id))
            .unwrap()
            .into_iter()
            .map(|m| m.asset_id)
            .collect();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
        assert!(engine.with_db(|db| db.groups().group_of("c")).unwrap().is_none());
        assert_eq!(record(&engine, "c").status, AssetStatus::Deleted);
    }
}
