//! The indexing worker: a cooperative state machine draining the file queue,
//! then the directory queue, then the module roster, yielding between items.

pub mod store;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::crawler::Crawler;
use crate::db::{Param, Value};
use crate::error::Result;
use crate::module::{ChangeEvent, Extraction, ExtractorMap};

pub use store::ServiceStore;

/// Batch size the pending dispatcher hands over per tick.
pub const FILES_QUEUE_PROCESS_MAX: usize = 5000;
/// Dispatcher tick interval.
pub const FILES_QUEUE_PROCESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub module: String,
    pub path: PathBuf,
}

#[derive(Default)]
struct Queues {
    file_queue: VecDeque<PathInfo>,
    dir_queue: VecDeque<PathInfo>,
    module_cursor: usize,
}

pub struct Indexer {
    store: Arc<ServiceStore>,
    crawler: Arc<Crawler>,
    extractors: ExtractorMap,
    roster: Vec<String>,
    queues: Mutex<Queues>,
    running: AtomicBool,
    paused: AtomicBool,
    shutdown: AtomicBool,
    finished: broadcast::Sender<()>,
    initial_sleep: Duration,
}

impl Indexer {
    pub fn new(
        store: Arc<ServiceStore>,
        crawler: Arc<Crawler>,
        extractors: ExtractorMap,
        roster: Vec<String>,
        initial_sleep: Duration,
    ) -> Arc<Self> {
        let (finished, _) = broadcast::channel(4);
        Arc::new(Indexer {
            store,
            crawler,
            extractors,
            roster,
            queues: Mutex::new(Queues::default()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            finished,
            initial_sleep,
        })
    }

    pub fn store(&self) -> &Arc<ServiceStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    /// Stop taking new steps; in-flight database work still completes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn subscribe_finished(&self) -> broadcast::Receiver<()> {
        self.finished.subscribe()
    }

    pub fn add_file(&self, info: PathInfo) {
        self.queues.lock().unwrap().file_queue.push_back(info);
    }

    pub fn add_directory(&self, info: PathInfo) {
        self.queues.lock().unwrap().dir_queue.push_back(info);
    }

    /// Persist queued paths into the cache database so a pause or shutdown
    /// does not lose the backlog.
    pub async fn flush_pending(&self) -> Result<()> {
        let drained: Vec<PathInfo> = {
            let mut queues = self.queues.lock().unwrap();
            queues.file_queue.drain(..).collect()
        };
        let iface = self.cache_iface();
        for info in drained {
            iface
                .exec_proc(
                    "InsertPendingFile",
                    vec![
                        Param::text(info.path.to_string_lossy().as_ref()),
                        Param::text(&info.module),
                        Param::Int(0),
                        Param::Null,
                        Param::Int(0),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Reload a persisted backlog, at most one dispatcher batch.
    pub async fn load_pending(&self) -> Result<usize> {
        let iface = self.cache_iface();
        let rs = iface.exec_proc("GetPendingFiles", vec![]).await?;
        let mut max_id = 0i64;
        let mut count = 0usize;
        for row in rs.rows() {
            let Some(id) = row.first().and_then(Value::as_int) else {
                continue;
            };
            let Some(uri) = row.get(1).and_then(Value::as_text) else {
                continue;
            };
            let module = row
                .get(2)
                .and_then(Value::as_text)
                .unwrap_or("files")
                .to_string();
            self.add_file(PathInfo {
                module,
                path: PathBuf::from(uri),
            });
            max_id = max_id.max(id);
            count += 1;
        }
        if count > 0 {
            iface
                .exec_proc("RemovePendingFiles", vec![Param::Int(max_id)])
                .await?;
            let remaining = iface
                .exec_proc("CountPendingFiles", vec![])
                .await?
                .first_int()
                .unwrap_or(0);
            if remaining > 0 {
                tracing::info!("{remaining} pending files left for later batches");
            }
        }
        Ok(count)
    }

    fn cache_iface(&self) -> Arc<crate::db::DbInterface> {
        // PendingFiles lives in the cache database, attached to the meta
        // handle
        self.store_db().meta_for(crate::ontology::DbKind::File)
    }

    fn store_db(&self) -> &Arc<crate::db::DbManager> {
        self.store.db()
    }

    /// React to a watcher-reported change.
    pub async fn apply_change(&self, event: ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => {
                if !self.crawler.should_ignore(&path) {
                    self.add_file(PathInfo {
                        module: "files".to_string(),
                        path,
                    });
                }
            }
            ChangeEvent::Deleted(path) => {
                if let Some(row) = self.store.service_by_uri(&path).await? {
                    self.store.delete_service(row.id).await?;
                }
            }
            ChangeEvent::Moved { from, to } => {
                self.store.move_service(&from, &to).await?;
            }
        }
        Ok(())
    }

    async fn process_file(&self, info: &PathInfo) -> Result<()> {
        let Some(extractor) = self.extractors.get(&info.module) else {
            tracing::warn!("no extractor for module {}", info.module);
            return Ok(());
        };

        tracing::debug!("processing file {}", info.path.display());

        let extraction = match extractor.extract(&info.path).await {
            Ok(extraction) => extraction,
            Err(e) => {
                // extraction failures still record an empty service
                tracing::info!("extraction failed for {}: {e}", info.path.display());
                Extraction {
                    service_type: "Other".to_string(),
                    ..Extraction::default()
                }
            }
        };

        match self.store.service_by_uri(&info.path).await? {
            Some(existing) => {
                let stored = self.store.stored_mtime(&info.path).await?;
                if extraction.info.mtime != 0 && stored == Some(extraction.info.mtime) {
                    tracing::debug!("{} unchanged, skipped", info.path.display());
                    return Ok(());
                }
                self.store
                    .update_service(existing.id, &info.path, &extraction)
                    .await?;
            }
            None => {
                self.store.create_service(&info.path, &extraction).await?;
            }
        }
        Ok(())
    }

    async fn process_directory(&self, info: &PathInfo) {
        tracing::debug!("processing directory {}", info.path.display());
        for entry in self.crawler.enumerate_directory(&info.path).await {
            self.add_file(PathInfo {
                module: info.module.clone(),
                path: entry.path.clone(),
            });
            if entry.is_dir {
                self.add_directory(PathInfo {
                    module: info.module.clone(),
                    path: entry.path,
                });
            }
        }
    }

    fn enqueue_next_module(&self) -> bool {
        let module = {
            let mut queues = self.queues.lock().unwrap();
            let Some(module) = self.roster.get(queues.module_cursor) else {
                return false;
            };
            queues.module_cursor += 1;
            module.clone()
        };

        tracing::info!("starting module {module}");
        if let Some(extractor) = self.extractors.get(&module) {
            for root in extractor.directories() {
                self.add_directory(PathInfo {
                    module: module.clone(),
                    path: root,
                });
            }
        } else {
            tracing::warn!("module {module} has no extractor, skipped");
        }
        true
    }

    /// The worker loop. File work drains before directory scans, directory
    /// scans before a new module starts.
    pub async fn run(self: Arc<Self>) {
        if !self.initial_sleep.is_zero() {
            tokio::time::sleep(self.initial_sleep).await;
        }
        self.running.store(true, Ordering::SeqCst);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let next_file = self.queues.lock().unwrap().file_queue.pop_front();
            if let Some(info) = next_file {
                if let Err(e) = self.process_file(&info).await {
                    tracing::warn!("indexing {} failed: {e}", info.path.display());
                }
                tokio::task::yield_now().await;
                continue;
            }

            let next_dir = self.queues.lock().unwrap().dir_queue.pop_front();
            if let Some(info) = next_dir {
                self.process_directory(&info).await;
                tokio::task::yield_now().await;
                continue;
            }

            if !self.enqueue_next_module() {
                break;
            }
            tokio::task::yield_now().await;
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("indexer finished");
        let _ = self.finished.send(());
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Periodically hand crawled paths to the worker, at most
    /// [`FILES_QUEUE_PROCESS_MAX`] per tick, skipping ticks while the worker
    /// is paused or stopped.
    pub fn spawn_pending_dispatcher(
        self: &Arc<Self>,
        mut intake: tokio::sync::mpsc::UnboundedReceiver<PathInfo>,
    ) -> tokio::task::JoinHandle<()> {
        let indexer = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FILES_QUEUE_PROCESS_INTERVAL);
            loop {
                interval.tick().await;
                if indexer.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if !indexer.is_running() {
                    tracing::debug!("pending dispatcher: indexer not running, skipping tick");
                    continue;
                }
                let mut handed = 0;
                while handed < FILES_QUEUE_PROCESS_MAX {
                    match intake.try_recv() {
                        Ok(info) => {
                            indexer.add_file(info);
                            handed += 1;
                        }
                        Err(_) => break,
                    }
                }
                if handed > 0 {
                    tracing::debug!("pending dispatcher: handed {handed} files to the indexer");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlingConfig;
    use crate::db::manager::{DbManager, DbPaths};
    use crate::index::WordIndex;
    use crate::module::{FsExtractor, MetadataExtractor};
    use crate::ontology::{DbKind, Ontology};
    use crate::text::WordParseConfig;

    struct Fixture {
        _db_dir: tempfile::TempDir,
        // crawled trees live outside /tmp, which the crawler ignores
        tree: tempfile::TempDir,
        ontology: Arc<Ontology>,
        db: Arc<DbManager>,
        store: Arc<ServiceStore>,
    }

    async fn fixture() -> Fixture {
        let db_dir = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir_in(".").unwrap();
        let ontology = Arc::new(Ontology::with_defaults());
        let db = Arc::new(
            DbManager::open(&DbPaths::single_dir(db_dir.path()), false, &ontology, None)
                .await
                .unwrap(),
        );
        let store = Arc::new(ServiceStore::new(
            Arc::clone(&ontology),
            Arc::clone(&db),
            WordParseConfig::default(),
            0,
            true,
        ));
        Fixture {
            _db_dir: db_dir,
            tree,
            ontology,
            db,
            store,
        }
    }

    fn indexer_for(f: &Fixture) -> Arc<Indexer> {
        let crawler = Arc::new(Crawler::new(&CrawlingConfig::default()));
        let mut extractors = ExtractorMap::new();
        let fs: Arc<dyn MetadataExtractor> = Arc::new(FsExtractor::new(
            Arc::clone(&f.ontology),
            vec![f.tree.path().canonicalize().unwrap()],
        ));
        extractors.insert("files".to_string(), fs);
        Indexer::new(
            Arc::clone(&f.store),
            crawler,
            extractors,
            vec!["files".to_string()],
            Duration::from_secs(0),
        )
    }

    async fn service_count(f: &Fixture) -> i64 {
        let meta = f.db.meta_for(DbKind::File);
        meta.query("SELECT count(*) FROM Services", vec![])
            .await
            .unwrap()
            .first_int()
            .unwrap()
    }

    #[tokio::test]
    async fn crawl_indexes_tree_and_skips_ignored() {
        let f = fixture().await;
        std::fs::create_dir(f.tree.path().join("sub")).unwrap();
        std::fs::write(f.tree.path().join("notes.txt"), "hello world hello\n").unwrap();
        std::fs::write(f.tree.path().join("sub/more.txt"), "deeper hello\n").unwrap();
        std::fs::write(f.tree.path().join("skip.o"), "object code").unwrap();
        std::fs::write(f.tree.path().join(".hidden"), "dotfile").unwrap();

        let indexer = indexer_for(&f);
        let mut finished = indexer.subscribe_finished();
        let _task = indexer.spawn();
        finished.recv().await.unwrap();

        // notes.txt, sub (folder), sub/more.txt
        assert_eq!(service_count(&f).await, 3);

        let meta = f.db.meta_for(DbKind::File);
        let rs = meta
            .query(
                "SELECT Name, IsDirectory FROM Services ORDER BY Name",
                vec![],
            )
            .await
            .unwrap();
        let names: Vec<String> = rs
            .rows()
            .iter()
            .filter_map(|r| r.first().and_then(crate::db::Value::as_text))
            .map(str::to_string)
            .collect();
        assert_eq!(names, vec!["more.txt", "notes.txt", "sub"]);

        // full text made it into the word index with per-occurrence scores
        let index = WordIndex::new(f.db.meta_for(DbKind::File));
        let hello = index.get_hits("hello").await.unwrap();
        assert_eq!(hello.len(), 2);
    }

    #[tokio::test]
    async fn reindexing_unchanged_tree_is_idempotent() {
        let f = fixture().await;
        std::fs::write(f.tree.path().join("stable.txt"), "same words same\n").unwrap();

        let indexer = indexer_for(&f);
        let mut finished = indexer.subscribe_finished();
        let _task = indexer.spawn();
        finished.recv().await.unwrap();

        let index = WordIndex::new(f.db.meta_for(DbKind::File));
        let first = index.get_hits("same").await.unwrap();
        assert_eq!(first.len(), 1);
        let first_score = first[0].score;
        assert_eq!(service_count(&f).await, 1);

        // second pass sees the same mtime and leaves the row alone
        let indexer = indexer_for(&f);
        let mut finished = indexer.subscribe_finished();
        let _task = indexer.spawn();
        finished.recv().await.unwrap();

        let second = index.get_hits("same").await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].score, first_score);
        assert_eq!(service_count(&f).await, 1);
    }

    #[tokio::test]
    async fn change_events_flow_through_apply_change() {
        let f = fixture().await;
        let path = f.tree.path().canonicalize().unwrap().join("live.txt");
        std::fs::write(&path, "watched file\n").unwrap();

        let indexer = indexer_for(&f);
        indexer
            .apply_change(ChangeEvent::Created(path.clone()))
            .await
            .unwrap();
        // queued, not yet processed
        assert_eq!(service_count(&f).await, 0);

        // process the queued file directly
        let info = PathInfo {
            module: "files".to_string(),
            path: path.clone(),
        };
        indexer.process_file(&info).await.unwrap();
        assert_eq!(service_count(&f).await, 1);

        let moved = path.with_file_name("renamed.txt");
        std::fs::rename(&path, &moved).unwrap();
        indexer
            .apply_change(ChangeEvent::Moved {
                from: path.clone(),
                to: moved.clone(),
            })
            .await
            .unwrap();
        let row = f.store.service_by_uri(&moved).await.unwrap();
        assert!(row.is_some());

        indexer
            .apply_change(ChangeEvent::Deleted(moved))
            .await
            .unwrap();
        assert_eq!(service_count(&f).await, 0);
    }

    #[tokio::test]
    async fn pending_backlog_survives_flush_and_load() {
        let f = fixture().await;
        let indexer = indexer_for(&f);
        indexer.add_file(PathInfo {
            module: "files".to_string(),
            path: "/data/one.txt".into(),
        });
        indexer.add_file(PathInfo {
            module: "files".to_string(),
            path: "/data/two.txt".into(),
        });
        indexer.flush_pending().await.unwrap();

        let fresh = indexer_for(&f);
        assert_eq!(fresh.load_pending().await.unwrap(), 2);
        // drained on load
        assert_eq!(fresh.load_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn move_rewrites_uri_metadata() {
        let f = fixture().await;
        let dir = f.tree.path().canonicalize().unwrap();
        let path = dir.join("c.txt");
        std::fs::write(&path, "moving target\n").unwrap();

        let indexer = indexer_for(&f);
        let info = PathInfo {
            module: "files".to_string(),
            path: path.clone(),
        };
        indexer.process_file(&info).await.unwrap();
        let id = f.store.service_by_uri(&path).await.unwrap().unwrap().id;

        f.store
            .move_service(&path, &dir.join("d.txt"))
            .await
            .unwrap();

        let meta = f.db.meta_for(DbKind::File);
        let rs = meta
            .query(
                "SELECT Name FROM Services WHERE ID = ?",
                vec![id.into()],
            )
            .await
            .unwrap();
        assert_eq!(rs.first_text(), Some("d.txt".to_string()));

        let name_field = f.ontology.field_id("File:Name").unwrap();
        let rs = meta
            .exec_proc("GetMetadata", vec![id.into(), name_field.into()])
            .await
            .unwrap();
        assert_eq!(rs.first_text(), Some("d.txt".to_string()));

        let ext_field = f.ontology.field_id("File:Ext").unwrap();
        let rs = meta
            .exec_proc("GetMetadata", vec![id.into(), ext_field.into()])
            .await
            .unwrap();
        assert_eq!(rs.first_text(), Some("txt".to_string()));

        // exactly one Update event for the move
        let rs = meta
            .query(
                "SELECT count(*) FROM Events WHERE ServiceID = ? AND EventType = 'Update'",
                vec![id.into()],
            )
            .await
            .unwrap();
        assert_eq!(rs.first_int(), Some(1));
    }
}
