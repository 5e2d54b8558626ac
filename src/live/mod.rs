//! Live searches: an event log written by the indexer, per-search SQL
//! fragments held in a companion table, and a debounced matcher that diffs
//! the log against each active search and emits add/remove/modify signals.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::db::{DbInterface, DbManager, Param, Value};
use crate::error::{Error, Result};
use crate::ontology::{DbKind, FieldKind, Ontology};
use crate::query::xesam::{self, QueryFragments};

/// Debounce between matching cycles.
pub const MATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Signals delivered to subscribers. Within one cycle a search fires in the
/// order removed, modified, added; cross-search ordering is unspecified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveSearchEvent {
    /// Carries a count only; details come from `get_hits`/`get_hit_data`.
    HitsAdded { search_id: String, count: usize },
    HitsRemoved { search_id: String, ids: Vec<u32> },
    HitsModified { search_id: String, ids: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    New,
    Active,
    Closed,
}

struct LiveSearch {
    session_id: String,
    xml: String,
    fragments: QueryFragments,
    state: SearchState,
}

pub struct LiveStore {
    ontology: Arc<Ontology>,
    db: Arc<DbManager>,
    searches: Mutex<HashMap<String, LiveSearch>>,
    sessions: Mutex<HashMap<String, Vec<String>>>,
    events: broadcast::Sender<LiveSearchEvent>,
}

impl LiveStore {
    pub fn new(ontology: Arc<Ontology>, db: Arc<DbManager>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(LiveStore {
            ontology,
            db,
            searches: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveSearchEvent> {
        self.events.subscribe()
    }

    fn meta(&self) -> Arc<DbInterface> {
        self.db.meta_for(DbKind::File)
    }

    pub fn new_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().unwrap().insert(id.clone(), Vec::new());
        tracing::debug!("live session {id} created");
        id
    }

    /// Closing a session closes all its searches.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let search_ids = self
            .sessions
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| Error::SessionIdNotRegistered(session_id.to_string()))?;
        for search_id in search_ids {
            match self.close_search(&search_id).await {
                Ok(()) | Err(Error::SearchClosed(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn new_search(&self, session_id: &str, xml: &str) -> Result<String> {
        if !self.sessions.lock().unwrap().contains_key(session_id) {
            return Err(Error::SessionIdNotRegistered(session_id.to_string()));
        }

        let fragments = xesam::parse_query(&self.ontology, xml)?;
        let search_id = Uuid::new_v4().to_string();
        self.searches.lock().unwrap().insert(
            search_id.clone(),
            LiveSearch {
                session_id: session_id.to_string(),
                xml: xml.to_string(),
                fragments,
                state: SearchState::New,
            },
        );
        self.sessions
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(search_id.clone());
        Ok(search_id)
    }

    /// Session owning a search; the bus adapter resolves signal targets
    /// through it.
    pub fn session_for_search(&self, search_id: &str) -> Result<String> {
        self.searches
            .lock()
            .unwrap()
            .get(search_id)
            .map(|s| s.session_id.clone())
            .ok_or_else(|| Error::SearchIdNotRegistered(search_id.to_string()))
    }

    pub fn xml_query(&self, search_id: &str) -> Result<String> {
        self.searches
            .lock()
            .unwrap()
            .get(search_id)
            .map(|s| s.xml.clone())
            .ok_or_else(|| Error::SearchIdNotRegistered(search_id.to_string()))
    }

    fn search_state(&self, search_id: &str) -> Result<SearchState> {
        self.searches
            .lock()
            .unwrap()
            .get(search_id)
            .map(|s| s.state)
            .ok_or_else(|| Error::SearchIdNotRegistered(search_id.to_string()))
    }

    fn require_active(&self, search_id: &str) -> Result<()> {
        match self.search_state(search_id)? {
            SearchState::Active => Ok(()),
            SearchState::Closed => Err(Error::SearchClosed(search_id.to_string())),
            SearchState::New => Err(Error::SearchNotActive(search_id.to_string())),
        }
    }

    /// Materialise the initial match set and start emitting change signals.
    pub async fn start_search(&self, search_id: &str) -> Result<()> {
        let fragments = {
            let searches = self.searches.lock().unwrap();
            let search = searches
                .get(search_id)
                .ok_or_else(|| Error::SearchIdNotRegistered(search_id.to_string()))?;
            match search.state {
                SearchState::Closed => {
                    return Err(Error::SearchClosed(search_id.to_string()));
                }
                SearchState::Active => {
                    tracing::warn!("search {search_id} already started");
                    return Ok(());
                }
                SearchState::New => search.fragments.clone(),
            }
        };

        let meta = self.meta();
        meta.query(
            format!(
                "INSERT INTO LiveSearches SELECT DISTINCT S.ID, '{search_id}' {} {} {}",
                fragments.from_sql, fragments.join_sql, fragments.where_sql
            ),
            vec![],
        )
        .await?;

        if let Some(search) = self.searches.lock().unwrap().get_mut(search_id) {
            search.state = SearchState::Active;
        }

        let count = meta
            .exec_proc("GetLiveSearchHitCount", vec![Param::text(search_id)])
            .await?
            .first_int()
            .unwrap_or(0) as usize;
        if count > 0 {
            let _ = self.events.send(LiveSearchEvent::HitsAdded {
                search_id: search_id.to_string(),
                count,
            });
        }
        Ok(())
    }

    pub async fn get_hit_count(&self, search_id: &str) -> Result<usize> {
        self.require_active(search_id)?;
        let rs = self
            .meta()
            .exec_proc("GetLiveSearchHitCount", vec![Param::text(search_id)])
            .await?;
        Ok(rs.first_int().unwrap_or(0) as usize)
    }

    async fn all_hit_ids(&self, search_id: &str) -> Result<Vec<u32>> {
        let rs = self
            .meta()
            .exec_proc("GetLiveSearchAllIDs", vec![Param::text(search_id)])
            .await?;
        Ok(rs.column_ints(0).into_iter().map(|id| id as u32).collect())
    }

    pub async fn get_hits(&self, search_id: &str, count: usize) -> Result<Vec<u32>> {
        self.require_active(search_id)?;
        let mut ids = self.all_hit_ids(search_id).await?;
        ids.truncate(count);
        Ok(ids)
    }

    pub async fn get_range_hits(&self, search_id: &str, from: usize, to: usize) -> Result<Vec<u32>> {
        self.require_active(search_id)?;
        let ids = self.all_hit_ids(search_id).await?;
        if from >= ids.len() || from > to {
            return Ok(Vec::new());
        }
        Ok(ids[from..(to + 1).min(ids.len())].to_vec())
    }

    /// Field values for the given hit ids. Unset fields for removed ids are
    /// reported as unset, not as an error.
    pub async fn get_hit_data(
        &self,
        search_id: &str,
        ids: &[u32],
        fields: &[String],
    ) -> Result<Vec<Vec<Value>>> {
        self.require_active(search_id)?;
        let meta = self.meta();

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let mut row = Vec::with_capacity(fields.len());
            for field in fields {
                row.push(self.hit_field_value(&meta, *id, field).await?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn hit_field_value(
        &self,
        meta: &DbInterface,
        service_id: u32,
        field_name: &str,
    ) -> Result<Value> {
        // columns denormalised on the service row first
        let column = match field_name {
            "File:Name" => Some("Name"),
            "File:Path" => Some("Path"),
            "File:Mime" => Some("Mime"),
            "File:Size" => Some("Size"),
            "File:Modified" => Some("IndexTime"),
            _ => None,
        };
        if let Some(column) = column {
            let rs = meta
                .query(
                    format!("SELECT {column} FROM Services WHERE ID = ?"),
                    vec![service_id.into()],
                )
                .await?;
            return Ok(rs
                .rows()
                .first()
                .and_then(|r| r.first())
                .cloned()
                .unwrap_or(Value::Null));
        }

        let Some(field) = self.ontology.field_def(field_name) else {
            return Err(Error::UnknownField(field_name.to_string()));
        };
        let proc = match field.kind {
            FieldKind::Keyword => "GetMetadataKeyword",
            FieldKind::Integer | FieldKind::Date => "GetMetadataNumeric",
            _ => "GetMetadata",
        };
        let rs = meta
            .exec_proc(proc, vec![service_id.into(), field.id.into()])
            .await?;
        Ok(rs
            .rows()
            .first()
            .and_then(|r| r.first())
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Drop the search's membership rows and refuse further operations.
    pub async fn close_search(&self, search_id: &str) -> Result<()> {
        match self.search_state(search_id)? {
            SearchState::Closed => return Err(Error::SearchClosed(search_id.to_string())),
            SearchState::New | SearchState::Active => {}
        }
        self.meta()
            .exec_proc("LiveSearchStopSearch", vec![Param::text(search_id)])
            .await?;
        if let Some(search) = self.searches.lock().unwrap().get_mut(search_id) {
            search.state = SearchState::Closed;
        }
        Ok(())
    }

    /// Close every session owned by a vanished subscriber.
    pub async fn close_sessions_of_owner(&self, session_ids: &[String]) -> Result<()> {
        for session_id in session_ids {
            match self.close_session(session_id).await {
                Ok(()) | Err(Error::SessionIdNotRegistered(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// One matching cycle: read the event log, diff it against every active
    /// search, emit signals, and delete the consumed events. Returns false
    /// when the log was empty.
    pub async fn run_matcher_cycle(&self) -> Result<bool> {
        let meta = self.meta();

        let events = meta.exec_proc("GetEvents", vec![]).await?;
        if events.is_empty() {
            return Ok(false);
        }

        let mut max_event_id = 0i64;
        let mut update_ids = HashSet::new();
        for row in events.rows() {
            if let Some(event_id) = row.first().and_then(Value::as_int) {
                max_event_id = max_event_id.max(event_id);
            }
            let id = row.get(1).and_then(Value::as_int).unwrap_or(0) as u32;
            if row.get(2).and_then(Value::as_text) == Some("Update") {
                update_ids.insert(id);
            }
        }

        let active: Vec<(String, QueryFragments)> = {
            let searches = self.searches.lock().unwrap();
            searches
                .iter()
                .filter(|(_, s)| s.state == SearchState::Active)
                .map(|(id, s)| (id.clone(), s.fragments.clone()))
                .collect()
        };

        for (search_id, fragments) in active {
            if let Err(e) = self
                .match_search(&meta, &search_id, &fragments, &update_ids)
                .await
            {
                tracing::error!("live search {search_id}: matching failed: {e}");
            }
        }

        meta.exec_proc("DeleteHandledEvents", vec![Param::Int(max_event_id)])
            .await?;
        Ok(true)
    }

    async fn match_search(
        &self,
        meta: &DbInterface,
        search_id: &str,
        fragments: &QueryFragments,
        update_ids: &HashSet<u32>,
    ) -> Result<()> {
        let membership: HashSet<u32> = self.all_hit_ids(search_id).await?.into_iter().collect();

        // deleted rows still in the match set
        let rs = meta
            .exec_proc("GetLiveSearchDeletedIDs", vec![Param::text(search_id)])
            .await?;
        let mut removed: Vec<u32> = rs.column_ints(0).into_iter().map(|id| id as u32).collect();
        removed.sort_unstable();
        removed.dedup();

        // touched rows that (still) match the search's WHERE
        let rs = meta
            .query(
                format!(
                    "SELECT DISTINCT E.ServiceID, E.EventType {} {}, Events E {} \
                     AND S.ID = E.ServiceID AND E.EventType IN ('Create','Update')",
                    fragments.from_sql, fragments.join_sql, fragments.where_sql
                ),
                vec![],
            )
            .await?;

        let mut matched = HashSet::new();
        let mut added = Vec::new();
        let mut modified = Vec::new();
        for row in rs.rows() {
            let id = row.first().and_then(Value::as_int).unwrap_or(0) as u32;
            let event_type = row.get(1).and_then(Value::as_text).unwrap_or("");
            if !matched.insert(id) {
                continue;
            }
            if membership.contains(&id) {
                if event_type == "Update" && !modified.contains(&id) {
                    modified.push(id);
                }
            } else if !added.contains(&id) {
                added.push(id);
            }
        }

        // rows that were updated out of the match set
        for id in update_ids {
            if membership.contains(id) && !matched.contains(id) && !removed.contains(id) {
                removed.push(*id);
            }
        }

        for id in &removed {
            meta.exec_proc(
                "LiveSearchRemoveID",
                vec![Param::text(search_id), (*id).into()],
            )
            .await?;
        }
        for id in &added {
            meta.exec_proc(
                "LiveSearchInsertID",
                vec![(*id).into(), Param::text(search_id)],
            )
            .await?;
        }

        if !removed.is_empty() {
            let _ = self.events.send(LiveSearchEvent::HitsRemoved {
                search_id: search_id.to_string(),
                ids: removed,
            });
        }
        if !modified.is_empty() {
            let _ = self.events.send(LiveSearchEvent::HitsModified {
                search_id: search_id.to_string(),
                ids: modified,
            });
        }
        if !added.is_empty() {
            let _ = self.events.send(LiveSearchEvent::HitsAdded {
                search_id: search_id.to_string(),
                count: added.len(),
            });
        }
        Ok(())
    }
}

/// Timer-driven matcher: each event-log append wakes it, then cycles run on
/// the debounce interval until the log drains. At most one cycle is in
/// flight and one pending.
pub fn spawn_matcher(store: Arc<LiveStore>, wakeup: Arc<Notify>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            wakeup.notified().await;
            loop {
                tokio::time::sleep(MATCH_INTERVAL).await;
                match store.run_matcher_cycle().await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!("live search matcher cycle failed: {e}");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::DbPaths;
    use crate::indexer::store::ServiceStore;
    use crate::module::{Extraction, FullTextSource, ServiceInfo};
    use crate::text::WordParseConfig;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ServiceStore,
        live: Arc<LiveStore>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ontology = Arc::new(Ontology::with_defaults());
        let db = Arc::new(
            DbManager::open(&DbPaths::single_dir(dir.path()), false, &ontology, None)
                .await
                .unwrap(),
        );
        let store = ServiceStore::new(
            Arc::clone(&ontology),
            Arc::clone(&db),
            WordParseConfig::default(),
            0,
            true,
        );
        let live = LiveStore::new(ontology, db);
        Fixture {
            _dir: dir,
            store,
            live,
        }
    }

    fn note_file(dir: &str, name: &str) -> Extraction {
        Extraction {
            service_type: "Text".to_string(),
            info: ServiceInfo {
                mime: Some("text/plain".to_string()),
                size: 10,
                mtime: 1000,
                ..ServiceInfo::default()
            },
            metadata: vec![
                ("File:Name".to_string(), name.to_string()),
                ("File:Path".to_string(), dir.to_string()),
            ],
            full_text: Some(FullTextSource::Inline("note body".to_string())),
        }
    }

    const NOTE_QUERY: &str = "<query content='Files'><contains>\
         <field name='File:Name'/><string>note</string>\
         </contains></query>";

    async fn drain_events(f: &Fixture) {
        while f.live.run_matcher_cycle().await.unwrap() {}
    }

    fn expect_event(
        rx: &mut broadcast::Receiver<LiveSearchEvent>,
    ) -> LiveSearchEvent {
        rx.try_recv().expect("expected a live search event")
    }

    #[tokio::test]
    async fn activation_reports_existing_hits() {
        let f = fixture().await;
        f.store
            .create_service(Path::new("/home/u/notes.txt"), &note_file("/home/u", "notes.txt"))
            .await
            .unwrap();
        drain_events(&f).await;

        let session = f.live.new_session();
        let search = f.live.new_search(&session, NOTE_QUERY).await.unwrap();

        let mut rx = f.live.subscribe();
        f.live.start_search(&search).await.unwrap();

        match expect_event(&mut rx) {
            LiveSearchEvent::HitsAdded { search_id, count } => {
                assert_eq!(search_id, search);
                assert_eq!(count, 1);
            }
            other => panic!("expected HitsAdded, got {other:?}"),
        }
        assert_eq!(f.live.get_hit_count(&search).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn freshness_add_remove_modify() {
        let f = fixture().await;
        let session = f.live.new_session();
        let search = f.live.new_search(&session, NOTE_QUERY).await.unwrap();
        f.live.start_search(&search).await.unwrap();

        let mut rx = f.live.subscribe();

        // two matching rows -> one HitsAdded with count 2
        let id1 = f
            .store
            .create_service(Path::new("/a/note1.txt"), &note_file("/a", "note1.txt"))
            .await
            .unwrap();
        let id2 = f
            .store
            .create_service(Path::new("/a/note2.txt"), &note_file("/a", "note2.txt"))
            .await
            .unwrap();
        assert!(f.live.run_matcher_cycle().await.unwrap());
        match expect_event(&mut rx) {
            LiveSearchEvent::HitsAdded { count, .. } => assert_eq!(count, 2),
            other => panic!("expected HitsAdded, got {other:?}"),
        }

        // deleting one -> HitsRemoved with that id
        f.store.delete_service(id1).await.unwrap();
        assert!(f.live.run_matcher_cycle().await.unwrap());
        match expect_event(&mut rx) {
            LiveSearchEvent::HitsRemoved { ids, .. } => assert_eq!(ids, vec![id1]),
            other => panic!("expected HitsRemoved, got {other:?}"),
        }

        // updating the other (still matching) -> HitsModified
        f.store
            .update_service(
                id2,
                Path::new("/a/note2.txt"),
                &note_file("/a", "note2.txt"),
            )
            .await
            .unwrap();
        assert!(f.live.run_matcher_cycle().await.unwrap());
        match expect_event(&mut rx) {
            LiveSearchEvent::HitsModified { ids, .. } => assert_eq!(ids, vec![id2]),
            other => panic!("expected HitsModified, got {other:?}"),
        }

        // log consumed
        assert!(!f.live.run_matcher_cycle().await.unwrap());
    }

    #[tokio::test]
    async fn move_out_of_match_set_removes() {
        let f = fixture().await;
        f.store
            .create_service(Path::new("/home/u/notes.txt"), &note_file("/home/u", "notes.txt"))
            .await
            .unwrap();
        drain_events(&f).await;

        let session = f.live.new_session();
        let search = f.live.new_search(&session, NOTE_QUERY).await.unwrap();
        f.live.start_search(&search).await.unwrap();
        let hits = f.live.get_hits(&search, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let id = hits[0];

        let mut rx = f.live.subscribe();
        f.store
            .move_service(Path::new("/home/u/notes.txt"), Path::new("/home/u/other.txt"))
            .await
            .unwrap();
        assert!(f.live.run_matcher_cycle().await.unwrap());
        match expect_event(&mut rx) {
            LiveSearchEvent::HitsRemoved { ids, .. } => assert_eq!(ids, vec![id]),
            other => panic!("expected HitsRemoved, got {other:?}"),
        }
        assert_eq!(f.live.get_hit_count(&search).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lifecycle_errors_are_structured() {
        let f = fixture().await;
        let session = f.live.new_session();
        let search = f.live.new_search(&session, NOTE_QUERY).await.unwrap();

        // not started yet
        assert!(matches!(
            f.live.get_hit_count(&search).await,
            Err(Error::SearchNotActive(_))
        ));

        f.live.start_search(&search).await.unwrap();
        f.live.close_search(&search).await.unwrap();

        assert!(matches!(
            f.live.get_hit_count(&search).await,
            Err(Error::SearchClosed(_))
        ));
        assert!(matches!(
            f.live.close_search(&search).await,
            Err(Error::SearchClosed(_))
        ));
        assert!(matches!(
            f.live.new_search("nope", NOTE_QUERY).await,
            Err(Error::SessionIdNotRegistered(_))
        ));
        assert!(matches!(
            f.live.get_hit_count("nope").await,
            Err(Error::SearchIdNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn closing_session_closes_searches() {
        let f = fixture().await;
        let session = f.live.new_session();
        let search = f.live.new_search(&session, NOTE_QUERY).await.unwrap();
        f.live.start_search(&search).await.unwrap();
        assert_eq!(f.live.session_for_search(&search).unwrap(), session);
        assert_eq!(f.live.xml_query(&search).unwrap(), NOTE_QUERY);

        f.live.close_session(&session).await.unwrap();
        assert!(matches!(
            f.live.get_hit_count(&search).await,
            Err(Error::SearchClosed(_))
        ));
    }

    #[tokio::test]
    async fn hit_data_reports_unset_fields_for_removed_ids() {
        let f = fixture().await;
        f.store
            .create_service(Path::new("/home/u/notes.txt"), &note_file("/home/u", "notes.txt"))
            .await
            .unwrap();
        drain_events(&f).await;

        let session = f.live.new_session();
        let search = f.live.new_search(&session, NOTE_QUERY).await.unwrap();
        f.live.start_search(&search).await.unwrap();
        let id = f.live.get_hits(&search, 1).await.unwrap()[0];

        let fields = vec!["File:Name".to_string(), "File:Path".to_string()];
        let data = f.live.get_hit_data(&search, &[id], &fields).await.unwrap();
        assert_eq!(data[0][0], Value::Text("notes.txt".to_string()));
        assert_eq!(data[0][1], Value::Text("/home/u".to_string()));

        // a vanished id yields unset values, not an error
        let data = f
            .live
            .get_hit_data(&search, &[999999], &fields)
            .await
            .unwrap();
        assert_eq!(data[0][0], Value::Null);
    }
}
