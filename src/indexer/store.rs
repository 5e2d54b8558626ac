//! Commit operations for extracted entities: service-row writes, metadata
//! dispatch by field kind, key-metadata denormalisation, the embedded-value
//! backup table, per-type stats, the event log, and the word-index deltas.
//! Within one commit, row writes, counters, events, and posting deltas run in
//! a single transaction on the owning meta handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::db::{DbInterface, DbManager, Param, Value};
use crate::error::{Error, Result};
use crate::index::WordIndex;
use crate::module::{Extraction, FullTextSource};
use crate::ontology::{CollationKey, Field, FieldKind, Ontology, ServiceType};
use crate::text::{codec, parser, WordMap, WordParseConfig};

pub struct ServiceStore {
    ontology: Arc<Ontology>,
    db: Arc<DbManager>,
    parse_cfg: WordParseConfig,
    throttle: u32,
    events_enabled: bool,
    /// Woken after each event-log append; the live-search matcher listens.
    wakeup: Arc<Notify>,
}

/// A located service row.
#[derive(Debug, Clone)]
pub struct ServiceRow {
    pub id: u32,
    pub path: PathBuf,
    pub name: String,
    pub mime: Option<String>,
    pub service_type_id: i32,
    pub is_dir: bool,
}

fn split_uri(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    (parent, name)
}

impl ServiceStore {
    pub fn new(
        ontology: Arc<Ontology>,
        db: Arc<DbManager>,
        parse_cfg: WordParseConfig,
        throttle: u32,
        events_enabled: bool,
    ) -> Self {
        ServiceStore {
            ontology,
            db,
            parse_cfg,
            throttle,
            events_enabled,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Notified once per appended event; the matcher debounces on top.
    pub fn event_wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    pub fn ontology(&self) -> &Arc<Ontology> {
        &self.ontology
    }

    pub fn db(&self) -> &Arc<DbManager> {
        &self.db
    }

    fn service_type(&self, name: &str) -> Result<Arc<ServiceType>> {
        self.ontology
            .service_by_name(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))
    }

    /// Increment-and-read on a counter row in the common database.
    async fn next_counter(&self, iface: &DbInterface, get: &str, update: &str) -> Result<u32> {
        let current = iface
            .exec_proc(get, vec![])
            .await?
            .first_int()
            .unwrap_or(0);
        let next = current + 1;
        iface
            .exec_proc(update, vec![Param::text(next.to_string())])
            .await?;
        Ok(next as u32)
    }

    async fn append_event(&self, iface: &DbInterface, service_id: u32, kind: &str) -> Result<()> {
        if !self.events_enabled {
            return Ok(());
        }
        let event_id = self
            .next_counter(iface, "GetNewEventID", "UpdateNewEventID")
            .await?;
        iface
            .exec_proc(
                "CreateEvent",
                vec![event_id.into(), service_id.into(), Param::text(kind)],
            )
            .await?;
        self.wakeup.notify_one();
        Ok(())
    }

    fn write_metadata_row(
        &self,
        iface: &DbInterface,
        service_id: u32,
        field: &Field,
        value: &str,
    ) {
        match field.kind {
            FieldKind::Keyword => iface.exec_proc_no_reply(
                "SetMetadataKeyword",
                vec![service_id.into(), field.id.into(), Param::text(value)],
            ),
            FieldKind::Index | FieldKind::String | FieldKind::Double => iface.exec_proc_no_reply(
                "SetMetadata",
                vec![
                    service_id.into(),
                    field.id.into(),
                    Param::text(value),
                    Param::Null,
                ],
            ),
            FieldKind::Integer | FieldKind::Date => iface.exec_proc_no_reply(
                "SetMetadataNumeric",
                vec![
                    service_id.into(),
                    field.id.into(),
                    Param::Int(value.parse().unwrap_or(0)),
                ],
            ),
            // full text goes through the content pipeline, blobs are opaque
            FieldKind::FullText | FieldKind::Blob => {}
        }
    }

    fn index_field_words(&self, map: &mut WordMap, field: &Field, value: &str) {
        if matches!(field.kind, FieldKind::Keyword | FieldKind::Index) {
            parser::parse_text(
                map,
                value,
                field.weight,
                &self.parse_cfg,
                field.filtered,
                field.delimited,
            );
        }
    }

    async fn set_key_metadata(
        &self,
        iface: &DbInterface,
        service: &ServiceType,
        service_id: u32,
        field_name: &str,
        value: &str,
    ) -> Result<()> {
        let wanted = CollationKey::new(field_name);
        for (i, key_field) in service.key_metadata.iter().enumerate() {
            if CollationKey::new(key_field) == wanted {
                iface
                    .query(
                        format!("UPDATE Services SET KeyMetadata{} = ? WHERE ID = ?", i + 1),
                        vec![Param::text(value), service_id.into()],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Write the non-embedded values of an entity to the backup table so
    /// later re-scans can tell user-set values from auto-extracted ones.
    async fn backup_user_metadata(
        &self,
        common: &DbInterface,
        path: &str,
        name: &str,
        field: &Field,
        value: &str,
    ) -> Result<()> {
        let existing = common
            .exec_proc(
                "GetBackupServiceByUri",
                vec![Param::text(path), Param::text(name)],
            )
            .await?;
        let backup_id = match existing.first_int() {
            Some(id) => id,
            None => {
                common
                    .exec_proc(
                        "InsertBackupService",
                        vec![Param::text(path), Param::text(name)],
                    )
                    .await?;
                common
                    .exec_proc(
                        "GetBackupServiceByUri",
                        vec![Param::text(path), Param::text(name)],
                    )
                    .await?
                    .first_int()
                    .unwrap_or(0)
            }
        };
        common
            .exec_proc(
                "SetBackupMetadata",
                vec![backup_id.into(), field.id.into(), Param::text(value)],
            )
            .await?;
        Ok(())
    }

    /// Run the content pipeline and store the blob. Compression failures are
    /// absorbed: metadata and word-index entries still commit.
    async fn store_full_text(
        &self,
        contents: &DbInterface,
        service: &ServiceType,
        service_id: u32,
        source: &FullTextSource,
        words: &mut WordMap,
    ) {
        let Some(content_field) = service
            .content_metadata
            .as_deref()
            .and_then(|name| self.ontology.field_def(name))
        else {
            return;
        };

        let compressed = match source {
            FullTextSource::FromFile(path) => {
                // tokens score directly into the caller's map, so words from
                // chunks read before an abort still reach the index
                match codec::compress_file(path, &self.parse_cfg, self.throttle, words) {
                    Ok(blob) => blob,
                    Err(e) => {
                        tracing::info!("full text extraction skipped for {service_id}: {e}");
                        None
                    }
                }
            }
            FullTextSource::Inline(text) => {
                parser::parse_text(words, text, 1, &self.parse_cfg, true, false);
                match codec::compress_text(text) {
                    Ok(blob) => Some(blob),
                    Err(e) => {
                        tracing::info!("full text compression failed for {service_id}: {e}");
                        None
                    }
                }
            }
        };

        if let Some(blob) = compressed {
            contents.exec_proc_no_reply(
                "SaveServiceContents",
                vec![
                    service_id.into(),
                    content_field.id.into(),
                    Param::Blob(blob),
                ],
            );
        }
    }

    /// Index a newly discovered entity. Returns the allocated service id.
    pub async fn create_service(&self, path: &Path, extraction: &Extraction) -> Result<u32> {
        let service = self.service_type(&extraction.service_type)?;
        let meta = self.db.meta_for(service.db);
        let contents = self.db.contents_for(service.db);
        let (parent, name) = split_uri(path);

        meta.begin().await?;
        let result = self
            .create_service_locked(&meta, &contents, &service, &parent, &name, extraction)
            .await;
        match result {
            Ok(id) => {
                meta.commit().await?;
                Ok(id)
            }
            Err(e) => {
                let _ = meta.rollback().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_service_locked(
        &self,
        meta: &DbInterface,
        contents: &DbInterface,
        service: &ServiceType,
        parent: &str,
        name: &str,
        extraction: &Extraction,
    ) -> Result<u32> {
        let id = self.next_counter(meta, "GetNewID", "UpdateNewID").await?;
        let info = &extraction.info;

        meta.exec_proc(
            "CreateService",
            vec![
                id.into(),
                Param::text(parent),
                Param::text(name),
                service.id.into(),
                match &info.mime {
                    Some(m) => Param::text(m),
                    None => Param::Null,
                },
                Param::Int(info.size),
                i32::from(info.is_dir).into(),
                i32::from(info.is_link).into(),
                Param::Int(info.offset),
                Param::Int(info.mtime),
                Param::Int(info.aux_id),
            ],
        )
        .await?;

        let mut words = WordMap::new();
        for (field_name, value) in &extraction.metadata {
            let Some(field) = self.ontology.field_def(field_name) else {
                tracing::debug!("unknown metadata field {field_name}, skipped");
                continue;
            };
            if field.store_metadata {
                self.write_metadata_row(meta, id, &field, value);
            }
            self.index_field_words(&mut words, &field, value);
            self.set_key_metadata(meta, service, id, field_name, value)
                .await?;
            if service.embedded && !field.embedded {
                self.backup_user_metadata(meta, parent, name, &field, value)
                    .await?;
            }
        }

        if let Some(source) = &extraction.full_text {
            if service.has_fulltext {
                self.store_full_text(contents, service, id, source, &mut words)
                    .await;
            }
        }

        let index = WordIndex::new(self.db.meta_for(service.db));
        index.add_new_service(id, service.id, &words).await?;

        meta.exec_proc("IncStat", vec![Param::text(&service.name)])
            .await?;
        if !service.parent.is_empty() {
            meta.exec_proc("IncStat", vec![Param::text(&service.parent)])
                .await?;
        }

        self.append_event(meta, id, "Create").await?;
        Ok(id)
    }

    /// Words currently contributing to a service's postings: indexable
    /// metadata plus the stored content text.
    async fn indexable_words(
        &self,
        meta: &DbInterface,
        contents: &DbInterface,
        service_id: u32,
    ) -> Result<WordMap> {
        let mut map = WordMap::new();

        for proc in ["GetAllIndexable", "GetAllIndexableKeywords"] {
            let rs = meta.exec_proc(proc, vec![service_id.into()]).await?;
            for row in rs.rows() {
                let Some(value) = row.first().and_then(Value::as_text) else {
                    continue;
                };
                let weight = row.get(1).and_then(Value::as_int).unwrap_or(1) as i32;
                let filtered = row.get(2).and_then(Value::as_int).unwrap_or(0) != 0;
                let delimited = row.get(3).and_then(Value::as_int).unwrap_or(0) != 0;
                parser::parse_text(&mut map, value, weight, &self.parse_cfg, filtered, delimited);
            }
        }

        let rs = contents
            .exec_proc("GetAllContents", vec![service_id.into()])
            .await?;
        for row in rs.rows() {
            if let Some(text) = row.first().and_then(Value::as_text) {
                parser::parse_text(&mut map, text, 1, &self.parse_cfg, true, false);
            }
        }

        Ok(map)
    }

    /// Re-index an existing service id against fresh extraction results; the
    /// posting delta is differential.
    pub async fn update_service(
        &self,
        id: u32,
        path: &Path,
        extraction: &Extraction,
    ) -> Result<()> {
        let service = self.service_type(&extraction.service_type)?;
        let meta = self.db.meta_for(service.db);
        let contents = self.db.contents_for(service.db);
        let (parent, name) = split_uri(path);

        let old_words = self.indexable_words(&meta, &contents, id).await?;

        meta.begin().await?;
        let result = self
            .update_service_locked(
                &meta, &contents, &service, id, &parent, &name, extraction, &old_words,
            )
            .await;
        match result {
            Ok(()) => meta.commit().await,
            Err(e) => {
                let _ = meta.rollback().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_service_locked(
        &self,
        meta: &DbInterface,
        contents: &DbInterface,
        service: &ServiceType,
        id: u32,
        parent: &str,
        name: &str,
        extraction: &Extraction,
        old_words: &WordMap,
    ) -> Result<()> {
        let info = &extraction.info;

        meta.exec_proc(
            "UpdateService",
            vec![
                match &info.mime {
                    Some(m) => Param::text(m),
                    None => Param::Null,
                },
                Param::Int(info.size),
                Param::Int(info.mtime),
                id.into(),
            ],
        )
        .await?;

        for proc in [
            "DeleteServiceMetadata",
            "DeleteServiceKeywordMetadata",
            "DeleteServiceNumericMetadata",
        ] {
            meta.exec_proc(proc, vec![id.into()]).await?;
        }

        let mut words = WordMap::new();
        for (field_name, value) in &extraction.metadata {
            let Some(field) = self.ontology.field_def(field_name) else {
                continue;
            };
            if field.store_metadata {
                self.write_metadata_row(meta, id, &field, value);
            }
            self.index_field_words(&mut words, &field, value);
            self.set_key_metadata(meta, service, id, field_name, value)
                .await?;
            if service.embedded && !field.embedded {
                self.backup_user_metadata(meta, parent, name, &field, value)
                    .await?;
            }
        }

        if let Some(source) = &extraction.full_text {
            if service.has_fulltext {
                self.store_full_text(contents, service, id, source, &mut words)
                    .await;
            }
        }

        let index = WordIndex::new(self.db.meta_for(service.db));
        index
            .update_differential(id, service.id, old_words, &words)
            .await?;

        self.append_event(meta, id, "Update").await?;
        Ok(())
    }

    /// Index time stored for a uri, used to skip unchanged files on
    /// re-crawl.
    pub async fn stored_mtime(&self, path: &Path) -> Result<Option<i64>> {
        let meta = self.db.meta_for(crate::ontology::DbKind::File);
        let (parent, name) = split_uri(path);
        let rs = meta
            .exec_proc(
                "GetFileMTime",
                vec![Param::text(&parent), Param::text(&name)],
            )
            .await?;
        Ok(rs.first_int())
    }

    pub async fn service_by_uri(&self, path: &Path) -> Result<Option<ServiceRow>> {
        let meta = self.db.meta_for(crate::ontology::DbKind::File);
        let (parent, name) = split_uri(path);
        let rs = meta
            .exec_proc(
                "GetServiceID",
                vec![Param::text(&parent), Param::text(&name)],
            )
            .await?;
        Ok(rs.first_int().map(|id| ServiceRow {
            id: id as u32,
            path: path.to_path_buf(),
            name,
            mime: None,
            service_type_id: rs
                .rows()
                .first()
                .and_then(|r| r.get(3))
                .and_then(Value::as_int)
                .unwrap_or(0) as i32,
            is_dir: rs
                .rows()
                .first()
                .and_then(|r| r.get(2))
                .and_then(Value::as_int)
                .unwrap_or(0)
                != 0,
        }))
    }

    pub async fn service_by_id(&self, id: u32) -> Result<Option<ServiceRow>> {
        // ids are global; the row lives in exactly one of the meta stores
        let mut found = None;
        for kind in [crate::ontology::DbKind::File, crate::ontology::DbKind::Email] {
            let meta = self.db.meta_for(kind);
            let rs = meta.exec_proc("GetServiceByID", vec![id.into()]).await?;
            if !rs.is_empty() {
                found = Some(rs);
                break;
            }
        }
        let Some(rs) = found else {
            return Ok(None);
        };
        let rows = rs.rows();
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let parent = row.first().and_then(Value::as_text).unwrap_or_default();
        let name = row
            .get(1)
            .and_then(Value::as_text)
            .unwrap_or_default()
            .to_string();
        Ok(Some(ServiceRow {
            id,
            path: Path::new(parent).join(&name),
            name,
            mime: row.get(2).and_then(Value::as_text).map(str::to_string),
            service_type_id: row.get(3).and_then(Value::as_int).unwrap_or(0) as i32,
            is_dir: row.get(4).and_then(Value::as_int).unwrap_or(0) != 0,
        }))
    }

    /// Remove a service row: content blobs first, then the row (metadata
    /// cascades), stats, and the Delete event. Postings are left for the
    /// query-time dud sweep. Directories recurse by path-prefix match.
    pub async fn delete_service(&self, id: u32) -> Result<()> {
        let Some(row) = self.service_by_id(id).await? else {
            return Ok(());
        };

        if row.is_dir {
            self.delete_directory_children(&row.path).await?;
        }

        let type_name = self.ontology.service_name_by_id(row.service_type_id);
        let kind = type_name
            .as_deref()
            .and_then(|n| self.ontology.service_by_name(n))
            .map(|s| s.db)
            .unwrap_or(crate::ontology::DbKind::File);

        let meta = self.db.meta_for(kind);
        let contents = self.db.contents_for(kind);

        contents
            .exec_proc("DeleteAllContents", vec![id.into()])
            .await?;

        meta.begin().await?;
        meta.exec_proc("DeleteService1", vec![id.into()]).await?;
        if let Some(name) = &type_name {
            meta.exec_proc("DecStat", vec![Param::text(name)]).await?;
            if let Some(parent) = self.ontology.service_parent(name) {
                meta.exec_proc("DecStat", vec![Param::text(parent)]).await?;
            }
        }
        self.append_event(&meta, id, "Delete").await?;
        meta.commit().await?;
        Ok(())
    }

    async fn delete_directory_children(&self, dir: &Path) -> Result<()> {
        let meta = self.db.meta_for(crate::ontology::DbKind::File);
        let dir_str = dir.to_string_lossy();
        let rs = meta
            .exec_proc(
                "SelectSubFileIDs",
                vec![
                    Param::text(dir_str.as_ref()),
                    Param::text(format!("{dir_str}/*")),
                ],
            )
            .await?;
        for id in rs.column_ints(0) {
            Box::pin(self.delete_service(id as u32)).await?;
        }
        Ok(())
    }

    async fn set_single_metadata(
        &self,
        meta: &DbInterface,
        id: u32,
        field_name: &str,
        value: &str,
    ) -> Result<()> {
        let Some(field) = self.ontology.field_def(field_name) else {
            return Err(Error::UnknownField(field_name.to_string()));
        };
        let delete_proc = match field.kind {
            FieldKind::Keyword => "DeleteMetadataKeyword",
            FieldKind::Integer | FieldKind::Date => "DeleteMetadataNumeric",
            _ => "DeleteMetadata",
        };
        meta.exec_proc(delete_proc, vec![id.into(), field.id.into()])
            .await?;
        self.write_metadata_row(meta, id, &field, value);
        Ok(())
    }

    /// Atomically rewrite path/name for a moved file, refresh the uri
    /// metadata, update the backup key, and append one Update event.
    pub async fn move_service(&self, from: &Path, to: &Path) -> Result<()> {
        let Some(row) = self.service_by_uri(from).await? else {
            tracing::warn!("move source {} not found", from.display());
            return Ok(());
        };

        let meta = self.db.meta_for(crate::ontology::DbKind::File);
        let (new_parent, new_name) = split_uri(to);
        let (old_parent, old_name) = split_uri(from);

        meta.begin().await?;
        meta.exec_proc(
            "UpdateFileMove",
            vec![
                Param::text(&new_parent),
                Param::text(&new_name),
                row.id.into(),
            ],
        )
        .await?;

        self.set_single_metadata(&meta, row.id, "File:Path", &new_parent)
            .await?;
        self.set_single_metadata(&meta, row.id, "File:Name", &new_name)
            .await?;
        if let Some(ext) = to.extension().and_then(|e| e.to_str()) {
            self.set_single_metadata(&meta, row.id, "File:Ext", ext)
                .await?;
        }

        meta.exec_proc(
            "UpdateBackupService",
            vec![
                Param::text(&new_parent),
                Param::text(&new_name),
                Param::text(&old_parent),
                Param::text(&old_name),
            ],
        )
        .await?;

        self.append_event(&meta, row.id, "Update").await?;
        meta.commit().await?;

        if row.is_dir {
            self.move_directory_children(from, to).await?;
        }
        Ok(())
    }

    async fn move_directory_children(&self, from: &Path, to: &Path) -> Result<()> {
        let meta = self.db.meta_for(crate::ontology::DbKind::File);
        let from_str = from.to_string_lossy();

        let rs = meta
            .exec_proc(
                "SelectFileChildWithoutDirs",
                vec![Param::text(from_str.as_ref())],
            )
            .await?;
        for row in rs.rows() {
            if let Some(name) = row.get(1).and_then(Value::as_text) {
                let old = from.join(name);
                let new = to.join(name);
                Box::pin(self.move_service(&old, &new)).await?;
            }
        }

        let rs = meta
            .exec_proc(
                "SelectFileSubFolders",
                vec![
                    Param::text(from_str.as_ref()),
                    Param::text(format!("{from_str}/*")),
                ],
            )
            .await?;
        for row in rs.rows() {
            let (Some(prefix), Some(name)) = (
                row.get(1).and_then(Value::as_text),
                row.get(2).and_then(Value::as_text),
            ) else {
                continue;
            };
            let old = Path::new(prefix).join(name);
            if let Ok(tail) = old.strip_prefix(from) {
                let new = to.join(tail);
                Box::pin(self.move_service(&old, &new)).await?;
            }
        }
        Ok(())
    }
}
