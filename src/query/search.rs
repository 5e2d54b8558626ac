//! Free-text search: token lookups against the inverted index joined with
//! row data, dud removal, and the mime/location filter variants.

use std::path::Path;
use std::sync::Arc;

use crate::db::{Database, DbInterface, DbManager, Param, ResultSet, Value};
use crate::error::{Error, Result};
use crate::index::WordIndex;
use crate::ontology::{DbKind, Ontology};
use crate::query::snippet;
use crate::query::tree::QueryTree;
use crate::text::{parser, WordParseConfig};

/// Upper bound on requested pages.
pub const MAX_SEARCH_RESULTS: usize = 1024;
/// Candidate pool for the mime/location filter variants.
const FILTER_CANDIDATES: usize = 2048;

pub struct QueryEngine {
    ontology: Arc<Ontology>,
    db: Arc<DbManager>,
    parse_cfg: WordParseConfig,
}

impl QueryEngine {
    pub fn new(ontology: Arc<Ontology>, db: Arc<DbManager>, parse_cfg: WordParseConfig) -> Self {
        QueryEngine {
            ontology,
            db,
            parse_cfg,
        }
    }

    fn meta_for_service(&self, service: &str) -> Result<(Arc<DbInterface>, DbKind)> {
        let service_type = self
            .ontology
            .service_by_name(service)
            .ok_or_else(|| Error::UnknownService(service.to_string()))?;
        Ok((self.db.meta_for(service_type.db), service_type.db))
    }

    /// `Files` expands to the whole file-service family, `Emails` to the
    /// mail stores; everything else resolves to itself.
    async fn related_service_ids(&self, meta: &DbInterface, service: &str) -> Result<Vec<i32>> {
        let rs = meta
            .exec_proc(
                "GetRelatedServiceIDs",
                vec![Param::text(service), Param::text(service)],
            )
            .await?;
        Ok(rs.column_ints(0).into_iter().map(|id| id as i32).collect())
    }

    async fn tree_for(&self, service: &str, text: &str) -> Result<(QueryTree, Arc<DbInterface>)> {
        let (meta, _) = self.meta_for_service(service)?;
        let services = self.related_service_ids(&meta, service).await?;
        let tree = QueryTree::new(
            text,
            WordIndex::new(Arc::clone(&meta)),
            &self.parse_cfg,
            services,
        );
        Ok((tree, meta))
    }

    /// The text-search contract: ranked page of rows for `service`, with
    /// dud postings removed from every queried token afterwards.
    pub async fn search_text(
        &self,
        service: &str,
        text: &str,
        offset: usize,
        limit: usize,
        save_results: bool,
        detailed: bool,
    ) -> Result<Vec<Vec<Value>>> {
        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);
        let (tree, meta) = self.tree_for(service, text).await?;
        let hits = tree.get_hits(offset, limit).await?;

        if save_results {
            meta.begin().await?;
            meta.exec_proc("DeleteSearchResults1", vec![]).await?;
            for hit in &hits {
                meta.exec_proc(
                    "InsertSearchResult1",
                    vec![hit.service_id.into(), hit.score.into()],
                )
                .await?;
            }
            meta.commit().await?;
            return Ok(Vec::new());
        }

        let emails = service.eq_ignore_ascii_case("Emails");
        let applications = service.eq_ignore_ascii_case("Applications");
        let procedure = if detailed {
            if emails {
                "GetEmailByID"
            } else if applications {
                "GetApplicationByID"
            } else {
                "GetFileByID2"
            }
        } else {
            "GetFileByID"
        };

        let mut rows = Vec::new();
        let mut duds = Vec::new();
        for hit in &hits {
            let rs = meta
                .exec_proc(procedure, vec![hit.service_id.into()])
                .await?;
            if rs.is_empty() {
                tracing::info!("dud hit for search detected");
                duds.push(hit.service_id);
                continue;
            }
            if detailed && !emails && !applications {
                let exists = rs
                    .first_text()
                    .map(|p| Path::new(&p).exists())
                    .unwrap_or(false);
                if !exists {
                    continue;
                }
            }
            rows.extend(rs.into_rows());
        }

        if !duds.is_empty() {
            let index = tree.index();
            for word in tree.words() {
                index.remove_dud_hits(word, &duds).await?;
            }
        }

        Ok(rows)
    }

    fn full_path(row: &[Value]) -> Option<String> {
        let path = row.first().and_then(Value::as_text)?;
        let name = row.get(1).and_then(Value::as_text)?;
        Some(format!("{path}/{name}"))
    }

    async fn filtered_candidates<F>(&self, text: &str, keep: F) -> Result<Vec<Vec<Value>>>
    where
        F: Fn(&[Value]) -> bool,
    {
        let (tree, meta) = self.tree_for("Files", text).await?;
        let hits = tree.get_hits(0, FILTER_CANDIDATES).await?;

        let mut rows = Vec::new();
        for hit in &hits {
            let rs = meta
                .exec_proc("GetFileByID", vec![hit.service_id.into()])
                .await?;
            for row in rs.into_rows() {
                if keep(&row) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// Text hits restricted to rows whose mime is in `mimes`.
    pub async fn search_text_mime(
        &self,
        text: &str,
        mimes: &[String],
    ) -> Result<Vec<Vec<Value>>> {
        self.filtered_candidates(text, |row| {
            row.get(2)
                .and_then(Value::as_text)
                .map(|mime| mimes.iter().any(|m| m == mime))
                .unwrap_or(false)
        })
        .await
    }

    /// Text hits restricted to `location` and everything below it.
    pub async fn search_text_location(
        &self,
        text: &str,
        location: &str,
    ) -> Result<Vec<Vec<Value>>> {
        let prefix = format!("{}/", location.trim_end_matches('/'));
        let location = location.trim_end_matches('/').to_string();
        self.filtered_candidates(text, move |row| {
            Self::full_path(row)
                .map(|full| full == location || full.starts_with(&prefix))
                .unwrap_or(false)
        })
        .await
    }

    pub async fn search_text_mime_location(
        &self,
        text: &str,
        mimes: &[String],
        location: &str,
    ) -> Result<Vec<Vec<Value>>> {
        let prefix = format!("{}/", location.trim_end_matches('/'));
        let location = location.trim_end_matches('/').to_string();
        self.filtered_candidates(text, move |row| {
            let mime_ok = row
                .get(2)
                .and_then(Value::as_text)
                .map(|mime| mimes.iter().any(|m| m == mime))
                .unwrap_or(false);
            let location_ok = Self::full_path(row)
                .map(|full| full == location || full.starts_with(&prefix))
                .unwrap_or(false);
            mime_ok && location_ok
        })
        .await
    }

    /// Keyword values in use for a service family, most frequent first.
    pub async fn keyword_list(&self, service: &str) -> Result<Vec<(String, i64)>> {
        let (meta, _) = self.meta_for_service(service)?;
        let rs = meta
            .exec_proc(
                "GetKeywordList",
                vec![Param::text(service), Param::text(service)],
            )
            .await?;
        Ok(rs
            .rows()
            .iter()
            .filter_map(|row| {
                Some((
                    row.first()?.as_text()?.to_string(),
                    row.get(1)?.as_int().unwrap_or(0),
                ))
            })
            .collect())
    }

    /// Snippet of the stored content around the query terms.
    pub async fn snippet(
        &self,
        service: &str,
        path: &Path,
        search_text: &str,
    ) -> Result<String> {
        let (meta, kind) = self.meta_for_service(service)?;
        let (parent, name) = {
            let parent = path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (parent, name)
        };
        let rs = meta
            .exec_proc(
                "GetServiceID",
                vec![Param::text(&parent), Param::text(&name)],
            )
            .await?;
        let Some(id) = rs.first_int() else {
            return Err(Error::DbQuery(format!(
                "{} is not indexed",
                path.display()
            )));
        };

        let contents = self.db.contents_for(kind);
        let rs: ResultSet = contents
            .exec_proc("GetAllContents", vec![Param::Int(id)])
            .await?;
        let mut text = String::new();
        for row in rs.rows() {
            if let Some(chunk) = row.first().and_then(Value::as_text) {
                text.push_str(chunk);
            }
        }

        let terms = parser::parse_text_into_array(search_text, &self.parse_cfg);
        Ok(snippet::get_snippet(&text, &terms, snippet::SNIPPET_LENGTH))
    }

    /// Closest indexed word by bounded edit distance.
    pub async fn suggest(&self, term: &str, max_dist: usize) -> Result<String> {
        let index = WordIndex::new(self.db.interface(Database::FileMeta));
        index.suggest(term, max_dist).await
    }

    /// Per-service-type row counts, non-zero entries only.
    pub async fn service_stats(&self) -> Result<Vec<(String, i64)>> {
        let rs = self
            .db
            .interface(Database::Common)
            .exec_proc("GetStats", vec![])
            .await?;
        Ok(rs
            .rows()
            .iter()
            .filter_map(|row| {
                Some((
                    row.first()?.as_text()?.to_string(),
                    row.get(1)?.as_int().unwrap_or(0),
                ))
            })
            .collect())
    }
}
