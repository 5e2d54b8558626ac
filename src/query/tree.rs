//! Query tree over the inverted index: token leaves, posting intersection,
//! summed-score ranking filtered by a service-type id set.

use std::collections::HashMap;

use crate::error::Result;
use crate::index::WordIndex;
use crate::text::{parser, WordParseConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub service_id: u32,
    pub score: i32,
}

pub struct QueryTree {
    words: Vec<String>,
    index: WordIndex,
    /// Accepted service-type ids; empty accepts everything.
    services: Vec<i32>,
}

impl QueryTree {
    pub fn new(
        search_text: &str,
        index: WordIndex,
        cfg: &WordParseConfig,
        services: Vec<i32>,
    ) -> Self {
        QueryTree {
            words: parser::parse_text_into_array(search_text, cfg),
            index,
            services,
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn index(&self) -> &WordIndex {
        &self.index
    }

    async fn ranked_hits(&self) -> Result<Vec<SearchHit>> {
        if self.words.is_empty() {
            return Ok(Vec::new());
        }

        // service -> (summed score, words matched)
        let mut merged: HashMap<u32, (i32, usize)> = HashMap::new();
        for word in &self.words {
            for posting in self.index.get_hits(word).await? {
                if !self.services.is_empty()
                    && !self.services.contains(&posting.service_type_id)
                {
                    continue;
                }
                let entry = merged.entry(posting.service_id).or_insert((0, 0));
                entry.0 += posting.score;
                entry.1 += 1;
            }
        }

        let required = self.words.len();
        let mut hits: Vec<SearchHit> = merged
            .into_iter()
            .filter(|(_, (_, matched))| *matched == required)
            .map(|(service_id, (score, _))| SearchHit { service_id, score })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.service_id.cmp(&b.service_id)));
        Ok(hits)
    }

    /// Ranked page of services matching every token.
    pub async fn get_hits(&self, offset: usize, limit: usize) -> Result<Vec<SearchHit>> {
        let hits = self.ranked_hits().await?;
        Ok(hits.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn get_hit_count(&self) -> Result<usize> {
        Ok(self.ranked_hits().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::{DbManager, DbPaths};
    use crate::db::Database;
    use crate::ontology::Ontology;
    use crate::text::WordMap;
    use std::sync::Arc;

    async fn fixture() -> (tempfile::TempDir, Arc<DbManager>) {
        let dir = tempfile::tempdir().unwrap();
        let ontology = Arc::new(Ontology::with_defaults());
        let manager = DbManager::open(&DbPaths::single_dir(dir.path()), false, &ontology, None)
            .await
            .unwrap();
        (dir, Arc::new(manager))
    }

    fn words(pairs: &[(&str, i32)]) -> WordMap {
        pairs.iter().map(|(w, s)| (w.to_string(), *s)).collect()
    }

    fn index_for(manager: &Arc<DbManager>) -> WordIndex {
        WordIndex::new(manager.interface(Database::FileMeta))
    }

    #[tokio::test]
    async fn intersection_requires_all_words() {
        let (_dir, manager) = fixture().await;
        let index = index_for(&manager);
        index
            .add_new_service(1, 5, &words(&[("hello", 2), ("world", 1)]))
            .await
            .unwrap();
        index
            .add_new_service(2, 5, &words(&[("hello", 9)]))
            .await
            .unwrap();

        let tree = QueryTree::new(
            "hello world",
            index_for(&manager),
            &WordParseConfig::default(),
            vec![],
        );
        let hits = tree.get_hits(0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].service_id, 1);
        assert_eq!(hits[0].score, 3);
    }

    #[tokio::test]
    async fn ranking_orders_by_summed_score() {
        let (_dir, manager) = fixture().await;
        let index = index_for(&manager);
        index
            .add_new_service(1, 5, &words(&[("term", 1)]))
            .await
            .unwrap();
        index
            .add_new_service(2, 5, &words(&[("term", 7)]))
            .await
            .unwrap();
        index
            .add_new_service(3, 5, &words(&[("term", 3)]))
            .await
            .unwrap();

        let tree = QueryTree::new(
            "term",
            index_for(&manager),
            &WordParseConfig::default(),
            vec![],
        );
        let ids: Vec<u32> = tree
            .get_hits(0, 10)
            .await
            .unwrap()
            .iter()
            .map(|h| h.service_id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(tree.get_hit_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn type_filter_and_pagination() {
        let (_dir, manager) = fixture().await;
        let index = index_for(&manager);
        for id in 1..=5u32 {
            index
                .add_new_service(id, 5, &words(&[("page", id as i32)]))
                .await
                .unwrap();
        }
        index
            .add_new_service(99, 8, &words(&[("page", 100)]))
            .await
            .unwrap();

        let tree = QueryTree::new(
            "page",
            index_for(&manager),
            &WordParseConfig::default(),
            vec![5],
        );
        // type 8 filtered out despite top score
        let hits = tree.get_hits(0, 2).await.unwrap();
        assert_eq!(hits[0].service_id, 5);
        let next = tree.get_hits(2, 2).await.unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].service_id, 3);
    }
}
