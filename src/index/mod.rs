//! Inverted word index: token -> postings `(service_id, service_type_id,
//! score)`. Postings live in the word-index database, reached through the
//! owning service's meta handle so posting deltas commit in the same
//! transaction as the row writes.

use std::sync::Arc;

use crate::db::{DbInterface, Param};
use crate::error::{Error, Result};
use crate::text::WordMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub service_id: u32,
    pub service_type_id: i32,
    pub score: i32,
}

pub struct WordIndex {
    iface: Arc<DbInterface>,
}

impl WordIndex {
    /// `iface` must have the word-index database attached.
    pub fn new(iface: Arc<DbInterface>) -> Self {
        WordIndex { iface }
    }

    async fn apply(&self, word: &str, service_id: u32, type_id: i32, delta: i32) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.iface
            .exec_proc(
                "WordIndexUpsert",
                vec![
                    Param::text(word),
                    service_id.into(),
                    type_id.into(),
                    delta.into(),
                ],
            )
            .await?;
        if delta < 0 {
            self.iface
                .exec_proc(
                    "WordIndexPrune",
                    vec![Param::text(word), service_id.into()],
                )
                .await?;
        }
        Ok(())
    }

    /// Append postings for a newly indexed service. Zero scores are no-ops.
    pub async fn add_new_service(
        &self,
        service_id: u32,
        service_type_id: i32,
        words: &WordMap,
    ) -> Result<()> {
        for (word, score) in words {
            self.apply(word, service_id, service_type_id, *score).await?;
        }
        Ok(())
    }

    /// Differential update: the end state of each token's postings equals
    /// the old set reweighted by `new - old`. Positive deltas add or merge,
    /// negative deltas decrease and drop the posting at zero.
    pub async fn update_differential(
        &self,
        service_id: u32,
        service_type_id: i32,
        old: &WordMap,
        new: &WordMap,
    ) -> Result<()> {
        let mut delta = new.clone();
        for (word, score) in old {
            *delta.entry(word.clone()).or_insert(0) -= score;
        }
        for (word, score) in &delta {
            self.apply(word, service_id, service_type_id, *score).await?;
        }
        Ok(())
    }

    pub async fn get_hits(&self, word: &str) -> Result<Vec<Posting>> {
        let rs = self
            .iface
            .exec_proc("WordIndexGetHits", vec![Param::text(word)])
            .await?;
        Ok(rs
            .rows()
            .iter()
            .filter_map(|row| {
                Some(Posting {
                    service_id: row.first()?.as_int()? as u32,
                    service_type_id: row.get(1)?.as_int()? as i32,
                    score: row.get(2)?.as_int()? as i32,
                })
            })
            .collect())
    }

    pub async fn get_hit_count(&self, word: &str) -> Result<usize> {
        let rs = self
            .iface
            .exec_proc("WordIndexGetHitCount", vec![Param::text(word)])
            .await?;
        Ok(rs.first_int().unwrap_or(0) as usize)
    }

    /// Drop postings whose service id no longer resolves to a live row.
    pub async fn remove_dud_hits(&self, word: &str, service_ids: &[u32]) -> Result<()> {
        for id in service_ids {
            self.iface
                .exec_proc(
                    "WordIndexRemove",
                    vec![Param::text(word), (*id).into()],
                )
                .await?;
        }
        Ok(())
    }

    /// Closest indexed token to `term` within `max_dist` edits.
    pub async fn suggest(&self, term: &str, max_dist: usize) -> Result<String> {
        let rs = self.iface.exec_proc("WordIndexWords", vec![]).await?;
        let mut best: Option<(usize, String)> = None;
        for row in rs.rows() {
            let Some(word) = row.first().and_then(|v| v.as_text()) else {
                continue;
            };
            let dist = edit_distance(term, word);
            if dist <= max_dist && best.as_ref().is_none_or(|(d, _)| dist < *d) {
                best = Some((dist, word.to_string()));
            }
        }
        best.map(|(_, w)| w)
            .ok_or_else(|| Error::DbQuery(format!("no suggestion for '{term}'")))
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitute.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::{DbManager, DbPaths};
    use crate::db::Database;
    use crate::ontology::Ontology;

    async fn word_index() -> (tempfile::TempDir, WordIndex) {
        let dir = tempfile::tempdir().unwrap();
        let ontology = Arc::new(Ontology::with_defaults());
        let manager = DbManager::open(&DbPaths::single_dir(dir.path()), false, &ontology, None)
            .await
            .unwrap();
        let index = WordIndex::new(manager.interface(Database::FileMeta));
        (dir, index)
    }

    fn words(pairs: &[(&str, i32)]) -> WordMap {
        pairs.iter().map(|(w, s)| (w.to_string(), *s)).collect()
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[tokio::test]
    async fn add_and_read_postings() {
        let (_dir, index) = word_index().await;
        index
            .add_new_service(42, 1, &words(&[("hello", 2), ("world", 1), ("zero", 0)]))
            .await
            .unwrap();

        let hits = index.get_hits("hello").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].service_id, 42);
        assert_eq!(hits[0].score, 2);
        // zero scores are skipped entirely
        assert!(index.get_hits("zero").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identical_differential_is_a_no_op() {
        let (_dir, index) = word_index().await;
        let map = words(&[("hello", 2), ("world", 1)]);
        index.add_new_service(7, 1, &map).await.unwrap();
        index.update_differential(7, 1, &map, &map).await.unwrap();

        let hits = index.get_hits("hello").await.unwrap();
        assert_eq!(hits[0].score, 2);
        let hits = index.get_hits("world").await.unwrap();
        assert_eq!(hits[0].score, 1);
    }

    #[tokio::test]
    async fn differential_moves_weight_between_tokens() {
        let (_dir, index) = word_index().await;
        let old = words(&[("alpha", 2), ("beta", 1)]);
        index.add_new_service(9, 1, &old).await.unwrap();

        let new = words(&[("alpha", 1), ("gamma", 3)]);
        index.update_differential(9, 1, &old, &new).await.unwrap();

        assert_eq!(index.get_hits("alpha").await.unwrap()[0].score, 1);
        // dropped to zero and pruned
        assert!(index.get_hits("beta").await.unwrap().is_empty());
        assert_eq!(index.get_hits("gamma").await.unwrap()[0].score, 3);
    }

    #[tokio::test]
    async fn dud_removal_drops_posting() {
        let (_dir, index) = word_index().await;
        index
            .add_new_service(999999, 1, &words(&[("ghost", 5)]))
            .await
            .unwrap();
        index.remove_dud_hits("ghost", &[999999]).await.unwrap();
        assert!(index.get_hits("ghost").await.unwrap().is_empty());
        assert_eq!(index.get_hit_count("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn suggest_finds_closest_word() {
        let (_dir, index) = word_index().await;
        index
            .add_new_service(1, 1, &words(&[("hello", 1), ("help", 1)]))
            .await
            .unwrap();
        assert_eq!(index.suggest("helo", 2).await.unwrap(), "hello");
        assert!(index.suggest("zzzzzz", 1).await.is_err());
    }
}
