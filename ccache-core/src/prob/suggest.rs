//! # Suggestion Dictionary
//!
//! Autocomplete entries scored by the caller. Lookup filters by
//! case-insensitive prefix, or by Levenshtein distance <= 2 in fuzzy mode,
//! and returns the best `max` matches by score descending.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ccache_common::{CacheResult, ValueKind};

use crate::db::Db;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub score: f64,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestDict {
    pub entries: HashMap<String, Suggestion>,
}

/// One lookup match.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestHit {
    pub text: String,
    pub score: f64,
    pub payload: Option<String>,
}

impl SuggestDict {
    /// Upserts an entry. Returns the dictionary size afterwards.
    pub fn add(&mut self, text: &str, score: f64, payload: Option<String>) -> usize {
        self.entries
            .insert(text.to_string(), Suggestion { score, payload });
        self.entries.len()
    }

    pub fn del(&mut self, text: &str) -> bool {
        self.entries.remove(text).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-`max` matches by score descending. Fuzzy mode admits entries
    /// whose leading characters are within edit distance 2 of the query
    /// (the query is truncated to the entry's length first).
    pub fn get(&self, prefix: &str, fuzzy: bool, max: usize) -> Vec<SuggestHit> {
        let query = prefix.to_lowercase();
        let mut hits: Vec<SuggestHit> = self
            .entries
            .iter()
            .filter(|(text, _)| {
                let candidate = text.to_lowercase();
                if candidate.starts_with(&query) {
                    return true;
                }
                if !fuzzy {
                    return false;
                }
                let candidate_chars: Vec<char> = candidate.chars().collect();
                let query_chars: Vec<char> = query.chars().collect();
                let take = candidate_chars.len().min(query_chars.len());
                levenshtein(&candidate_chars[..take], &query_chars[..take]) <= 2
            })
            .map(|(text, suggestion)| SuggestHit {
                text: text.clone(),
                score: suggestion.score,
                payload: suggestion.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.text.cmp(&b.text)));
        hits.truncate(max);
        hits
    }
}

/// Classic two-row Levenshtein over char slices.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

impl Db {
    /// FT.SUGADD. Returns the dictionary size after the upsert.
    pub fn sug_add(
        &self,
        key: &str,
        text: &str,
        score: f64,
        payload: Option<String>,
    ) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Suggest)?;
        let body = self.keyspace.suggest.load_or_store(key, SuggestDict::default);
        let len = body.write().add(text, score, payload) as i64;
        self.touch_write(key);
        Ok(len)
    }

    /// FT.SUGDEL. Purges the key when the dictionary empties.
    pub fn sug_del(&self, key: &str, text: &str) -> CacheResult<bool> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Suggest)? {
            return Ok(false);
        }
        let Some(body) = self.keyspace.suggest.load(key) else {
            return Ok(false);
        };
        let mut dict = body.write();
        let removed = dict.del(text);
        let empty = dict.is_empty();
        drop(dict);
        if removed {
            self.purge_if_empty(key, empty);
            self.touch_write(key);
        }
        Ok(removed)
    }

    /// FT.SUGGET.
    pub fn sug_get(
        &self,
        key: &str,
        prefix: &str,
        fuzzy: bool,
        max: usize,
    ) -> CacheResult<Vec<SuggestHit>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Suggest)? {
            return Ok(Vec::new());
        }
        Ok(self
            .keyspace
            .suggest
            .load(key)
            .map(|body| body.read().get(prefix, fuzzy, max))
            .unwrap_or_default())
    }

    /// FT.SUGLEN.
    pub fn sug_len(&self, key: &str) -> CacheResult<i64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Suggest)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .suggest
            .load(key)
            .map(|body| body.read().len() as i64)
            .unwrap_or(0))
    }
}
