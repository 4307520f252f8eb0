use crate::calc::aggregate::ScoredRecord;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub teacher_id: String,
    pub subject_id: String,
}

impl CacheKey {
    pub fn new(teacher_id: &str, subject_id: &str) -> Self {
        Self {
            teacher_id: teacher_id.to_string(),
            subject_id: subject_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Final-scored cohorts per subject offering. Entries are never trusted across a
/// write: every mutation of scores or components must invalidate its key first.
#[derive(Debug, Default)]
pub struct ScoreCache {
    entries: HashMap<CacheKey, Vec<ScoredRecord>>,
    hits: u64,
    misses: u64,
}

impl ScoreCache {
    pub fn get_or_try_insert_with<E, F>(&mut self, key: CacheKey, compute: F) -> Result<Vec<ScoredRecord>, E>
    where
        F: FnOnce() -> Result<Vec<ScoredRecord>, E>,
    {
        if let Some(v) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(v.clone());
        }
        self.misses += 1;
        let v = compute()?;
        self.entries.insert(key, v.clone());
        Ok(v)
    }

    pub fn invalidate(&mut self, key: &CacheKey) {
        if self.entries.remove(key).is_some() {
            tracing::debug!(teacher = %key.teacher_id, subject = %key.subject_id, "score cache entry invalidated");
        }
    }

    pub fn invalidate_teacher(&mut self, teacher_id: &str) {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.teacher_id != teacher_id);
        tracing::debug!(
            teacher = %teacher_id,
            dropped = before - self.entries.len(),
            "score cache invalidated for teacher"
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
