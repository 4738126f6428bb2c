use crate::config::Number;
use crate::vector_entry::{RecordId, ReferenceRecord};
use crate::vector_ops::compute_cosine_similarity_simd;
use rayon::prelude::*;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum SearchError {
    #[error("Vector dimension mismatch for record {id}: query has {expected}, record has {actual}")]
    DimensionMismatch {
        id: RecordId,
        expected: usize,
        actual: usize,
    },
}

/// Ordered, read-only snapshot of reference records for one ranking call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    records: Vec<ReferenceRecord>,
}

impl Corpus {
    pub fn new(records: Vec<ReferenceRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A copy of this corpus minus the record `id`, keeping the order.
    pub fn without(&self, id: RecordId) -> Self {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| r.id != id)
                .cloned()
                .collect(),
        }
    }
}

impl From<Vec<ReferenceRecord>> for Corpus {
    fn from(records: Vec<ReferenceRecord>) -> Self {
        Self::new(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub id: RecordId,
    pub label: String,
    pub score: Number,
}

impl SimilarityResult {
    /// Above 0.8 is a very likely match, above 0.6 a possible one.
    pub fn confidence(&self) -> Confidence {
        if self.score > 0.8 {
            Confidence::High
        } else if self.score > 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Scores every record in `corpus` against `query` and returns those with
/// `score >= threshold`, best first. Equal scores keep corpus order.
///
/// The query's own record is not excluded; build the corpus without it.
pub fn rank(
    query: &[Number],
    corpus: &Corpus,
    threshold: Number,
) -> Result<Vec<SimilarityResult>, SearchError> {
    let mut results = corpus
        .records
        .par_iter()
        .map(|record| {
            compute_cosine_similarity_simd(query, &record.vector)
                .map(|score| SimilarityResult {
                    id: record.id,
                    label: record.label.clone(),
                    score,
                })
                .ok_or(SearchError::DimensionMismatch {
                    id: record.id,
                    expected: query.len(),
                    actual: record.vector.dimensions(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.retain(|r| r.score >= threshold);
    Ok(results)
}

#[derive(Debug, Default)]
pub struct SearchTimings {
    pub search_duration: Duration,
    pub total_duration: Duration,
}

/// Exact linear-scan ranking with an optional display limit.
pub struct SimilarityEngine {
    top_k: Option<usize>,
}

impl SimilarityEngine {
    pub fn new(top_k: Option<usize>) -> Self {
        Self { top_k }
    }

    pub fn search(
        &self,
        query: &[Number],
        corpus: &Corpus,
        threshold: Number,
    ) -> Result<(Vec<SimilarityResult>, SearchTimings), SearchError> {
        let start = Instant::now();

        let mut results = rank(query, corpus, threshold)?;
        let search_duration = start.elapsed();

        if let Some(limit) = self.top_k {
            results.truncate(limit);
        }

        debug!(
            "Ranked {} records in {:?}, {} at or above {}",
            corpus.len(),
            search_duration,
            results.len(),
            threshold
        );

        let timings = SearchTimings {
            search_duration,
            total_duration: start.elapsed(),
        };

        Ok((results, timings))
    }
}
