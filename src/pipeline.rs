//! Image to fingerprint to ranking, end to end.

use crate::config::Number;
use crate::database::{StoreError, VectorStore};
use crate::extractor::{ExtractError, ExtractorConfig, SpectrumExtractor};
use crate::raster::RasterImage;
use crate::resample::resample_and_normalize;
use crate::search::{Corpus, SearchError, SimilarityEngine, SimilarityResult};
use crate::vector_entry::{FeatureVector, Metadata, RecordId};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of identifying an image against a corpus.
///
/// `NoFingerprint` and `NoMatch` are different answers and must be reported
/// differently.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    /// The image produced no usable signal.
    NoFingerprint,
    /// A valid fingerprint, but nothing scored at or above the threshold.
    NoMatch { fingerprint: FeatureVector },
    Matches {
        fingerprint: FeatureVector,
        results: Vec<SimilarityResult>,
    },
}

impl Identification {
    fn from_ranking(fingerprint: FeatureVector, results: Vec<SimilarityResult>) -> Self {
        if results.is_empty() {
            Identification::NoMatch { fingerprint }
        } else {
            Identification::Matches {
                fingerprint,
                results,
            }
        }
    }

    pub fn fingerprint(&self) -> Option<&FeatureVector> {
        match self {
            Identification::NoFingerprint => None,
            Identification::NoMatch { fingerprint } => Some(fingerprint),
            Identification::Matches { fingerprint, .. } => Some(fingerprint),
        }
    }

    /// Ranked matches, best first; empty unless `Matches`.
    pub fn results(&self) -> &[SimilarityResult] {
        match self {
            Identification::Matches { results, .. } => results.as_slice(),
            _ => &[],
        }
    }
}

/// Label and metadata under which an identified query is kept.
#[derive(Debug, Clone)]
pub struct SaveQuery {
    pub label: String,
    pub metadata: Metadata,
}

impl SaveQuery {
    /// "Unknown sample <unix time>", stamped now.
    pub fn unknown(source: Option<String>) -> Self {
        let metadata = Metadata::now(None, source);
        Self {
            label: format!("Unknown sample {}", metadata.added_at),
            metadata,
        }
    }
}

/// Outcome of identifying an image against a live store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreIdentification {
    pub outcome: Identification,
    /// Where the query was stored, if it was saved.
    pub saved_id: Option<RecordId>,
    /// Records ranked against. A saved query is not one of them.
    pub corpus_len: usize,
}

pub struct Fingerprinter {
    extractor: SpectrumExtractor,
    dimensions: usize,
}

impl Fingerprinter {
    pub fn new(config: ExtractorConfig, dimensions: usize) -> Result<Self, ExtractError> {
        Ok(Self {
            extractor: SpectrumExtractor::new(config)?,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// `Ok(None)` when the image holds no usable curve.
    pub fn fingerprint(&self, image: &RasterImage) -> Result<Option<FeatureVector>, ExtractError> {
        let signature = self.extractor.extract(image)?;
        let vector = resample_and_normalize(&signature, self.dimensions);
        if vector.is_none() {
            debug!(
                "Signature of {} columns produced no usable fingerprint",
                signature.len()
            );
        }
        Ok(vector)
    }

    /// Ranks the whole corpus, untruncated.
    pub fn identify(
        &self,
        image: &RasterImage,
        corpus: &Corpus,
        threshold: Number,
    ) -> Result<Identification, PipelineError> {
        self.identify_with(&SimilarityEngine::new(None), image, corpus, threshold)
    }

    pub fn identify_with(
        &self,
        engine: &SimilarityEngine,
        image: &RasterImage,
        corpus: &Corpus,
        threshold: Number,
    ) -> Result<Identification, PipelineError> {
        let Some(fingerprint) = self.fingerprint(image)? else {
            return Ok(Identification::NoFingerprint);
        };
        let (results, _) = engine.search(&fingerprint, corpus, threshold)?;
        Ok(Identification::from_ranking(fingerprint, results))
    }

    /// Identifies `image` against the current contents of `store`.
    ///
    /// With `save`, a usable fingerprint is stored first and its own record is
    /// left out of the ranking. Nothing is stored when the image has no
    /// fingerprint.
    pub fn identify_in_store(
        &self,
        engine: &SimilarityEngine,
        image: &RasterImage,
        store: &dyn VectorStore,
        threshold: Number,
        save: Option<SaveQuery>,
    ) -> Result<StoreIdentification, PipelineError> {
        let Some(fingerprint) = self.fingerprint(image)? else {
            return Ok(StoreIdentification {
                outcome: Identification::NoFingerprint,
                saved_id: None,
                corpus_len: store.count()?,
            });
        };

        let saved_id = match save {
            Some(query) => {
                let id = store.insert(&query.label, fingerprint.clone(), query.metadata)?;
                info!("Saved query as {} ('{}')", id, query.label);
                Some(id)
            }
            None => None,
        };
        let corpus = match saved_id {
            Some(id) => store.corpus()?.without(id),
            None => store.corpus()?,
        };

        let (results, _) = engine.search(&fingerprint, &corpus, threshold)?;
        Ok(StoreIdentification {
            outcome: Identification::from_ranking(fingerprint, results),
            saved_id,
            corpus_len: corpus.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::vector_entry::ReferenceRecord;

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            blur_kernel_size: 1,
            row_bounds: None,
            ..ExtractorConfig::default()
        }
    }

    fn peak_image(peak_col: usize) -> RasterImage {
        let (w, h) = (20, 10);
        let mut pixels = vec![1.0; w * h];
        for x in 0..w {
            pixels[(h - 1) * w + x] = 0.0;
        }
        for y in 2..h {
            pixels[y * w + peak_col] = 0.0;
        }
        RasterImage::grayscale(w, h, pixels).unwrap()
    }

    #[test]
    fn blank_image_has_no_fingerprint() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let blank = RasterImage::grayscale(12, 8, vec![1.0; 96]).unwrap();
        assert_eq!(fingerprinter.fingerprint(&blank).unwrap(), None);
        assert_eq!(
            fingerprinter
                .identify(&blank, &Corpus::default(), 0.0)
                .unwrap(),
            Identification::NoFingerprint
        );
    }

    #[test]
    fn no_match_is_distinct_from_no_fingerprint() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let outcome = fingerprinter
            .identify(&peak_image(5), &Corpus::default(), 0.0)
            .unwrap();
        assert!(matches!(outcome, Identification::NoMatch { .. }));
    }

    #[test]
    fn identical_image_ranks_first() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let records = [3, 10, 16]
            .iter()
            .enumerate()
            .map(|(i, &col)| ReferenceRecord {
                id: RecordId(i as u64 + 1),
                label: format!("peak-{}", col),
                vector: fingerprinter.fingerprint(&peak_image(col)).unwrap().unwrap(),
                metadata: Metadata::default(),
            })
            .collect();
        let outcome = fingerprinter
            .identify(&peak_image(10), &Corpus::new(records), 0.0)
            .unwrap();
        match outcome {
            Identification::Matches { results, .. } => {
                assert_eq!(results[0].label, "peak-10");
                assert!((results[0].score - 1.0).abs() < 1e-9);
            }
            other => panic!("expected matches, got {:?}", other),
        }
    }

    #[test]
    fn dimension_mismatch_surfaces_as_error() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let corpus = Corpus::new(vec![ReferenceRecord {
            id: RecordId(1),
            label: "short".to_string(),
            vector: FeatureVector::normalized(vec![1.0; 8]).unwrap(),
            metadata: Metadata::default(),
        }]);
        assert!(matches!(
            fingerprinter.identify(&peak_image(4), &corpus, 0.0),
            Err(PipelineError::Search(SearchError::DimensionMismatch { .. }))
        ));
    }

    fn stocked_store(fingerprinter: &Fingerprinter) -> MemoryStore {
        let store = MemoryStore::new(16);
        for col in [3, 10, 16] {
            let vector = fingerprinter.fingerprint(&peak_image(col)).unwrap().unwrap();
            store.put(&format!("peak-{}", col), vector).unwrap();
        }
        store
    }

    #[test]
    fn saved_query_is_left_out_of_its_own_ranking() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let store = stocked_store(&fingerprinter);
        let engine = SimilarityEngine::new(None);

        let identified = fingerprinter
            .identify_in_store(
                &engine,
                &peak_image(10),
                &store,
                -1.0,
                Some(SaveQuery::unknown(Some("query.png".to_string()))),
            )
            .unwrap();

        let saved = identified.saved_id.unwrap();
        assert_eq!(store.count().unwrap(), 4);
        assert!(store.get_record(saved).unwrap().label.starts_with("Unknown sample "));
        assert_eq!(identified.corpus_len, 3);
        let results = identified.outcome.results();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.id != saved));
        assert_eq!(results[0].label, "peak-10");
    }

    #[test]
    fn unsaved_query_leaves_the_store_alone() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let store = stocked_store(&fingerprinter);
        let identified = fingerprinter
            .identify_in_store(&SimilarityEngine::new(None), &peak_image(3), &store, 0.0, None)
            .unwrap();
        assert_eq!(identified.saved_id, None);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(identified.outcome.results()[0].label, "peak-3");
    }

    #[test]
    fn image_without_fingerprint_is_never_saved() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let store = stocked_store(&fingerprinter);
        let blank = RasterImage::grayscale(20, 10, vec![1.0; 200]).unwrap();
        let identified = fingerprinter
            .identify_in_store(
                &SimilarityEngine::new(None),
                &blank,
                &store,
                0.0,
                Some(SaveQuery::unknown(None)),
            )
            .unwrap();
        assert_eq!(identified.outcome, Identification::NoFingerprint);
        assert_eq!(identified.saved_id, None);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn engine_limit_applies_to_matches() {
        let fingerprinter = Fingerprinter::new(config(), 16).unwrap();
        let corpus = stocked_store(&fingerprinter).corpus().unwrap();
        let outcome = fingerprinter
            .identify_with(&SimilarityEngine::new(Some(1)), &peak_image(16), &corpus, -1.0)
            .unwrap();
        assert_eq!(outcome.results().len(), 1);
        assert_eq!(outcome.results()[0].label, "peak-16");
        assert_eq!(outcome.fingerprint().map(|f| f.dimensions()), Some(16));
    }
}
