//! Fingerprinting of EDS spectrum plots and similarity ranking against a
//! corpus of known minerals.
//!
//! ```text
//! RasterImage -> SpectrumExtractor -> RawSignature -> resample_and_normalize
//!     -> FeatureVector -> VectorStore -> Corpus -> rank -> SimilarityResult*
//! ```

pub mod config;
pub mod database;
pub mod extractor;
pub mod ingest;
pub mod pipeline;
pub mod raster;
pub mod resample;
pub mod search;
pub mod snapshot;
pub mod vector_entry;
pub mod vector_ops;

pub use config::{Number, State};
pub use database::{LmdbStore, MemoryStore, StoreError, VectorStore};
pub use extractor::{
    BlurMethod, ExtractError, ExtractorConfig, RawSignature, SignatureMethod, SpectrumExtractor,
};
pub use pipeline::{Fingerprinter, Identification, PipelineError, SaveQuery, StoreIdentification};
pub use raster::{RasterError, RasterImage};
pub use resample::resample_and_normalize;
pub use search::{rank, Confidence, Corpus, SearchError, SimilarityEngine, SimilarityResult};
pub use vector_entry::{FeatureVector, Metadata, RecordId, ReferenceRecord};
