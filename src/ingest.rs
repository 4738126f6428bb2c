//! Bulk loading of reference spectra from a folder of captures.

use crate::database::{StoreError, VectorStore};
use crate::pipeline::Fingerprinter;
use crate::raster::{RasterError, RasterImage};
use crate::vector_entry::Metadata;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];
const LABEL_PREFIXES: &[&str] = &["EDS ", "Eds ", "Element "];

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("Failed to decode image '{path}': {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Unusable image '{path}': {source}")]
    Raster { path: PathBuf, source: RasterError },
}

#[derive(Error, Debug)]
pub enum PopulateError {
    #[error("Failed to read directory '{path}': {source}")]
    ReadDir { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulateSummary {
    pub added: usize,
    /// Images whose source path was already stored.
    pub duplicates: usize,
    /// Images that failed to decode or gave no usable fingerprint.
    pub unusable: usize,
}

impl PopulateSummary {
    pub fn skipped(&self) -> usize {
        self.duplicates + self.unusable
    }
}

/// Decodes an image file into an RGB raster.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RasterImage, ImageLoadError> {
    let path = path.as_ref();
    let decoded = image::open(path).map_err(|source| ImageLoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    RasterImage::from_dynamic(&decoded).map_err(|source| ImageLoadError::Raster {
        path: path.to_path_buf(),
        source,
    })
}

/// Fingerprints every spectrum image in `dir` into `store`, labelled from its
/// file name.
///
/// Images already stored under the same source path are skipped, as are
/// images that cannot be decoded or fingerprinted; each skip is logged and the
/// run carries on. Only store failures abort.
pub fn populate<P: AsRef<Path>>(
    store: &dyn VectorStore,
    fingerprinter: &Fingerprinter,
    dir: P,
    researcher: Option<&str>,
) -> Result<PopulateSummary, PopulateError> {
    let dir = dir.as_ref();
    let images = spectrum_images(dir).map_err(|source| PopulateError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    info!("Found {} images in {}", images.len(), dir.display());

    let mut known_sources: HashSet<String> = store
        .list_all()?
        .into_iter()
        .filter_map(|r| r.metadata.source)
        .collect();

    let mut summary = PopulateSummary::default();
    for path in images {
        let source = path.display().to_string();
        if known_sources.contains(&source) {
            warn!("'{}' is already in the store. Skipping.", source);
            summary.duplicates += 1;
            continue;
        }

        let raster = match load_image(&path) {
            Ok(raster) => raster,
            Err(e) => {
                warn!("{}. Skipping.", e);
                summary.unusable += 1;
                continue;
            }
        };
        let vector = match fingerprinter.fingerprint(&raster) {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                warn!("No usable spectrum fingerprint in '{}'. Skipping.", source);
                summary.unusable += 1;
                continue;
            }
            Err(e) => {
                warn!("Cannot fingerprint '{}': {}. Skipping.", source, e);
                summary.unusable += 1;
                continue;
            }
        };

        let label = label_from_file_name(&path.file_name().unwrap_or_default().to_string_lossy());
        let metadata = Metadata::now(researcher.map(str::to_string), Some(source.clone()));
        let id = store.insert(&label, vector, metadata)?;
        info!("Added '{}' as {} ({})", label, id, source);
        known_sources.insert(source);
        summary.added += 1;
    }
    Ok(summary)
}

/// Spectrum image files directly inside `dir`, sorted by path.
pub fn spectrum_images<P: AsRef<Path>>(dir: P) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Mineral name encoded in a sample file name, e.g. `"EDS ALBITA_02.png"` → `"ALBITA"`.
pub fn label_from_file_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    let mut name = stem;
    for prefix in LABEL_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
        }
    }

    let end = name
        .find(|c: char| c == '_' || c.is_ascii_digit())
        .unwrap_or(name.len());
    name[..end].trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn labels_follow_sample_naming() {
        assert_eq!(label_from_file_name("EDS ALBITA_02.png"), "ALBITA");
        assert_eq!(label_from_file_name("Eds broncita_001.png"), "BRONCITA");
        assert_eq!(label_from_file_name("EDS galena.jpg"), "GALENA");
        assert_eq!(label_from_file_name("Element pirita2.png"), "PIRITA");
        assert_eq!(label_from_file_name("magnetita"), "MAGNETITA");
    }

    #[test]
    fn lists_only_images_in_name_order() {
        let dir = TempDir::new().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.tiff"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();
        let names: Vec<String> = spectrum_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.tiff"]);
    }
}
