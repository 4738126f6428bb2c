use crate::search::Corpus;
use crate::vector_entry::{FeatureVector, Metadata, RecordId, ReferenceRecord};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};

const MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB
const NEXT_ID_KEY: &str = "next_id";
const DIMENSIONS_KEY: &str = "dimensions";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record {0} not found")]
    NotFound(RecordId),
    #[error("Vector dimension mismatch: store holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("LMDB error: {0}")]
    Backend(#[from] heed::Error),
    #[error("Record encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

/// Persistence contract for reference fingerprints.
///
/// Implementations serialize their own mutations so that `list_all` always
/// returns a consistent snapshot.
pub trait VectorStore: Send + Sync {
    /// Length every stored vector must have.
    fn dimensions(&self) -> usize;

    fn insert(
        &self,
        label: &str,
        vector: FeatureVector,
        metadata: Metadata,
    ) -> Result<RecordId, StoreError>;

    fn get_record(&self, id: RecordId) -> Result<ReferenceRecord, StoreError>;

    /// All records in id order.
    fn list_all(&self) -> Result<Vec<ReferenceRecord>, StoreError>;

    fn remove(&self, id: RecordId) -> Result<(), StoreError>;

    /// Replaces the record with a relabelled copy. Vectors are never edited.
    fn update(&self, id: RecordId, new_label: Option<&str>) -> Result<ReferenceRecord, StoreError>;

    fn put(&self, label: &str, vector: FeatureVector) -> Result<RecordId, StoreError> {
        self.insert(label, vector, Metadata::default())
    }

    fn get(&self, id: RecordId) -> Result<FeatureVector, StoreError> {
        self.get_record(id).map(|record| record.vector)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.list_all().map(|records| records.len())
    }

    /// Detached snapshot of the current contents, safe to rank against while
    /// the store keeps changing.
    fn corpus(&self) -> Result<Corpus, StoreError> {
        self.list_all().map(Corpus::new)
    }
}

fn check_dimensions(expected: usize, vector: &FeatureVector) -> Result<(), StoreError> {
    vector
        .ensure_dimensions(expected)
        .map_err(|_| StoreError::DimensionMismatch {
            expected,
            actual: vector.dimensions(),
        })
}

fn record_key(id: RecordId) -> String {
    format!("{:020}", id.0)
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8 bytes, found {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// LMDB-backed store: one database of bincode records keyed by zero-padded
/// id, one of counters. Ids are never reused.
pub struct LmdbStore {
    env: Env,
    records: Database<Str, Bytes>,
    meta: Database<Str, Bytes>,
    dimensions: usize,
}

impl LmdbStore {
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, StoreError> {
        let path = PathBuf::from(path.as_ref());
        fs::create_dir_all(&path)?;

        debug!("Opening LMDB store at {}", path.display());
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(2)
                .open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let records: Database<Str, Bytes> = env.create_database(&mut wtxn, Some("records"))?;
        let meta: Database<Str, Bytes> = env.create_database(&mut wtxn, Some("meta"))?;

        let stored = meta
            .get(&wtxn, DIMENSIONS_KEY)?
            .map(decode_u64)
            .transpose()?;
        match stored {
            Some(existing) if existing as usize != dimensions => {
                return Err(StoreError::DimensionMismatch {
                    expected: existing as usize,
                    actual: dimensions,
                });
            }
            Some(_) => {}
            None => {
                meta.put(
                    &mut wtxn,
                    DIMENSIONS_KEY,
                    (dimensions as u64).to_be_bytes().as_slice(),
                )?;
            }
        }
        wtxn.commit()?;

        info!(
            "Opened store at {} ({} dimensions)",
            path.display(),
            dimensions
        );
        Ok(Self {
            env,
            records,
            meta,
            dimensions,
        })
    }

    fn read_record(&self, rtxn: &RoTxn, id: RecordId) -> Result<ReferenceRecord, StoreError> {
        let bytes = self
            .records
            .get(rtxn, record_key(id).as_str())?
            .ok_or(StoreError::NotFound(id))?;
        self.decode_record(bytes)
    }

    fn decode_record(&self, bytes: &[u8]) -> Result<ReferenceRecord, StoreError> {
        let record: ReferenceRecord = bincode::deserialize(bytes)?;
        record
            .vector
            .ensure_dimensions(self.dimensions)
            .map_err(|e| StoreError::Corrupt(format!("record {}: {}", record.id, e)))?;
        Ok(record)
    }
}

impl VectorStore for LmdbStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn insert(
        &self,
        label: &str,
        vector: FeatureVector,
        metadata: Metadata,
    ) -> Result<RecordId, StoreError> {
        check_dimensions(self.dimensions, &vector)?;

        let mut wtxn = self.env.write_txn()?;
        let next = self
            .meta
            .get(&wtxn, NEXT_ID_KEY)?
            .map(decode_u64)
            .transpose()?
            .unwrap_or(1);
        let id = RecordId(next);

        let record = ReferenceRecord {
            id,
            label: label.to_string(),
            vector,
            metadata,
        };
        let value = bincode::serialize(&record)?;
        self.records.put(&mut wtxn, record_key(id).as_str(), value.as_slice())?;
        self.meta
            .put(&mut wtxn, NEXT_ID_KEY, (next + 1).to_be_bytes().as_slice())?;
        wtxn.commit()?;

        debug!("Stored record {} with label '{}'", id, label);
        Ok(id)
    }

    fn get_record(&self, id: RecordId) -> Result<ReferenceRecord, StoreError> {
        let rtxn = self.env.read_txn()?;
        self.read_record(&rtxn, id)
    }

    fn list_all(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let mut records = Vec::new();
        for entry in self.records.iter(&rtxn)? {
            let (_, bytes) = entry?;
            records.push(self.decode_record(bytes)?);
        }
        Ok(records)
    }

    fn remove(&self, id: RecordId) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        let deleted = self.records.delete(&mut wtxn, record_key(id).as_str())?;
        if !deleted {
            return Err(StoreError::NotFound(id));
        }
        wtxn.commit()?;
        debug!("Removed record {}", id);
        Ok(())
    }

    fn update(&self, id: RecordId, new_label: Option<&str>) -> Result<ReferenceRecord, StoreError> {
        let mut wtxn = self.env.write_txn()?;
        let current = self.read_record(&wtxn, id)?;
        let Some(label) = new_label else {
            return Ok(current);
        };
        let replacement = current.with_label(label);
        let value = bincode::serialize(&replacement)?;
        self.records
            .put(&mut wtxn, record_key(id).as_str(), value.as_slice())?;
        wtxn.commit()?;
        debug!("Relabelled record {} to '{}'", id, label);
        Ok(replacement)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.len(&rtxn)? as usize)
    }
}

#[derive(Default)]
struct MemoryInner {
    records: BTreeMap<RecordId, ReferenceRecord>,
    next_id: u64,
}

/// Process-local store, mainly for tests and embedding.
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    dimensions: usize,
}

impl MemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            dimensions,
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Corrupt("store lock poisoned".to_string())
}

impl VectorStore for MemoryStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn insert(
        &self,
        label: &str,
        vector: FeatureVector,
        metadata: Metadata,
    ) -> Result<RecordId, StoreError> {
        check_dimensions(self.dimensions, &vector)?;
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.next_id += 1;
        let id = RecordId(inner.next_id);
        inner.records.insert(
            id,
            ReferenceRecord {
                id,
                label: label.to_string(),
                vector,
                metadata,
            },
        );
        Ok(id)
    }

    fn get_record(&self, id: RecordId) -> Result<ReferenceRecord, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn list_all(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.records.values().cloned().collect())
    }

    fn remove(&self, id: RecordId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn update(&self, id: RecordId, new_label: Option<&str>) -> Result<ReferenceRecord, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let current = inner.records.get(&id).ok_or(StoreError::NotFound(id))?;
        let Some(label) = new_label else {
            return Ok(current.clone());
        };
        let replacement = current.with_label(label);
        inner.records.insert(id, replacement.clone());
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(values: &[f64]) -> FeatureVector {
        FeatureVector::normalized(values.to_vec()).unwrap()
    }

    fn exercise(store: &dyn VectorStore) {
        let a = store.put("ALBITA", unit(&[1.0, 0.0, 0.0])).unwrap();
        let b = store
            .insert(
                "GALENA",
                unit(&[0.0, 1.0, 1.0]),
                Metadata::now(Some("lab".to_string()), Some("galena.png".to_string())),
            )
            .unwrap();
        assert!(b > a);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.get(a).unwrap(), unit(&[1.0, 0.0, 0.0]));

        let labels: Vec<String> = store.list_all().unwrap().into_iter().map(|r| r.label).collect();
        assert_eq!(labels, vec!["ALBITA", "GALENA"]);

        let renamed = store.update(b, Some("PIRITA")).unwrap();
        assert_eq!(renamed.label, "PIRITA");
        assert_eq!(renamed.vector, unit(&[0.0, 1.0, 1.0]));
        assert_eq!(renamed.metadata.researcher.as_deref(), Some("lab"));
        assert_eq!(store.get_record(b).unwrap().label, "PIRITA");
        assert_eq!(store.update(b, None).unwrap().label, "PIRITA");

        let snapshot = store.corpus().unwrap();
        store.remove(a).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.count().unwrap(), 1);

        assert!(matches!(store.get(a), Err(StoreError::NotFound(id)) if id == a));
        assert!(matches!(store.remove(a), Err(StoreError::NotFound(_))));
        assert!(matches!(store.update(a, Some("X")), Err(StoreError::NotFound(_))));

        let c = store.put("CUARZO", unit(&[0.0, 0.0, 1.0])).unwrap();
        assert!(c > b);

        assert!(matches!(
            store.put("WRONG", unit(&[1.0, 1.0])),
            Err(StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new(3));
    }

    #[test]
    fn lmdb_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = LmdbStore::open(dir.path().join("db"), 3).unwrap();
        exercise(&store);
    }

    #[test]
    fn lmdb_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let first = {
            let store = LmdbStore::open(&path, 2).unwrap();
            let id = store.put("MAGNETITA", unit(&[3.0, 4.0])).unwrap();
            store.remove(store.put("TEMP", unit(&[1.0, 0.0])).unwrap()).unwrap();
            id
        };

        let store = LmdbStore::open(&path, 2).unwrap();
        let record = store.get_record(first).unwrap();
        assert_eq!(record.label, "MAGNETITA");
        assert_eq!(record.vector.as_slice(), &[0.6, 0.8]);

        // The removed id is not handed out again.
        let next = store.put("HEMATITA", unit(&[0.0, 1.0])).unwrap();
        assert_eq!(next, RecordId(3));
    }

    #[test]
    fn lmdb_store_rejects_a_different_dimensionality() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        drop(LmdbStore::open(&path, 200).unwrap());
        assert!(matches!(
            LmdbStore::open(&path, 100),
            Err(StoreError::DimensionMismatch {
                expected: 200,
                actual: 100
            })
        ));
    }
}
