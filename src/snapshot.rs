//! Flat binary corpus snapshots.
//!
//! Layout (little-endian): `b"SPKT"`, `u32` version, `u32` dimensions,
//! `u64` record count, then per record `u64` id, `dimensions` × `f64`,
//! `u32` label length and the UTF-8 label bytes.

use crate::config::Number;
use crate::search::Corpus;
use crate::vector_entry::{FeatureVector, Metadata, RecordId, ReferenceRecord, VectorError};
use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"SPKT";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a snapshot file (bad magic)")]
    BadMagic,
    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("Snapshot truncated at byte {0}")]
    Truncated(usize),
    #[error("Record {id} has {actual} dimensions, snapshot declares {expected}")]
    DimensionMismatch {
        id: RecordId,
        expected: usize,
        actual: usize,
    },
    #[error("Record {id}: {source}")]
    InvalidVector { id: RecordId, source: VectorError },
    #[error("Record {0} has a label that is not valid UTF-8")]
    InvalidLabel(RecordId),
    #[error("Label of record {0} is too long")]
    LabelTooLong(RecordId),
    #[error("{0} dimensions do not fit a snapshot header")]
    TooManyDimensions(usize),
    #[error("Snapshot has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// Writes `corpus` to `path`, replacing any existing file. Every record must
/// have `dimensions` values.
///
/// Records are checked before anything is written, and the file is built
/// beside `path` and renamed into place, so a failed export leaves the
/// previous snapshot intact.
pub fn write_snapshot<P: AsRef<Path>>(
    path: P,
    corpus: &Corpus,
    dimensions: usize,
) -> Result<usize, SnapshotError> {
    let path = path.as_ref();
    let header_dimensions =
        u32::try_from(dimensions).map_err(|_| SnapshotError::TooManyDimensions(dimensions))?;
    let mut label_lens = Vec::with_capacity(corpus.len());
    for record in corpus.records() {
        if record.vector.dimensions() != dimensions {
            return Err(SnapshotError::DimensionMismatch {
                id: record.id,
                expected: dimensions,
                actual: record.vector.dimensions(),
            });
        }
        let label_len = u32::try_from(record.label.len())
            .map_err(|_| SnapshotError::LabelTooLong(record.id))?;
        label_lens.push(label_len);
    }

    let tmp_path = temporary_path(path);
    let result = write_records(&tmp_path, corpus, header_dimensions, &label_lens)
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(corpus.len())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_records(
    path: &Path,
    corpus: &Corpus,
    dimensions: u32,
    label_lens: &[u32],
) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut out = BufWriter::new(file);

    out.write_all(MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(&dimensions.to_le_bytes())?;
    out.write_all(&(corpus.len() as u64).to_le_bytes())?;

    for (record, label_len) in corpus.records().iter().zip(label_lens) {
        out.write_all(&record.id.0.to_le_bytes())?;
        for value in record.vector.iter() {
            out.write_all(&value.to_le_bytes())?;
        }
        out.write_all(&label_len.to_le_bytes())?;
        out.write_all(record.label.as_bytes())?;
    }
    out.into_inner()?.sync_all()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(SnapshotError::Truncated(self.bytes.len()))?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        self.array().map(u64::from_le_bytes)
    }
}

/// Decodes a snapshot held in memory into an owned [`Corpus`].
pub fn decode_snapshot(bytes: &[u8]) -> Result<(Corpus, usize), SnapshotError> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let dimensions = reader.u32()? as usize;
    let count = reader.u64()? as usize;
    let vector_len = dimensions
        .checked_mul(size_of::<Number>())
        .ok_or(SnapshotError::Truncated(bytes.len()))?;

    let mut records = Vec::with_capacity(count.min(bytes.len() / size_of::<u64>()));
    for _ in 0..count {
        let id = RecordId(reader.u64()?);
        let values: Vec<Number> = reader
            .take(vector_len)?
            .chunks_exact(size_of::<Number>())
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                Number::from_le_bytes(raw)
            })
            .collect();
        let vector = FeatureVector::from_unit_values_with_dimensions(values, dimensions)
            .map_err(|source| SnapshotError::InvalidVector { id, source })?;
        let label_len = reader.u32()? as usize;
        let label = std::str::from_utf8(reader.take(label_len)?)
            .map_err(|_| SnapshotError::InvalidLabel(id))?
            .to_string();
        records.push(ReferenceRecord {
            id,
            label,
            vector,
            metadata: Metadata::default(),
        });
    }

    let trailing = bytes.len() - reader.pos;
    if trailing > 0 {
        return Err(SnapshotError::TrailingBytes(trailing));
    }
    Ok((Corpus::new(records), dimensions))
}

/// Maps the snapshot file and decodes it. Returns the corpus and its
/// declared dimensionality.
pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<(Corpus, usize), SnapshotError> {
    let file = File::open(path.as_ref())?;
    let len = file.metadata()?.len() as usize;
    if len < HEADER_LEN {
        return Err(SnapshotError::Truncated(len));
    }
    let mmap = unsafe { Mmap::map(&file)? };
    decode_snapshot(&mmap)
}
