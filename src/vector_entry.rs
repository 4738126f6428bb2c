use crate::config::Number;
use crate::vector_ops::{is_unit, l2_norm, normalize_vector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum VectorError {
    #[error("Feature vector is empty")]
    Empty,
    #[error("Feature vector contains a non-finite value at dimension {0}")]
    NonFinite(usize),
    #[error("Feature vector norm is {0}, expected 1")]
    NotUnit(Number),
    #[error("Feature vector has {actual} dimensions, expected {expected}")]
    WrongDimensions { expected: usize, actual: usize },
}

/// Fixed-length, unit-norm spectrum fingerprint. Zero vectors cannot be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Number>", into = "Vec<Number>")]
pub struct FeatureVector(Vec<Number>);

impl FeatureVector {
    /// Scales `values` to unit norm; `None` for empty, zero or non-finite input.
    pub fn normalized(mut values: Vec<Number>) -> Option<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        if normalize_vector(&mut values) {
            Some(Self(values))
        } else {
            None
        }
    }

    /// Accepts values that are already unit norm, as read back from storage.
    pub fn from_unit_values(values: Vec<Number>) -> Result<Self, VectorError> {
        if values.is_empty() {
            return Err(VectorError::Empty);
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite(i));
        }
        if !is_unit(&values) {
            return Err(VectorError::NotUnit(l2_norm(&values)));
        }
        Ok(Self(values))
    }

    /// [`from_unit_values`](Self::from_unit_values) for a corpus with a fixed
    /// dimensionality.
    pub fn from_unit_values_with_dimensions(
        values: Vec<Number>,
        dimensions: usize,
    ) -> Result<Self, VectorError> {
        let vector = Self::from_unit_values(values)?;
        vector.ensure_dimensions(dimensions)?;
        Ok(vector)
    }

    pub fn ensure_dimensions(&self, expected: usize) -> Result<(), VectorError> {
        if self.dimensions() != expected {
            return Err(VectorError::WrongDimensions {
                expected,
                actual: self.dimensions(),
            });
        }
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[Number] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Number> {
        self.0
    }
}

impl Deref for FeatureVector {
    type Target = [Number];

    fn deref(&self) -> &[Number] {
        &self.0
    }
}

impl TryFrom<Vec<Number>> for FeatureVector {
    type Error = VectorError;

    fn try_from(values: Vec<Number>) -> Result<Self, Self::Error> {
        Self::from_unit_values(values)
    }
}

impl From<FeatureVector> for Vec<Number> {
    fn from(vector: FeatureVector) -> Self {
        vector.0
    }
}

/// Store-assigned record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RecordId)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub researcher: Option<String>,
    pub source: Option<String>,
    /// Seconds since the unix epoch.
    pub added_at: u64,
}

impl Metadata {
    pub fn now(researcher: Option<String>, source: Option<String>) -> Self {
        let added_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            researcher,
            source,
            added_at,
        }
    }
}

/// A known sample. Never edited in place: an update builds a replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: RecordId,
    pub label: String,
    pub vector: FeatureVector,
    pub metadata: Metadata,
}

impl ReferenceRecord {
    pub fn with_label(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_rejects_degenerate_input() {
        assert!(FeatureVector::normalized(vec![]).is_none());
        assert!(FeatureVector::normalized(vec![0.0; 5]).is_none());
        assert!(FeatureVector::normalized(vec![1.0, Number::NAN]).is_none());
        let v = FeatureVector::normalized(vec![0.0, 2.0]).unwrap();
        assert_eq!(v.as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn from_unit_values_checks_the_norm() {
        assert_eq!(
            FeatureVector::from_unit_values(vec![3.0, 4.0]),
            Err(VectorError::NotUnit(5.0))
        );
        assert_eq!(FeatureVector::from_unit_values(vec![]), Err(VectorError::Empty));
        assert_eq!(
            FeatureVector::from_unit_values(vec![1.0, Number::INFINITY]),
            Err(VectorError::NonFinite(1))
        );
        assert!(FeatureVector::from_unit_values(vec![0.6, 0.8]).is_ok());
    }

    #[test]
    fn fixed_dimensionality_is_checked() {
        assert!(FeatureVector::from_unit_values_with_dimensions(vec![0.6, 0.8], 2).is_ok());
        assert_eq!(
            FeatureVector::from_unit_values_with_dimensions(vec![0.6, 0.8], 3),
            Err(VectorError::WrongDimensions {
                expected: 3,
                actual: 2
            })
        );
        // Norm problems are reported before the length.
        assert_eq!(
            FeatureVector::from_unit_values_with_dimensions(vec![3.0, 4.0], 3),
            Err(VectorError::NotUnit(5.0))
        );
    }

    #[test]
    fn deserializing_validates() {
        let ok: FeatureVector = serde_json::from_str("[0.6, 0.8]").unwrap();
        assert_eq!(ok.dimensions(), 2);
        assert!(serde_json::from_str::<FeatureVector>("[1.0, 1.0]").is_err());
    }

    #[test]
    fn relabel_builds_a_new_record() {
        let record = ReferenceRecord {
            id: RecordId(7),
            label: "GALENA".to_string(),
            vector: FeatureVector::normalized(vec![1.0, 1.0]).unwrap(),
            metadata: Metadata::default(),
        };
        let renamed = record.with_label("PIRITA");
        assert_eq!(renamed.label, "PIRITA");
        assert_eq!(renamed.id, record.id);
        assert_eq!(record.label, "GALENA");
    }

    #[test]
    fn record_id_round_trips_through_text() {
        assert_eq!("42".parse::<RecordId>().unwrap(), RecordId(42));
        assert_eq!(RecordId(42).to_string(), "42");
    }
}
