use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Number of components in a face descriptor produced by the face model.
pub const DESCRIPTOR_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("descriptor must have {expected} components, got {actual}")]
    DescriptorLength { expected: usize, actual: usize },
    #[error("descriptor component {index} is not a finite number")]
    NonFiniteComponent { index: usize },
    #[error("at least {required} descriptor samples are required, got {actual}")]
    TooFewSamples { required: usize, actual: usize },
    #[error("confidence must be between 0 and 100, got {0}")]
    ConfidenceOutOfRange(f32),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Face descriptor vector (128-dimensional for the browser face model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the length against `expected_len` and reject NaN/infinite components.
    pub fn validate(&self, expected_len: usize) -> Result<(), ValidationError> {
        if self.values.len() != expected_len {
            return Err(ValidationError::DescriptorLength {
                expected: expected_len,
                actual: self.values.len(),
            });
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(ValidationError::NonFiniteComponent { index }),
            None => Ok(()),
        }
    }

    /// Euclidean distance `sqrt(Σ(a[i] − b[i])²)`.
    ///
    /// Both descriptors must have the same length.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Result<f32, ValidationError> {
        if self.values.len() != other.values.len() {
            return Err(ValidationError::DescriptorLength {
                expected: other.values.len(),
                actual: self.values.len(),
            });
        }
        let sum: f64 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = f64::from(*a) - f64::from(*b);
                d * d
            })
            .sum();
        Ok(sum.sqrt() as f32)
    }

    /// Packed little-endian `f32` encoding used for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` on a truncated buffer.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Student identity key, trimmed and upper-cased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct StudentKey(String);

impl StudentKey {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingField("student_id"));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StudentKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered student with their enrollment descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub descriptor: Descriptor,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    /// Listing view without the descriptor.
    pub fn summary(&self) -> StudentSummary {
        StudentSummary {
            id: self.id.clone(),
            student_id: self.student_id.clone(),
            name: self.name.clone(),
            course: self.course.clone(),
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Gallery entry used by the matcher.
    pub fn enrolled(&self) -> EnrolledFace {
        EnrolledFace {
            student_id: self.student_id.clone(),
            name: self.name.clone(),
            course: self.course.clone(),
            descriptor: self.descriptor.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub id: String,
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One enrolled face in a matching gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub descriptor: Descriptor,
}

/// A single day's check-in for a student.
///
/// Name and course are snapshots taken at check-in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub date: NaiveDate,
    pub checked_in_at: DateTime<Utc>,
    /// Match confidence in [0, 100], when the check-in came from a face match.
    pub confidence: Option<f32>,
}

impl AttendanceRecord {
    pub fn new(
        student_id: StudentKey,
        name: String,
        course: String,
        date: NaiveDate,
        checked_in_at: DateTime<Utc>,
        confidence: Option<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            student_id,
            name,
            course,
            date,
            checked_in_at,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_key_normalizes_case_and_whitespace() {
        let a = StudentKey::parse("  s100 ").unwrap();
        let b = StudentKey::parse("S100").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "S100");
    }

    #[test]
    fn test_student_key_rejects_blank() {
        assert_eq!(
            StudentKey::parse("   "),
            Err(ValidationError::MissingField("student_id"))
        );
    }

    #[test]
    fn test_student_key_deserialize_normalizes() {
        let key: StudentKey = serde_json::from_str("\"ab-7\"").unwrap();
        assert_eq!(key.as_str(), "AB-7");
        assert!(serde_json::from_str::<StudentKey>("\"\"").is_err());
    }

    #[test]
    fn test_descriptor_validate_length() {
        let d = Descriptor::new(vec![0.0; DESCRIPTOR_LEN - 1]);
        assert_eq!(
            d.validate(DESCRIPTOR_LEN),
            Err(ValidationError::DescriptorLength { expected: 128, actual: 127 })
        );
        assert!(Descriptor::new(vec![0.0; DESCRIPTOR_LEN]).validate(DESCRIPTOR_LEN).is_ok());
    }

    #[test]
    fn test_descriptor_validate_non_finite() {
        let d = Descriptor::new(vec![0.0, f32::NAN, 1.0]);
        assert_eq!(d.validate(3), Err(ValidationError::NonFiniteComponent { index: 1 }));
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_err());
    }

    #[test]
    fn test_le_bytes_rejects_truncated() {
        let d = Descriptor::new(vec![0.25, -1.5]);
        let mut bytes = d.to_le_bytes();
        assert_eq!(Descriptor::from_le_bytes(&bytes), Some(d));
        bytes.pop();
        assert_eq!(Descriptor::from_le_bytes(&bytes), None);
    }
}
