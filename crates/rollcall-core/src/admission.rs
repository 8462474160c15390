//! Same-day admission gate.
//!
//! A student moves from not-present to present at most once per calendar
//! day. The gate checks the ledger first, and the ledger's storage must also
//! enforce uniqueness of (student, date): when two check-ins race past the
//! check, the losing insert fails and is reported as already checked in.

use crate::types::{AttendanceRecord, StudentKey, ValidationError};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance already recorded for {student_id} on {date}")]
    Duplicate { student_id: StudentKey, date: NaiveDate },
    #[error("ledger storage failed: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Persistence seam for attendance records.
pub trait AttendanceLedger {
    fn find_for_day(
        &self,
        student_id: &StudentKey,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, LedgerError>;

    /// Insert a record, returning [`LedgerError::Duplicate`] if one already
    /// exists for the same student and date.
    fn insert(&self, record: &AttendanceRecord) -> Result<(), LedgerError>;
}

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{} already checked in on {}", .0.student_id, .0.date)]
    AlreadyCheckedIn(Box<AttendanceRecord>),
    #[error(transparent)]
    Ledger(LedgerError),
}

/// A check-in for an identified student.
#[derive(Debug, Clone)]
pub struct CheckinRequest {
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub confidence: Option<f32>,
}

impl CheckinRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if let Some(c) = self.confidence {
            if !c.is_finite() || !(0.0..=100.0).contains(&c) {
                return Err(ValidationError::ConfidenceOutOfRange(c));
            }
        }
        Ok(())
    }
}

pub struct AdmissionGate<'a, L: AttendanceLedger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: AttendanceLedger + ?Sized> AdmissionGate<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// Record `request` as present on `today`, or report the existing record.
    pub fn admit(
        &self,
        request: CheckinRequest,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord, AdmissionError> {
        request.validate()?;

        if let Some(existing) = self
            .ledger
            .find_for_day(&request.student_id, today)
            .map_err(AdmissionError::Ledger)?
        {
            tracing::debug!(student_id = %request.student_id, %today, "already checked in");
            return Err(AdmissionError::AlreadyCheckedIn(Box::new(existing)));
        }

        let record = AttendanceRecord::new(
            request.student_id,
            request.name.trim().to_string(),
            request.course.trim().to_string(),
            today,
            now,
            request.confidence,
        );

        match self.ledger.insert(&record) {
            Ok(()) => {
                tracing::info!(
                    student_id = %record.student_id,
                    date = %record.date,
                    confidence = record.confidence,
                    "admitted"
                );
                Ok(record)
            }
            Err(LedgerError::Duplicate { student_id, date }) => {
                // Lost a race with a concurrent check-in; report the winner.
                tracing::warn!(%student_id, %date, "concurrent check-in rejected by ledger constraint");
                match self
                    .ledger
                    .find_for_day(&student_id, date)
                    .map_err(AdmissionError::Ledger)?
                {
                    Some(existing) => Err(AdmissionError::AlreadyCheckedIn(Box::new(existing))),
                    None => Err(AdmissionError::Ledger(LedgerError::Duplicate { student_id, date })),
                }
            }
            Err(e) => Err(AdmissionError::Ledger(e)),
        }
    }
}
