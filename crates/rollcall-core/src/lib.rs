//! rollcall-core: Face matching and attendance admission logic.
//!
//! Descriptors come from an external face model; this crate only averages
//! them, compares them by Euclidean distance, and decides whether a matched
//! student may be recorded present for the day.

pub mod admission;
pub mod aggregator;
pub mod clock;
pub mod matcher;
pub mod types;

pub use admission::{AdmissionError, AdmissionGate, AttendanceLedger, CheckinRequest, LedgerError};
pub use aggregator::{Aggregator, DEFAULT_MIN_SAMPLES};
pub use clock::{Clock, FixedClock, SystemClock};
pub use matcher::{EuclideanMatcher, Match, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use types::{
    AttendanceRecord, Descriptor, EnrolledFace, Student, StudentKey, StudentSummary,
    ValidationError, DESCRIPTOR_LEN,
};
