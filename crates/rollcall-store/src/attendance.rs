//! Attendance ledger backed by the `attendance` table.
//!
//! The `UNIQUE (student_key, date)` constraint backs the admission gate's
//! check, so racing check-ins cannot both be stored.

use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::parse_timestamp;
use chrono::NaiveDate;
use rollcall_core::{AttendanceLedger, AttendanceRecord, LedgerError, StudentKey};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

const ATTENDANCE_SELECT_SQL: &str = "SELECT
    id,
    student_key,
    name,
    course,
    date,
    checked_in_at,
    confidence
FROM attendance";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Headcount for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceStats {
    pub date: NaiveDate,
    pub total_students: u64,
    pub present: u64,
    pub absent: u64,
    /// Present / total as a percentage, one decimal place.
    pub attendance_rate: f64,
    pub total_records: u64,
}

pub struct SqliteLedger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Records for `date`, in check-in order.
    pub fn on_date(&self, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>> {
        self.query_records(
            &format!("{ATTENDANCE_SELECT_SQL} WHERE date = ?1 ORDER BY checked_in_at, rowid;"),
            &date.format(DATE_FORMAT).to_string(),
        )
    }

    /// Records for one student, newest first.
    pub fn for_student(&self, key: &StudentKey) -> StoreResult<Vec<AttendanceRecord>> {
        self.query_records(
            &format!(
                "{ATTENDANCE_SELECT_SQL} WHERE student_key = ?1 ORDER BY date DESC, checked_in_at DESC;"
            ),
            key.as_str(),
        )
    }

    pub fn count_on(&self, date: NaiveDate) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE date = ?1;",
            params![date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Headcount for `date` against the currently active students.
    pub fn stats(&self, date: NaiveDate) -> StoreResult<AttendanceStats> {
        let day = date.format(DATE_FORMAT).to_string();
        let (total_students, present, total_records): (i64, i64, i64) = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM students WHERE active = 1),
                (SELECT COUNT(*) FROM attendance a
                    JOIN students s ON s.student_key = a.student_key AND s.active = 1
                    WHERE a.date = ?1),
                (SELECT COUNT(*) FROM attendance);",
            params![day],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let total_students = total_students.max(0) as u64;
        let present = present.max(0) as u64;
        let attendance_rate = if total_students == 0 {
            0.0
        } else {
            (present as f64 / total_students as f64 * 1000.0).round() / 10.0
        };

        Ok(AttendanceStats {
            date,
            total_students,
            present,
            absent: total_students.saturating_sub(present),
            attendance_rate,
            total_records: total_records.max(0) as u64,
        })
    }

    fn query_records(&self, sql: &str, arg: &str) -> StoreResult<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params![arg])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }
}

impl AttendanceLedger for SqliteLedger<'_> {
    fn find_for_day(
        &self,
        student_id: &StudentKey,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, LedgerError> {
        let found = (|| -> StoreResult<Option<AttendanceRecord>> {
            let mut stmt = self.conn.prepare_cached(&format!(
                "{ATTENDANCE_SELECT_SQL} WHERE student_key = ?1 AND date = ?2;"
            ))?;
            let mut rows =
                stmt.query(params![student_id.as_str(), date.format(DATE_FORMAT).to_string()])?;
            if let Some(row) = rows.next()? {
                return Ok(Some(parse_record_row(row)?));
            }
            Ok(None)
        })();
        found.map_err(|e| LedgerError::Storage(Box::new(e)))
    }

    fn insert(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let result = self.conn.execute(
            "INSERT INTO attendance (
                id, student_key, name, course, date, checked_in_at, confidence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                record.id,
                record.student_id.as_str(),
                record.name,
                record.course,
                record.date.format(DATE_FORMAT).to_string(),
                record.checked_in_at.to_rfc3339(),
                record.confidence.map(f64::from),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::Duplicate {
                student_id: record.student_id.clone(),
                date: record.date,
            }),
            Err(e) => Err(LedgerError::Storage(Box::new(StoreError::from(e)))),
        }
    }
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<AttendanceRecord> {
    let key: String = row.get(1)?;
    let date: String = row.get(4)?;
    let checked_in_at: String = row.get(5)?;
    let confidence: Option<f64> = row.get(6)?;

    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: StudentKey::parse(&key)
            .map_err(|e| StoreError::InvalidData(format!("student key '{key}': {e}")))?,
        name: row.get(2)?,
        course: row.get(3)?,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| StoreError::InvalidData(format!("date '{date}': {e}")))?,
        checked_in_at: parse_timestamp(&checked_in_at)?,
        confidence: confidence.map(|c| c as f32),
    })
}
