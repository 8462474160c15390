//! Student directory: registration, lookup, update and soft delete.

use crate::error::{is_unique_violation, StoreError, StoreResult};
use crate::parse_timestamp;
use chrono::{DateTime, Utc};
use rollcall_core::{Descriptor, EnrolledFace, Student, StudentKey, ValidationError, DESCRIPTOR_LEN};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const STUDENT_SELECT_SQL: &str = "SELECT
    id,
    student_key,
    name,
    course,
    descriptor,
    active,
    created_at,
    updated_at
FROM students";

/// Fields supplied at registration.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub descriptor: Descriptor,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub course: Option<String>,
    pub descriptor: Option<Descriptor>,
}

pub struct StudentDirectory<'conn> {
    conn: &'conn Connection,
    dimension: usize,
}

impl<'conn> StudentDirectory<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self::with_dimension(conn, DESCRIPTOR_LEN)
    }

    pub fn with_dimension(conn: &'conn Connection, dimension: usize) -> Self {
        Self { conn, dimension }
    }

    /// Register a new active student.
    ///
    /// Fails with [`StoreError::AlreadyRegistered`] if an active student holds
    /// the same key, whether detected up front or by the unique index.
    pub fn register(&self, new: NewStudent, now: DateTime<Utc>) -> StoreResult<Student> {
        let name = required(&new.name, "name")?;
        let course = required(&new.course, "course")?;
        new.descriptor.validate(self.dimension)?;

        if self.get(&new.student_id)?.is_some() {
            return Err(StoreError::AlreadyRegistered(new.student_id));
        }

        let student = Student {
            id: Uuid::new_v4().to_string(),
            student_id: new.student_id,
            name,
            course,
            descriptor: new.descriptor,
            active: true,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.conn.execute(
            "INSERT INTO students (
                id, student_key, name, course, descriptor, active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7);",
            params![
                student.id,
                student.student_id.as_str(),
                student.name,
                student.course,
                student.descriptor.to_le_bytes(),
                student.created_at.to_rfc3339(),
                student.updated_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::AlreadyRegistered(student.student_id));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(student_id = %student.student_id, id = %student.id, "student registered");
        Ok(student)
    }

    /// Active student by key.
    pub fn get(&self, key: &StudentKey) -> StoreResult<Option<Student>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{STUDENT_SELECT_SQL} WHERE student_key = ?1 AND active = 1;"
        ))?;
        let mut rows = stmt.query(params![key.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_student_row(row)?));
        }
        Ok(None)
    }

    /// Active student by key, or [`StoreError::NotFound`].
    pub fn require(&self, key: &StudentKey) -> StoreResult<Student> {
        self.get(key)?.ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    /// Active students in registration order.
    pub fn list_active(&self) -> StoreResult<Vec<Student>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{STUDENT_SELECT_SQL} WHERE active = 1 ORDER BY rowid;"))?;
        let mut rows = stmt.query([])?;
        let mut students = Vec::new();
        while let Some(row) = rows.next()? {
            students.push(parse_student_row(row)?);
        }
        Ok(students)
    }

    /// Matching gallery, in registration order so ties resolve to the earliest student.
    pub fn gallery(&self) -> StoreResult<Vec<EnrolledFace>> {
        Ok(self.list_active()?.iter().map(Student::enrolled).collect())
    }

    pub fn update(
        &self,
        key: &StudentKey,
        update: StudentUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Student> {
        let mut student = self.require(key)?;

        if let Some(name) = update.name {
            student.name = required(&name, "name")?;
        }
        if let Some(course) = update.course {
            student.course = required(&course, "course")?;
        }
        if let Some(descriptor) = update.descriptor {
            descriptor.validate(self.dimension)?;
            student.descriptor = descriptor;
        }
        student.updated_at = now;

        let changed = self.conn.execute(
            "UPDATE students
             SET name = ?1, course = ?2, descriptor = ?3, updated_at = ?4
             WHERE id = ?5 AND active = 1;",
            params![
                student.name,
                student.course,
                student.descriptor.to_le_bytes(),
                student.updated_at.to_rfc3339(),
                student.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(key.clone()));
        }

        tracing::info!(student_id = %key, "student updated");
        Ok(student)
    }

    /// Soft delete: the row stays, but the key becomes free for a new registration.
    pub fn deactivate(&self, key: &StudentKey, now: DateTime<Utc>) -> StoreResult<Student> {
        let mut student = self.require(key)?;
        self.conn.execute(
            "UPDATE students SET active = 0, updated_at = ?1 WHERE id = ?2;",
            params![now.to_rfc3339(), student.id],
        )?;
        student.active = false;
        student.updated_at = now;

        tracing::info!(student_id = %key, "student deactivated");
        Ok(student)
    }

    pub fn count_active(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students WHERE active = 1;", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Whether any row, active or not, exists for `key`.
    pub fn ever_registered(&self, key: &StudentKey) -> StoreResult<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM students WHERE student_key = ?1 LIMIT 1;",
                params![key.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

fn parse_student_row(row: &Row<'_>) -> StoreResult<Student> {
    let key: String = row.get(1)?;
    let blob: Vec<u8> = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    let student_id = StudentKey::parse(&key)
        .map_err(|e| StoreError::InvalidData(format!("student key '{key}': {e}")))?;
    let descriptor = Descriptor::from_le_bytes(&blob).ok_or_else(|| {
        StoreError::InvalidData(format!("descriptor for {student_id} has {} bytes", blob.len()))
    })?;

    Ok(Student {
        id: row.get(0)?,
        student_id,
        name: row.get(2)?,
        course: row.get(3)?,
        descriptor,
        active: row.get::<_, i64>(5)? != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
