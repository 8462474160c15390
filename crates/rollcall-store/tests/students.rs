use chrono::{Duration, TimeZone, Utc};
use rollcall_core::{Descriptor, StudentKey, ValidationError, DESCRIPTOR_LEN};
use rollcall_store::{open_db_in_memory, NewStudent, StoreError, StudentDirectory, StudentUpdate};

fn key(raw: &str) -> StudentKey {
    StudentKey::parse(raw).unwrap()
}

fn new_student(id: &str, fill: f32) -> NewStudent {
    NewStudent {
        student_id: key(id),
        name: format!("Student {id}"),
        course: "CS-101".into(),
        descriptor: Descriptor::new(vec![fill; DESCRIPTOR_LEN]),
    }
}

#[test]
fn register_and_get_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

    let created = dir.register(new_student("s100", 0.25), now).unwrap();
    assert_eq!(created.student_id.as_str(), "S100");
    assert!(created.active);

    let loaded = dir.get(&key("S100")).unwrap().unwrap();
    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.descriptor, created.descriptor);
    assert_eq!(loaded.created_at, now);
}

#[test]
fn duplicate_key_is_case_insensitive() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    dir.register(new_student("s100", 0.1), Utc::now()).unwrap();

    let err = dir.register(new_student("S100", 0.2), Utc::now()).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyRegistered(k) if k.as_str() == "S100"));
    assert_eq!(dir.count_active().unwrap(), 1);
}

#[test]
fn short_descriptor_rejected_without_insert() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    let mut student = new_student("s1", 0.0);
    student.descriptor = Descriptor::new(vec![0.0; DESCRIPTOR_LEN - 1]);

    let err = dir.register(student, Utc::now()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(ValidationError::DescriptorLength { expected: 128, actual: 127 })
    ));
    assert_eq!(dir.count_active().unwrap(), 0);
}

#[test]
fn blank_course_rejected() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    let mut student = new_student("s1", 0.0);
    student.course = " ".into();
    assert!(matches!(
        dir.register(student, Utc::now()),
        Err(StoreError::Validation(ValidationError::MissingField("course")))
    ));
}

#[test]
fn unique_index_guards_active_keys() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    dir.register(new_student("s1", 0.0), Utc::now()).unwrap();

    // Bypass the directory's pre-check to hit the index directly.
    let err = conn
        .execute(
            "INSERT INTO students (id, student_key, name, course, descriptor, active, created_at, updated_at)
             VALUES ('x', 'S1', 'n', 'c', x'', 1, '', '');",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE"));
}

#[test]
fn deactivate_hides_student_and_frees_key() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    let first = dir.register(new_student("s1", 0.0), Utc::now()).unwrap();

    let removed = dir.deactivate(&key("s1"), Utc::now()).unwrap();
    assert!(!removed.active);
    assert!(dir.get(&key("s1")).unwrap().is_none());
    assert!(dir.list_active().unwrap().is_empty());
    assert!(dir.ever_registered(&key("s1")).unwrap());

    let again = dir.register(new_student("s1", 0.5), Utc::now()).unwrap();
    assert_ne!(again.id, first.id);
    assert_eq!(dir.count_active().unwrap(), 1);
}

#[test]
fn deactivate_unknown_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    assert!(matches!(
        dir.deactivate(&key("ghost"), Utc::now()),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn update_changes_selected_fields() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    let created_at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    dir.register(new_student("s1", 0.0), created_at).unwrap();

    let later = created_at + Duration::hours(1);
    let updated = dir
        .update(
            &key("s1"),
            StudentUpdate {
                course: Some("MATH-2".into()),
                descriptor: Some(Descriptor::new(vec![0.75; DESCRIPTOR_LEN])),
                ..Default::default()
            },
            later,
        )
        .unwrap();
    assert_eq!(updated.name, "Student s1");
    assert_eq!(updated.course, "MATH-2");

    let loaded = dir.require(&key("s1")).unwrap();
    assert_eq!(loaded.course, "MATH-2");
    assert_eq!(loaded.descriptor.values[0], 0.75);
    assert_eq!(loaded.created_at, created_at);
    assert_eq!(loaded.updated_at, later);
}

#[test]
fn update_rejects_bad_descriptor() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    dir.register(new_student("s1", 0.0), Utc::now()).unwrap();

    let err = dir
        .update(
            &key("s1"),
            StudentUpdate {
                descriptor: Some(Descriptor::new(vec![0.0; 3])),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(dir.require(&key("s1")).unwrap().descriptor.len(), DESCRIPTOR_LEN);
}

#[test]
fn gallery_is_in_registration_order() {
    let conn = open_db_in_memory().unwrap();
    let dir = StudentDirectory::new(&conn);
    for id in ["c", "a", "b"] {
        dir.register(new_student(id, 0.0), Utc::now()).unwrap();
    }
    dir.deactivate(&key("a"), Utc::now()).unwrap();

    let order: Vec<String> = dir
        .gallery()
        .unwrap()
        .into_iter()
        .map(|f| f.student_id.to_string())
        .collect();
    assert_eq!(order, vec!["C", "B"]);
}
