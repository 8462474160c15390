use chrono::{NaiveDate, TimeZone, Utc};
use rollcall_core::{
    AdmissionError, AdmissionGate, AttendanceLedger, AttendanceRecord, CheckinRequest, Descriptor,
    LedgerError, StudentKey, DESCRIPTOR_LEN,
};
use rollcall_store::{open_db, open_db_in_memory, NewStudent, SqliteLedger, StudentDirectory};

fn key(raw: &str) -> StudentKey {
    StudentKey::parse(raw).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn checkin(id: &str) -> CheckinRequest {
    CheckinRequest {
        student_id: key(id),
        name: "Ada".into(),
        course: "CS-101".into(),
        confidence: Some(88.0),
    }
}

fn register(conn: &rusqlite::Connection, id: &str) {
    StudentDirectory::new(conn)
        .register(
            NewStudent {
                student_id: key(id),
                name: "Ada".into(),
                course: "CS-101".into(),
                descriptor: Descriptor::new(vec![0.0; DESCRIPTOR_LEN]),
            },
            Utc::now(),
        )
        .unwrap();
}

#[test]
fn gate_admits_once_per_day() {
    let conn = open_db_in_memory().unwrap();
    let ledger = SqliteLedger::new(&conn);
    let gate = AdmissionGate::new(&ledger);

    let first = gate.admit(checkin("s1"), day(4), Utc::now()).unwrap();
    for _ in 0..3 {
        match gate.admit(checkin("S1"), day(4), Utc::now()) {
            Err(AdmissionError::AlreadyCheckedIn(existing)) => assert_eq!(existing.id, first.id),
            other => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(ledger.on_date(day(4)).unwrap().len(), 1);
    assert_eq!(ledger.count_on(day(4)).unwrap(), 1);
}

#[test]
fn insert_duplicate_hits_constraint() {
    let conn = open_db_in_memory().unwrap();
    let ledger = SqliteLedger::new(&conn);
    let at = Utc::now();
    let a = AttendanceRecord::new(key("s1"), "A".into(), "C".into(), day(4), at, None);
    let b = AttendanceRecord::new(key("s1"), "A".into(), "C".into(), day(4), at, None);

    ledger.insert(&a).unwrap();
    assert!(matches!(ledger.insert(&b), Err(LedgerError::Duplicate { .. })));
}

#[test]
fn record_roundtrip_preserves_fields() {
    let conn = open_db_in_memory().unwrap();
    let ledger = SqliteLedger::new(&conn);
    let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 15, 30).unwrap();
    let record = AttendanceRecord::new(key("s1"), "Ada".into(), "CS".into(), day(4), at, Some(97.25));
    ledger.insert(&record).unwrap();

    let loaded = ledger.find_for_day(&key("s1"), day(4)).unwrap().unwrap();
    assert_eq!(loaded, record);
}

#[test]
fn history_is_newest_first() {
    let conn = open_db_in_memory().unwrap();
    let ledger = SqliteLedger::new(&conn);
    let gate = AdmissionGate::new(&ledger);
    for d in [2, 5, 3] {
        gate.admit(checkin("s1"), day(d), Utc::now()).unwrap();
    }
    gate.admit(checkin("s2"), day(5), Utc::now()).unwrap();

    let dates: Vec<NaiveDate> = ledger
        .for_student(&key("s1"))
        .unwrap()
        .into_iter()
        .map(|r| r.date)
        .collect();
    assert_eq!(dates, vec![day(5), day(3), day(2)]);
}

#[test]
fn stats_count_active_students() {
    let conn = open_db_in_memory().unwrap();
    for id in ["s1", "s2", "s3", "s4"] {
        register(&conn, id);
    }
    let ledger = SqliteLedger::new(&conn);
    let gate = AdmissionGate::new(&ledger);
    gate.admit(checkin("s1"), day(4), Utc::now()).unwrap();
    gate.admit(checkin("s2"), day(4), Utc::now()).unwrap();
    gate.admit(checkin("s3"), day(3), Utc::now()).unwrap();

    let stats = ledger.stats(day(4)).unwrap();
    assert_eq!(stats.total_students, 4);
    assert_eq!(stats.present, 2);
    assert_eq!(stats.absent, 2);
    assert_eq!(stats.attendance_rate, 50.0);
    assert_eq!(stats.total_records, 3);
}

#[test]
fn stats_empty_directory() {
    let conn = open_db_in_memory().unwrap();
    let stats = SqliteLedger::new(&conn).stats(day(4)).unwrap();
    assert_eq!(stats.total_students, 0);
    assert_eq!(stats.attendance_rate, 0.0);
}

#[test]
fn file_database_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("rollcall.db");
    {
        let conn = open_db(&path).unwrap();
        register(&conn, "s1");
        AdmissionGate::new(&SqliteLedger::new(&conn))
            .admit(checkin("s1"), day(4), Utc::now())
            .unwrap();
    }

    let conn = open_db(&path).unwrap();
    assert_eq!(StudentDirectory::new(&conn).count_active().unwrap(), 1);
    assert_eq!(SqliteLedger::new(&conn).count_on(day(4)).unwrap(), 1);
}
