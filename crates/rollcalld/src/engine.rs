use chrono::NaiveDate;
use rollcall_core::{
    AdmissionError, AdmissionGate, Aggregator, AttendanceRecord, CheckinRequest, Clock, Descriptor,
    EuclideanMatcher, LedgerError, MatchOutcome, Matcher, Student, StudentKey, ValidationError,
};
use rollcall_store::{
    AttendanceStats, NewStudent, SqliteLedger, StoreError, StudentDirectory, StudentUpdate,
};
use rusqlite::Connection;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{} already checked in on {}", .0.student_id, .0.date)]
    AlreadyCheckedIn(Box<AttendanceRecord>),
    #[error("no enrolled student matches this face")]
    NoMatch { best_distance: Option<f32> },
    #[error("attendance ledger: {0}")]
    Ledger(LedgerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<AdmissionError> for EngineError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::Validation(v) => Self::Validation(v),
            AdmissionError::AlreadyCheckedIn(record) => Self::AlreadyCheckedIn(record),
            AdmissionError::Ledger(l) => Self::Ledger(l),
        }
    }
}

/// How a registration supplies its enrollment descriptor.
#[derive(Debug, Clone)]
pub enum Enrollment {
    /// Already averaged by the client.
    Descriptor(Descriptor),
    /// Raw samples, averaged here.
    Samples(Vec<Descriptor>),
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub enrollment: Enrollment,
}

/// Check-in with optional snapshot fields; missing ones come from the directory.
#[derive(Debug, Clone)]
pub struct Checkin {
    pub student_id: StudentKey,
    pub name: Option<String>,
    pub course: Option<String>,
    pub confidence: Option<f32>,
}

/// Result of server-side matching followed by admission.
#[derive(Debug, Clone)]
pub struct Identified {
    pub record: AttendanceRecord,
    pub distance: f32,
}

/// Matching and enrollment settings used on the engine thread.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub match_threshold: f32,
    pub min_samples: usize,
    pub dimension: usize,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        registration: Registration,
        reply: Reply<Student>,
    },
    ListStudents {
        reply: Reply<Vec<Student>>,
    },
    GetStudent {
        key: StudentKey,
        reply: Reply<Student>,
    },
    UpdateStudent {
        key: StudentKey,
        update: StudentUpdate,
        reply: Reply<Student>,
    },
    DeactivateStudent {
        key: StudentKey,
        reply: Reply<Student>,
    },
    CheckIn {
        checkin: Checkin,
        reply: Reply<AttendanceRecord>,
    },
    Identify {
        probe: Descriptor,
        reply: Reply<Identified>,
    },
    AttendanceOn {
        date: Option<NaiveDate>,
        reply: Reply<(NaiveDate, Vec<AttendanceRecord>)>,
    },
    StudentHistory {
        key: StudentKey,
        reply: Reply<Vec<AttendanceRecord>>,
    },
    Stats {
        reply: Reply<AttendanceStats>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn register(&self, registration: Registration) -> Result<Student, EngineError> {
        self.call(|reply| EngineRequest::Register { registration, reply })
            .await
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, EngineError> {
        self.call(|reply| EngineRequest::ListStudents { reply }).await
    }

    pub async fn get_student(&self, key: StudentKey) -> Result<Student, EngineError> {
        self.call(|reply| EngineRequest::GetStudent { key, reply }).await
    }

    pub async fn update_student(
        &self,
        key: StudentKey,
        update: StudentUpdate,
    ) -> Result<Student, EngineError> {
        self.call(|reply| EngineRequest::UpdateStudent { key, update, reply })
            .await
    }

    pub async fn deactivate_student(&self, key: StudentKey) -> Result<Student, EngineError> {
        self.call(|reply| EngineRequest::DeactivateStudent { key, reply })
            .await
    }

    pub async fn check_in(&self, checkin: Checkin) -> Result<AttendanceRecord, EngineError> {
        self.call(|reply| EngineRequest::CheckIn { checkin, reply }).await
    }

    pub async fn identify(&self, probe: Descriptor) -> Result<Identified, EngineError> {
        self.call(|reply| EngineRequest::Identify { probe, reply }).await
    }

    /// Records for `date`, or for today when `None`. Returns the resolved date.
    pub async fn attendance_on(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<(NaiveDate, Vec<AttendanceRecord>), EngineError> {
        self.call(|reply| EngineRequest::AttendanceOn { date, reply })
            .await
    }

    pub async fn student_history(
        &self,
        key: StudentKey,
    ) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.call(|reply| EngineRequest::StudentHistory { key, reply })
            .await
    }

    pub async fn stats(&self) -> Result<AttendanceStats, EngineError> {
        self.call(|reply| EngineRequest::Stats { reply }).await
    }
}

/// State owned by the engine thread.
struct Engine {
    conn: Connection,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

/// Spawn the engine on a dedicated OS thread that owns the database connection.
///
/// Requests are served one at a time; the thread exits when every
/// [`EngineHandle`] has been dropped.
pub fn spawn_engine(
    conn: Connection,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(64);
    let engine = Engine {
        conn,
        clock,
        settings,
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

impl Engine {
    fn handle(&self, req: EngineRequest) {
        match req {
            EngineRequest::Register {
                registration,
                reply,
            } => {
                let _ = reply.send(self.register(registration));
            }
            EngineRequest::ListStudents { reply } => {
                let _ = reply.send(self.directory().list_active().map_err(Into::into));
            }
            EngineRequest::GetStudent { key, reply } => {
                let _ = reply.send(self.directory().require(&key).map_err(Into::into));
            }
            EngineRequest::UpdateStudent { key, update, reply } => {
                let result = self
                    .directory()
                    .update(&key, update, self.clock.now())
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
            EngineRequest::DeactivateStudent { key, reply } => {
                let result = self
                    .directory()
                    .deactivate(&key, self.clock.now())
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
            EngineRequest::CheckIn { checkin, reply } => {
                let _ = reply.send(self.check_in(checkin));
            }
            EngineRequest::Identify { probe, reply } => {
                let _ = reply.send(self.identify(probe));
            }
            EngineRequest::AttendanceOn { date, reply } => {
                let date = date.unwrap_or_else(|| self.clock.today());
                let result = SqliteLedger::new(&self.conn)
                    .on_date(date)
                    .map(|records| (date, records))
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
            EngineRequest::StudentHistory { key, reply } => {
                let _ = reply.send(self.history(&key));
            }
            EngineRequest::Stats { reply } => {
                let result = SqliteLedger::new(&self.conn)
                    .stats(self.clock.today())
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
        }
    }

    fn directory(&self) -> StudentDirectory<'_> {
        StudentDirectory::with_dimension(&self.conn, self.settings.dimension)
    }

    fn register(&self, registration: Registration) -> Result<Student, EngineError> {
        let descriptor = match registration.enrollment {
            Enrollment::Descriptor(d) => d,
            Enrollment::Samples(samples) => {
                Aggregator::new(self.settings.min_samples, self.settings.dimension)
                    .average(&samples)?
            }
        };

        let student = self.directory().register(
            NewStudent {
                student_id: registration.student_id,
                name: registration.name,
                course: registration.course,
                descriptor,
            },
            self.clock.now(),
        )?;
        Ok(student)
    }

    fn check_in(&self, checkin: Checkin) -> Result<AttendanceRecord, EngineError> {
        let student = self.directory().require(&checkin.student_id)?;
        let request = CheckinRequest {
            student_id: student.student_id,
            name: checkin.name.unwrap_or(student.name),
            course: checkin.course.unwrap_or(student.course),
            confidence: checkin.confidence,
        };
        self.admit(request)
    }

    fn identify(&self, probe: Descriptor) -> Result<Identified, EngineError> {
        probe.validate(self.settings.dimension)?;
        let gallery = self.directory().gallery()?;

        match EuclideanMatcher.compare(&probe, &gallery, self.settings.match_threshold)? {
            MatchOutcome::Matched(m) => {
                let distance = m.distance;
                let record = self.admit(CheckinRequest {
                    student_id: m.student_id,
                    name: m.name,
                    course: m.course,
                    confidence: Some(m.confidence),
                })?;
                Ok(Identified { record, distance })
            }
            MatchOutcome::NoMatch { best_distance } => {
                tracing::info!(gallery = gallery.len(), best_distance, "identify: no match");
                Err(EngineError::NoMatch { best_distance })
            }
        }
    }

    fn admit(&self, request: CheckinRequest) -> Result<AttendanceRecord, EngineError> {
        let ledger = SqliteLedger::new(&self.conn);
        let record =
            AdmissionGate::new(&ledger).admit(request, self.clock.today(), self.clock.now())?;
        Ok(record)
    }

    fn history(&self, key: &StudentKey) -> Result<Vec<AttendanceRecord>, EngineError> {
        if !self.directory().ever_registered(key)? {
            return Err(StoreError::NotFound(key.clone()).into());
        }
        Ok(SqliteLedger::new(&self.conn).for_student(key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rollcall_core::FixedClock;

    fn face(fill: f32) -> Descriptor {
        Descriptor::new(vec![fill; 128])
    }

    fn key(raw: &str) -> StudentKey {
        StudentKey::parse(raw).unwrap()
    }

    fn engine() -> (EngineHandle, Arc<FixedClock>) {
        let conn = rollcall_store::open_db_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        ));
        let handle = spawn_engine(
            conn,
            clock.clone(),
            EngineSettings {
                match_threshold: 0.6,
                min_samples: 3,
                dimension: 128,
            },
        )
        .unwrap();
        (handle, clock)
    }

    fn registration(id: &str, enrollment: Enrollment) -> Registration {
        Registration {
            student_id: key(id),
            name: "Ana Lima".into(),
            course: "CS".into(),
            enrollment,
        }
    }

    #[tokio::test]
    async fn test_register_from_samples_stores_mean() {
        let (engine, _) = engine();
        let student = engine
            .register(registration(
                "s100",
                Enrollment::Samples(vec![face(0.25), face(0.5), face(0.75)]),
            ))
            .await
            .unwrap();
        assert_eq!(student.student_id.as_str(), "S100");
        assert!(student.descriptor.values.iter().all(|v| *v == 0.5));
    }

    #[tokio::test]
    async fn test_register_with_two_samples_fails() {
        let (engine, _) = engine();
        let err = engine
            .register(registration(
                "S100",
                Enrollment::Samples(vec![face(0.1), face(0.2)]),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::TooFewSamples { .. })
        ));
    }

    #[tokio::test]
    async fn test_identify_admits_once_per_day() {
        let (engine, clock) = engine();
        engine
            .register(registration("S100", Enrollment::Descriptor(face(0.5))))
            .await
            .unwrap();

        let first = engine.identify(face(0.5)).await.unwrap();
        assert_eq!(first.distance, 0.0);
        assert_eq!(first.record.confidence, Some(100.0));

        let err = engine.identify(face(0.5)).await.unwrap_err();
        match err {
            EngineError::AlreadyCheckedIn(existing) => assert_eq!(existing.id, first.record.id),
            other => panic!("expected AlreadyCheckedIn, got {other:?}"),
        }

        clock.advance(Duration::days(1));
        let next_day = engine.identify(face(0.5)).await.unwrap();
        assert_ne!(next_day.record.date, first.record.date);

        let history = engine.student_history(key("S100")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].date, next_day.record.date);
    }

    #[tokio::test]
    async fn test_identify_unknown_face() {
        let (engine, _) = engine();
        engine
            .register(registration("S100", Enrollment::Descriptor(face(0.0))))
            .await
            .unwrap();
        let err = engine.identify(face(1.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::NoMatch { best_distance: Some(_) }));

        let (today, _) = engine.attendance_on(None).await.unwrap();
        assert_eq!(today, chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }

    #[tokio::test]
    async fn test_checkin_fills_snapshot_from_directory() {
        let (engine, _) = engine();
        engine
            .register(registration("S100", Enrollment::Descriptor(face(0.5))))
            .await
            .unwrap();
        let record = engine
            .check_in(Checkin {
                student_id: key("s100"),
                name: None,
                course: None,
                confidence: Some(87.5),
            })
            .await
            .unwrap();
        assert_eq!(record.name, "Ana Lima");
        assert_eq!(record.course, "CS");

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.present, 1);
        assert_eq!(stats.total_students, 1);
        assert_eq!(stats.attendance_rate, 100.0);
    }

    #[tokio::test]
    async fn test_checkin_unknown_student_not_found() {
        let (engine, _) = engine();
        let err = engine
            .check_in(Checkin {
                student_id: key("S404"),
                name: Some("Nobody".into()),
                course: Some("CS".into()),
                confidence: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));

        let err = engine.student_history(key("S404")).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));
    }
}
