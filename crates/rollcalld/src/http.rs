//! REST surface over the engine.
//!
//! Every body is wrapped as `{success, count?, message?, data}`; failures as
//! `{success: false, message, error, data?}`.

use crate::config::Config;
use crate::engine::{Checkin, EngineError, EngineHandle, Enrollment, Identified, Registration};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{clock, AttendanceRecord, Descriptor, StudentKey, ValidationError};
use rollcall_store::{StoreError, StudentUpdate};
use serde::{Deserialize, Serialize};
use std::time::Instant;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct AppState {
    engine: EngineHandle,
    match_threshold: f32,
}

/// Build the router. Request bodies above `config.max_body_bytes` are refused.
pub fn router(engine: EngineHandle, config: &Config) -> Router {
    let state = AppState {
        engine,
        match_threshold: config.match_threshold,
    };

    Router::new()
        .route("/health", get(health))
        .route("/students", get(list_students))
        .route("/students/register", post(register_student))
        .route("/students/descriptors", get(list_descriptors))
        .route(
            "/students/:id",
            get(get_student).put(update_student).delete(delete_student),
        )
        .route("/attendance/checkin", post(check_in))
        .route("/attendance/identify", post(identify))
        .route("/attendance/today", get(attendance_today))
        .route("/attendance/date/:date", get(attendance_on_date))
        .route("/attendance/student/:id", get(student_history))
        .route("/attendance/stats", get(attendance_stats))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let response = next.run(req).await;

    tracing::info!(
        target: "rollcall.http",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

// =============================================================================
// Response envelope
// =============================================================================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            count: None,
            message: None,
            error: None,
            data: Some(data),
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn json_ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

fn json_list<T: Serialize>(items: Vec<T>) -> Response {
    let count = items.len();
    Json(ApiResponse {
        count: Some(count),
        ..ApiResponse::success(items)
    })
    .into_response()
}

fn json_created<T: Serialize>(data: T, message: &str) -> Response {
    (
        StatusCode::CREATED,
        Json(ApiResponse::success(data).with_message(message)),
    )
        .into_response()
}

/// Error half of the envelope.
#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    data: Option<serde_json::Value>,
}

impl ApiFailure {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ApiResponse {
            success: false,
            count: None,
            message: Some(self.message),
            error: Some(self.code),
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiFailure {
    fn from(e: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    }
}

impl From<JsonRejection> for ApiFailure {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, "invalid_body", rejection.body_text())
    }
}

impl From<EngineError> for ApiFailure {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(v) | EngineError::Store(StoreError::Validation(v)) => v.into(),
            EngineError::Store(StoreError::AlreadyRegistered(key)) => Self::new(
                StatusCode::CONFLICT,
                "already_registered",
                format!("student {key} is already registered"),
            ),
            EngineError::Store(StoreError::NotFound(key)) => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("student {key} not found"),
            ),
            EngineError::AlreadyCheckedIn(existing) => Self::new(
                StatusCode::CONFLICT,
                "already_checked_in",
                format!("{} already checked in today", existing.name),
            )
            .with_data(&*existing),
            EngineError::NoMatch { best_distance } => Self::new(
                StatusCode::NOT_FOUND,
                "no_match",
                "face not recognized",
            )
            .with_data(serde_json::json!({ "best_distance": best_distance })),
            down @ (EngineError::ChannelClosed | EngineError::Spawn(_)) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "engine_unavailable",
                down.to_string(),
            ),
            other => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                other.to_string(),
            ),
        }
    }
}

type ApiResult = Result<Response, ApiFailure>;

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegisterBody {
    #[serde(default, alias = "studentId")]
    student_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    course: Option<String>,
    #[serde(default, alias = "faceDescriptor")]
    descriptor: Option<Vec<f32>>,
    #[serde(default)]
    samples: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    course: Option<String>,
    #[serde(default, alias = "faceDescriptor")]
    descriptor: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct CheckinBody {
    #[serde(default, alias = "studentId")]
    student_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    course: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct IdentifyBody {
    #[serde(default, alias = "faceDescriptor")]
    descriptor: Option<Vec<f32>>,
}

fn required_key(raw: Option<String>) -> Result<StudentKey, ValidationError> {
    StudentKey::parse(raw.as_deref().unwrap_or_default())
}

fn required_text(raw: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match raw {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(state): State<AppState>) -> Response {
    json_ok(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "match_threshold": state.match_threshold,
    }))
}

async fn register_student(
    State(state): State<AppState>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let student_id = required_key(body.student_id)?;
    let name = required_text(body.name, "name")?;
    let course = required_text(body.course, "course")?;
    let enrollment = match (body.samples, body.descriptor) {
        (Some(samples), _) => {
            Enrollment::Samples(samples.into_iter().map(Descriptor::new).collect())
        }
        (None, Some(values)) => Enrollment::Descriptor(Descriptor::new(values)),
        (None, None) => return Err(ValidationError::MissingField("descriptor").into()),
    };

    let student = state
        .engine
        .register(Registration {
            student_id,
            name,
            course,
            enrollment,
        })
        .await?;
    Ok(json_created(student, "student registered"))
}

async fn list_students(State(state): State<AppState>) -> ApiResult {
    let students = state.engine.list_students().await?;
    Ok(json_list(students.iter().map(|s| s.summary()).collect()))
}

async fn list_descriptors(State(state): State<AppState>) -> ApiResult {
    let students = state.engine.list_students().await?;
    Ok(json_list(students.iter().map(|s| s.enrolled()).collect()))
}

async fn get_student(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let student = state.engine.get_student(StudentKey::parse(&id)?).await?;
    Ok(json_ok(student))
}

async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateBody>, JsonRejection>,
) -> ApiResult {
    let key = StudentKey::parse(&id)?;
    let Json(body) = body?;
    let update = StudentUpdate {
        name: body.name,
        course: body.course,
        descriptor: body.descriptor.map(Descriptor::new),
    };
    let student = state.engine.update_student(key, update).await?;
    Ok(Json(ApiResponse::success(student).with_message("student updated")).into_response())
}

async fn delete_student(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let student = state
        .engine
        .deactivate_student(StudentKey::parse(&id)?)
        .await?;
    Ok(Json(ApiResponse::success(student.summary()).with_message("student deactivated"))
        .into_response())
}

async fn check_in(
    State(state): State<AppState>,
    body: Result<Json<CheckinBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let record = state
        .engine
        .check_in(Checkin {
            student_id: required_key(body.student_id)?,
            name: body.name,
            course: body.course,
            confidence: body.confidence,
        })
        .await?;
    Ok(json_created(record, "checked in"))
}

#[derive(Serialize)]
struct IdentifiedView {
    #[serde(flatten)]
    record: AttendanceRecord,
    distance: f32,
}

async fn identify(
    State(state): State<AppState>,
    body: Result<Json<IdentifyBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let probe = body
        .descriptor
        .map(Descriptor::new)
        .ok_or(ValidationError::MissingField("descriptor"))?;
    let Identified { record, distance } = state.engine.identify(probe).await?;
    Ok(json_created(IdentifiedView { record, distance }, "checked in"))
}

async fn attendance_today(State(state): State<AppState>) -> ApiResult {
    let (_, records) = state.engine.attendance_on(None).await?;
    Ok(json_list(records))
}

async fn attendance_on_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult {
    let date = clock::parse_date(&date)?;
    let (_, records) = state.engine.attendance_on(Some(date)).await?;
    Ok(json_list(records))
}

async fn student_history(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let records = state
        .engine
        .student_history(StudentKey::parse(&id)?)
        .await?;
    Ok(json_list(records))
}

async fn attendance_stats(State(state): State<AppState>) -> ApiResult {
    Ok(json_ok(state.engine.stats().await?))
}
