use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    checkin::{CheckinService, CheckinStore},
    db::{NewStudent, PgStore},
    error::AppError,
    export,
    models::*,
    payload::{self, QrPayload},
    points::{self, PointsObservation, SortDirection},
};

const DEFAULT_EVENT_TITLE: &str = "Class session";

#[derive(Clone)]
pub struct AppState {
    pub store: PgStore,
    pub checkin: CheckinService<PgStore>,
}

impl AppState {
    pub fn new(store: PgStore) -> Self {
        Self {
            checkin: CheckinService::new(store.clone()),
            store,
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // organizations
        .route("/api/orgs", post(register_org))
        .route("/api/owners/:owner_id/org", get(org_for_owner))
        // classes + students
        .route("/api/orgs/:org_id/classes", get(list_classes).post(create_class))
        .route("/api/classes/:class_id", put(rename_class).delete(delete_class))
        .route("/api/classes/:class_id/students", get(list_students).post(add_student))
        .route("/api/classes/:class_id/students/import", post(import_students))
        .route(
            "/api/students/:student_id",
            get(get_student).put(update_student).delete(delete_student),
        )
        .route("/api/students/:student_id/qr", get(student_qr))
        // events + attendance types
        .route("/api/orgs/:org_id/events", get(list_events).post(create_event))
        .route(
            "/api/orgs/:org_id/attendance-types",
            get(list_types).post(create_type),
        )
        .route(
            "/api/attendance-types/:type_id",
            put(update_type).delete(delete_type),
        )
        // check-in
        .route(
            "/api/events/:event_id/checkins",
            get(list_checkins).post(check_in),
        )
        .route("/api/events/:event_id/scan", get(scan_session))
        // reports
        .route("/api/classes/:class_id/reports/points", get(points_report))
        .route("/api/classes/:class_id/reports/attendance", get(detail_report))
        .with_state(state)
}

// --- organizations ---

async fn register_org(
    State(state): State<AppState>,
    Json(req): Json<RegisterOrgReq>,
) -> Result<(StatusCode, Json<Org>), AppError> {
    req.validate()?;
    let name = non_blank(&req.name, "Organization name is required")?;
    let org = state
        .store
        .register_org(name, req.owner_user_id)
        .await?;
    info!(org_id = %org.id, "organization registered");
    Ok((StatusCode::CREATED, Json(org)))
}

async fn org_for_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Org> {
    state
        .store
        .org_by_owner(owner_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No organization for this owner".into()))
}

async fn require_org(store: &PgStore, org_id: Uuid) -> Result<Org, AppError> {
    store
        .org_by_id(org_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Organization not found".into()))
}

// --- classes ---

async fn list_classes(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Vec<Class>> {
    Ok(Json(state.store.list_classes(org_id).await?))
}

async fn create_class(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<ClassReq>,
) -> Result<(StatusCode, Json<Class>), AppError> {
    req.validate()?;
    let name = non_blank(&req.name, "Class name is required")?;
    require_org(&state.store, org_id).await?;
    let class = state.store.create_class(org_id, name).await?;
    Ok((StatusCode::CREATED, Json(class)))
}

async fn rename_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<ClassReq>,
) -> ApiResult<Class> {
    req.validate()?;
    let name = non_blank(&req.name, "Class name is required")?;
    state
        .store
        .rename_class(class_id, name)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Class not found".into()))
}

async fn delete_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_class(class_id).await? {
        info!(%class_id, "class deleted with its students and events");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Class not found".into()))
    }
}

async fn require_class(store: &PgStore, class_id: Uuid) -> Result<Class, AppError> {
    store
        .class_by_id(class_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Class not found".into()))
}

// --- students ---

/// Fresh UID and badge for a student about to be stored.
fn gender_or_default(gender: &str) -> String {
    match gender.trim() {
        "" => default_gender(),
        g => g.to_string(),
    }
}

fn new_student(full_name: &str, gender: &str) -> Result<NewStudent, AppError> {
    let student_uid = payload::generate_student_uid();
    let qr_data_url = payload::render_data_url(&QrPayload::new(student_uid.clone()))?;
    Ok(NewStudent {
        full_name: full_name.trim().to_string(),
        gender: gender_or_default(gender),
        student_uid,
        qr_data_url,
    })
}

async fn list_students(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> ApiResult<Vec<Student>> {
    Ok(Json(state.store.list_students(class_id).await?))
}

async fn add_student(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<StudentReq>,
) -> Result<(StatusCode, Json<Student>), AppError> {
    req.validate()?;
    let full_name = non_blank(&req.full_name, "Full name is required")?;
    require_class(&state.store, class_id).await?;
    let student = state
        .store
        .create_student(class_id, &new_student(full_name, &req.gender)?)
        .await?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn import_students(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    mut mp: Multipart,
) -> ApiResult<serde_json::Value> {
    let mut csv_text: Option<String> = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?
    {
        if field.name() == Some("file") {
            csv_text = Some(
                field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.to_string()))?,
            );
        }
    }
    let text = csv_text.ok_or_else(|| AppError::Validation("file is required".into()))?;
    let roster =
        export::parse_roster(&text).map_err(|e| AppError::Validation(e.to_string()))?;

    require_class(&state.store, class_id).await?;
    let students = roster
        .iter()
        .map(|r| new_student(&r.full_name, &r.gender))
        .collect::<Result<Vec<_>, _>>()?;
    let imported = state.store.create_students(class_id, &students).await?;

    info!(%class_id, imported, "roster imported");
    Ok(Json(serde_json::json!({ "imported": imported })))
}

async fn get_student(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> ApiResult<Student> {
    require_student(&state.store, student_id).await.map(Json)
}

async fn update_student(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Json(req): Json<StudentReq>,
) -> ApiResult<Student> {
    req.validate()?;
    let full_name = non_blank(&req.full_name, "Full name is required")?;
    state
        .store
        .update_student(student_id, full_name, &gender_or_default(&req.gender))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Student not found".into()))
}

async fn delete_student(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_student(student_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Student not found".into()))
    }
}

async fn require_student(store: &PgStore, student_id: Uuid) -> Result<Student, AppError> {
    store
        .student_by_id(student_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Student not found".into()))
}

async fn student_qr(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let student = require_student(&state.store, student_id).await?;
    let svg = payload::render_svg(&QrPayload::new(student.student_uid))?;
    let file_name = format!(
        "{}_qr.svg",
        student.full_name.split_whitespace().collect::<Vec<_>>().join("_")
    );
    Ok(file_response("image/svg+xml", &file_name, svg))
}

// --- events ---

async fn list_events(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Vec<ClassEvent>> {
    Ok(Json(state.store.list_events(org_id).await?))
}

async fn create_event(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<CreateEventReq>,
) -> Result<(StatusCode, Json<ClassEvent>), AppError> {
    req.validate()?;
    let class = require_class(&state.store, req.class_id).await?;
    if class.org_id != org_id {
        return Err(AppError::NotFound("Class not found".into()));
    }
    let title = match req.title.trim() {
        "" => DEFAULT_EVENT_TITLE,
        t => t,
    };
    let event = state
        .store
        .create_event(org_id, class.id, title, req.starts_at, req.late_after_minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

// --- attendance types ---

async fn list_types(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Vec<AttendanceType>> {
    Ok(Json(state.store.attendance_types(org_id).await?))
}

async fn create_type(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(req): Json<AttendanceTypeReq>,
) -> Result<(StatusCode, Json<AttendanceType>), AppError> {
    req.validate()?;
    require_org(&state.store, org_id).await?;
    let created = state.store.create_type(org_id, &req).await?;
    info!(%org_id, name = %created.name, "attendance type created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_type(
    State(state): State<AppState>,
    Path(type_id): Path<Uuid>,
    Json(req): Json<AttendanceTypeReq>,
) -> ApiResult<AttendanceType> {
    req.validate()?;
    state
        .store
        .update_type(type_id, &req)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Attendance type not found".into()))
}

async fn delete_type(
    State(state): State<AppState>,
    Path(type_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.store.type_by_id(type_id).await?.is_none() {
        return Err(AppError::NotFound("Attendance type not found".into()));
    }
    state.store.delete_type(type_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- check-in ---

async fn list_checkins(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Vec<CheckinRow>> {
    Ok(Json(state.store.event_checkins(event_id).await?))
}

async fn check_in(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<CheckinReq>,
) -> ApiResult<crate::checkin::Checkin> {
    let checkin = state
        .checkin
        .check_in(event_id, &req.payload, Utc::now())
        .await?;
    Ok(Json(checkin))
}

/// Upgrade to a scan session: each text frame is one decoded QR payload,
/// each reply is one outcome. Closing the socket ends the session.
async fn scan_session(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if state.store.event_by_id(event_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Event not found: {event_id}")));
    }
    Ok(ws.on_upgrade(move |socket| run_scan(state, event_id, socket)))
}

/// Text frames carry payloads. Binary frames are read as text so a bad one
/// is rejected like any malformed payload; control frames carry nothing.
fn frame_payload(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

async fn run_scan(state: AppState, event_id: Uuid, socket: WebSocket) {
    let cancel = CancellationToken::new();
    // cancels the session however this task exits
    let _guard = cancel.clone().drop_guard();

    let (mut sender, receiver) = socket.split();
    let payloads = receiver
        .take_while(|msg| {
            future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|msg| future::ready(msg.ok().and_then(frame_payload)));

    let outcomes = state.checkin.scan(event_id, payloads, cancel.clone());
    futures::pin_mut!(outcomes);
    while let Some(outcome) = outcomes.next().await {
        let text = match serde_json::to_string(&outcome) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to encode scan outcome");
                break;
            }
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

// --- reports ---

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Deserialize, Debug)]
pub struct ReportQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub sort: SortDirection,
    #[serde(default)]
    pub include_absent: bool,
    #[serde(default)]
    pub format: ReportFormat,
}

/// Whole days `from..=to` as a half-open UTC range.
pub fn report_range(
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    if to < from {
        return Err(AppError::Validation(
            "Report end date is before its start date".into(),
        ));
    }
    let until = to
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AppError::Validation("Report end date is out of range".into()))?;
    let midnight = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));
    Ok((midnight(from), midnight(until)))
}

async fn points_report(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Query(q): Query<ReportQuery>,
) -> Result<Response, AppError> {
    let (from, until) = report_range(q.from, q.to)?;
    let rows = state.store.points_rows(class_id, from, until).await?;
    let mut totals = points::aggregate(rows.into_iter().map(PointsObservation::from), q.sort);
    if q.include_absent {
        let roster = state.store.list_students(class_id).await?;
        totals = points::union_absent(totals, &roster, q.sort);
    }

    Ok(match q.format {
        ReportFormat::Json => Json(totals).into_response(),
        ReportFormat::Csv => file_response(
            "text/csv; charset=utf-8",
            "attendance_points.csv",
            export::points_csv(&totals),
        ),
    })
}

async fn detail_report(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Query(q): Query<ReportQuery>,
) -> Result<Response, AppError> {
    let (from, until) = report_range(q.from, q.to)?;
    let rows = state.store.detail_rows(class_id, from, until).await?;
    Ok(match q.format {
        ReportFormat::Json => Json(rows).into_response(),
        ReportFormat::Csv => file_response(
            "text/csv; charset=utf-8",
            "attendance_details.csv",
            export::detail_csv(&rows),
        ),
    })
}

// --- helpers ---

fn non_blank<'a>(value: &'a str, msg: &str) -> Result<&'a str, AppError> {
    match value.trim() {
        "" => Err(AppError::Validation(msg.into())),
        v => Ok(v),
    }
}

fn file_response(content_type: &'static str, file_name: &str, body: String) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    // never connects: every request below fails before touching the database
    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://attendance@localhost/attendance")
            .unwrap();
        router(AppState::new(PgStore::new(pool)))
    }

    async fn send(req: Request<Body>) -> (StatusCode, String) {
        let res = app().oneshot(req).await.unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn inverted_window_rejected_before_storage() {
        let uri = format!("/api/orgs/{}/attendance-types", Uuid::new_v4());
        let (status, body) = send(json_post(
            &uri,
            serde_json::json!({ "name": "late", "points": 0.5, "start_minute": 10, "end_minute": 5 }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("End minute"));
    }

    #[tokio::test]
    async fn malformed_payload_rejected_before_storage() {
        let uri = format!("/api/events/{}/checkins", Uuid::new_v4());
        let (status, body) =
            send(json_post(&uri, serde_json::json!({ "payload": "hello" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Invalid QR payload"));
    }

    #[tokio::test]
    async fn blank_class_name_rejected() {
        let uri = format!("/api/orgs/{}/classes", Uuid::new_v4());
        let (status, _) = send(json_post(&uri, serde_json::json!({ "name": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blank_org_name_rejected() {
        let (status, body) = send(json_post(
            "/api/orgs",
            serde_json::json!({ "name": "   ", "owner_user_id": Uuid::new_v4() }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Organization name is required"));
    }

    #[tokio::test]
    async fn reversed_report_range_rejected() {
        let uri = format!(
            "/api/classes/{}/reports/points?from=2024-09-10&to=2024-09-01",
            Uuid::new_v4()
        );
        let (status, _) = send(Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn report_range_covers_whole_days() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let (from, until) = report_range(d("2024-09-01"), d("2024-09-01")).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap());
        assert_eq!(until, Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn new_student_gets_uid_and_badge() {
        let s = new_student("  Ada Lovelace ", " ").unwrap();
        assert_eq!(s.full_name, "Ada Lovelace");
        assert_eq!(s.gender, "unknown");
        assert_eq!(s.student_uid.len(), payload::UID_LEN);
        assert!(s.qr_data_url.starts_with("data:image/svg+xml;base64,"));
    }

    #[test]
    fn blank_gender_falls_back_to_unknown() {
        assert_eq!(gender_or_default("  "), "unknown");
        assert_eq!(gender_or_default(" female "), "female");
    }

    #[test]
    fn binary_frames_become_rejectable_payloads() {
        let raw = frame_payload(Message::Binary(vec![0xff, 0x00, 0x12])).unwrap();
        assert!(QrPayload::decode(&raw).is_err());

        let raw = frame_payload(Message::Binary(br#"{"student_uid":"abc"}"#.to_vec())).unwrap();
        assert_eq!(QrPayload::decode(&raw).unwrap().student_uid, "abc");

        assert_eq!(frame_payload(Message::Ping(vec![1])), None);
        assert_eq!(
            frame_payload(Message::Text("hello".into())).as_deref(),
            Some("hello")
        );
    }
}
