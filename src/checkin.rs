//! QR check-in: decode, resolve, classify, upsert.
//!
//! [`CheckinService::check_in`] handles one decoded payload. A scan session
//! ([`CheckinService::scan`]) feeds a stream of payloads through it one at a
//! time and stops when the input ends or its cancellation token fires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::classify::classify;
use crate::models::{AttendanceRecord, AttendanceType, ClassEvent, Student};
use crate::payload::{PayloadError, QrPayload};

/// The persistence operations a check-in needs.
#[async_trait]
pub trait CheckinStore: Send + Sync {
    async fn event_by_id(&self, event_id: Uuid) -> Result<Option<ClassEvent>, sqlx::Error>;

    async fn student_in_class(
        &self,
        student_uid: &str,
        class_id: Uuid,
    ) -> Result<Option<Student>, sqlx::Error>;

    async fn attendance_types(&self, org_id: Uuid) -> Result<Vec<AttendanceType>, sqlx::Error>;

    /// Insert or overwrite the record for (event, student).
    async fn upsert_attendance(
        &self,
        event_id: Uuid,
        student_id: Uuid,
        checked_in_at: DateTime<Utc>,
        status: &str,
    ) -> Result<AttendanceRecord, sqlx::Error>;
}

#[derive(Error, Debug)]
pub enum CheckinError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("Event not found: {0}")]
    EventNotFound(Uuid),
    #[error("Student not found for this class.")]
    StudentNotFound,
    #[error("{0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Serialize, Debug, Clone)]
pub struct Checkin {
    pub record: AttendanceRecord,
    pub full_name: String,
}

/// Result of one payload in a scan session.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    CheckedIn {
        student_id: Uuid,
        full_name: String,
        status: String,
        checked_in_at: DateTime<Utc>,
    },
    Rejected {
        message: String,
    },
}

impl From<Result<Checkin, CheckinError>> for ScanOutcome {
    fn from(res: Result<Checkin, CheckinError>) -> Self {
        match res {
            Ok(c) => ScanOutcome::CheckedIn {
                student_id: c.record.student_id,
                full_name: c.full_name,
                status: c.record.status,
                checked_in_at: c.record.checked_in_at,
            },
            Err(e) => ScanOutcome::Rejected {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct CheckinService<S> {
    store: S,
}

impl<S: CheckinStore> CheckinService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record one check-in at `now`. Nothing is written unless the payload,
    /// event and student all resolve.
    #[instrument(skip(self, raw, now))]
    pub async fn check_in(
        &self,
        event_id: Uuid,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<Checkin, CheckinError> {
        let payload = QrPayload::decode(raw)?;

        let event = self
            .store
            .event_by_id(event_id)
            .await?
            .ok_or(CheckinError::EventNotFound(event_id))?;

        let student = self
            .store
            .student_in_class(&payload.student_uid, event.class_id)
            .await?
            .ok_or(CheckinError::StudentNotFound)?;

        let types = self.store.attendance_types(event.org_id).await?;
        let status = classify(event.starts_at, now, &types);

        let record = self
            .store
            .upsert_attendance(event.id, student.id, now, &status)
            .await?;

        info!(student_id = %student.id, status = %record.status, "student checked in");
        Ok(Checkin {
            record,
            full_name: student.full_name,
        })
    }

    /// Process decoded payloads sequentially until `payloads` ends or
    /// `cancel` fires. Each payload yields exactly one outcome; a rejected
    /// payload does not end the session.
    pub fn scan<'a, P>(
        &'a self,
        event_id: Uuid,
        payloads: P,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ScanOutcome> + Send + 'a
    where
        P: Stream<Item = String> + Send + 'a,
    {
        async_stream::stream! {
            futures::pin_mut!(payloads);
            info!(%event_id, "scan session started");
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = payloads.next() => item,
                };
                let Some(raw) = next else { break };

                let res = self.check_in(event_id, &raw, Utc::now()).await;
                if let Err(e) = &res {
                    warn!(%event_id, error = %e, "scan rejected");
                }
                yield ScanOutcome::from(res);
            }
            info!(%event_id, "scan session stopped");
        }
    }
}
