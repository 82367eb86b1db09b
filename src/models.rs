use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Org {
    pub id: Uuid,
    pub name: String,
    pub owner_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Class {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub class_id: Uuid,
    pub full_name: String,
    pub gender: String,
    pub student_uid: String,
    pub qr_data_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ClassEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub class_id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    // informational; classification uses attendance type windows
    pub late_after_minutes: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttendanceType {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub points: f64,
    pub start_minute: i32,
    /// Exclusive upper bound; `None` leaves the window open.
    pub end_minute: Option<i32>,
}

impl AttendanceType {
    /// Whether `elapsed` minutes after the event start falls in this type's window.
    pub fn contains(&self, elapsed: i64) -> bool {
        elapsed >= i64::from(self.start_minute)
            && self.end_minute.map_or(true, |end| elapsed < i64::from(end))
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub event_id: Uuid,
    pub student_id: Uuid,
    pub checked_in_at: DateTime<Utc>,
    pub status: String,
}

/// Row of `attendance_records_view`, one per check-in of an event.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct CheckinRow {
    pub attendance_id: Uuid,
    pub event_id: Uuid,
    pub student_id: Uuid,
    pub full_name: String,
    pub status: String,
    pub checked_in_at: DateTime<Utc>,
}

/// Row of `points_report_view`.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct PointsRow {
    pub student_id: Uuid,
    pub full_name: String,
    pub status: String,
    pub points: Option<f64>,
}

/// Row of `attendance_detail_view`.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct DetailRow {
    pub event_title: String,
    pub starts_at: DateTime<Utc>,
    pub full_name: String,
    pub status: String,
    pub checked_in_at: DateTime<Utc>,
}

// --- requests ---

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct RegisterOrgReq {
    #[validate(length(min = 1, max = 200, message = "Organization name is required"))]
    pub name: String,
    pub owner_user_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct ClassReq {
    #[validate(length(min = 1, max = 200, message = "Class name is required"))]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct StudentReq {
    #[validate(length(min = 1, max = 200, message = "Full name is required"))]
    pub full_name: String,
    #[serde(default = "default_gender")]
    #[validate(length(max = 50))]
    pub gender: String,
}

pub fn default_gender() -> String {
    "unknown".into()
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct CreateEventReq {
    pub class_id: Uuid,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub title: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default = "default_late_after")]
    #[validate(range(min = 0, message = "Late-after minutes cannot be negative"))]
    pub late_after_minutes: i32,
}

fn default_late_after() -> i32 {
    15
}

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
#[validate(schema(function = "validate_window"))]
pub struct AttendanceTypeReq {
    #[validate(length(min = 1, max = 50, message = "Type name is required"))]
    pub name: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub start_minute: i32,
    #[serde(default)]
    pub end_minute: Option<i32>,
}

impl AttendanceTypeReq {
    /// Stored form of the name: trimmed and lowercased.
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

fn validate_window(req: &AttendanceTypeReq) -> Result<(), ValidationError> {
    if req.name.trim().is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Type name is required".into());
        return Err(err);
    }
    if !req.points.is_finite() {
        let mut err = ValidationError::new("points_finite");
        err.message = Some("Points must be a finite number".into());
        return Err(err);
    }
    match req.end_minute {
        Some(end) if end <= req.start_minute => {
            let mut err = ValidationError::new("window_order");
            err.message =
                Some("End minute must be greater than start minute (or left open)".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckinReq {
    /// Raw decoded QR text.
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_req(start: i32, end: Option<i32>) -> AttendanceTypeReq {
        AttendanceTypeReq {
            name: "late".into(),
            points: 0.75,
            start_minute: start,
            end_minute: end,
        }
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(type_req(10, Some(5)).validate().is_err());
    }

    #[test]
    fn rejects_empty_window() {
        assert!(type_req(10, Some(10)).validate().is_err());
    }

    #[test]
    fn accepts_open_and_ordered_windows() {
        assert!(type_req(15, None).validate().is_ok());
        assert!(type_req(0, Some(15)).validate().is_ok());
    }

    #[test]
    fn rejects_blank_type_name() {
        let mut req = type_req(0, None);
        req.name = "   ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn type_name_is_normalized() {
        let mut req = type_req(0, None);
        req.name = "  Late ".into();
        assert_eq!(req.normalized_name(), "late");
    }

    #[test]
    fn window_bounds() {
        let t = AttendanceType {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "present".into(),
            points: 1.0,
            start_minute: 0,
            end_minute: Some(15),
        };
        assert!(t.contains(0));
        assert!(t.contains(14));
        assert!(!t.contains(15));
    }

    #[test]
    fn negative_late_after_is_rejected() {
        let req = CreateEventReq {
            class_id: Uuid::new_v4(),
            title: String::new(),
            starts_at: Utc::now(),
            late_after_minutes: -1,
        };
        assert!(req.validate().is_err());
    }
}
