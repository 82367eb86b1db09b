use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::checkin::CheckinStore;
use crate::config::Config;
use crate::models::*;

pub type Db = Pool<Postgres>;

pub async fn connect(config: &Config) -> Result<Db, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
}

/// Attendance types every new organization starts with.
pub const DEFAULT_TYPES: [(&str, f64, i32, Option<i32>); 3] = [
    ("present", 1.0, 0, Some(15)),
    ("late", 0.75, 15, Some(60)),
    ("absent", 0.0, 60, None),
];

/// A new student before it is stored.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub full_name: String,
    pub gender: String,
    pub student_uid: String,
    pub qr_data_url: String,
}

/// Postgres-backed store for every entity the service manages.
#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }

    // --- orgs ---

    /// Create an organization and its default attendance types atomically.
    pub async fn register_org(&self, name: &str, owner_user_id: Uuid) -> Result<Org, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let org = sqlx::query_as::<_, Org>(
            r#"
            INSERT INTO orgs (name, owner_user_id)
            VALUES ($1, $2)
            RETURNING id, name, owner_user_id, created_at
            "#,
        )
        .bind(name)
        .bind(owner_user_id)
        .fetch_one(&mut *tx)
        .await?;

        for (type_name, points, start, end) in DEFAULT_TYPES {
            sqlx::query(
                r#"
                INSERT INTO attendance_types (org_id, name, points, start_minute, end_minute)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(org.id)
            .bind(type_name)
            .bind(points)
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(org)
    }

    pub async fn org_by_owner(&self, owner_user_id: Uuid) -> Result<Option<Org>, sqlx::Error> {
        sqlx::query_as::<_, Org>(
            "SELECT id, name, owner_user_id, created_at FROM orgs WHERE owner_user_id = $1",
        )
        .bind(owner_user_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn org_by_id(&self, id: Uuid) -> Result<Option<Org>, sqlx::Error> {
        sqlx::query_as::<_, Org>("SELECT id, name, owner_user_id, created_at FROM orgs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    // --- classes ---

    pub async fn list_classes(&self, org_id: Uuid) -> Result<Vec<Class>, sqlx::Error> {
        sqlx::query_as::<_, Class>(
            "SELECT id, org_id, name, created_at FROM classes WHERE org_id = $1 ORDER BY name",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn class_by_id(&self, id: Uuid) -> Result<Option<Class>, sqlx::Error> {
        sqlx::query_as::<_, Class>("SELECT id, org_id, name, created_at FROM classes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn create_class(&self, org_id: Uuid, name: &str) -> Result<Class, sqlx::Error> {
        sqlx::query_as::<_, Class>(
            r#"
            INSERT INTO classes (org_id, name)
            VALUES ($1, $2)
            RETURNING id, org_id, name, created_at
            "#,
        )
        .bind(org_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn rename_class(&self, id: Uuid, name: &str) -> Result<Option<Class>, sqlx::Error> {
        sqlx::query_as::<_, Class>(
            "UPDATE classes SET name = $2 WHERE id = $1 RETURNING id, org_id, name, created_at",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
    }

    /// Students, events and their attendance go with the class.
    pub async fn delete_class(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("DELETE FROM classes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- students ---

    pub async fn list_students(&self, class_id: Uuid) -> Result<Vec<Student>, sqlx::Error> {
        sqlx::query_as::<_, Student>(
            r#"
            SELECT id, class_id, full_name, gender, student_uid, qr_data_url, created_at
            FROM students
            WHERE class_id = $1
            ORDER BY full_name
            "#,
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn student_by_id(&self, id: Uuid) -> Result<Option<Student>, sqlx::Error> {
        sqlx::query_as::<_, Student>(
            r#"
            SELECT id, class_id, full_name, gender, student_uid, qr_data_url, created_at
            FROM students
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn create_student(
        &self,
        class_id: Uuid,
        student: &NewStudent,
    ) -> Result<Student, sqlx::Error> {
        sqlx::query_as::<_, Student>(
            r#"
            INSERT INTO students (class_id, full_name, gender, student_uid, qr_data_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, class_id, full_name, gender, student_uid, qr_data_url, created_at
            "#,
        )
        .bind(class_id)
        .bind(&student.full_name)
        .bind(&student.gender)
        .bind(&student.student_uid)
        .bind(&student.qr_data_url)
        .fetch_one(&self.pool)
        .await
    }

    /// Insert a whole roster in one transaction; returns how many were added.
    pub async fn create_students(
        &self,
        class_id: Uuid,
        students: &[NewStudent],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0;
        for s in students {
            added += sqlx::query(
                r#"
                INSERT INTO students (class_id, full_name, gender, student_uid, qr_data_url)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(class_id)
            .bind(&s.full_name)
            .bind(&s.gender)
            .bind(&s.student_uid)
            .bind(&s.qr_data_url)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    /// The UID and QR code never change after creation.
    pub async fn update_student(
        &self,
        id: Uuid,
        full_name: &str,
        gender: &str,
    ) -> Result<Option<Student>, sqlx::Error> {
        sqlx::query_as::<_, Student>(
            r#"
            UPDATE students SET full_name = $2, gender = $3
            WHERE id = $1
            RETURNING id, class_id, full_name, gender, student_uid, qr_data_url, created_at
            "#,
        )
        .bind(id)
        .bind(full_name)
        .bind(gender)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_student(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- events ---

    pub async fn list_events(&self, org_id: Uuid) -> Result<Vec<ClassEvent>, sqlx::Error> {
        sqlx::query_as::<_, ClassEvent>(
            r#"
            SELECT id, org_id, class_id, title, starts_at, late_after_minutes, created_at
            FROM class_events
            WHERE org_id = $1
            ORDER BY starts_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn create_event(
        &self,
        org_id: Uuid,
        class_id: Uuid,
        title: &str,
        starts_at: DateTime<Utc>,
        late_after_minutes: i32,
    ) -> Result<ClassEvent, sqlx::Error> {
        sqlx::query_as::<_, ClassEvent>(
            r#"
            INSERT INTO class_events (org_id, class_id, title, starts_at, late_after_minutes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, org_id, class_id, title, starts_at, late_after_minutes, created_at
            "#,
        )
        .bind(org_id)
        .bind(class_id)
        .bind(title)
        .bind(starts_at)
        .bind(late_after_minutes)
        .fetch_one(&self.pool)
        .await
    }

    // --- attendance types ---

    pub async fn type_by_id(&self, id: Uuid) -> Result<Option<AttendanceType>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceType>(
            r#"
            SELECT id, org_id, name, points, start_minute, end_minute
            FROM attendance_types
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn create_type(
        &self,
        org_id: Uuid,
        req: &AttendanceTypeReq,
    ) -> Result<AttendanceType, sqlx::Error> {
        sqlx::query_as::<_, AttendanceType>(
            r#"
            INSERT INTO attendance_types (org_id, name, points, start_minute, end_minute)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, org_id, name, points, start_minute, end_minute
            "#,
        )
        .bind(org_id)
        .bind(req.normalized_name())
        .bind(req.points)
        .bind(req.start_minute)
        .bind(req.end_minute)
        .fetch_one(&self.pool)
        .await
    }

    /// Existing attendance keeps the status it was saved with.
    pub async fn update_type(
        &self,
        id: Uuid,
        req: &AttendanceTypeReq,
    ) -> Result<Option<AttendanceType>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceType>(
            r#"
            UPDATE attendance_types
            SET name = $2, points = $3, start_minute = $4, end_minute = $5
            WHERE id = $1
            RETURNING id, org_id, name, points, start_minute, end_minute
            "#,
        )
        .bind(id)
        .bind(req.normalized_name())
        .bind(req.points)
        .bind(req.start_minute)
        .bind(req.end_minute)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_type(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let res = sqlx::query("DELETE FROM attendance_types WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- attendance views ---

    pub async fn event_checkins(&self, event_id: Uuid) -> Result<Vec<CheckinRow>, sqlx::Error> {
        sqlx::query_as::<_, CheckinRow>(
            r#"
            SELECT attendance_id, event_id, student_id, full_name, status, checked_in_at
            FROM attendance_records_view
            WHERE event_id = $1
            ORDER BY checked_in_at ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Per-check-in points for a class, events starting in `[from, until)`.
    pub async fn points_rows(
        &self,
        class_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PointsRow>, sqlx::Error> {
        sqlx::query_as::<_, PointsRow>(
            r#"
            SELECT student_id, full_name, status, points
            FROM points_report_view
            WHERE class_id = $1 AND starts_at >= $2 AND starts_at < $3
            ORDER BY starts_at ASC, checked_in_at ASC
            "#,
        )
        .bind(class_id)
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn detail_rows(
        &self,
        class_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DetailRow>, sqlx::Error> {
        sqlx::query_as::<_, DetailRow>(
            r#"
            SELECT event_title, starts_at, full_name, status, checked_in_at
            FROM attendance_detail_view
            WHERE class_id = $1 AND starts_at >= $2 AND starts_at < $3
            ORDER BY starts_at ASC, checked_in_at ASC
            "#,
        )
        .bind(class_id)
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
    }
}

#[async_trait]
impl CheckinStore for PgStore {
    async fn event_by_id(&self, event_id: Uuid) -> Result<Option<ClassEvent>, sqlx::Error> {
        sqlx::query_as::<_, ClassEvent>(
            r#"
            SELECT id, org_id, class_id, title, starts_at, late_after_minutes, created_at
            FROM class_events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn student_in_class(
        &self,
        student_uid: &str,
        class_id: Uuid,
    ) -> Result<Option<Student>, sqlx::Error> {
        sqlx::query_as::<_, Student>(
            r#"
            SELECT id, class_id, full_name, gender, student_uid, qr_data_url, created_at
            FROM students
            WHERE student_uid = $1 AND class_id = $2
            "#,
        )
        .bind(student_uid)
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn attendance_types(&self, org_id: Uuid) -> Result<Vec<AttendanceType>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceType>(
            r#"
            SELECT id, org_id, name, points, start_minute, end_minute
            FROM attendance_types
            WHERE org_id = $1
            ORDER BY start_minute, name
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn upsert_attendance(
        &self,
        event_id: Uuid,
        student_id: Uuid,
        checked_in_at: DateTime<Utc>,
        status: &str,
    ) -> Result<AttendanceRecord, sqlx::Error> {
        sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance (event_id, student_id, checked_in_at, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id, student_id)
            DO UPDATE SET checked_in_at = EXCLUDED.checked_in_at, status = EXCLUDED.status
            RETURNING id, event_id, student_id, checked_in_at, status
            "#,
        )
        .bind(event_id)
        .bind(student_id)
        .bind(checked_in_at)
        .bind(status)
        .fetch_one(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, sorted_types};
    use chrono::{Duration, TimeZone};

    fn default_types() -> Vec<AttendanceType> {
        DEFAULT_TYPES
            .iter()
            .map(|(name, points, start, end)| AttendanceType {
                id: Uuid::new_v4(),
                org_id: Uuid::nil(),
                name: name.to_string(),
                points: *points,
                start_minute: *start,
                end_minute: *end,
            })
            .collect()
    }

    #[test]
    fn default_types_are_gapless_from_zero() {
        let types = default_types();
        let sorted = sorted_types(&types);
        assert_eq!(sorted[0].start_minute, 0);
        for pair in sorted.windows(2) {
            assert_eq!(pair[0].end_minute, Some(pair[1].start_minute));
        }
        assert_eq!(sorted.last().and_then(|t| t.end_minute), None);
    }

    #[test]
    fn default_types_classify_by_lateness() {
        let types = default_types();
        let start = Utc.with_ymd_and_hms(2024, 1, 8, 8, 0, 0).unwrap();
        assert_eq!(classify(start, start + Duration::minutes(5), &types), "present");
        assert_eq!(classify(start, start + Duration::minutes(30), &types), "late");
        assert_eq!(classify(start, start + Duration::minutes(90), &types), "absent");
    }
}
