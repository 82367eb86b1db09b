//! Runs against a real database when `DATABASE_URL` is set; otherwise each
//! test returns early.

use attendance_server::checkin::CheckinStore;
use attendance_server::db::{NewStudent, PgStore};
use attendance_server::payload::generate_student_uid;
use chrono::{Duration, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    Some(PgStore::new(pool))
}

#[tokio::test]
async fn rescan_overwrites_the_single_record() {
    let Some(store) = store().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };

    let org = store
        .register_org("Upsert Academy", Uuid::new_v4())
        .await
        .unwrap();
    let class = store.create_class(org.id, "Period 1").await.unwrap();
    let student = store
        .create_student(
            class.id,
            &NewStudent {
                full_name: "Ada".into(),
                gender: "female".into(),
                student_uid: generate_student_uid(),
                qr_data_url: "data:image/svg+xml;base64,".into(),
            },
        )
        .await
        .unwrap();
    let starts_at = Utc.with_ymd_and_hms(2024, 9, 2, 10, 0, 0).unwrap();
    let event = store
        .create_event(org.id, class.id, "Lab", starts_at, 15)
        .await
        .unwrap();

    let first = store
        .upsert_attendance(event.id, student.id, starts_at + Duration::minutes(5), "present")
        .await
        .unwrap();
    let second = store
        .upsert_attendance(event.id, student.id, starts_at + Duration::minutes(30), "late")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.status, "late");
    assert_eq!(second.checked_in_at, starts_at + Duration::minutes(30));

    let rows = store.event_checkins(event.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "late");
}
