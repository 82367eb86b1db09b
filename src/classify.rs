// Status classification from attendance type windows

use chrono::{DateTime, Utc};

use crate::models::AttendanceType;

/// Status recorded when an organization has no attendance types configured.
pub const DEFAULT_STATUS: &str = "present";

/// Whole minutes between the event start and the check-in, never negative.
pub fn elapsed_minutes(event_start: DateTime<Utc>, check_in: DateTime<Utc>) -> i64 {
    (check_in - event_start).num_minutes().max(0)
}

/// Types in classification order: by start minute, then by name.
pub fn sorted_types<'a, I>(types: I) -> Vec<&'a AttendanceType>
where
    I: IntoIterator<Item = &'a AttendanceType>,
{
    let mut sorted: Vec<&AttendanceType> = types.into_iter().collect();
    sorted.sort_by(|a, b| {
        a.start_minute
            .cmp(&b.start_minute)
            .then_with(|| a.name.cmp(&b.name))
    });
    sorted
}

/// Decide the status name for a check-in.
///
/// The first type (in [`sorted_types`] order) whose window contains the
/// elapsed minutes wins. When windows leave a gap the first type is used, so
/// callers that need exact classification must configure gapless windows.
pub fn classify<'a, I>(event_start: DateTime<Utc>, check_in: DateTime<Utc>, types: I) -> String
where
    I: IntoIterator<Item = &'a AttendanceType>,
{
    let sorted = sorted_types(types);
    let Some(first) = sorted.first() else {
        return DEFAULT_STATUS.to_string();
    };

    let elapsed = elapsed_minutes(event_start, check_in);
    let chosen = sorted
        .iter()
        .find(|t| t.contains(elapsed))
        .unwrap_or(first);
    chosen.name.to_lowercase()
}
