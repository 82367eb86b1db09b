//! Per-student point totals for the reports.
//!
//! Totals are built only from students that have at least one check-in in
//! the queried range. A student who never checked in is absent from the
//! input and therefore from the output; [`union_absent`] is the explicit,
//! caller-side way to list them at zero points.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PointsRow, Student};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// One check-in's contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct PointsObservation {
    pub student_id: Uuid,
    pub full_name: String,
    pub points: f64,
}

impl From<PointsRow> for PointsObservation {
    // a status that no longer names a configured type is worth nothing
    fn from(row: PointsRow) -> Self {
        Self {
            student_id: row.student_id,
            full_name: row.full_name,
            points: row.points.unwrap_or(0.0),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentTotal {
    pub student_id: Uuid,
    pub full_name: String,
    pub total_points: f64,
}

/// Sum points per student and order the totals.
///
/// The first name seen for a student is kept. Ties keep first-seen order.
pub fn aggregate<I>(records: I, direction: SortDirection) -> Vec<StudentTotal>
where
    I: IntoIterator<Item = PointsObservation>,
{
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut totals: Vec<StudentTotal> = Vec::new();

    for rec in records {
        match index.get(&rec.student_id) {
            Some(&i) => totals[i].total_points += rec.points,
            None => {
                index.insert(rec.student_id, totals.len());
                totals.push(StudentTotal {
                    student_id: rec.student_id,
                    full_name: rec.full_name,
                    total_points: rec.points,
                });
            }
        }
    }

    sort_totals(&mut totals, direction);
    totals
}

/// Append roster students missing from `totals` with zero points, then re-sort.
pub fn union_absent(
    mut totals: Vec<StudentTotal>,
    roster: &[Student],
    direction: SortDirection,
) -> Vec<StudentTotal> {
    for s in roster {
        if !totals.iter().any(|t| t.student_id == s.id) {
            totals.push(StudentTotal {
                student_id: s.id,
                full_name: s.full_name.clone(),
                total_points: 0.0,
            });
        }
    }
    sort_totals(&mut totals, direction);
    totals
}

fn sort_totals(totals: &mut [StudentTotal], direction: SortDirection) {
    // stable sort; -0.0 and 0.0 compare equal
    let by_points = |a: &StudentTotal, b: &StudentTotal| {
        a.total_points
            .partial_cmp(&b.total_points)
            .unwrap_or(Ordering::Equal)
    };
    match direction {
        SortDirection::Asc => totals.sort_by(by_points),
        SortDirection::Desc => totals.sort_by(|a, b| by_points(b, a)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obs(id: Uuid, name: &str, points: f64) -> PointsObservation {
        PointsObservation {
            student_id: id,
            full_name: name.into(),
            points,
        }
    }

    #[test]
    fn desc_keeps_first_seen_order_for_ties() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let input = vec![obs(a, "A", 10.0), obs(b, "B", 20.0), obs(c, "C", 10.0)];
        let out = aggregate(input, SortDirection::Desc);
        let order: Vec<Uuid> = out.iter().map(|t| t.student_id).collect();
        assert_eq!(order, vec![b, a, c]);
    }

    #[test]
    fn signed_zero_totals_tie() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for direction in [SortDirection::Desc, SortDirection::Asc] {
            let out = aggregate(vec![obs(a, "A", -0.0), obs(b, "B", 0.0)], direction);
            let order: Vec<Uuid> = out.iter().map(|t| t.student_id).collect();
            assert_eq!(order, vec![a, b]);
        }
    }

    #[test]
    fn asc_orders_lowest_first() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let out = aggregate(
            vec![obs(a, "A", 3.0), obs(b, "B", -1.0), obs(a, "A", 0.5)],
            SortDirection::Asc,
        );
        assert_eq!(out[0].student_id, b);
        assert_eq!(out[1].total_points, 3.5);
    }

    #[test]
    fn totals_conserve_points_and_dedupe_students() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let input: Vec<PointsObservation> = (0..40)
            .map(|i| obs(ids[i % 4], "x", (i as f64) * 0.25 - 3.0))
            .collect();
        let expected: f64 = input.iter().map(|o| o.points).sum();

        let out = aggregate(input, SortDirection::Desc);
        assert_eq!(out.len(), 4);
        let total: f64 = out.iter().map(|t| t.total_points).sum();
        assert!((total - expected).abs() < 1e-9);
    }

    #[test]
    fn first_seen_name_wins() {
        let a = Uuid::new_v4();
        let out = aggregate(
            vec![obs(a, "Ada L.", 1.0), obs(a, "Ada Lovelace", 1.0)],
            SortDirection::Desc,
        );
        assert_eq!(out[0].full_name, "Ada L.");
        assert_eq!(out[0].total_points, 2.0);
    }

    #[test]
    fn empty_input_gives_empty_report() {
        assert!(aggregate(Vec::new(), SortDirection::Asc).is_empty());
    }

    #[test]
    fn unmatched_status_counts_zero() {
        let row = PointsRow {
            student_id: Uuid::new_v4(),
            full_name: "Bo".into(),
            status: "excused".into(),
            points: None,
        };
        assert_eq!(PointsObservation::from(row).points, 0.0);
    }

    #[test]
    fn union_adds_missing_roster_students_at_zero() {
        let class_id = Uuid::new_v4();
        let student = |name: &str| Student {
            id: Uuid::new_v4(),
            class_id,
            full_name: name.into(),
            gender: "unknown".into(),
            student_uid: "uid".into(),
            qr_data_url: None,
            created_at: Utc::now(),
        };
        let seen = student("Seen");
        let never = student("Never");
        let totals = aggregate(vec![obs(seen.id, "Seen", 1.0)], SortDirection::Desc);

        let out = union_absent(totals, &[seen.clone(), never.clone()], SortDirection::Desc);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].student_id, seen.id);
        assert_eq!(out[1].student_id, never.id);
        assert_eq!(out[1].total_points, 0.0);
    }

    #[test]
    fn sort_direction_parses_lowercase() {
        let d: SortDirection = serde_json::from_str("\"asc\"").unwrap();
        assert_eq!(d, SortDirection::Asc);
        assert_eq!(SortDirection::default(), SortDirection::Desc);
    }
}
