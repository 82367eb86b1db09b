//! CSV in and out: report exports and roster imports.

use thiserror::Error;

use crate::models::{default_gender, DetailRow};
use crate::points::StudentTotal;

pub const POINTS_HEADER: [&str; 2] = ["full_name", "total_points"];
pub const DETAIL_HEADER: [&str; 5] = [
    "event_title",
    "event_start",
    "full_name",
    "status",
    "checked_in_at",
];

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| csv_quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn points_csv(rows: &[StudentTotal]) -> String {
    let mut lines = vec![csv_line(POINTS_HEADER)];
    lines.extend(
        rows.iter()
            .map(|r| csv_line([r.full_name.clone(), r.total_points.to_string()])),
    );
    lines.join("\n")
}

pub fn detail_csv(rows: &[DetailRow]) -> String {
    let mut lines = vec![csv_line(DETAIL_HEADER)];
    lines.extend(rows.iter().map(|r| {
        csv_line([
            r.event_title.clone(),
            r.starts_at.to_rfc3339(),
            r.full_name.clone(),
            r.status.clone(),
            r.checked_in_at.to_rfc3339(),
        ])
    }));
    lines.join("\n")
}

/// Split CSV text into records. Quoted fields may span lines.
fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, ImportError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => record.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut buf));
                records.push(std::mem::take(&mut record));
            }
            _ => buf.push(ch),
        }
    }
    if in_quotes {
        return Err(ImportError::UnterminatedQuote);
    }
    if !buf.is_empty() || !record.is_empty() {
        record.push(buf);
        records.push(record);
    }
    Ok(records)
}

/// One student row from an uploaded roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub full_name: String,
    pub gender: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImportError {
    #[error("CSV file is empty")]
    Empty,
    #[error("CSV header must contain a full_name or name column")]
    MissingNameColumn,
    #[error("CSV has an unterminated quoted field")]
    UnterminatedQuote,
}

/// Parse a roster CSV with a header row. Names come from `full_name`
/// (or `name`); rows without a name are skipped, a blank gender becomes
/// `unknown`.
pub fn parse_roster(text: &str) -> Result<Vec<RosterEntry>, ImportError> {
    let mut records = parse_csv(text.trim_start_matches('\u{feff}'))?
        .into_iter()
        .filter(|rec| rec.iter().any(|f| !f.trim().is_empty()));

    let header: Vec<String> = records
        .next()
        .ok_or(ImportError::Empty)?
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let column = |name: &str| header.iter().position(|h| h == name);
    let name_col = column("full_name")
        .or_else(|| column("name"))
        .ok_or(ImportError::MissingNameColumn)?;
    let gender_col = column("gender");

    Ok(records
        .filter_map(|rec| {
            let full_name = rec.get(name_col)?.trim().to_string();
            if full_name.is_empty() {
                return None;
            }
            let gender = gender_col
                .and_then(|i| rec.get(i))
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .unwrap_or_else(default_gender);
            Some(RosterEntry { full_name, gender })
        })
        .collect())
}
