use std::collections::HashSet;

use crate::identity;
use crate::schema::{self, GRADE, STUDENT};
use crate::table::Frame;

/// Words that mark spreadsheet summary rows ("PROMEDIO GENERAL", "TOTAL").
const SUMMARY_TOKENS: &[&str] = &["PROMEDIO", "TOTAL", "MEDIA"];

fn is_summary_row(identity: &str) -> bool {
    identity.split(' ').any(|word| SUMMARY_TOKENS.contains(&word))
}

/// `11.0` and `11` are the same grade; anything non-integral stays as typed.
fn normalize_grade(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => format!("{}", v as i64),
        _ => trimmed.to_string(),
    }
}

/// Canonicalizes headers, normalizes identities and keeps one row per student
/// (first occurrence wins). Rows with an empty identity or that look like
/// summary rows are dropped. Never fails: bad rows are filtered out.
pub fn clean(frame: Frame) -> Frame {
    let frame = schema::canonicalize_columns(frame);
    let Some(student_idx) = frame.column_index(STUDENT) else {
        return frame;
    };
    let grade_idx = frame.column_index(GRADE);
    let width = frame.columns.len();

    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(frame.rows.len());
    for mut row in frame.rows {
        let identity = identity::normalize_opt(row.get(student_idx).map(String::as_str));
        if identity.is_empty() || is_summary_row(&identity) {
            continue;
        }
        row.resize(width.max(row.len()), String::new());
        if !seen.insert(identity.clone()) {
            continue;
        }
        row[student_idx] = identity;
        if let Some(idx) = grade_idx {
            row[idx] = normalize_grade(&row[idx]);
        }
        rows.push(row);
    }

    Frame {
        columns: frame.columns,
        rows,
    }
}
