use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::models::{ProgressEntry, UnifiedTable};

/// Change in weighted average between two rounds for students who sat both,
/// largest improvement first.
pub fn progression(unified: &UnifiedTable, from_id: &str, to_id: &str) -> Result<Vec<ProgressEntry>> {
    for id in [from_id, to_id] {
        if !unified.assessment_ids.iter().any(|known| known == id) {
            return Err(Error::UnknownAssessmentId(id.to_string()));
        }
    }

    let mut entries: Vec<ProgressEntry> = unified
        .records
        .iter()
        .filter_map(|record| {
            let from = record.results.get(from_id)?.weighted_average?;
            let to = record.results.get(to_id)?.weighted_average?;
            Some(ProgressEntry {
                identity: record.identity.clone(),
                from,
                to,
                delta: to - from,
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        b.delta
            .partial_cmp(&a.delta)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    Ok(entries)
}
