use std::fmt::Write;

use crate::models::{AssessmentState, RankingEntry};
use crate::pipeline::Snapshot;
use crate::summary::summarize;

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

pub fn build_report(snapshot: &Snapshot, ranking: &[RankingEntry], limit: usize) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Simulacros Report");
    let _ = writeln!(
        output,
        "{} assessments registered, {} ready, {} students consolidated",
        snapshot.report.assessments.len(),
        snapshot.report.loaded.len(),
        snapshot.unified.records.len()
    );

    if !snapshot.report.diagnostics.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Warnings");
        for line in &snapshot.report.diagnostics {
            let _ = writeln!(output, "- {line}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Assessments");
    for assessment in &snapshot.report.assessments {
        let _ = writeln!(
            output,
            "- {} (`{}`): {}, added by {} on {}",
            assessment.name,
            assessment.id,
            assessment.state,
            assessment.created_by,
            assessment.created_at.format("%Y-%m-%d")
        );
    }

    for loaded in &snapshot.report.loaded {
        let Some(summary) = summarize(&loaded.table) else {
            continue;
        };
        let _ = writeln!(output);
        let _ = writeln!(output, "### {}", loaded.assessment.name);
        let _ = writeln!(
            output,
            "{} students, weighted average {:.1} (min {:.1}, max {:.1})",
            summary.students,
            summary.mean_weighted_average,
            summary.min_weighted_average,
            summary.max_weighted_average
        );
        for (subject, stats) in &summary.subjects {
            let _ = writeln!(
                output,
                "- {subject}: mean {:.1}, std dev {:.1}",
                stats.mean, stats.std_dev
            );
        }
        if let (Some(best), Some(worst)) = (summary.best_subject, summary.worst_subject) {
            let _ = writeln!(output, "Strongest subject: {best}. Weakest subject: {worst}.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Students");

    if ranking.is_empty() {
        let _ = writeln!(output, "No students with results yet.");
    } else {
        for entry in ranking.iter().take(limit) {
            let _ = writeln!(
                output,
                "{}. {} (grade {}) {:.2} overall {}",
                entry.rank,
                entry.identity,
                entry.grade.as_deref().unwrap_or("-"),
                entry.metric_value,
                optional(entry.overall_weighted_average)
            );
        }
    }

    let failing = snapshot
        .report
        .assessments
        .iter()
        .filter(|a| matches!(a.state, AssessmentState::Failed | AssessmentState::Missing))
        .count();
    if failing > 0 {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "{failing} assessment(s) excluded from the figures above."
        );
    }

    output
}
