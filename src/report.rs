use std::fmt::Write;

use crate::aggregate::ProgressSummary;
use crate::models::{percent, Student};
use crate::session::{ExamCard, Session, WEEKDAYS};

/// How far along a student is this week, as shown on the overview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Complete,
    OnTrack,
    Progressing,
    AtRisk,
}

impl Tier {
    pub fn from_percent(percent: u32) -> Self {
        match percent {
            100.. => Tier::Complete,
            80..=99 => Tier::OnTrack,
            50..=79 => Tier::Progressing,
            _ => Tier::AtRisk,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Complete => "complete",
            Tier::OnTrack => "on track",
            Tier::Progressing => "progressing",
            Tier::AtRisk => "at risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverviewRow {
    pub student_id: String,
    pub full_name: String,
    pub total_goal: u32,
    /// Each task contributes at most its own goal.
    pub total_done: u32,
    pub assigned: bool,
}

impl OverviewRow {
    pub fn from_session(student: &Student, session: &Session) -> Self {
        let (total_goal, total_done) = session
            .assignments
            .iter()
            .fold((0, 0), |(goal, done), assignment| {
                let task_done = session.done_for(assignment).min(assignment.weekly_goal);
                (goal + assignment.weekly_goal, done + task_done)
            });

        Self {
            student_id: student.id.clone(),
            full_name: student.full_name.clone(),
            total_goal,
            total_done,
            assigned: !session.assignments.is_empty(),
        }
    }

    pub fn percent(&self) -> u32 {
        percent(self.total_done, self.total_goal)
    }

    pub fn tier(&self) -> Tier {
        Tier::from_percent(self.percent())
    }
}

pub fn overview_line(row: &OverviewRow) -> String {
    if !row.assigned {
        return format!("- {} ({}): no tasks assigned", row.full_name, row.student_id);
    }
    format!(
        "- {} ({}): {}/{} done, {}% [{}]",
        row.full_name,
        row.student_id,
        row.total_done,
        row.total_goal,
        row.percent(),
        row.tier().label()
    )
}

pub fn build_report(summary: &ProgressSummary, session: &Session, display_cap: f64) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Weekly Progress Report");
    let _ = writeln!(
        output,
        "Generated for {} (week starting {})",
        summary.student_id, summary.week_start
    );
    if summary.degraded {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "_Some records could not be loaded; figures may be incomplete._"
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## This Week");
    if summary.categories.is_empty() {
        let _ = writeln!(output, "No tasks assigned.");
    } else {
        for stats in summary.categories.iter().filter(|s| s.weekly_goal > 0) {
            let _ = writeln!(
                output,
                "- {}: {}/{} ({:.0}%)",
                stats.category,
                stats.weekly_done,
                stats.weekly_goal,
                stats.display_ratio(display_cap) * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cumulative");
    if summary.categories.is_empty() {
        let _ = writeln!(output, "Nothing recorded yet.");
    } else {
        for stats in summary.categories.iter() {
            let _ = writeln!(
                output,
                "- {}: {}/{} ({}%)",
                stats.category,
                stats.cumulative_done,
                stats.cumulative_goal,
                percent(stats.cumulative_done, stats.cumulative_goal)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Weeks");
    if session.history.is_empty() {
        let _ = writeln!(output, "No closed weeks yet.");
    } else {
        let mut weeks: Vec<_> = session.history.iter().map(|s| s.week_start).collect();
        weeks.dedup();
        for week_start in weeks.iter().rev().take(4) {
            let (goal, done) = session
                .history
                .iter()
                .filter(|s| s.week_start == *week_start)
                .fold((0, 0), |(g, d), s| (g + s.goal_total, d + s.done_total));
            let _ = writeln!(
                output,
                "- {}: {}/{} ({}%)",
                session.window.local_date(*week_start),
                done,
                goal,
                percent(done, goal)
            );
        }
    }

    let checklist = session.checklist();
    if !checklist.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Checklist");
        let header: Vec<String> = WEEKDAYS.iter().map(|d| d.to_string()).collect();
        let _ = writeln!(output, "| Category | Task | Done | {} |", header.join(" | "));
        let _ = writeln!(output, "|---|---|---|{}", "---|".repeat(WEEKDAYS.len()));
        for row in checklist {
            let marks: Vec<&str> = row.days.iter().map(|d| if *d { "x" } else { " " }).collect();
            let _ = writeln!(
                output,
                "| {} | {} | {}/{} | {} |",
                row.category,
                row.task,
                row.done,
                row.weekly_goal,
                marks.join(" | ")
            );
        }
    }

    let cards = session.exam_cards();
    if !cards.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Exam Results");
        for card in cards {
            let _ = writeln!(
                output,
                "- {} ({}): {}/{} taken",
                card.task_name,
                card.range_identity,
                card.scores.len(),
                card.weekly_goal
            );
            for exam in &card.scores {
                let verdict = if ExamCard::passed(exam.score) { "pass" } else { "retry" };
                let _ = writeln!(output, "  - {}: {}% ({})", exam.date, exam.score, verdict);
            }
        }
    }

    output
}
