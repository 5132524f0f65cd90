use std::fmt;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::Serialize;

/// A task as the student sees it on the checklist: name plus the range or
/// note the instructor attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    pub task_name: String,
    pub qualifier: String,
}

impl TaskIdentity {
    pub fn new(task_name: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            qualifier: qualifier.into(),
        }
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.task_name, self.qualifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAssignment {
    pub student_id: String,
    pub category: String,
    pub task_name: String,
    pub qualifier_text: String,
    pub weekly_goal: u32,
    pub is_exam_type: bool,
}

impl TaskAssignment {
    /// Goals below 1 are clamped to 1 rather than rejected.
    pub fn new(
        student_id: impl Into<String>,
        category: impl Into<String>,
        task_name: impl Into<String>,
        qualifier_text: impl Into<String>,
        raw_goal: i64,
        is_exam_type: bool,
    ) -> Self {
        let student_id = student_id.into();
        let task_name = task_name.into();
        let weekly_goal = clamp_goal(raw_goal);
        if i64::from(weekly_goal) != raw_goal {
            tracing::warn!(
                student_id = %student_id,
                task = %task_name,
                raw_goal,
                clamped = weekly_goal,
                "invalid weekly goal clamped"
            );
        }

        Self {
            student_id,
            category: category.into(),
            task_name,
            qualifier_text: qualifier_text.into(),
            weekly_goal,
            is_exam_type,
        }
    }

    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(self.task_name.clone(), self.qualifier_text.clone())
    }
}

pub fn clamp_goal(raw_goal: i64) -> u32 {
    raw_goal.clamp(1, i64::from(u32::MAX)) as u32
}

/// Decides once, at assignment creation, whether a task is counted from exam
/// results instead of checklist ticks.
pub fn is_exam_task(category: &str, task_name: &str, markers: &[String]) -> bool {
    let category = category.to_lowercase();
    let task_name = task_name.to_lowercase();
    markers.iter().any(|marker| {
        let marker = marker.to_lowercase();
        !marker.is_empty() && (category.contains(&marker) || task_name.contains(&marker))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub student_id: String,
    pub task: TaskIdentity,
    pub day: Weekday,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamEvent {
    pub student_id: String,
    pub range_identity: String,
    pub date: NaiveDate,
    pub score: i32,
}

/// One closed week for one category. Never rewritten once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklySnapshot {
    pub student_id: String,
    pub week_start: DateTime<Utc>,
    pub category: String,
    pub goal_total: u32,
    pub done_total: u32,
}

impl WeeklySnapshot {
    pub fn new(
        student_id: impl Into<String>,
        week_start: DateTime<Utc>,
        category: impl Into<String>,
        goal_total: u32,
        done_total: u32,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            week_start,
            category: category.into(),
            goal_total,
            done_total: done_total.min(goal_total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub enrolled_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub weekly_goal: u32,
    /// Raw count for the open week, may exceed the goal.
    pub weekly_done: u32,
    pub cumulative_goal: u32,
    pub cumulative_done: u32,
}

impl CategoryStats {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            weekly_goal: 0,
            weekly_done: 0,
            cumulative_goal: 0,
            cumulative_done: 0,
        }
    }

    pub fn weekly_ratio(&self) -> f64 {
        ratio(self.weekly_done, self.weekly_goal)
    }

    pub fn cumulative_ratio(&self) -> f64 {
        ratio(self.cumulative_done, self.cumulative_goal)
    }

    /// Weekly ratio clipped to the radar chart's ceiling.
    pub fn display_ratio(&self, cap: f64) -> f64 {
        self.weekly_ratio().min(cap)
    }
}

pub fn ratio(done: u32, goal: u32) -> f64 {
    if goal == 0 {
        0.0
    } else {
        f64::from(done) / f64::from(goal)
    }
}

/// Whole percent, truncated like the checklist's progress text.
pub fn percent(done: u32, goal: u32) -> u32 {
    if goal == 0 {
        0
    } else {
        (u64::from(done) * 100 / u64::from(goal)) as u32
    }
}
