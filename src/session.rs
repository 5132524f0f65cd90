//! Per-session view of one student's open week.
//!
//! Created at session start after rollover, mutated by the toggle controller
//! and read by aggregation. Never shared between sessions.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc, Weekday};

use crate::error::StoreError;
use crate::models::{ExamEvent, TaskAssignment, TaskIdentity, WeeklySnapshot};
use crate::store::{bounded, recover, ProgressStore};
use crate::week::WeekWindow;

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Scores at or above this mark count as passed on the exam results view.
pub const EXAM_PASS_MARK: i32 = 90;

#[derive(Debug, Clone)]
pub struct Session {
    pub student_id: String,
    pub window: WeekWindow,
    pub week_start: DateTime<Utc>,
    pub assignments: Vec<TaskAssignment>,
    /// Closed weeks from the ledger.
    pub history: Vec<WeeklySnapshot>,
    /// Live completion counts for the open week per (task, day label).
    live: HashMap<(TaskIdentity, Weekday), u32>,
    /// This week's exam results, oldest first.
    exams: Vec<ExamEvent>,
    /// Set when any read fell back to empty data.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChecklistRow {
    pub category: String,
    pub task: TaskIdentity,
    pub weekly_goal: u32,
    pub done: u32,
    pub days: [bool; 7],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamCard {
    pub task_name: String,
    pub range_identity: String,
    pub weekly_goal: u32,
    pub scores: Vec<ExamEvent>,
}

impl ExamCard {
    pub fn passed(score: i32) -> bool {
        score >= EXAM_PASS_MARK
    }
}

impl Session {
    /// Loads the student's assignments, open-week events and ledger history.
    /// Transient store failures leave the affected part empty and mark the
    /// session degraded.
    pub async fn open<S: ProgressStore + ?Sized>(
        store: &S,
        window: WeekWindow,
        timeout: Duration,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let assignments = recover(
            "assignments",
            bounded(timeout, store.list_assignments(student_id)).await,
        )?;
        let completions = recover(
            "completion events",
            bounded(timeout, store.list_completion_events(student_id)).await,
        )?;
        let exams = recover(
            "exam events",
            bounded(timeout, store.list_exam_events(student_id)).await,
        )?;
        let history = recover(
            "ledger",
            bounded(timeout, store.list_snapshots(student_id)).await,
        )?;
        let degraded =
            assignments.degraded || completions.degraded || exams.degraded || history.degraded;

        let mut session = Self::new(student_id, window, now, assignments.value, history.value);
        session.degraded = degraded;

        let week_start = session.week_start;
        for event in completions.value {
            if week_start <= event.completed_at && event.completed_at < now {
                session.record(event.task, event.day);
            }
        }

        let mut exams: Vec<ExamEvent> = exams
            .value
            .into_iter()
            .filter(|e| window.contains_date(week_start, e.date))
            .collect();
        exams.sort_by_key(|e| e.date);
        session.exams = exams;

        Ok(session)
    }

    pub fn new(
        student_id: &str,
        window: WeekWindow,
        now: DateTime<Utc>,
        assignments: Vec<TaskAssignment>,
        mut history: Vec<WeeklySnapshot>,
    ) -> Self {
        history.sort_by_key(|s| s.week_start);
        Self {
            student_id: student_id.to_string(),
            window,
            week_start: window.current_week_start(now),
            assignments,
            history,
            live: HashMap::new(),
            exams: Vec::new(),
            degraded: false,
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.window.contains(self.week_start, now)
    }

    pub fn assignment(&self, task: &TaskIdentity) -> Option<&TaskAssignment> {
        self.assignments.iter().find(|a| &a.identity() == task)
    }

    pub fn is_done(&self, task: &TaskIdentity, day: Weekday) -> bool {
        self.day_count(task, day) > 0
    }

    pub fn day_count(&self, task: &TaskIdentity, day: Weekday) -> u32 {
        self.live
            .get(&(task.clone(), day))
            .copied()
            .unwrap_or(0)
    }

    pub fn task_count(&self, task: &TaskIdentity) -> u32 {
        WEEKDAYS.iter().map(|day| self.day_count(task, *day)).sum()
    }

    /// Open-week raw count for one assignment.
    pub fn done_for(&self, assignment: &TaskAssignment) -> u32 {
        if assignment.is_exam_type {
            self.exams
                .iter()
                .filter(|e| e.range_identity == assignment.qualifier_text)
                .count() as u32
        } else {
            self.task_count(&assignment.identity())
        }
    }

    pub(crate) fn record(&mut self, task: TaskIdentity, day: Weekday) {
        *self.live.entry((task, day)).or_insert(0) += 1;
    }

    pub(crate) fn unrecord(&mut self, task: &TaskIdentity, day: Weekday) {
        let key = (task.clone(), day);
        if let Some(count) = self.live.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.live.remove(&key);
            }
        }
    }

    /// Checklist rows for non-exam tasks, in assignment order.
    pub fn checklist(&self) -> Vec<ChecklistRow> {
        self.assignments
            .iter()
            .filter(|a| !a.is_exam_type)
            .map(|a| {
                let task = a.identity();
                let mut days = [false; 7];
                for (slot, day) in days.iter_mut().zip(WEEKDAYS) {
                    *slot = self.is_done(&task, day);
                }
                ChecklistRow {
                    category: a.category.clone(),
                    done: self.task_count(&task),
                    task,
                    weekly_goal: a.weekly_goal,
                    days,
                }
            })
            .collect()
    }

    pub fn exam_cards(&self) -> Vec<ExamCard> {
        self.assignments
            .iter()
            .filter(|a| a.is_exam_type)
            .map(|a| ExamCard {
                task_name: a.task_name.clone(),
                range_identity: a.qualifier_text.clone(),
                weekly_goal: a.weekly_goal,
                scores: self
                    .exams
                    .iter()
                    .filter(|e| e.range_identity == a.qualifier_text)
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}
