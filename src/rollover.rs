use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{CompletionEvent, ExamEvent, TaskAssignment, WeeklySnapshot};
use crate::store::{bounded, ProgressStore};
use crate::week::{week, WeekWindow};

#[derive(Debug)]
pub enum RolloverOutcome {
    /// The ledger already ends at the week before the current one.
    UpToDate,
    Written { weeks: usize, snapshots: usize },
    /// Earlier weeks were closed, then a write failed. Re-running resumes at
    /// `failed_week` because the ledger's own maximum is the checkpoint.
    Partial {
        weeks: usize,
        snapshots: usize,
        failed_week: DateTime<Utc>,
        error: StoreError,
    },
    /// A read failed before anything was written.
    Deferred(StoreError),
}

impl RolloverOutcome {
    /// Whether the caller should show the one-time "history synchronised" notice.
    pub fn wrote_any(&self) -> bool {
        match self {
            RolloverOutcome::Written { snapshots, .. }
            | RolloverOutcome::Partial { snapshots, .. } => *snapshots > 0,
            RolloverOutcome::UpToDate | RolloverOutcome::Deferred(_) => false,
        }
    }
}

/// Closes every elapsed week that has no ledger entry yet.
pub struct RolloverEngine<'a, S: ?Sized> {
    store: &'a S,
    window: WeekWindow,
    timeout: Duration,
}

impl<'a, S: ProgressStore + ?Sized> RolloverEngine<'a, S> {
    pub fn new(store: &'a S, window: WeekWindow, timeout: Duration) -> Self {
        Self {
            store,
            window,
            timeout,
        }
    }

    /// Only a misconfigured store surfaces as `Err`.
    pub async fn run(
        &self,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RolloverOutcome, StoreError> {
        let this_week = self.window.current_week_start(now);

        let ledger = match self.read(self.store.list_snapshots(student_id)).await? {
            Ok(ledger) => ledger,
            Err(deferred) => return Ok(deferred),
        };

        let start_week = match ledger.iter().map(|s| s.week_start).max() {
            Some(last) => self.window.week_of(last) + week(),
            None => match self.read(self.store.get_enrollment_date(student_id)).await? {
                Ok(Some(enrolled_on)) => self.window.week_of_date(enrolled_on),
                Ok(None) => {
                    debug!(student_id, "no enrollment date; nothing to back-fill");
                    this_week
                }
                Err(deferred) => return Ok(deferred),
            },
        };

        if start_week >= this_week {
            return Ok(RolloverOutcome::UpToDate);
        }

        let assignments = match self.read(self.store.list_assignments(student_id)).await? {
            Ok(assignments) => assignments,
            Err(deferred) => return Ok(deferred),
        };
        let completions = match self.read(self.store.list_completion_events(student_id)).await? {
            Ok(events) => events,
            Err(deferred) => return Ok(deferred),
        };
        let exams = match self.read(self.store.list_exam_events(student_id)).await? {
            Ok(events) => events,
            Err(deferred) => return Ok(deferred),
        };

        let mut weeks = 0;
        let mut snapshots = 0;
        let mut week_start = start_week;
        while week_start < this_week {
            let batch = close_week(
                student_id,
                &assignments,
                &completions,
                &exams,
                &self.window,
                week_start,
            );

            if !batch.is_empty() {
                match bounded(self.timeout, self.store.append_snapshots(student_id, &batch)).await
                {
                    Ok(inserted) => {
                        debug!(student_id, %week_start, inserted, "week closed");
                        weeks += 1;
                        snapshots += batch.len();
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!(student_id, %week_start, error = %err, "rollover stopped");
                        return Ok(RolloverOutcome::Partial {
                            weeks,
                            snapshots,
                            failed_week: week_start,
                            error: err,
                        });
                    }
                }
            }

            week_start = week_start + week();
        }

        if snapshots == 0 {
            return Ok(RolloverOutcome::UpToDate);
        }
        info!(student_id, weeks, snapshots, "back-filled elapsed weeks");
        Ok(RolloverOutcome::Written { weeks, snapshots })
    }

    /// Inner `Err` carries the deferred outcome for transient failures.
    async fn read<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, RolloverOutcome>, StoreError> {
        match bounded(self.timeout, call).await {
            Ok(value) => Ok(Ok(value)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(error = %err, "rollover deferred");
                Ok(Err(RolloverOutcome::Deferred(err)))
            }
        }
    }
}

/// Snapshots for one closed week, one per category in assignment order.
/// Goals come from the assignments as configured now.
pub fn close_week(
    student_id: &str,
    assignments: &[TaskAssignment],
    completions: &[CompletionEvent],
    exams: &[ExamEvent],
    window: &WeekWindow,
    week_start: DateTime<Utc>,
) -> Vec<WeeklySnapshot> {
    let until = window.week_end(week_start);
    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, (u32, u32)> = HashMap::new();

    for assignment in assignments {
        let done = count_done(assignment, completions, exams, window, week_start, until);
        let entry = totals.entry(assignment.category.as_str()).or_insert_with(|| {
            order.push(assignment.category.as_str());
            (0, 0)
        });
        entry.0 += assignment.weekly_goal;
        entry.1 += done;
    }

    order
        .into_iter()
        .map(|category| {
            let (goal, done) = totals[category];
            WeeklySnapshot::new(student_id, week_start, category, goal, done)
        })
        .collect()
}

/// Raw completions for one assignment between `week_start` and `until`.
///
/// Checklist tasks count completion events by timestamp. Exam tasks count
/// exam results for the matching range by calendar date within the week.
pub fn count_done(
    assignment: &TaskAssignment,
    completions: &[CompletionEvent],
    exams: &[ExamEvent],
    window: &WeekWindow,
    week_start: DateTime<Utc>,
    until: DateTime<Utc>,
) -> u32 {
    if assignment.is_exam_type {
        exams
            .iter()
            .filter(|e| e.student_id == assignment.student_id)
            .filter(|e| e.range_identity == assignment.qualifier_text)
            .filter(|e| window.contains_date(week_start, e.date))
            .count() as u32
    } else {
        let identity = assignment.identity();
        let until = until.min(window.week_end(week_start));
        completions
            .iter()
            .filter(|e| e.student_id == assignment.student_id && e.task == identity)
            .filter(|e| week_start <= e.completed_at && e.completed_at < until)
            .count() as u32
    }
}
