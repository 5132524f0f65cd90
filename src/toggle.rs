use std::time::Duration;

use chrono::{DateTime, Utc, Weekday};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{CompletionEvent, TaskIdentity};
use crate::session::Session;
use crate::store::{bounded, EventStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    MarkedDone,
    MarkedNotDone,
    /// The cache said DONE but the store held no matching event. The cache
    /// now agrees with the store.
    NothingToRemove,
}

/// Applies checklist ticks for one (task, day) pair.
///
/// The session counters change before the store call so a re-render sees
/// the new state at once; a failed store call restores them.
pub struct ToggleController<'a, S: ?Sized> {
    store: &'a S,
    timeout: Duration,
}

impl<'a, S: EventStore + ?Sized> ToggleController<'a, S> {
    pub fn new(store: &'a S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn toggle(
        &self,
        session: &mut Session,
        task: &TaskIdentity,
        day: Weekday,
        now: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        if !session.is_open_at(now) {
            return Err(Error::WeekClosed(session.week_start.to_rfc3339()));
        }
        // A degraded cache may show NOT_DONE for a day the store already has.
        if session.degraded {
            return Err(Error::SessionDegraded(session.student_id.clone()));
        }
        let assignment = session
            .assignment(task)
            .ok_or_else(|| Error::UnknownTask(task.to_string()))?;
        if assignment.is_exam_type {
            return Err(Error::ExamTaskNotToggleable(task.to_string()));
        }

        if session.is_done(task, day) {
            self.mark_not_done(session, task, day).await
        } else {
            self.mark_done(session, task, day, now).await
        }
    }

    async fn mark_done(
        &self,
        session: &mut Session,
        task: &TaskIdentity,
        day: Weekday,
        now: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        session.record(task.clone(), day);
        let event = CompletionEvent {
            student_id: session.student_id.clone(),
            task: task.clone(),
            day,
            completed_at: now,
        };

        match bounded(self.timeout, self.store.append_completion_event(&event)).await {
            Ok(()) => {
                info!(student_id = %session.student_id, %task, %day, "marked done");
                Ok(ToggleOutcome::MarkedDone)
            }
            Err(err) => {
                session.unrecord(task, day);
                warn!(student_id = %session.student_id, %task, %day, error = %err, "tick not saved");
                Err(Error::NotPersisted {
                    task: task.to_string(),
                    source: err,
                })
            }
        }
    }

    async fn mark_not_done(
        &self,
        session: &mut Session,
        task: &TaskIdentity,
        day: Weekday,
    ) -> Result<ToggleOutcome> {
        session.unrecord(task, day);
        let removal = self
            .store
            .remove_latest_completion_event(&session.student_id, task, day);

        match bounded(self.timeout, removal).await {
            Ok(true) => {
                info!(student_id = %session.student_id, %task, %day, "marked not done");
                Ok(ToggleOutcome::MarkedNotDone)
            }
            Ok(false) => {
                warn!(student_id = %session.student_id, %task, %day, "no event to remove");
                Ok(ToggleOutcome::NothingToRemove)
            }
            Err(err) => {
                session.record(task.clone(), day);
                warn!(student_id = %session.student_id, %task, %day, error = %err, "untick not saved");
                Err(Error::NotPersisted {
                    task: task.to_string(),
                    source: err,
                })
            }
        }
    }
}
