//! Collaborator contracts the core reads from and writes to.
//!
//! The concrete backend lives in `db`; tests use `memory::MemoryStore`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};

use crate::error::StoreError;
use crate::models::{
    CompletionEvent, ExamEvent, Student, TaskAssignment, TaskIdentity, WeeklySnapshot,
};

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Assignments in the order they were created.
    async fn list_assignments(&self, student_id: &str) -> Result<Vec<TaskAssignment>, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn list_completion_events(
        &self,
        student_id: &str,
    ) -> Result<Vec<CompletionEvent>, StoreError>;

    async fn append_completion_event(&self, event: &CompletionEvent) -> Result<(), StoreError>;

    /// Removes the most recently inserted event for this task and day label.
    /// Returns false when nothing matched.
    async fn remove_latest_completion_event(
        &self,
        student_id: &str,
        task: &TaskIdentity,
        day: Weekday,
    ) -> Result<bool, StoreError>;

    async fn list_exam_events(&self, student_id: &str) -> Result<Vec<ExamEvent>, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn list_snapshots(&self, student_id: &str) -> Result<Vec<WeeklySnapshot>, StoreError>;

    /// Writes the batch atomically. Rows whose (student, week, category) key
    /// already exists are skipped; returns how many were new.
    async fn append_snapshots(
        &self,
        student_id: &str,
        snapshots: &[WeeklySnapshot],
    ) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn get_enrollment_date(&self, student_id: &str)
        -> Result<Option<NaiveDate>, StoreError>;

    async fn list_students(&self) -> Result<Vec<Student>, StoreError>;
}

/// Everything a session needs from the backing store.
pub trait ProgressStore: AssignmentStore + EventStore + LedgerStore + StudentDirectory {}

impl<T> ProgressStore for T where T: AssignmentStore + EventStore + LedgerStore + StudentDirectory {}

/// Runs a store call with an upper bound on how long it may block.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Result of a read that may have fallen back to an empty value.
#[derive(Debug)]
pub struct Recovered<T> {
    pub value: T,
    pub degraded: bool,
}

/// Turns a transient store failure into an empty value. Fatal errors pass through.
pub fn recover<T: Default>(
    what: &'static str,
    result: Result<T, StoreError>,
) -> Result<Recovered<T>, StoreError> {
    match result {
        Ok(value) => Ok(Recovered {
            value,
            degraded: false,
        }),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "{what} unavailable; treating as empty");
            Ok(Recovered {
                value: T::default(),
                degraded: true,
            })
        }
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Tables {
        students: Vec<Student>,
        assignments: Vec<TaskAssignment>,
        completions: Vec<CompletionEvent>,
        exams: Vec<ExamEvent>,
        snapshots: Vec<WeeklySnapshot>,
    }

    /// In-process store with switches for simulating outages.
    #[derive(Default)]
    pub struct MemoryStore {
        tables: Mutex<Tables>,
        pub fail_reads: AtomicBool,
        pub fail_event_writes: AtomicBool,
        pub misconfigured: AtomicBool,
        /// Snapshot batches still allowed before appends start failing.
        snapshot_batches_left: Mutex<Option<usize>>,
        pub snapshot_batches: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_student(&self, id: &str, enrolled_on: Option<NaiveDate>) {
            self.tables().students.push(Student {
                id: id.to_string(),
                full_name: format!("Student {id}"),
                enrolled_on,
            });
        }

        pub fn add_assignment(&self, assignment: TaskAssignment) {
            self.tables().assignments.push(assignment);
        }

        pub fn add_completion(&self, event: CompletionEvent) {
            self.tables().completions.push(event);
        }

        pub fn add_exam(&self, event: ExamEvent) {
            self.tables().exams.push(event);
        }

        pub fn snapshots(&self) -> Vec<WeeklySnapshot> {
            self.tables().snapshots.clone()
        }

        pub fn completions(&self) -> Vec<CompletionEvent> {
            self.tables().completions.clone()
        }

        pub fn fail_snapshot_appends_after(&self, batches: usize) {
            *self.snapshot_batches_left.lock().expect("lock") = Some(batches);
        }

        pub fn heal(&self) {
            *self.snapshot_batches_left.lock().expect("lock") = None;
            self.fail_reads.store(false, Ordering::SeqCst);
            self.fail_event_writes.store(false, Ordering::SeqCst);
            self.misconfigured.store(false, Ordering::SeqCst);
        }

        fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
            self.tables.lock().expect("memory store lock")
        }

        fn check_read(&self) -> Result<(), StoreError> {
            if self.misconfigured.load(Ordering::SeqCst) {
                return Err(StoreError::Misconfigured("no such spreadsheet".into()));
            }
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AssignmentStore for MemoryStore {
        async fn list_assignments(
            &self,
            student_id: &str,
        ) -> Result<Vec<TaskAssignment>, StoreError> {
            self.check_read()?;
            Ok(self
                .tables()
                .assignments
                .iter()
                .filter(|a| a.student_id == student_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl EventStore for MemoryStore {
        async fn list_completion_events(
            &self,
            student_id: &str,
        ) -> Result<Vec<CompletionEvent>, StoreError> {
            self.check_read()?;
            Ok(self
                .tables()
                .completions
                .iter()
                .filter(|e| e.student_id == student_id)
                .cloned()
                .collect())
        }

        async fn append_completion_event(&self, event: &CompletionEvent) -> Result<(), StoreError> {
            if self.fail_event_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("write rejected".into()));
            }
            self.tables().completions.push(event.clone());
            Ok(())
        }

        async fn remove_latest_completion_event(
            &self,
            student_id: &str,
            task: &TaskIdentity,
            day: Weekday,
        ) -> Result<bool, StoreError> {
            if self.fail_event_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("write rejected".into()));
            }
            let mut tables = self.tables();
            let found = tables
                .completions
                .iter()
                .rposition(|e| e.student_id == student_id && &e.task == task && e.day == day);
            match found {
                Some(index) => {
                    tables.completions.remove(index);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn list_exam_events(&self, student_id: &str) -> Result<Vec<ExamEvent>, StoreError> {
            self.check_read()?;
            Ok(self
                .tables()
                .exams
                .iter()
                .filter(|e| e.student_id == student_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl LedgerStore for MemoryStore {
        async fn list_snapshots(
            &self,
            student_id: &str,
        ) -> Result<Vec<WeeklySnapshot>, StoreError> {
            self.check_read()?;
            Ok(self
                .tables()
                .snapshots
                .iter()
                .filter(|s| s.student_id == student_id)
                .cloned()
                .collect())
        }

        async fn append_snapshots(
            &self,
            _student_id: &str,
            snapshots: &[WeeklySnapshot],
        ) -> Result<usize, StoreError> {
            {
                let mut left = self.snapshot_batches_left.lock().expect("lock");
                match left.as_mut() {
                    Some(0) => return Err(StoreError::Unavailable("quota exceeded".into())),
                    Some(n) => *n -= 1,
                    None => {}
                }
            }
            self.snapshot_batches.fetch_add(1, Ordering::SeqCst);

            let mut tables = self.tables();
            let mut inserted = 0;
            for snapshot in snapshots {
                let exists = tables.snapshots.iter().any(|s| {
                    s.student_id == snapshot.student_id
                        && s.week_start == snapshot.week_start
                        && s.category == snapshot.category
                });
                if !exists {
                    tables.snapshots.push(snapshot.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
    }

    #[async_trait]
    impl StudentDirectory for MemoryStore {
        async fn get_enrollment_date(
            &self,
            student_id: &str,
        ) -> Result<Option<NaiveDate>, StoreError> {
            self.check_read()?;
            Ok(self
                .tables()
                .students
                .iter()
                .find(|s| s.id == student_id)
                .and_then(|s| s.enrolled_on))
        }

        async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
            self.check_read()?;
            Ok(self.tables().students.clone())
        }
    }
}
