use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{
    is_exam_task, CompletionEvent, ExamEvent, Student, TaskAssignment, TaskIdentity,
    WeeklySnapshot,
};
use crate::store::{AssignmentStore, EventStore, LedgerStore, StudentDirectory};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed implementation of every store the core talks to.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn record_exam(
        &self,
        student_id: &str,
        range_identity: &str,
        taken_on: NaiveDate,
        score: i32,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO weekly_ledger.exam_events (student_id, range_identity, taken_on, score)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(student_id)
        .bind(range_identity)
        .bind(taken_on)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub async fn seed(pool: &PgPool, exam_markers: &[String]) -> anyhow::Result<()> {
    let students = vec![
        (
            "avery",
            "Avery Lee",
            NaiveDate::from_ymd_opt(2026, 1, 5).context("invalid date")?,
        ),
        (
            "jules",
            "Jules Moreno",
            NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?,
        ),
        (
            "kiara",
            "Kiara Patel",
            NaiveDate::from_ymd_opt(2026, 3, 11).context("invalid date")?,
        ),
    ];

    let template = [
        ("Listening", "Dictation", "about 20 min", 2),
        ("Grammar", "Grammar workbook", "review", 2),
        ("Vocabulary", "Memorisation", "001~100", 5),
        ("Vocabulary", "Vocabulary Test", "001~100", 2),
        ("Mock Exam", "Full mock (65 min)", "set 1", 1),
    ];

    let mut tx = pool.begin().await?;
    for (id, name, enrolled_on) in students {
        upsert_student(&mut tx, id, name, Some(enrolled_on)).await?;
        for (category, task_name, qualifier, goal) in template {
            let assignment = TaskAssignment::new(
                id,
                category,
                task_name,
                qualifier,
                goal,
                is_exam_task(category, task_name, exam_markers),
            );
            upsert_assignment(&mut tx, &assignment).await?;
        }
    }
    tx.commit().await?;

    Ok(())
}

/// Loads assignments from CSV. With `replace`, each listed student's current
/// assignments are removed first so the file becomes their full set.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    replace: bool,
    exam_markers: &[String],
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        full_name: String,
        enrolled_on: Option<NaiveDate>,
        category: String,
        task_name: String,
        #[serde(default)]
        qualifier_text: String,
        weekly_goal: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        rows.push(result?);
    }

    let mut tx = pool.begin().await?;
    if replace {
        let mut cleared: Vec<&str> = Vec::new();
        for row in &rows {
            if !cleared.contains(&row.student_id.as_str()) {
                sqlx::query("DELETE FROM weekly_ledger.task_assignments WHERE student_id = $1")
                    .bind(&row.student_id)
                    .execute(&mut *tx)
                    .await?;
                cleared.push(&row.student_id);
            }
        }
    }

    let mut imported = 0usize;
    for row in &rows {
        upsert_student(&mut tx, &row.student_id, &row.full_name, row.enrolled_on).await?;
        let assignment = TaskAssignment::new(
            row.student_id.as_str(),
            row.category.as_str(),
            row.task_name.as_str(),
            row.qualifier_text.as_str(),
            parse_goal(row.weekly_goal.as_deref()),
            is_exam_task(&row.category, &row.task_name, exam_markers),
        );
        upsert_assignment(&mut tx, &assignment).await?;
        imported += 1;
    }
    tx.commit().await?;

    Ok(imported)
}

/// Blank or non-numeric goal cells become 1; `TaskAssignment::new` clamps the rest.
fn parse_goal(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return 1;
    };
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(raw, "unreadable weekly goal; using 1");
        1
    })
}

async fn upsert_student(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    full_name: &str,
    enrolled_on: Option<NaiveDate>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO weekly_ledger.students (id, full_name, enrolled_on)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            enrolled_on = COALESCE(EXCLUDED.enrolled_on, weekly_ledger.students.enrolled_on)
        "#,
    )
    .bind(id)
    .bind(full_name)
    .bind(enrolled_on)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_assignment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    assignment: &TaskAssignment,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO weekly_ledger.task_assignments
        (student_id, category, task_name, qualifier_text, weekly_goal, is_exam_type)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (student_id, category, task_name) DO UPDATE
        SET qualifier_text = EXCLUDED.qualifier_text,
            weekly_goal = EXCLUDED.weekly_goal,
            is_exam_type = EXCLUDED.is_exam_type
        "#,
    )
    .bind(&assignment.student_id)
    .bind(&assignment.category)
    .bind(&assignment.task_name)
    .bind(&assignment.qualifier_text)
    .bind(i32::try_from(assignment.weekly_goal).unwrap_or(i32::MAX))
    .bind(assignment.is_exam_type)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn day_label(day: Weekday) -> String {
    day.to_string()
}

fn parse_day(label: &str) -> Result<Weekday, StoreError> {
    label
        .trim()
        .parse()
        .map_err(|_| StoreError::Decode(format!("unknown day label {label:?}")))
}

fn completion_from_row(row: &PgRow) -> Result<CompletionEvent, StoreError> {
    let label: String = row.try_get("day_of_week")?;
    Ok(CompletionEvent {
        student_id: row.try_get("student_id")?,
        task: TaskIdentity::new(
            row.try_get::<String, _>("task_name")?,
            row.try_get::<String, _>("qualifier_text")?,
        ),
        day: parse_day(&label)?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn count_from_row(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("negative {column}: {value}")))
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn list_assignments(&self, student_id: &str) -> Result<Vec<TaskAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, category, task_name, qualifier_text, weekly_goal, is_exam_type
            FROM weekly_ledger.task_assignments
            WHERE student_id = $1
            ORDER BY id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = Vec::with_capacity(rows.len());
        for row in rows {
            let goal: i32 = row.try_get("weekly_goal")?;
            assignments.push(TaskAssignment::new(
                row.try_get::<String, _>("student_id")?,
                row.try_get::<String, _>("category")?,
                row.try_get::<String, _>("task_name")?,
                row.try_get::<String, _>("qualifier_text")?,
                i64::from(goal),
                row.try_get("is_exam_type")?,
            ));
        }
        Ok(assignments)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn list_completion_events(
        &self,
        student_id: &str,
    ) -> Result<Vec<CompletionEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, task_name, qualifier_text, day_of_week, completed_at
            FROM weekly_ledger.completion_events
            WHERE student_id = $1
            ORDER BY id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            match completion_from_row(row) {
                Ok(event) => events.push(event),
                Err(err) => tracing::warn!(student_id, error = %err, "skipping completion row"),
            }
        }
        Ok(events)
    }

    async fn append_completion_event(&self, event: &CompletionEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO weekly_ledger.completion_events
            (student_id, task_name, qualifier_text, day_of_week, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&event.student_id)
        .bind(&event.task.task_name)
        .bind(&event.task.qualifier)
        .bind(day_label(event.day))
        .bind(event.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_latest_completion_event(
        &self,
        student_id: &str,
        task: &TaskIdentity,
        day: Weekday,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM weekly_ledger.completion_events
            WHERE id = (
                SELECT id FROM weekly_ledger.completion_events
                WHERE student_id = $1 AND task_name = $2 AND qualifier_text = $3
                  AND day_of_week = $4
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(student_id)
        .bind(&task.task_name)
        .bind(&task.qualifier)
        .bind(day_label(day))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_exam_events(&self, student_id: &str) -> Result<Vec<ExamEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, range_identity, taken_on, score
            FROM weekly_ledger.exam_events
            WHERE student_id = $1
            ORDER BY taken_on, id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(ExamEvent {
                student_id: row.try_get("student_id")?,
                range_identity: row.try_get("range_identity")?,
                date: row.try_get("taken_on")?,
                score: row.try_get("score")?,
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn list_snapshots(&self, student_id: &str) -> Result<Vec<WeeklySnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, week_start, category, goal_total, done_total
            FROM weekly_ledger.weekly_snapshots
            WHERE student_id = $1
            ORDER BY week_start, category
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let week_start: DateTime<Utc> = row.try_get("week_start")?;
            snapshots.push(WeeklySnapshot::new(
                row.try_get::<String, _>("student_id")?,
                week_start,
                row.try_get::<String, _>("category")?,
                count_from_row(&row, "goal_total")?,
                count_from_row(&row, "done_total")?,
            ));
        }
        Ok(snapshots)
    }

    async fn append_snapshots(
        &self,
        student_id: &str,
        snapshots: &[WeeklySnapshot],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for snapshot in snapshots {
            let result = sqlx::query(
                r#"
                INSERT INTO weekly_ledger.weekly_snapshots
                (student_id, week_start, category, goal_total, done_total)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (student_id, week_start, category) DO NOTHING
                "#,
            )
            .bind(student_id)
            .bind(snapshot.week_start)
            .bind(&snapshot.category)
            .bind(i32::try_from(snapshot.goal_total).unwrap_or(i32::MAX))
            .bind(i32::try_from(snapshot.done_total).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl StudentDirectory for PgStore {
    async fn get_enrollment_date(
        &self,
        student_id: &str,
    ) -> Result<Option<NaiveDate>, StoreError> {
        let row = sqlx::query("SELECT enrolled_on FROM weekly_ledger.students WHERE id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("enrolled_on")?),
            None => Ok(None),
        }
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, full_name, enrolled_on
            FROM weekly_ledger.students
            WHERE lower(trim(role)) = 'student'
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut students = Vec::with_capacity(rows.len());
        for row in rows {
            students.push(Student {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                enrolled_on: row.try_get("enrolled_on")?,
            });
        }
        Ok(students)
    }
}
