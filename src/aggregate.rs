use std::collections::HashMap;

use serde::Serialize;

use crate::models::CategoryStats;
use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub student_id: String,
    pub week_start: String,
    pub categories: Vec<CategoryStats>,
    /// True when some store reads fell back to empty data.
    pub degraded: bool,
}

impl ProgressSummary {
    pub fn get(&self, category: &str) -> Option<&CategoryStats> {
        self.categories.iter().find(|c| c.category == category)
    }
}

/// Combines closed ledger weeks with the live open week.
#[derive(Debug, Clone, Copy)]
pub struct AggregationService {
    display_cap: f64,
}

impl AggregationService {
    pub fn new(display_cap: f64) -> Self {
        Self { display_cap }
    }

    pub fn display_cap(&self) -> f64 {
        self.display_cap
    }

    /// Categories appear in assignment order; categories that only exist in
    /// the ledger follow in the order they were first closed.
    pub fn summarize(&self, session: &Session) -> ProgressSummary {
        let mut categories: Vec<CategoryStats> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for assignment in &session.assignments {
            let slot = slot_for(&mut categories, &mut index, &assignment.category);
            let stats = &mut categories[slot];
            stats.weekly_goal += assignment.weekly_goal;
            stats.weekly_done += session.done_for(assignment);
        }

        for stats in categories.iter_mut() {
            stats.cumulative_goal = stats.weekly_goal;
            stats.cumulative_done = stats.weekly_done.min(stats.weekly_goal);
        }

        for snapshot in &session.history {
            let slot = slot_for(&mut categories, &mut index, &snapshot.category);
            let stats = &mut categories[slot];
            stats.cumulative_goal += snapshot.goal_total;
            stats.cumulative_done += snapshot.done_total.min(snapshot.goal_total);
        }

        ProgressSummary {
            student_id: session.student_id.clone(),
            week_start: session
                .week_start
                .with_timezone(&session.window.tz())
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            categories,
            degraded: session.degraded,
        }
    }
}

fn slot_for(
    categories: &mut Vec<CategoryStats>,
    index: &mut HashMap<String, usize>,
    category: &str,
) -> usize {
    if let Some(slot) = index.get(category) {
        return *slot;
    }
    categories.push(CategoryStats::new(category));
    index.insert(category.to_string(), categories.len() - 1);
    categories.len() - 1
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc, Weekday};

    use super::*;
    use crate::models::{CompletionEvent, TaskAssignment, WeeklySnapshot};
    use crate::rollover::RolloverEngine;
    use crate::store::memory::MemoryStore;
    use crate::week::WeekWindow;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(9 * 3600)
            .expect("offset")
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("local time")
            .with_timezone(&Utc)
    }

    fn assignment(category: &str, task: &str, goal: i64) -> TaskAssignment {
        TaskAssignment::new("s1", category, task, "class", goal, false)
    }

    #[tokio::test]
    async fn idle_weeks_then_three_completions() {
        let store = MemoryStore::new();
        store.add_student("s1", NaiveDate::from_ymd_opt(2024, 1, 1));
        let vocab = TaskAssignment::new("s1", "Vocabulary", "Memorise", "001~100", 5, false);
        store.add_assignment(vocab.clone());
        for (day, d) in [(Weekday::Mon, 22), (Weekday::Tue, 23), (Weekday::Wed, 24)] {
            store.add_completion(CompletionEvent {
                student_id: "s1".into(),
                task: vocab.identity(),
                day,
                completed_at: at(2024, 1, d, 19),
            });
        }

        let window = WeekWindow::default();
        let timeout = Duration::from_secs(1);
        let now = at(2024, 1, 25, 12);
        let outcome = RolloverEngine::new(&store, window, timeout)
            .run("s1", now)
            .await
            .expect("rollover");
        assert!(outcome.wrote_any());
        assert_eq!(store.snapshots().len(), 3);
        assert!(store.snapshots().iter().all(|s| s.goal_total == 5 && s.done_total == 0));

        let session = Session::open(&store, window, timeout, "s1", now)
            .await
            .expect("session");
        let summary = AggregationService::new(1.1).summarize(&session);
        let stats = summary.get("Vocabulary").expect("vocabulary stats");

        assert_eq!((stats.weekly_done, stats.weekly_goal), (3, 5));
        assert!((stats.weekly_ratio() - 0.6).abs() < 1e-9);
        assert_eq!((stats.cumulative_done, stats.cumulative_goal), (3, 20));
        assert!((stats.cumulative_ratio() - 0.15).abs() < 1e-9);
        assert_eq!(summary.week_start, "2024-01-22 09:00");
    }

    #[test]
    fn multi_task_category_is_capped_on_the_total_only() {
        let window = WeekWindow::default();
        let now = at(2024, 3, 7, 12);
        let reading = assignment("Mock Exam", "Full mock", 1);
        let variants = assignment("Mock Exam", "Variants", 3);
        let mut session = Session::new("s1", window, now, vec![reading.clone(), variants.clone()], vec![]);
        // Full mock done three times, variants once: 4 raw against a goal of 4.
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed] {
            session.record(reading.identity(), day);
        }
        session.record(variants.identity(), Weekday::Thu);

        let summary = AggregationService::new(1.1).summarize(&session);
        let stats = summary.get("Mock Exam").expect("stats");
        assert_eq!((stats.weekly_done, stats.weekly_goal), (4, 4));
        assert_eq!((stats.cumulative_done, stats.cumulative_goal), (4, 4));
    }

    #[test]
    fn over_completion_shows_in_weekly_ratio_but_not_cumulative() {
        let window = WeekWindow::default();
        let now = at(2024, 3, 7, 12);
        let listening = assignment("Listening", "Dictation", 2);
        let mut session = Session::new("s1", window, now, vec![listening.clone()], vec![]);
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed] {
            session.record(listening.identity(), day);
        }

        let service = AggregationService::new(1.1);
        let summary = service.summarize(&session);
        let stats = summary.get("Listening").expect("stats");
        assert!((stats.weekly_ratio() - 1.5).abs() < 1e-9);
        assert!((stats.display_ratio(service.display_cap()) - 1.1).abs() < 1e-9);
        assert_eq!(stats.cumulative_done, 2);
    }

    #[test]
    fn order_follows_assignments_then_retired_categories() {
        let window = WeekWindow::default();
        let now = at(2024, 3, 7, 12);
        let history = vec![
            WeeklySnapshot::new("s1", at(2024, 2, 26, 9), "Reading", 3, 1),
            WeeklySnapshot::new("s1", at(2024, 2, 26, 9), "Listening", 2, 2),
        ];
        let session = Session::new(
            "s1",
            window,
            now,
            vec![assignment("Grammar", "Workbook", 2), assignment("Listening", "Dictation", 2)],
            history,
        );

        let summary = AggregationService::new(1.1).summarize(&session);
        let order: Vec<_> = summary.categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(order, vec!["Grammar", "Listening", "Reading"]);

        let reading = summary.get("Reading").expect("reading");
        assert_eq!((reading.weekly_goal, reading.cumulative_goal, reading.cumulative_done), (0, 3, 1));
        assert_eq!(reading.weekly_ratio(), 0.0);
        let listening = summary.get("Listening").expect("listening");
        assert_eq!((listening.cumulative_done, listening.cumulative_goal), (2, 4));
    }
}
