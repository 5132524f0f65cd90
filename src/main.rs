use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc, Weekday};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod aggregate;
mod config;
mod db;
mod error;
mod models;
mod report;
mod rollover;
mod session;
mod store;
mod toggle;
mod week;

use aggregate::AggregationService;
use config::Config;
use db::PgStore;
use models::TaskIdentity;
use rollover::{RolloverEngine, RolloverOutcome};
use session::Session;
use models::Student;
use store::{bounded, recover, StudentDirectory};
use toggle::{ToggleController, ToggleOutcome};

#[derive(Parser)]
#[command(name = "weekly-ledger")]
#[command(about = "Weekly homework progress ledger for Group Scholar", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "ledger.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample students with the default task template
    Seed,
    /// Import task assignments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Replace each listed student's assignments instead of merging
        #[arg(long)]
        replace: bool,
    },
    /// Record a vocabulary test result
    RecordExam {
        #[arg(long)]
        student: String,
        #[arg(long)]
        range: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        score: i32,
    },
    /// Close every elapsed week that has no ledger entry yet
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "all"])
            .required(true)
            .multiple(false)
    ))]
    Rollover {
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Show weekly and cumulative progress per category
    Progress {
        #[arg(long)]
        student: String,
        #[arg(long)]
        json: bool,
    },
    /// Tick or untick a task for a day of the current week
    Toggle {
        #[arg(long)]
        student: String,
        #[arg(long)]
        task: String,
        #[arg(long, default_value = "")]
        qualifier: String,
        /// Day label: Mon, Tue, Wed, Thu, Fri, Sat or Sun
        #[arg(long)]
        day: Weekday,
    },
    /// Write a markdown progress report
    Report {
        #[arg(long)]
        student: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// This week's completion for every student
    Overview,
}

/// Shared state for one CLI invocation.
struct App {
    config: Config,
    store: PgStore,
}

impl App {
    /// Session start: close elapsed weeks once, then load the open week.
    async fn start_session(&self, student_id: &str) -> anyhow::Result<Session> {
        let window = self.config.week_window()?;
        let timeout = self.config.store_timeout();
        let now = Utc::now();

        let outcome = RolloverEngine::new(&self.store, window, timeout)
            .run(student_id, now)
            .await
            .context("rollover failed")?;
        report_rollover(student_id, &outcome);

        let session = Session::open(&self.store, window, timeout, student_id, now)
            .await
            .context("failed to load session")?;
        if session.degraded {
            println!("Some records could not be loaded; figures may be incomplete.");
        }
        Ok(session)
    }

    async fn rollover(&self, student_id: &str) -> anyhow::Result<RolloverOutcome> {
        let engine = RolloverEngine::new(
            &self.store,
            self.config.week_window()?,
            self.config.store_timeout(),
        );
        Ok(engine.run(student_id, Utc::now()).await?)
    }

    /// The roster, or an empty one while the directory is unreachable.
    async fn students(&self) -> anyhow::Result<Vec<Student>> {
        let listed = bounded(self.config.store_timeout(), self.store.list_students()).await;
        let roster = recover("student roster", listed)?;
        if roster.degraded {
            println!("Student list could not be loaded; nothing to show yet.");
        }
        Ok(roster.value)
    }
}

fn report_rollover(student_id: &str, outcome: &RolloverOutcome) {
    if outcome.wrote_any() {
        match outcome {
            RolloverOutcome::Written { weeks, snapshots }
            | RolloverOutcome::Partial {
                weeks, snapshots, ..
            } => println!(
                "Past weeks synchronised for {student_id} ({weeks} weeks, {snapshots} entries)."
            ),
            RolloverOutcome::UpToDate | RolloverOutcome::Deferred(_) => {}
        }
    }
    match outcome {
        RolloverOutcome::Partial {
            failed_week, error, ..
        } => println!(
            "History sync for {student_id} stopped at week {failed_week}: {error}; will resume next time."
        ),
        RolloverOutcome::Deferred(err) => {
            println!("History sync for {student_id} postponed: {err}");
        }
        RolloverOutcome::UpToDate | RolloverOutcome::Written { .. } => {}
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("groupscholar_weekly_ledger=info,warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.store.max_connections)
        .acquire_timeout(config.store_timeout())
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let app = App {
        config,
        store: PgStore::new(pool),
    };

    match cli.command {
        Commands::InitDb => {
            db::init_db(app.store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(app.store.pool(), &app.config.tasks.exam_markers).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv, replace } => {
            let imported = db::import_csv(
                app.store.pool(),
                &csv,
                replace,
                &app.config.tasks.exam_markers,
            )
            .await?;
            println!("Imported {imported} assignments from {}.", csv.display());
        }
        Commands::RecordExam {
            student,
            range,
            date,
            score,
        } => {
            app.store.record_exam(&student, &range, date, score).await?;
            println!("Recorded {score}% on {range} for {student} ({date}).");
        }
        Commands::Rollover { student, all } => {
            let targets: Vec<String> = if all {
                app.students()
                    .await?
                    .into_iter()
                    .map(|s| s.id)
                    .collect()
            } else {
                student.into_iter().collect()
            };

            for student_id in targets {
                let outcome = app.rollover(&student_id).await?;
                if matches!(outcome, RolloverOutcome::UpToDate) {
                    println!("{student_id}: up to date.");
                }
                report_rollover(&student_id, &outcome);
            }
        }
        Commands::Progress { student, json } => {
            let session = app.start_session(&student).await?;
            let service = AggregationService::new(app.config.display.weekly_cap);
            let summary = service.summarize(&session);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            if summary.categories.is_empty() {
                println!("No tasks assigned.");
                return Ok(());
            }

            println!("Week starting {}:", summary.week_start);
            for stats in &summary.categories {
                println!(
                    "- {}: this week {}/{} ({:.0}%), cumulative {}/{} ({:.0}%)",
                    stats.category,
                    stats.weekly_done,
                    stats.weekly_goal,
                    stats.display_ratio(service.display_cap()) * 100.0,
                    stats.cumulative_done,
                    stats.cumulative_goal,
                    stats.cumulative_ratio() * 100.0
                );
            }
        }
        Commands::Toggle {
            student,
            task,
            qualifier,
            day,
        } => {
            let mut session = app.start_session(&student).await?;
            let task = TaskIdentity::new(task, qualifier);
            let controller = ToggleController::new(&app.store, app.config.store_timeout());

            match controller.toggle(&mut session, &task, day, Utc::now()).await? {
                ToggleOutcome::MarkedDone => println!("{task} [{day}] done."),
                ToggleOutcome::MarkedNotDone => println!("{task} [{day}] undone."),
                ToggleOutcome::NothingToRemove => {
                    println!("{task} [{day}] had nothing recorded; left as not done.")
                }
            }
            let Some(assignment) = session.assignment(&task) else {
                return Ok(());
            };
            println!(
                "{task}: {}/{} this week.",
                session.task_count(&task),
                assignment.weekly_goal
            );
            let summary = AggregationService::new(app.config.display.weekly_cap).summarize(&session);
            if let Some(stats) = summary.get(&assignment.category) {
                println!(
                    "{}: {}/{} this week, {}/{} overall.",
                    stats.category,
                    stats.weekly_done,
                    stats.weekly_goal,
                    stats.cumulative_done,
                    stats.cumulative_goal
                );
            }
        }
        Commands::Report { student, out } => {
            let session = app.start_session(&student).await?;
            let service = AggregationService::new(app.config.display.weekly_cap);
            let summary = service.summarize(&session);
            let report = report::build_report(&summary, &session, service.display_cap());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Overview => {
            let window = app.config.week_window()?;
            let timeout = app.config.store_timeout();
            let now = Utc::now();
            let students = app.students().await?;

            if students.is_empty() {
                println!("No students registered.");
                return Ok(());
            }

            println!(
                "This week's completion (week starting {}):",
                window
                    .current_week_start(now)
                    .with_timezone(&window.tz())
                    .format("%Y-%m-%d %H:%M")
            );
            for student in &students {
                let session = Session::open(&app.store, window, timeout, &student.id, now).await?;
                let row = report::OverviewRow::from_session(student, &session);
                println!("{}", report::overview_line(&row));
            }
        }
    }

    Ok(())
}
