use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday,
};

/// The weekly period boundary: a fixed weekday and local time in a fixed
/// offset. A week runs from one boundary (inclusive) to the next (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    tz: FixedOffset,
    boundary_day: Weekday,
    boundary_time: NaiveTime,
}

impl WeekWindow {
    pub fn new(tz: FixedOffset, boundary_day: Weekday, boundary_time: NaiveTime) -> Self {
        Self {
            tz,
            boundary_day,
            boundary_time,
        }
    }

    pub fn tz(&self) -> FixedOffset {
        self.tz
    }

    pub fn current_week_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.week_of(now)
    }

    /// The most recent boundary at or before `instant`.
    pub fn week_of(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let local = instant.with_timezone(&self.tz);
        let days_back = (local.weekday().num_days_from_monday() + 7
            - self.boundary_day.num_days_from_monday())
            % 7;
        let candidate = self.boundary_on(local.date_naive() - Duration::days(i64::from(days_back)));
        if candidate > instant {
            candidate - week()
        } else {
            candidate
        }
    }

    /// Week a calendar date belongs to, reading the date as its boundary time.
    /// An enrollment on the boundary day itself starts that same week.
    pub fn week_of_date(&self, date: NaiveDate) -> DateTime<Utc> {
        self.week_of(self.boundary_on(date))
    }

    pub fn week_end(&self, week_start: DateTime<Utc>) -> DateTime<Utc> {
        week_start + week()
    }

    pub fn contains(&self, week_start: DateTime<Utc>, instant: DateTime<Utc>) -> bool {
        week_start <= instant && instant < self.week_end(week_start)
    }

    /// Date-based membership used for exam results, which carry no time of day.
    pub fn contains_date(&self, week_start: DateTime<Utc>, date: NaiveDate) -> bool {
        let first = self.local_date(week_start);
        let last = self.local_date(self.week_end(week_start));
        first <= date && date < last
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    fn boundary_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(self.boundary_time);
        (local - Duration::seconds(i64::from(self.tz.local_minus_utc()))).and_utc()
    }
}

impl Default for WeekWindow {
    /// Monday 09:00 at UTC+09:00.
    fn default() -> Self {
        Self {
            tz: FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix()),
            boundary_day: Weekday::Mon,
            boundary_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

pub fn week() -> Duration {
    Duration::days(7)
}
