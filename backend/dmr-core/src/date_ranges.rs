// src/date_ranges.rs

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

// --- Clock ---

/// Source of "now" so current-day reports can be reproduced in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    current: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    /// Accepts "YYYY-MM-DD HH:MM:SS".
    pub fn parse(datetime_str: &str) -> Result<Self, chrono::ParseError> {
        let dt = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")?;
        Ok(FixedClock::at(dt))
    }

    pub fn at(dt: NaiveDateTime) -> Self {
        FixedClock {
            current: Arc::new(Mutex::new(dt)),
        }
    }

    pub fn set(&self, dt: NaiveDateTime) {
        if let Ok(mut current) = self.current.lock() {
            *current = dt;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// --- Range identifiers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RangeKind {
    Day,
    WeekEnding,
    WeekTotal,
    MonthToDate,
    WinterEnding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Period {
    Actual,
    PriorYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RangeId {
    pub kind: RangeKind,
    pub period: Period,
}

impl RangeId {
    pub const DAY_ACTUAL: RangeId = RangeId::new(RangeKind::Day, Period::Actual);
    pub const DAY_PRIOR: RangeId = RangeId::new(RangeKind::Day, Period::PriorYear);
    pub const WEEK_ENDING_ACTUAL: RangeId = RangeId::new(RangeKind::WeekEnding, Period::Actual);
    pub const WEEK_ENDING_PRIOR: RangeId = RangeId::new(RangeKind::WeekEnding, Period::PriorYear);
    pub const WEEK_TOTAL_ACTUAL: RangeId = RangeId::new(RangeKind::WeekTotal, Period::Actual);
    pub const WEEK_TOTAL_PRIOR: RangeId = RangeId::new(RangeKind::WeekTotal, Period::PriorYear);
    pub const MONTH_ACTUAL: RangeId = RangeId::new(RangeKind::MonthToDate, Period::Actual);
    pub const MONTH_PRIOR: RangeId = RangeId::new(RangeKind::MonthToDate, Period::PriorYear);
    pub const WINTER_ACTUAL: RangeId = RangeId::new(RangeKind::WinterEnding, Period::Actual);
    pub const WINTER_PRIOR: RangeId = RangeId::new(RangeKind::WinterEnding, Period::PriorYear);

    /// Report column order.
    pub const REPORT_ORDER: [RangeId; 9] = [
        RangeId::DAY_ACTUAL,
        RangeId::DAY_PRIOR,
        RangeId::WEEK_ENDING_ACTUAL,
        RangeId::WEEK_ENDING_PRIOR,
        RangeId::WEEK_TOTAL_PRIOR,
        RangeId::MONTH_ACTUAL,
        RangeId::MONTH_PRIOR,
        RangeId::WINTER_ACTUAL,
        RangeId::WINTER_PRIOR,
    ];

    /// The four live ranges that carry budget columns and insights.
    pub const ACTUAL_RANGES: [RangeId; 4] = [
        RangeId::DAY_ACTUAL,
        RangeId::WEEK_ENDING_ACTUAL,
        RangeId::MONTH_ACTUAL,
        RangeId::WINTER_ACTUAL,
    ];

    pub const fn new(kind: RangeKind, period: Period) -> Self {
        RangeId { kind, period }
    }

    pub fn is_actual(&self) -> bool {
        self.period == Period::Actual
    }

    /// Prior-year twin of an Actual range (and vice versa).
    pub fn counterpart(&self) -> RangeId {
        let period = match self.period {
            Period::Actual => Period::PriorYear,
            Period::PriorYear => Period::Actual,
        };
        RangeId::new(self.kind, period)
    }

    pub fn label(&self) -> &'static str {
        match (self.kind, self.period) {
            (RangeKind::Day, Period::Actual) => "For The Day (Actual)",
            (RangeKind::Day, Period::PriorYear) => "For The Day (Prior Year)",
            (RangeKind::WeekEnding, Period::Actual) => "For The Week Ending (Actual)",
            (RangeKind::WeekEnding, Period::PriorYear) => "For The Week Ending (Prior Year)",
            (RangeKind::WeekTotal, Period::Actual) => "Week Total (Actual)",
            (RangeKind::WeekTotal, Period::PriorYear) => "Week Total (Prior Year)",
            (RangeKind::MonthToDate, Period::Actual) => "Month to Date (Actual)",
            (RangeKind::MonthToDate, Period::PriorYear) => "Month to Date (Prior Year)",
            (RangeKind::WinterEnding, Period::Actual) => "For Winter Ending (Actual)",
            (RangeKind::WinterEnding, Period::PriorYear) => "For Winter Ending (Prior Year)",
        }
    }

    /// Short name used by the insights sheets ("Day", "Week Ending", ...).
    pub fn short_name(&self) -> &'static str {
        match self.kind {
            RangeKind::Day => "Day",
            RangeKind::WeekEnding => "Week Ending",
            RangeKind::WeekTotal => "Week Total",
            RangeKind::MonthToDate => "Month to Date",
            RangeKind::WinterEnding => "Winter Ending",
        }
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub id: RangeId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    fn new(id: RangeId, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        // A live "now" earlier than the window start collapses to an empty window.
        let end = if end < start { start } else { end };
        DateRange { id, start, end }
    }

    pub fn label(&self) -> &'static str {
        self.id.label()
    }

    /// "Mar 01 - Mar 03" style span used in report headers.
    pub fn span_display(&self) -> String {
        format!("{} - {}", self.start.format("%b %d"), self.end.format("%b %d"))
    }
}

// --- Calculator ---

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Same calendar day one year earlier, Feb 29 clamping to Feb 28.
pub fn shift_year_back(dt: NaiveDateTime) -> NaiveDateTime {
    let date = dt.date();
    let shifted = date
        .with_year(date.year() - 1)
        .or_else(|| date.with_day(28).and_then(|d| d.with_year(date.year() - 1)))
        .unwrap_or(date - Duration::days(365));
    shifted.and_time(dt.time())
}

/// Nov 1 of the season containing `date`.
pub fn season_start(date: NaiveDate) -> NaiveDate {
    let year = if date.month() >= 11 {
        date.year()
    } else {
        date.year() - 1
    };
    NaiveDate::from_ymd_opt(year, 11, 1).unwrap_or(date)
}

pub struct DateRangeCalculator {
    base: NaiveDateTime,
    actual_end: NaiveDateTime,
}

impl DateRangeCalculator {
    /// `reference` is the run date. Non-current, non-exact runs report on the day before it.
    pub fn new(
        reference: NaiveDate,
        is_current_date: bool,
        use_exact_date: bool,
        now: NaiveDateTime,
    ) -> Self {
        let base = if is_current_date {
            reference.and_time(now.time())
        } else if use_exact_date {
            end_of_day(reference)
        } else {
            end_of_day(reference - Duration::days(1))
        };
        let actual_end = if is_current_date { now } else { base };
        DateRangeCalculator { base, actual_end }
    }

    pub fn base_date(&self) -> NaiveDateTime {
        self.base
    }

    /// The reporting day (base date without time).
    pub fn report_date(&self) -> NaiveDate {
        self.base.date()
    }

    pub fn range(&self, id: RangeId) -> DateRange {
        let base = self.base;
        let prior = base - Duration::weeks(52);
        match (id.kind, id.period) {
            (RangeKind::Day, Period::Actual) => {
                DateRange::new(id, start_of_day(base.date()), self.actual_end)
            }
            (RangeKind::Day, Period::PriorYear) => {
                DateRange::new(id, start_of_day(prior.date()), end_of_day(prior.date()))
            }
            (RangeKind::WeekEnding, Period::Actual) => {
                DateRange::new(id, start_of_day(monday_of(base.date())), self.actual_end)
            }
            (RangeKind::WeekEnding, Period::PriorYear) => {
                DateRange::new(id, start_of_day(monday_of(prior.date())), prior)
            }
            (RangeKind::WeekTotal, period) => {
                let anchor = if period == Period::Actual { base } else { prior };
                let monday = monday_of(anchor.date());
                DateRange::new(
                    id,
                    start_of_day(monday),
                    end_of_day(monday + Duration::days(6)),
                )
            }
            (RangeKind::MonthToDate, Period::Actual) => {
                let first = base.date().with_day(1).unwrap_or(base.date());
                DateRange::new(id, start_of_day(first), self.actual_end)
            }
            (RangeKind::MonthToDate, Period::PriorYear) => {
                let end = shift_year_back(base);
                let first = end.date().with_day(1).unwrap_or(end.date());
                DateRange::new(id, start_of_day(first), end)
            }
            (RangeKind::WinterEnding, Period::Actual) => {
                DateRange::new(id, start_of_day(season_start(base.date())), self.actual_end)
            }
            (RangeKind::WinterEnding, Period::PriorYear) => {
                let end = shift_year_back(base);
                DateRange::new(id, start_of_day(season_start(end.date())), end)
            }
        }
    }

    /// The nine report ranges in column order.
    pub fn all_ranges(&self) -> Vec<DateRange> {
        RangeId::REPORT_ORDER
            .iter()
            .map(|id| self.range(*id))
            .collect()
    }

    /// Full Monday-Sunday week of the base date; only used for the week budget column.
    pub fn week_total_actual(&self) -> DateRange {
        self.range(RangeId::WEEK_TOTAL_ACTUAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn all_ids() -> Vec<RangeId> {
        let mut ids = RangeId::REPORT_ORDER.to_vec();
        ids.push(RangeId::WEEK_TOTAL_ACTUAL);
        ids
    }

    #[test]
    fn default_mode_reports_on_previous_day() {
        let calc = DateRangeCalculator::new(d("2025-03-05"), false, false, dt("2025-03-05 09:00:00"));
        let day = calc.range(RangeId::DAY_ACTUAL);
        assert_eq!(day.start, dt("2025-03-04 00:00:00"));
        assert_eq!(day.end, dt("2025-03-04 23:59:59"));
        assert_eq!(calc.report_date(), d("2025-03-04"));
    }

    #[test]
    fn exact_mode_reports_on_reference_day() {
        let calc = DateRangeCalculator::new(d("2025-03-05"), false, true, dt("2025-03-10 09:00:00"));
        let week = calc.range(RangeId::WEEK_ENDING_ACTUAL);
        // 2025-03-05 is a Wednesday.
        assert_eq!(week.start, dt("2025-03-03 00:00:00"));
        assert_eq!(week.end, dt("2025-03-05 23:59:59"));

        let total = calc.week_total_actual();
        assert_eq!(total.start, dt("2025-03-03 00:00:00"));
        assert_eq!(total.end, dt("2025-03-09 23:59:59"));
    }

    #[test]
    fn current_mode_ends_at_now() {
        let now = dt("2025-12-15 14:30:00");
        let calc = DateRangeCalculator::new(now.date(), true, false, now);
        let day = calc.range(RangeId::DAY_ACTUAL);
        assert_eq!(day.start, dt("2025-12-15 00:00:00"));
        assert_eq!(day.end, now);

        let winter = calc.range(RangeId::WINTER_ACTUAL);
        assert_eq!(winter.start, dt("2025-11-01 00:00:00"));
        assert_eq!(winter.end, now);
    }

    #[test]
    fn winter_season_starts_previous_november_before_november() {
        let calc = DateRangeCalculator::new(d("2025-03-03"), false, true, dt("2025-03-04 00:00:00"));
        assert_eq!(calc.range(RangeId::WINTER_ACTUAL).start, dt("2024-11-01 00:00:00"));
        let prior = calc.range(RangeId::WINTER_PRIOR);
        assert_eq!(prior.start, dt("2023-11-01 00:00:00"));
        assert_eq!(prior.end, dt("2024-03-03 23:59:59"));
    }

    #[test]
    fn prior_year_day_is_weekday_aligned() {
        let calc = DateRangeCalculator::new(d("2025-03-05"), false, true, dt("2025-03-06 00:00:00"));
        let day = calc.range(RangeId::DAY_PRIOR);
        assert_eq!(day.start.date().weekday(), d("2025-03-05").weekday());
        assert_eq!(day.start, dt("2024-03-06 00:00:00"));
        assert_eq!(day.end, dt("2024-03-06 23:59:59"));

        let week = calc.range(RangeId::WEEK_ENDING_PRIOR);
        assert_eq!(week.start, dt("2024-03-04 00:00:00"));
        assert_eq!(week.end, dt("2024-03-06 23:59:59"));
    }

    #[test]
    fn month_to_date_prior_clamps_leap_day() {
        let calc = DateRangeCalculator::new(d("2024-02-29"), false, true, dt("2024-03-01 00:00:00"));
        let prior = calc.range(RangeId::MONTH_PRIOR);
        assert_eq!(prior.start, dt("2023-02-01 00:00:00"));
        assert_eq!(prior.end, dt("2023-02-28 23:59:59"));
        assert_eq!(calc.range(RangeId::MONTH_ACTUAL).start, dt("2024-02-01 00:00:00"));
    }

    #[test]
    fn every_range_is_ordered_for_all_flag_combinations() {
        let now = dt("2025-01-01 00:00:05");
        for reference in ["2024-02-29", "2024-11-01", "2025-01-01", "2025-06-30", "2025-12-31"] {
            for (current, exact) in [(false, false), (false, true), (true, false), (true, true)] {
                let calc = DateRangeCalculator::new(d(reference), current, exact, now);
                for id in all_ids() {
                    let r = calc.range(id);
                    assert!(
                        r.start <= r.end,
                        "{} for {} (current={}, exact={}) has start {} after end {}",
                        id,
                        reference,
                        current,
                        exact,
                        r.start,
                        r.end
                    );
                }
            }
        }
    }

    #[test]
    fn ranges_are_idempotent() {
        let now = dt("2025-03-05 10:00:00");
        let a = DateRangeCalculator::new(d("2025-03-05"), false, false, now).all_ranges();
        let b = DateRangeCalculator::new(d("2025-03-05"), false, false, now).all_ranges();
        assert_eq!(a, b);
        assert_eq!(a.len(), 9);
        assert_eq!(a[0].label(), "For The Day (Actual)");
        assert_eq!(a[8].label(), "For Winter Ending (Prior Year)");
    }

    #[test]
    fn fixed_clock_can_be_moved() {
        let clock = FixedClock::parse("2025-01-10 08:00:00").unwrap();
        assert_eq!(clock.today(), d("2025-01-10"));
        clock.set(dt("2025-01-11 09:00:00"));
        assert_eq!(clock.now(), dt("2025-01-11 09:00:00"));
    }
}
