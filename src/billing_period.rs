//! UTC calendar-month billing periods.
//!
//! The monthly spending accumulator is never reset by a job. A stored
//! `time_monthly_usage_updated` outside the current period means the stored
//! `monthly_usage` belongs to an earlier month: the cap check ignores it and
//! the next charge overwrites it instead of adding to it.

use time::{Date, Month, OffsetDateTime, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    /// Inclusive, unix ms.
    pub start_ms: i64,
    /// Exclusive, unix ms.
    pub end_ms: i64,
}

impl BillingPeriod {
    pub fn containing(now_ms: i64) -> Self {
        let now = utc_from_ms(now_ms);
        let start = Date::from_calendar_date(now.year(), now.month(), 1)
            .unwrap_or(now.date());
        let (next_year, next_month) = match now.month() {
            Month::December => (now.year() + 1, Month::January),
            m => (now.year(), m.next()),
        };
        let end = Date::from_calendar_date(next_year, next_month, 1).unwrap_or(start);
        Self {
            start_ms: date_to_ms(start),
            end_ms: date_to_ms(end),
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms
    }
}

/// True when `ts_ms` falls in the same UTC calendar month and year as `now_ms`.
pub fn is_current_billing_period(ts_ms: i64, now_ms: i64) -> bool {
    BillingPeriod::containing(now_ms).contains(ts_ms)
}

fn utc_from_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn date_to_ms(date: Date) -> i64 {
    let ts = date.with_time(Time::MIDNIGHT).assume_utc();
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}
