//! Date-window anchoring and series gap filling.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Inclusive date window for measurement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The most recent complete ISO week (Monday through Sunday) strictly
    /// before the week containing `today`.
    pub fn last_complete_week(today: NaiveDate) -> DateWindow {
        let this_monday =
            today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let end = this_monday - Duration::days(1);
        DateWindow { start: end - Duration::days(6), end }
    }

    /// Explicit bounds when supplied, otherwise anchored to the most recent
    /// complete week. A lone start runs through today; a lone end anchors a
    /// one-week window ending there.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> DateWindow {
        match (start, end) {
            (Some(s), Some(e)) => DateWindow::new(s, e),
            (Some(s), None) => DateWindow::new(s, today),
            (None, Some(e)) => DateWindow::new(e - Duration::days(6), e),
            (None, None) => DateWindow::last_complete_week(today),
        }
    }

    /// Every calendar day in the window, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut day = self.start;
        while day <= self.end {
            days.push(day);
            day += Duration::days(1);
        }
        days
    }

    /// ISO `year * 100 + week` codes covered by this window, for addressing
    /// the weekly aggregate table.
    pub fn week_codes(&self) -> Vec<i64> {
        let mut codes = Vec::new();
        for day in self.days() {
            let iso = day.iso_week();
            let code = iso.year() as i64 * 100 + iso.week() as i64;
            if codes.last() != Some(&code) {
                codes.push(code);
            }
        }
        codes
    }
}

/// Reindex a sparse (date, value) series onto every day in the window.
///
/// Days without a row get `None`, so the output has a fixed length in date
/// order regardless of gaps in the input.
pub fn fill_daily_gaps(
    window: &DateWindow,
    rows: &[(NaiveDate, f64)],
) -> Vec<(NaiveDate, Option<f64>)> {
    window
        .days()
        .into_iter()
        .map(|day| {
            let value = rows.iter().find(|(d, _)| *d == day).map(|(_, v)| *v);
            (day, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_last_complete_week() {
        // 2024-05-15 is a Wednesday; the last complete week is Mon 6th .. Sun 12th
        let window = DateWindow::last_complete_week(d(2024, 5, 15));
        assert_eq!(window.start, d(2024, 5, 6));
        assert_eq!(window.end, d(2024, 5, 12));

        // A Monday anchors to the week just finished
        let window = DateWindow::last_complete_week(d(2024, 5, 13));
        assert_eq!(window.start, d(2024, 5, 6));
        assert_eq!(window.end, d(2024, 5, 12));

        // A Sunday is still inside its own week
        let window = DateWindow::last_complete_week(d(2024, 5, 12));
        assert_eq!(window.start, d(2024, 4, 29));
        assert_eq!(window.end, d(2024, 5, 5));
    }

    #[test]
    fn test_resolve() {
        let today = d(2024, 5, 15);
        let explicit = DateWindow::resolve(Some(d(2024, 1, 1)), Some(d(2024, 1, 31)), today);
        assert_eq!(explicit, DateWindow::new(d(2024, 1, 1), d(2024, 1, 31)));

        let open_ended = DateWindow::resolve(Some(d(2024, 5, 1)), None, today);
        assert_eq!(open_ended, DateWindow::new(d(2024, 5, 1), today));

        let anchored = DateWindow::resolve(None, None, today);
        assert_eq!(anchored, DateWindow::last_complete_week(today));
    }

    #[test]
    fn test_week_codes() {
        // Mon 2024-05-06 .. Sun 2024-05-12 is exactly ISO week 19
        let window = DateWindow::new(d(2024, 5, 6), d(2024, 5, 12));
        assert_eq!(window.week_codes(), vec![202419]);

        // Spanning a week boundary yields both codes
        let window = DateWindow::new(d(2024, 5, 10), d(2024, 5, 14));
        assert_eq!(window.week_codes(), vec![202419, 202420]);
    }

    #[test]
    fn test_fill_daily_gaps() {
        let window = DateWindow::new(d(2024, 5, 6), d(2024, 5, 12));
        let rows = vec![(d(2024, 5, 6), 3.0), (d(2024, 5, 8), 5.5), (d(2024, 5, 10), 1.0)];

        let series = fill_daily_gaps(&window, &rows);
        assert_eq!(series.len(), 7);
        assert_eq!(series[0], (d(2024, 5, 6), Some(3.0)));
        assert_eq!(series[1], (d(2024, 5, 7), None));
        assert_eq!(series[2], (d(2024, 5, 8), Some(5.5)));
        assert_eq!(series[4], (d(2024, 5, 10), Some(1.0)));
        assert_eq!(series[6], (d(2024, 5, 12), None));
    }
}
