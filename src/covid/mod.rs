use std::collections::{BTreeMap, BTreeSet};
use std::iter::FromIterator;
use std::ops::{Add, AddAssign};

pub mod loader;
pub mod ranking;
pub mod record;

use chrono::NaiveDate;
use regex::Regex;

pub use loader::CsvLoader;
pub use ranking::{sort_by, sort_by_deaths, Metric};
pub use record::CountryRecord;

/// Parses a date cell. ISO-8601 (`2020-03-01`) is the canonical form, the
/// public time-series files use `3/1/20` or `3/1/2020`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }

    lazy_static! {
        static ref RE_US_DATE: Regex = Regex::new(r"^(?P<month>\d{1,2})/(?P<day>\d{1,2})/(?P<year>\d{4}|\d{2})$").unwrap();
    }

    let captures = RE_US_DATE.captures(text)?;
    let year = {
        let year = captures.name("year")?.as_str();
        match year.len() {
            2 => { 2000 + year.parse::<i32>().ok()? },
            _ => { year.parse::<i32>().ok()? }
        }
    };

    NaiveDate::from_ymd_opt(
        year,
        captures.name("month")?.as_str().parse::<u32>().ok()?,
        captures.name("day")?.as_str().parse::<u32>().ok()?
    )
}

/// Confirmed cases and deaths reported for one region on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyStatistics {
    pub confirmed_cases: u64,
    pub deaths: u64,
}

impl DailyStatistics {
    pub fn new(confirmed_cases: u64, deaths: u64) -> DailyStatistics {
        DailyStatistics { confirmed_cases, deaths }
    }

    /// `None` when either count would overflow.
    pub fn checked_add(self, other: DailyStatistics) -> Option<DailyStatistics> {
        Some(DailyStatistics {
            confirmed_cases: self.confirmed_cases.checked_add(other.confirmed_cases)?,
            deaths: self.deaths.checked_add(other.deaths)?,
        })
    }
}

/// Saturates at `u64::MAX` instead of overflowing.
impl Add for DailyStatistics {
    type Output = DailyStatistics;

    fn add(self, other: DailyStatistics) -> DailyStatistics {
        DailyStatistics {
            confirmed_cases: self.confirmed_cases.saturating_add(other.confirmed_cases),
            deaths: self.deaths.saturating_add(other.deaths),
        }
    }
}

impl AddAssign for DailyStatistics {
    fn add_assign(&mut self, other: DailyStatistics) {
        *self = *self + other;
    }
}

/// Daily statistics of a region without sub-regions.
///
/// A date without an entry is a valid state and reads as zero for both counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateSeries {
    entries: BTreeMap<NaiveDate, DailyStatistics>,
}

impl DateSeries {
    pub fn new() -> DateSeries {
        DateSeries { entries: BTreeMap::new() }
    }

    pub fn statistics_on(&self, date: NaiveDate) -> DailyStatistics {
        self.entries.get(&date).copied().unwrap_or_default()
    }

    pub fn confirmed_cases_on(&self, date: NaiveDate) -> u64 {
        self.statistics_on(date).confirmed_cases
    }

    pub fn deaths_on(&self, date: NaiveDate) -> u64 {
        self.statistics_on(date).deaths
    }

    pub fn all_dates(&self) -> BTreeSet<NaiveDate> {
        self.entries.keys().copied().collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.entries.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, DailyStatistics)> + '_ {
        self.entries.iter().map(|(date, stats)| (*date, *stats))
    }

    // only the loader and the export reader build series incrementally
    pub(crate) fn insert(&mut self, date: NaiveDate, stats: DailyStatistics) -> Option<DailyStatistics> {
        self.entries.insert(date, stats)
    }

    /// Adds `stats` to the entry for `date`. On overflow the entry is left as it
    /// was and `None` is returned.
    pub(crate) fn accumulate(&mut self, date: NaiveDate, stats: DailyStatistics) -> Option<DailyStatistics> {
        let entry = self.entries.entry(date).or_default();
        *entry = entry.checked_add(stats)?;
        Some(*entry)
    }
}

impl FromIterator<(NaiveDate, DailyStatistics)> for DateSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, DailyStatistics)>>(iter: I) -> DateSeries {
        DateSeries { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

#[test]
fn test_parse_date_formats() {
    assert_eq!(parse_date("2020-03-01"), Some(date(2020, 3, 1)));
    assert_eq!(parse_date(" 2021-12-31 "), Some(date(2021, 12, 31)));
    assert_eq!(parse_date("3/1/20"), Some(date(2020, 3, 1)));
    assert_eq!(parse_date("12/25/2020"), Some(date(2020, 12, 25)));
    assert_eq!(parse_date("2020-02-30"), None);
    assert_eq!(parse_date("13/1/20"), None);
    assert_eq!(parse_date("Province/State"), None);
    assert_eq!(parse_date(""), None);
}

#[test]
fn test_missing_dates_read_as_zero() {
    let series: DateSeries = vec![
        (date(2020, 3, 1), DailyStatistics::new(12, 1)),
        (date(2020, 3, 2), DailyStatistics::new(20, 3)),
    ].into_iter().collect();

    assert_eq!(series.confirmed_cases_on(date(2020, 3, 2)), 20);
    assert_eq!(series.deaths_on(date(2020, 3, 1)), 1);

    for day in &[date(2020, 2, 29), date(2020, 3, 3), date(1999, 1, 1)] {
        assert_eq!(series.confirmed_cases_on(*day), 0);
        assert_eq!(series.deaths_on(*day), 0);
    }
}

#[test]
fn test_all_dates_are_unique_and_ordered() {
    let mut series = DateSeries::new();
    series.insert(date(2020, 3, 5), DailyStatistics::new(1, 0));
    series.insert(date(2020, 3, 1), DailyStatistics::new(2, 0));
    let replaced = series.insert(date(2020, 3, 5), DailyStatistics::new(7, 1));

    assert_eq!(replaced, Some(DailyStatistics::new(1, 0)));
    assert_eq!(series.len(), 2);
    assert_eq!(
        series.all_dates().into_iter().collect::<Vec<_>>(),
        vec![date(2020, 3, 1), date(2020, 3, 5)]
    );
    assert_eq!(series.first_date(), Some(date(2020, 3, 1)));
    assert_eq!(series.last_date(), Some(date(2020, 3, 5)));
    assert_eq!(series.deaths_on(date(2020, 3, 5)), 1);
}

#[test]
fn test_accumulate_sums_same_date() {
    let mut series = DateSeries::new();
    series.accumulate(date(2020, 4, 1), DailyStatistics::new(3, 1));
    series.accumulate(date(2020, 4, 1), DailyStatistics::new(4, 2));

    assert_eq!(series.statistics_on(date(2020, 4, 1)), DailyStatistics::new(7, 3));
    assert_eq!(series.iter().collect::<Vec<_>>(), vec![(date(2020, 4, 1), DailyStatistics::new(7, 3))]);
    assert!(DateSeries::new().is_empty());
}

#[test]
fn test_accumulate_refuses_overflow() {
    let mut series = DateSeries::new();
    series.accumulate(date(2020, 4, 1), DailyStatistics::new(u64::MAX, 1));

    assert_eq!(series.accumulate(date(2020, 4, 1), DailyStatistics::new(1, 0)), None);
    assert_eq!(series.statistics_on(date(2020, 4, 1)), DailyStatistics::new(u64::MAX, 1));

    let sum = DailyStatistics::new(u64::MAX, 2) + DailyStatistics::new(5, 3);
    assert_eq!(sum, DailyStatistics::new(u64::MAX, 5));
}
