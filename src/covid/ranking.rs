use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use super::CountryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Deaths,
    ConfirmedCases,
}

impl Metric {
    /// Total of this metric for `record` over the inclusive date range.
    pub fn total(self, record: &CountryRecord, start: NaiveDate, end: NaiveDate) -> u64 {
        match self {
            Metric::Deaths => { record.total_deaths(start, end) },
            Metric::ConfirmedCases => { record.total_confirmed_cases(start, end) },
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Metric, String> {
        match s.trim().to_lowercase().as_str() {
            "deaths" => { Ok(Metric::Deaths) },
            "confirmed" | "confirmed_cases" | "cases" => { Ok(Metric::ConfirmedCases) },
            q => { Err(format!("Unknown ranking metric: {}", q)) }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Metric::Deaths => { write!(f, "Deaths") },
            Metric::ConfirmedCases => { write!(f, "Confirmed Cases") },
        }
    }
}

/// Sorts `records` in place, highest total first. Equal totals keep their input order.
pub fn sort_by(records: &mut [CountryRecord], metric: Metric, start: NaiveDate, end: NaiveDate) {
    records.sort_by_cached_key(|record| Reverse(metric.total(record, start, end)));
}

pub fn sort_by_deaths(records: &mut [CountryRecord], start: NaiveDate, end: NaiveDate) {
    sort_by(records, Metric::Deaths, start, end)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    pub position: usize,
    pub name: String,
    pub total: u64,
}

impl fmt::Display for Ranking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3}. {}\t{}", self.position, self.name, self.total)
    }
}

/// Ranking table for `records`, leaving the slice itself untouched.
pub fn rank(records: &[CountryRecord], metric: Metric, start: NaiveDate, end: NaiveDate) -> Vec<Ranking> {
    let mut totals: Vec<(&str, u64)> = records
        .iter()
        .map(|record| (record.name(), metric.total(record, start, end)))
        .collect();
    totals.sort_by_key(|&(_, total)| Reverse(total));

    totals
        .into_iter()
        .enumerate()
        .map(|(index, (name, total))| Ranking {
            position: index + 1,
            name: name.to_owned(),
            total,
        })
        .collect()
}

#[cfg(test)]
use super::{date, DailyStatistics, DateSeries};

#[cfg(test)]
fn records_with_deaths(deaths: &[u64]) -> Vec<CountryRecord> {
    deaths
        .iter()
        .enumerate()
        .map(|(index, &deaths)| {
            let series: DateSeries = vec![
                (date(2020, 4, 1), DailyStatistics::new(deaths * 10, deaths)),
                (date(2020, 5, 1), DailyStatistics::new(1, 100 * (index as u64 + 1))), // outside the window
            ].into_iter().collect();
            CountryRecord::leaf(format!("country {}", index), series).unwrap()
        })
        .collect()
}

#[test]
fn test_sort_by_deaths_is_stable_descending() {
    let mut records = records_with_deaths(&[10, 30, 30, 5]);

    sort_by_deaths(&mut records, date(2020, 3, 1), date(2020, 4, 30));

    let order: Vec<&str> = records.iter().map(|r| r.name()).collect();
    assert_eq!(order, vec!["country 1", "country 2", "country 0", "country 3"]);
}

#[test]
fn test_sort_window_changes_order() {
    let mut records = records_with_deaths(&[10, 30, 30, 5]);

    // only the May entries count: 100, 200, 300, 400
    sort_by_deaths(&mut records, date(2020, 5, 1), date(2020, 5, 1));

    let order: Vec<&str> = records.iter().map(|r| r.name()).collect();
    assert_eq!(order, vec!["country 3", "country 2", "country 1", "country 0"]);
}

#[test]
fn test_sort_by_confirmed_cases() {
    let mut records = records_with_deaths(&[2, 7, 1]);

    sort_by(&mut records, Metric::ConfirmedCases, date(2020, 4, 1), date(2020, 5, 1));

    let order: Vec<&str> = records.iter().map(|r| r.name()).collect();
    assert_eq!(order, vec!["country 1", "country 0", "country 2"]);
}

#[test]
fn test_rank_table() {
    let records = records_with_deaths(&[10, 30, 30, 5]);

    let table = rank(&records, Metric::Deaths, date(2020, 4, 1), date(2020, 4, 1));

    assert_eq!(table[0], Ranking { position: 1, name: "country 1".to_owned(), total: 30 });
    assert_eq!(table[1].name, "country 2");
    assert_eq!(table[3], Ranking { position: 4, name: "country 3".to_owned(), total: 5 });
    assert_eq!(records[0].name(), "country 0");
    assert_eq!(table[0].to_string(), "  1. country 1\t30");
}

#[test]
fn test_metric_from_str() {
    assert_eq!("deaths".parse::<Metric>(), Ok(Metric::Deaths));
    assert_eq!("Confirmed".parse::<Metric>(), Ok(Metric::ConfirmedCases));
    assert!("recovered".parse::<Metric>().is_err());
}
