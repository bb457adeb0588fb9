use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use super::{DailyStatistics, DateSeries};
use crate::error::{CovidError, Result};

/// A country, either reported as a whole or split into provinces.
#[derive(Debug, Clone, PartialEq)]
pub enum CountryRecord {
    Leaf {
        name: String,
        series: DateSeries,
    },
    Composite {
        name: String,
        provinces: BTreeMap<String, CountryRecord>, // province name -> leaf
    },
}

fn checked_name(name: String) -> Result<String> {
    if name.trim().is_empty() {
        return Err(CovidError::InvalidName);
    }
    Ok(name)
}

impl CountryRecord {
    pub fn leaf<S: Into<String>>(name: S, series: DateSeries) -> Result<CountryRecord> {
        Ok(CountryRecord::Leaf {
            name: checked_name(name.into())?,
            series,
        })
    }

    pub fn composite<S: Into<String>>(name: S, provinces: BTreeMap<String, CountryRecord>) -> Result<CountryRecord> {
        Ok(CountryRecord::Composite {
            name: checked_name(name.into())?,
            provinces,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            CountryRecord::Leaf { name, .. } => { name },
            CountryRecord::Composite { name, .. } => { name },
        }
    }

    pub fn statistics_on(&self, date: NaiveDate) -> DailyStatistics {
        match self {
            CountryRecord::Leaf { series, .. } => { series.statistics_on(date) },
            CountryRecord::Composite { provinces, .. } => {
                provinces.values().fold(DailyStatistics::default(), |sum, province| {
                    sum + province.statistics_on(date)
                })
            },
        }
    }

    pub fn confirmed_cases_on(&self, date: NaiveDate) -> u64 {
        self.statistics_on(date).confirmed_cases
    }

    pub fn deaths_on(&self, date: NaiveDate) -> u64 {
        self.statistics_on(date).deaths
    }

    pub fn all_dates(&self) -> BTreeSet<NaiveDate> {
        match self {
            CountryRecord::Leaf { series, .. } => { series.all_dates() },
            CountryRecord::Composite { provinces, .. } => {
                let mut dates = BTreeSet::new();
                for province in provinces.values() {
                    dates.extend(province.all_dates());
                }
                dates
            },
        }
    }

    /// Deaths summed over every day from `start` to `end`, both inclusive.
    /// Days without data count as zero, a reversed range sums to zero. Sums
    /// saturate at `u64::MAX`.
    pub fn total_deaths(&self, start: NaiveDate, end: NaiveDate) -> u64 {
        days_between(start, end).fold(0, |total, date| total.saturating_add(self.deaths_on(date)))
    }

    pub fn total_confirmed_cases(&self, start: NaiveDate, end: NaiveDate) -> u64 {
        days_between(start, end).fold(0, |total, date| total.saturating_add(self.confirmed_cases_on(date)))
    }

    pub fn has_provinces(&self) -> bool {
        matches!(self, CountryRecord::Composite { .. })
    }

    pub fn provinces(&self) -> Option<&BTreeMap<String, CountryRecord>> {
        match self {
            CountryRecord::Leaf { .. } => { None },
            CountryRecord::Composite { provinces, .. } => { Some(provinces) },
        }
    }

    /// Looks up a province by name, ignoring case.
    pub fn province(&self, name: &str) -> Option<&CountryRecord> {
        self.provinces()?
            .iter()
            .find(|(province, _)| same_name(province, name))
            .map(|(_, record)| record)
    }
}

/// Region names compare case-insensitively, ignoring surrounding whitespace.
pub(crate) fn same_name(left: &str, right: &str) -> bool {
    left.trim().to_lowercase() == right.trim().to_lowercase()
}

fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut next = if start <= end { Some(start) } else { None };

    std::iter::from_fn(move || {
        let current = next?;
        next = current.succ_opt().filter(|date| *date <= end);
        Some(current)
    })
}

#[cfg(test)]
use super::date;

#[cfg(test)]
fn series(entries: &[((i32, u32, u32), u64, u64)]) -> DateSeries {
    entries
        .iter()
        .map(|&((y, m, d), cases, deaths)| (date(y, m, d), DailyStatistics::new(cases, deaths)))
        .collect()
}

#[cfg(test)]
fn sample_composite() -> CountryRecord {
    let mut provinces = BTreeMap::new();
    provinces.insert(
        "Ontario".to_owned(),
        CountryRecord::leaf("Ontario", series(&[((2020, 3, 1), 10, 1), ((2020, 3, 2), 15, 2)])).unwrap(),
    );
    provinces.insert(
        "Quebec".to_owned(),
        CountryRecord::leaf("Quebec", series(&[((2020, 3, 2), 7, 3), ((2020, 3, 4), 9, 4)])).unwrap(),
    );
    CountryRecord::composite("Canada", provinces).unwrap()
}

#[test]
fn test_leaf_delegates_to_series() {
    let record = CountryRecord::leaf("Poland", series(&[((2020, 3, 10), 22, 0), ((2020, 3, 12), 31, 1)])).unwrap();

    assert_eq!(record.name(), "Poland");
    assert_eq!(record.confirmed_cases_on(date(2020, 3, 12)), 31);
    assert_eq!(record.deaths_on(date(2020, 3, 12)), 1);
    assert_eq!(record.deaths_on(date(2020, 3, 11)), 0);
    assert_eq!(record.confirmed_cases_on(date(2020, 3, 11)), 0);
    assert!(!record.has_provinces());
    assert!(record.provinces().is_none());
}

#[test]
fn test_composite_sums_provinces() {
    let record = sample_composite();
    let provinces = record.provinces().unwrap();

    for day in 1..=5 {
        let d = date(2020, 3, day);
        let deaths: u64 = provinces.values().map(|p| p.deaths_on(d)).sum();
        let cases: u64 = provinces.values().map(|p| p.confirmed_cases_on(d)).sum();
        assert_eq!(record.deaths_on(d), deaths);
        assert_eq!(record.confirmed_cases_on(d), cases);
    }

    assert_eq!(record.confirmed_cases_on(date(2020, 3, 2)), 22);
    assert_eq!(record.deaths_on(date(2020, 3, 2)), 5);
    assert_eq!(record.deaths_on(date(2020, 3, 4)), 4);
}

#[test]
fn test_composite_dates_are_union() {
    let record = sample_composite();

    assert_eq!(
        record.all_dates().into_iter().collect::<Vec<_>>(),
        vec![date(2020, 3, 1), date(2020, 3, 2), date(2020, 3, 4)]
    );
    assert!(record.has_provinces());
    assert_eq!(record.province("quebec").map(|p| p.name()), Some("Quebec"));
    assert!(record.province("Alberta").is_none());
}

#[test]
fn test_total_deaths_is_inclusive() {
    let record = sample_composite();
    let start = date(2020, 3, 1);
    let end = date(2020, 3, 4);

    let expected: u64 = (1..=4).map(|day| record.deaths_on(date(2020, 3, day))).sum();
    assert_eq!(record.total_deaths(start, end), expected);
    assert_eq!(record.total_deaths(start, end), 10);
    assert_eq!(record.total_deaths(date(2020, 3, 2), date(2020, 3, 2)), 5);
    assert_eq!(record.total_deaths(date(2020, 2, 1), date(2020, 2, 28)), 0);
    assert_eq!(record.total_deaths(end, start), 0);
    assert_eq!(record.total_confirmed_cases(start, end), 41);
}

#[test]
fn test_total_deaths_across_month_boundary() {
    let record = CountryRecord::leaf("Italy", series(&[((2020, 2, 29), 1, 1), ((2020, 3, 1), 2, 2)])).unwrap();

    assert_eq!(record.total_deaths(date(2020, 2, 28), date(2020, 3, 1)), 3);
}

#[test]
fn test_blank_name_rejected() {
    assert!(matches!(CountryRecord::leaf("  ", DateSeries::new()), Err(CovidError::InvalidName)));
    assert!(matches!(CountryRecord::composite("", BTreeMap::new()), Err(CovidError::InvalidName)));
}

#[test]
fn test_large_totals_saturate() {
    let mut provinces = BTreeMap::new();
    for name in &["Ontario", "Quebec"] {
        let leaf = CountryRecord::leaf(*name, series(&[((2020, 3, 1), u64::MAX, u64::MAX), ((2020, 3, 2), 1, 1)])).unwrap();
        provinces.insert(name.to_string(), leaf);
    }
    let record = CountryRecord::composite("Canada", provinces).unwrap();

    assert_eq!(record.deaths_on(date(2020, 3, 1)), u64::MAX);
    assert_eq!(record.total_deaths(date(2020, 3, 1), date(2020, 3, 2)), u64::MAX);
    assert_eq!(record.total_confirmed_cases(date(2020, 3, 2), date(2020, 3, 2)), 2);
}
