use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use regex::Regex;
use tracing::{debug, info, warn};

use super::record::same_name;
use super::{parse_date, CountryRecord, DailyStatistics, DateSeries};
use crate::config::SourceFiles;
use crate::error::{CovidError, Result};

/// Builds country records from the confirmed cases and deaths documents.
///
/// Both documents share one layout. The first row names the country owning each
/// column, an optional second row labelled `Province/State` names the
/// province. Both documents must agree on whether that row is present. Every
/// following row is a date and one count per column:
///
/// ```text
/// Country/Region,Poland,Canada,Canada
/// Province/State,,Ontario,Quebec
/// 2020-03-01,0,4,1
/// ```
pub struct CsvLoader {
    sources: SourceFiles,
}

impl CsvLoader {
    pub fn new(sources: SourceFiles) -> CsvLoader {
        CsvLoader { sources }
    }

    pub fn sources(&self) -> &SourceFiles {
        &self.sources
    }

    /// Loads one country, re-reading both documents from the start.
    pub fn load(&self, country: &str) -> Result<CountryRecord> {
        let confirmed_cases = File::open(self.sources.confirmed_cases())?;
        let deaths = File::open(self.sources.deaths())?;

        let record = from_readers(country, confirmed_cases, deaths)?;
        info!(
            "Loaded {} ({} dates, {} provinces)",
            record.name(),
            record.all_dates().len(),
            record.provinces().map_or(0, |provinces| provinces.len())
        );

        Ok(record)
    }

    /// Loads every country independently, one result per requested name.
    pub fn try_load_many<S: AsRef<str>>(&self, countries: &[S]) -> Vec<Result<CountryRecord>> {
        countries.iter().map(|country| self.load(country.as_ref())).collect()
    }

    /// Loads every country it can. Failures are logged and left out, they never
    /// abort the rest of the batch.
    pub fn load_many<S: AsRef<str>>(&self, countries: &[S]) -> Vec<CountryRecord> {
        let mut records = Vec::with_capacity(countries.len());

        for (country, result) in countries.iter().zip(self.try_load_many(countries)) {
            match result {
                Ok(record) => { records.push(record) },
                Err(e) => {
                    warn!("Skipping {}: {}", country.as_ref(), e);
                }
            }
        }

        records
    }
}

/// One column owned by the requested country.
#[derive(Debug)]
struct Column {
    index: usize,
    occurrence: usize, // 1-based among the country's columns
    province: Option<String>,
}

impl Column {
    fn region(&self, country: &str, has_provinces: bool) -> String {
        match (&self.province, has_provinces) {
            (_, false) => { country.to_owned() },
            (Some(province), true) => { province.clone() },
            (None, true) => { format!("{} #{}", country, self.occurrence) }
        }
    }
}

// regions are matched like countries: case-insensitive, trimmed
fn region_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn is_province_label(cell: &str) -> bool {
    lazy_static! {
        static ref RE_PROVINCE_LABEL: Regex = Regex::new(r"(?i)^province\s*([/_]\s*state)?$").unwrap();
    }

    RE_PROVINCE_LABEL.is_match(cell.trim())
}

/// A source document positioned after its header rows.
struct Document<R: Read> {
    rows: StringRecordsIntoIter<R>,
    pending: Option<StringRecord>,
    line: usize,
    columns: Vec<Column>,
    province_row: bool,
}

impl<R: Read> Document<R> {
    fn open(country: &str, reader: R) -> Result<Document<R>> {
        let mut rows = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader)
            .into_records();

        let countries = match rows.next() {
            Some(row) => { row? },
            None => { return Err(CovidError::CountryNotFound(country.to_owned())) }
        };

        // anything not labelled as a province row is data, and a bad date in
        // it fails like any other row
        let (provinces, pending) = match rows.next() {
            Some(row) => {
                let row = row?;
                if is_province_label(row.get(0).unwrap_or("")) {
                    (Some(row), None)
                } else {
                    (None, Some(row))
                }
            },
            None => { (None, None) }
        };

        let columns = locate_columns(country, &countries, provinces.as_ref());
        if columns.is_empty() {
            return Err(CovidError::CountryNotFound(country.to_owned()));
        }

        let province_row = provinces.is_some();
        let line = if province_row { 2 } else { 1 };
        Ok(Document { rows, pending, line, columns, province_row })
    }

    fn has_provinces(&self) -> bool {
        self.columns.len() > 1 || self.columns.iter().any(|column| column.province.is_some())
    }

    fn next_row(&mut self) -> Result<Option<(usize, StringRecord)>> {
        let row = match self.pending.take() {
            Some(row) => { row },
            None => {
                match self.rows.next() {
                    Some(row) => { row? },
                    None => { return Ok(None) }
                }
            }
        };

        self.line += 1;
        Ok(Some((self.line, row)))
    }
}

/// Every column (after the leading date column) whose country cell names `country`.
fn locate_columns(country: &str, countries: &StringRecord, provinces: Option<&StringRecord>) -> Vec<Column> {
    if country.trim().is_empty() {
        return Vec::new();
    }

    countries
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, name)| same_name(name, country))
        .enumerate()
        .map(|(occurrence, (index, _))| {
            let province = provinces
                .and_then(|row| row.get(index))
                .map(str::trim)
                .filter(|province| !province.is_empty())
                .map(str::to_owned);

            Column { index, occurrence: occurrence + 1, province }
        })
        .collect()
}

fn row_date(row: &StringRecord, line: usize) -> Result<NaiveDate> {
    let cell = row.get(0).unwrap_or("");
    parse_date(cell).ok_or_else(|| CovidError::MalformedRow {
        line,
        message: format!("invalid date '{}'", cell),
    })
}

fn row_count(row: &StringRecord, index: usize, line: usize) -> Result<u64> {
    let cell = row.get(index).ok_or_else(|| CovidError::MalformedRow {
        line,
        message: format!("missing column {}", index + 1),
    })?;

    if cell.is_empty() {
        return Ok(0);
    }

    cell.parse::<u64>().map_err(|e| CovidError::MalformedRow {
        line,
        message: format!("invalid count '{}' in column {}: {}", cell, index + 1, e),
    })
}

/// Region display name and series, keyed by `region_key`.
type Regions = BTreeMap<String, (String, DateSeries)>;

fn add_counts(regions: &mut Regions, key: &str, date: NaiveDate, stats: DailyStatistics, line: usize) -> Result<()> {
    if let Some((region, series)) = regions.get_mut(key) {
        series.accumulate(date, stats).ok_or_else(|| CovidError::MalformedRow {
            line,
            message: format!("counts for {} on {} overflow", region, date),
        })?;
    }
    Ok(())
}

/// Builds the record for `country` from the two documents, read in lockstep.
///
/// The country has provinces when either document gives it more than one
/// column or names a province for its column. Nothing is built unless every row
/// parses.
pub fn from_readers<C: Read, D: Read>(country: &str, confirmed_cases: C, deaths: D) -> Result<CountryRecord> {
    let country = country.trim();
    let mut confirmed_cases = Document::open(country, confirmed_cases)?;
    let mut deaths = Document::open(country, deaths)?;

    if confirmed_cases.province_row != deaths.province_row {
        return Err(CovidError::MalformedRow {
            line: 2,
            message: "only one of the documents has a Province/State row".to_owned(),
        });
    }

    let has_provinces = confirmed_cases.has_provinces() || deaths.has_provinces();
    debug!(
        "{}: confirmed cases columns {:?}, deaths columns {:?}",
        country, confirmed_cases.columns, deaths.columns
    );

    // the first spelling of a region, confirmed cases first, names it
    let mut regions = Regions::new();
    let mut keys = |columns: &[Column]| -> Vec<(usize, String)> {
        columns
            .iter()
            .map(|column| {
                let region = column.region(country, has_provinces);
                let key = region_key(&region);
                regions.entry(key.clone()).or_insert_with(|| (region, DateSeries::new()));
                (column.index, key)
            })
            .collect()
    };
    let confirmed_columns = keys(&confirmed_cases.columns[..]);
    let deaths_columns = keys(&deaths.columns[..]);

    let mut seen = BTreeSet::new();
    loop {
        let (confirmed_row, deaths_row) = match (confirmed_cases.next_row()?, deaths.next_row()?) {
            (Some(confirmed_row), Some(deaths_row)) => { (confirmed_row, deaths_row) },
            (None, None) => { break },
            (Some((line, _)), None) | (None, Some((line, _))) => {
                warn!("{}: documents have different row counts, ignoring rows from line {}", country, line);
                break;
            }
        };

        let (line, confirmed_row) = confirmed_row;
        let (deaths_line, deaths_row) = deaths_row;

        let date = row_date(&confirmed_row, line)?;
        let deaths_date = row_date(&deaths_row, deaths_line)?;
        if date != deaths_date {
            return Err(CovidError::MalformedRow {
                line,
                message: format!("confirmed cases row is dated {} but deaths row is dated {}", date, deaths_date),
            });
        }
        if !seen.insert(date) {
            return Err(CovidError::MalformedRow {
                line,
                message: format!("duplicate date {}", date),
            });
        }

        for (index, key) in &confirmed_columns {
            let count = row_count(&confirmed_row, *index, line)?;
            add_counts(&mut regions, key, date, DailyStatistics::new(count, 0), line)?;
        }
        for (index, key) in &deaths_columns {
            let count = row_count(&deaths_row, *index, deaths_line)?;
            add_counts(&mut regions, key, date, DailyStatistics::new(0, count), deaths_line)?;
        }
    }

    if !has_provinces {
        let series = regions.remove(&region_key(country)).map(|(_, series)| series).unwrap_or_default();
        return CountryRecord::leaf(country, series);
    }

    let mut provinces = BTreeMap::new();
    for (_, (province, series)) in regions {
        let record = CountryRecord::leaf(province.as_str(), series)?;
        provinces.insert(province, record);
    }

    CountryRecord::composite(country, provinces)
}

#[cfg(test)]
use super::date;

#[cfg(test)]
const CONFIRMED_CASES: &str = "\
Country/Region,Poland,Canada,Canada,Germany,Canada
Province/State,,Ontario,Quebec,,Ontario
2020-03-01,0,4,1,130,1
2020-03-02,1,6,3,159,0
2020-03-03,5,10,3,196,2
";

#[cfg(test)]
const DEATHS: &str = "\
Country/Region,Poland,Canada,Canada,Germany,Canada
Province/State,,Ontario,Quebec,,Ontario
2020-03-01,0,0,0,0,0
2020-03-02,0,1,0,0,1
2020-03-03,1,1,2,1,0
";

#[cfg(test)]
fn load_str(country: &str, confirmed_cases: &str, deaths: &str) -> Result<CountryRecord> {
    from_readers(country, confirmed_cases.as_bytes(), deaths.as_bytes())
}

#[test]
fn test_country_without_provinces() {
    let record = load_str("poland", CONFIRMED_CASES, DEATHS).unwrap();

    assert!(!record.has_provinces());
    assert_eq!(record.name(), "poland");
    assert_eq!(record.confirmed_cases_on(date(2020, 3, 3)), 5);
    assert_eq!(record.deaths_on(date(2020, 3, 3)), 1);
    assert_eq!(record.all_dates().len(), 3);
    assert_eq!(record.deaths_on(date(2020, 3, 4)), 0);
}

#[test]
fn test_country_with_provinces() {
    let record = load_str("Canada", CONFIRMED_CASES, DEATHS).unwrap();

    let provinces = record.provinces().unwrap();
    assert_eq!(provinces.keys().cloned().collect::<Vec<_>>(), vec!["Ontario", "Quebec"]);

    // both Ontario columns land in the same province
    let ontario = record.province("Ontario").unwrap();
    assert_eq!(ontario.confirmed_cases_on(date(2020, 3, 1)), 5);
    assert_eq!(ontario.deaths_on(date(2020, 3, 2)), 2);

    let quebec = record.province("Quebec").unwrap();
    assert_eq!(quebec.confirmed_cases_on(date(2020, 3, 3)), 3);
    assert_eq!(quebec.deaths_on(date(2020, 3, 3)), 2);

    assert_eq!(record.confirmed_cases_on(date(2020, 3, 3)), 15);
    assert_eq!(record.deaths_on(date(2020, 3, 3)), 3);
    assert_eq!(record.total_deaths(date(2020, 3, 1), date(2020, 3, 3)), 5);
}

#[test]
fn test_country_not_found() {
    match load_str("Neverland", CONFIRMED_CASES, DEATHS) {
        Err(CovidError::CountryNotFound(name)) => { assert_eq!(name, "Neverland") },
        other => { panic!("expected CountryNotFound, got {:?}", other) }
    }

    let deaths_without_poland = "Country/Region,Germany\n2020-03-01,0\n";
    assert!(matches!(
        load_str("Poland", CONFIRMED_CASES, deaths_without_poland),
        Err(CovidError::CountryNotFound(_))
    ));
    assert!(matches!(load_str("", CONFIRMED_CASES, DEATHS), Err(CovidError::CountryNotFound(_))));
    assert!(matches!(load_str("Poland", "", ""), Err(CovidError::CountryNotFound(_))));
}

#[test]
fn test_header_without_province_row() {
    let confirmed_cases = "Country/Region,Italy,Spain,Spain\n3/1/20,1694,84,1\n3/2/20,2036,120,2\n";
    let deaths = "Country/Region,Italy,Spain,Spain\n3/1/20,34,0,0\n3/2/20,52,0,1\n";

    let italy = load_str("Italy", confirmed_cases, deaths).unwrap();
    assert!(!italy.has_provinces());
    assert_eq!(italy.confirmed_cases_on(date(2020, 3, 2)), 2036);

    let spain = load_str("Spain", confirmed_cases, deaths).unwrap();
    let provinces = spain.provinces().unwrap();
    assert_eq!(provinces.keys().cloned().collect::<Vec<_>>(), vec!["Spain #1", "Spain #2"]);
    assert_eq!(spain.confirmed_cases_on(date(2020, 3, 2)), 122);
    assert_eq!(spain.deaths_on(date(2020, 3, 2)), 1);
}

#[test]
fn test_single_named_province_is_composite() {
    let confirmed_cases = "Country/Region,Greenland\nProvince/State,Nuuk\n2020-03-20,2\n";
    let deaths = "Country/Region,Greenland\nProvince/State,Nuuk\n2020-03-20,0\n";

    let record = load_str("Greenland", confirmed_cases, deaths).unwrap();
    assert!(record.has_provinces());
    assert_eq!(record.province("nuuk").unwrap().confirmed_cases_on(date(2020, 3, 20)), 2);
}

#[test]
fn test_malformed_rows() {
    let header = "Country/Region,Poland\n";

    let bad_count = format!("{}2020-03-01,12\n2020-03-02,lots\n", header);
    let good = format!("{}2020-03-01,0\n2020-03-02,1\n", header);
    match load_str("Poland", &bad_count, &good) {
        Err(CovidError::MalformedRow { line, .. }) => { assert_eq!(line, 3) },
        other => { panic!("expected MalformedRow, got {:?}", other) }
    }

    let negative = format!("{}2020-03-01,-1\n2020-03-02,1\n", header);
    assert!(matches!(load_str("Poland", &good, &negative), Err(CovidError::MalformedRow { .. })));

    let bad_date = format!("{}2020-03-01,0\nyesterday,1\n", header);
    assert!(matches!(load_str("Poland", &bad_date, &good), Err(CovidError::MalformedRow { .. })));

    let shifted = format!("{}2020-03-01,0\n2020-03-03,1\n", header);
    assert!(matches!(load_str("Poland", &good, &shifted), Err(CovidError::MalformedRow { .. })));

    let duplicated = format!("{}2020-03-01,0\n2020-03-01,1\n", header);
    assert!(matches!(load_str("Poland", &duplicated, &duplicated), Err(CovidError::MalformedRow { .. })));

    let short_row = "Country/Region,Germany,Poland\n2020-03-01,4\n2020-03-02,5\n";
    let deaths = "Country/Region,Germany,Poland\n2020-03-01,0,0\n2020-03-02,0,0\n";
    assert!(matches!(load_str("Poland", short_row, deaths), Err(CovidError::MalformedRow { .. })));
}

#[test]
fn test_bad_date_on_first_data_row() {
    let confirmed_cases = "Country/Region,Poland\n2020-13-01,5\n2020-03-02,3\n";
    let deaths = "Country/Region,Poland\n2020-13-01,1\n2020-03-02,1\n";

    match load_str("Poland", confirmed_cases, deaths) {
        Err(CovidError::MalformedRow { line, message }) => {
            assert_eq!(line, 2);
            assert!(message.contains("2020-13-01"));
        },
        other => { panic!("expected MalformedRow, got {:?}", other) }
    }

    let unlabelled = "Country/Region,Poland\nRegion,Mazovia\n2020-03-01,5\n";
    assert!(matches!(load_str("Poland", unlabelled, unlabelled), Err(CovidError::MalformedRow { line: 2, .. })));
}

#[test]
fn test_province_row_in_one_document_only() {
    let confirmed_cases = "Country/Region,Canada\nProvince/State,Ontario\n2020-03-01,4\n";
    let deaths = "Country/Region,Canada\n2020-03-01,0\n";

    assert!(matches!(load_str("Canada", confirmed_cases, deaths), Err(CovidError::MalformedRow { line: 2, .. })));
}

#[test]
fn test_province_names_merge_across_documents() {
    let confirmed_cases = "Country/Region,Canada,Canada\nProvince/State,Ontario,Quebec\n2020-03-01,4,1\n";
    let deaths = "Country/Region,Canada,Canada\nprovince_state,ONTARIO ,Quebec\n2020-03-01,2,0\n";

    let record = load_str("Canada", confirmed_cases, deaths).unwrap();
    let provinces = record.provinces().unwrap();
    assert_eq!(provinces.keys().cloned().collect::<Vec<_>>(), vec!["Ontario", "Quebec"]);

    let ontario = record.province("ontario").unwrap();
    assert_eq!(ontario.statistics_on(date(2020, 3, 1)), DailyStatistics::new(4, 2));
}

#[test]
fn test_overflowing_counts_are_malformed() {
    let confirmed_cases = "\
Country/Region,Canada,Canada
Province/State,Ontario,Ontario
2020-03-01,18446744073709551615,1
";
    let deaths = "Country/Region,Canada,Canada\nProvince/State,Ontario,Ontario\n2020-03-01,0,0\n";

    match load_str("Canada", confirmed_cases, deaths) {
        Err(CovidError::MalformedRow { line, .. }) => { assert_eq!(line, 3) },
        other => { panic!("expected MalformedRow, got {:?}", other) }
    }
}

#[test]
fn test_empty_cells_count_as_zero() {
    let confirmed_cases = "Country/Region,Poland\n2020-03-01,\n2020-03-02,3\n";
    let deaths = "Country/Region,Poland\n2020-03-01,\n2020-03-02,\n";

    let record = load_str("Poland", confirmed_cases, deaths).unwrap();
    assert_eq!(record.confirmed_cases_on(date(2020, 3, 1)), 0);
    assert_eq!(record.confirmed_cases_on(date(2020, 3, 2)), 3);
    assert_eq!(record.all_dates().len(), 2);
}

#[test]
fn test_shorter_document_limits_rows() {
    let confirmed_cases = "Country/Region,Poland\n2020-03-01,1\n2020-03-02,3\n2020-03-03,6\n";
    let deaths = "Country/Region,Poland\n2020-03-01,0\n2020-03-02,1\n";

    let record = load_str("Poland", confirmed_cases, deaths).unwrap();
    assert_eq!(record.all_dates().len(), 2);
    assert_eq!(record.confirmed_cases_on(date(2020, 3, 3)), 0);
}

#[cfg(test)]
fn loader_for(dir: &std::path::Path) -> CsvLoader {
    let confirmed_cases = dir.join("confirmed_cases.csv");
    let deaths = dir.join("deaths.csv");
    std::fs::write(&confirmed_cases, CONFIRMED_CASES).unwrap();
    std::fs::write(&deaths, DEATHS).unwrap();

    CsvLoader::new(SourceFiles::new(&confirmed_cases, &deaths).unwrap())
}

#[test]
fn test_load_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let loader = loader_for(dir.path());

    let first = loader.load("Germany").unwrap();
    let second = loader.load("Germany").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.confirmed_cases_on(date(2020, 3, 2)), 159);
}

#[test]
fn test_batch_skips_failures() {
    let dir = tempfile::tempdir().unwrap();
    let loader = loader_for(dir.path());

    let records = loader.load_many(&["Poland", "Neverland", "Germany"]);
    assert_eq!(records.iter().map(|r| r.name()).collect::<Vec<_>>(), vec!["Poland", "Germany"]);

    let results = loader.try_load_many(&["Poland", "Neverland"]);
    assert!(results[0].is_ok());
    assert!(matches!(&results[1], Err(CovidError::CountryNotFound(name)) if name == "Neverland"));
}

#[test]
fn test_batch_survives_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let loader = loader_for(dir.path());
    std::fs::remove_file(dir.path().join("deaths.csv")).unwrap();

    assert!(matches!(loader.load("Poland"), Err(CovidError::Io(_))));
    assert!(loader.load_many(&["Poland", "Germany"]).is_empty());
}
