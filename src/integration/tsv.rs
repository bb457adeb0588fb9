use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::NaiveDate;
use csv::{ReaderBuilder, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::covid::{CountryRecord, DailyStatistics, DateSeries};
use crate::error::{CovidError, Result};

pub const HEADER: [&str; 3] = ["Date", "Confirmed Cases", "Deaths"];

#[derive(Serialize, Deserialize, Debug)]
struct ExportRow {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Confirmed Cases")]
    confirmed_cases: u64,
    #[serde(rename = "Deaths")]
    deaths: u64,
}

/// Writes one tab-separated line per date of `record`, oldest first, after the header.
pub fn write_data<W: Write>(record: &CountryRecord, writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);

    writer.write_record(&HEADER)?;
    for date in record.all_dates() {
        let stats = record.statistics_on(date);
        writer.serialize(ExportRow {
            date,
            confirmed_cases: stats.confirmed_cases,
            deaths: stats.deaths,
        })?;
    }

    writer.flush()?;
    Ok(())
}

pub fn save_to_data_file<P: AsRef<Path>>(record: &CountryRecord, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);

    write_data(record, &mut writer)?;
    writer.flush()?;

    info!("Exported {} to {}", record.name(), path.display());
    Ok(())
}

/// Reads an export back into a series.
pub fn read_data<R: Read>(reader: R) -> Result<DateSeries> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let header = reader.headers()?;
    if header.iter().ne(HEADER.iter().copied()) {
        return Err(CovidError::MalformedRow {
            line: 1,
            message: format!("unexpected export header {:?}", header),
        });
    }

    let mut series = DateSeries::new();
    for row in reader.deserialize() {
        let row: ExportRow = row?;
        series.insert(row.date, DailyStatistics::new(row.confirmed_cases, row.deaths));
    }

    Ok(series)
}

pub fn read_data_file<P: AsRef<Path>>(path: P) -> Result<DateSeries> {
    read_data(File::open(path)?)
}

#[cfg(test)]
use crate::covid::date;

#[cfg(test)]
fn sample_leaf() -> CountryRecord {
    let series: DateSeries = vec![
        (date(2020, 3, 3), DailyStatistics::new(5, 1)),
        (date(2020, 3, 1), DailyStatistics::new(0, 0)),
        (date(2020, 3, 2), DailyStatistics::new(1, 0)),
    ].into_iter().collect();

    CountryRecord::leaf("Poland", series).unwrap()
}

#[test]
fn test_write_format() {
    let mut output = Vec::new();
    write_data(&sample_leaf(), &mut output).unwrap();

    assert_eq!(
        String::from_utf8(output).unwrap(),
        "Date\tConfirmed Cases\tDeaths\n2020-03-01\t0\t0\n2020-03-02\t1\t0\n2020-03-03\t5\t1\n"
    );
}

#[test]
fn test_empty_record_writes_header() {
    let record = CountryRecord::leaf("Atlantis", DateSeries::new()).unwrap();
    let mut output = Vec::new();
    write_data(&record, &mut output).unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "Date\tConfirmed Cases\tDeaths\n");
}

#[test]
fn test_export_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("poland.tsv");
    let record = sample_leaf();

    save_to_data_file(&record, &path).unwrap();
    let series = read_data_file(&path).unwrap();

    assert_eq!(series.all_dates(), record.all_dates());
    for date in record.all_dates() {
        assert_eq!(series.confirmed_cases_on(date), record.confirmed_cases_on(date));
        assert_eq!(series.deaths_on(date), record.deaths_on(date));
    }
}

#[test]
fn test_read_rejects_foreign_files() {
    let wrong_header = "Day\tCases\tDeaths\n2020-03-01\t1\t0\n";
    assert!(matches!(read_data(wrong_header.as_bytes()), Err(CovidError::MalformedRow { line: 1, .. })));

    let bad_count = "Date\tConfirmed Cases\tDeaths\n2020-03-01\tmany\t0\n";
    assert!(matches!(read_data(bad_count.as_bytes()), Err(CovidError::Csv(_))));
}
