use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[macro_use]
extern crate lazy_static;

use chrono::NaiveDate;
use clap::{App, Arg, ArgMatches};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
use config::Config;

mod covid;
use covid::{CountryRecord, CsvLoader, Metric};

mod error;
use error::{CovidError, Result};

mod integration;
use integration::tsv;

fn command_usage<'a, 'b>() -> App<'a, 'b> {
    const DEFAULT_CONFIG: &str = "config/sources.toml";
    const DEFAULT_METRIC: &str = "deaths";

    App::new("covid-country-stats")
    .about("Per-country COVID-19 statistics from confirmed cases and deaths time series")
    .arg(
        Arg::with_name("country")
            .value_name("COUNTRY")
            .multiple(true)
            .help("Countries to load, as named in the CSV header")
    )
    .arg(
        Arg::with_name("config")
            .short("c")
            .long("config")
            .takes_value(true)
            .default_value(DEFAULT_CONFIG)
            .help("Location of the source configuration (TOML)")
    )
    .arg(
        Arg::with_name("confirmed")
            .long("confirmed")
            .takes_value(true)
            .help("Confirmed cases CSV, overrides sources.confirmed_cases")
    )
    .arg(
        Arg::with_name("deaths")
            .long("deaths")
            .takes_value(true)
            .help("Deaths CSV, overrides sources.deaths")
    )
    .arg(
        Arg::with_name("rank")
            .short("r")
            .long("rank")
            .takes_value(false)
            .help("Rank the loaded countries by their totals between --start and --end")
    )
    .arg(
        Arg::with_name("by")
            .long("by")
            .takes_value(true)
            .possible_values(&["deaths", "confirmed"])
            .default_value(DEFAULT_METRIC)
            .help("Metric to rank by")
    )
    .arg(
        Arg::with_name("start")
            .long("start")
            .takes_value(true)
            .help("First day of the ranking window (inclusive), overrides ranking.start")
    )
    .arg(
        Arg::with_name("end")
            .long("end")
            .takes_value(true)
            .help("Last day of the ranking window (inclusive), overrides ranking.end")
    )
    .arg(
        Arg::with_name("export")
            .short("e")
            .long("export")
            .takes_value(true)
            .conflicts_with("export-dir")
            .help("Write the first loaded country as tab-separated text to this file")
    )
    .arg(
        Arg::with_name("export-dir")
            .long("export-dir")
            .takes_value(true)
            .help("Write every loaded country as <country>.tsv into this directory")
    )
}

/// The config file is optional when both sources are given on the command line.
fn read_config(matches: &ArgMatches) -> Result<Config> {
    let path = matches.value_of("config").unwrap_or_default();

    match Config::from_file(path) {
        Ok(config) => { Ok(config) },
        Err(CovidError::FileNotReadable { .. }) if matches.occurrences_of("config") == 0 => {
            info!("No configuration at {}, using command line sources only.", path);
            Ok(Config::default())
        },
        Err(e) => { Err(e) }
    }
}

fn window_date(matches: &ArgMatches, name: &'static str, fallback: Option<NaiveDate>) -> Result<NaiveDate> {
    match matches.value_of(name) {
        Some(text) => {
            covid::parse_date(text).ok_or_else(|| {
                CovidError::InvalidArgument(format!("--{} expects a date, got '{}'", name, text))
            })
        },
        None => {
            fallback.ok_or(CovidError::MissingSetting(name))
        }
    }
}

fn export_name(record: &CountryRecord) -> String {
    let name: String = record
        .name()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();

    format!("{}.tsv", name)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = read_config(matches)?;
    let sources = config.source_files(
        matches.value_of("confirmed").map(Path::new),
        matches.value_of("deaths").map(Path::new),
    )?;
    info!(
        "Reading confirmed cases from {} and deaths from {}",
        sources.confirmed_cases().display(),
        sources.deaths().display()
    );

    let countries: Vec<&str> = matches.values_of("country").map(|values| values.collect()).unwrap_or_default();
    let loader = CsvLoader::new(sources);
    let mut records = loader.load_many(&countries);

    if records.len() < countries.len() {
        warn!("Loaded {} of {} requested countries.", records.len(), countries.len());
    }

    if matches.is_present("rank") {
        let start = window_date(matches, "start", config.ranking.start)?;
        let end = window_date(matches, "end", config.ranking.end)?;
        let metric: Metric = matches.value_of("by").unwrap_or("deaths").parse().map_err(CovidError::InvalidArgument)?;

        covid::sort_by(&mut records, metric, start, end);

        println!("{} between {} and {}:", metric, start, end);
        for ranking in covid::ranking::rank(&records, metric, start, end) {
            println!("{}", ranking);
        }
    }

    if let Some(path) = matches.value_of("export") {
        match records.first() {
            Some(record) => { tsv::save_to_data_file(record, path)? },
            None => { warn!("Nothing to export, no country was loaded.") }
        }
    }

    if let Some(dir) = matches.value_of("export-dir") {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir)?;

        for record in &records {
            tsv::save_to_data_file(record, dir.join(export_name(record)))?;
        }
    }

    Ok(())
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();

    let matches = command_usage().get_matches();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        process::exit(1);
    }
}

#[test]
fn test_export_name() {
    let record = CountryRecord::leaf("Korea, South", covid::DateSeries::new()).unwrap();

    assert_eq!(export_name(&record), "Korea__South.tsv");
}

#[test]
fn test_command_usage() {
    let matches = command_usage().get_matches_from(vec![
        "covid-country-stats", "Poland", "Germany", "--rank", "--start", "2020-03-01", "--by", "confirmed",
    ]);

    assert_eq!(matches.values_of("country").unwrap().collect::<Vec<_>>(), vec!["Poland", "Germany"]);
    assert!(matches.is_present("rank"));
    assert_eq!(matches.value_of("config"), Some("config/sources.toml"));
    assert_eq!(window_date(&matches, "start", None).unwrap(), NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
    assert!(matches!(window_date(&matches, "end", None), Err(CovidError::MissingSetting("end"))));
}

#[test]
fn test_run_without_loaded_countries() {
    let dir = tempfile::tempdir().unwrap();
    let confirmed_cases = dir.path().join("confirmed_cases.csv");
    let deaths = dir.path().join("deaths.csv");
    fs::write(&confirmed_cases, "Country/Region,Poland\n2020-03-01,1\n").unwrap();
    fs::write(&deaths, "Country/Region,Poland\n2020-03-01,0\n").unwrap();
    let export = dir.path().join("export.tsv");

    let args: Vec<&std::ffi::OsStr> = vec![
        "covid-country-stats".as_ref(), "Neverland".as_ref(),
        "--confirmed".as_ref(), confirmed_cases.as_os_str(),
        "--deaths".as_ref(), deaths.as_os_str(),
        "--export".as_ref(), export.as_os_str(),
    ];
    let matches = command_usage().get_matches_from(args);

    assert!(run(&matches).is_ok());
    assert!(!export.exists());
}
