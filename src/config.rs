use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{CovidError, Result};

/// The pair of time-series documents every load reads from.
///
/// Both paths are checked for readability up front, so a `SourceFiles` value
/// always names two files that could be opened when it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFiles {
    confirmed_cases: PathBuf,
    deaths: PathBuf,
}

impl SourceFiles {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(confirmed_cases: P, deaths: Q) -> Result<SourceFiles> {
        Ok(SourceFiles {
            confirmed_cases: readable(confirmed_cases.as_ref())?,
            deaths: readable(deaths.as_ref())?,
        })
    }

    /// Replaces both paths, or neither when one of them is not readable.
    pub fn set_files<P: AsRef<Path>, Q: AsRef<Path>>(&mut self, confirmed_cases: P, deaths: Q) -> Result<()> {
        *self = SourceFiles::new(confirmed_cases, deaths)?;
        Ok(())
    }

    pub fn confirmed_cases(&self) -> &Path {
        &self.confirmed_cases
    }

    pub fn deaths(&self) -> &Path {
        &self.deaths
    }
}

fn readable(path: &Path) -> Result<PathBuf> {
    let not_readable = |source: io::Error| CovidError::FileNotReadable { path: path.to_owned(), source };

    let file = File::open(path).map_err(not_readable)?;
    if !file.metadata().map_err(not_readable)?.is_file() {
        return Err(not_readable(io::Error::new(io::ErrorKind::Other, "not a regular file")));
    }

    Ok(path.to_owned())
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SourcesSection {
    pub confirmed_cases: PathBuf,
    pub deaths: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RankingSection {
    pub start: Option<NaiveDate>, // quoted, "2020-03-01"
    pub end: Option<NaiveDate>,
}

/// Contents of the TOML configuration file. Every section is optional, the
/// command line can supply or override each value.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub sources: Option<SourcesSection>,
    #[serde(default)]
    pub ranking: RankingSection,
}

impl Config {
    pub fn parse(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CovidError::FileNotReadable {
            path: path.to_owned(),
            source,
        })?;

        Config::parse(&text)
    }

    /// Resolves the source pair, letting either override win over the file.
    pub fn source_files(&self, confirmed_cases: Option<&Path>, deaths: Option<&Path>) -> Result<SourceFiles> {
        let confirmed_cases = match (confirmed_cases, self.sources.as_ref()) {
            (Some(path), _) => { path },
            (None, Some(sources)) => { sources.confirmed_cases.as_path() },
            (None, None) => { return Err(CovidError::MissingSetting("sources.confirmed_cases")) }
        };
        let deaths = match (deaths, self.sources.as_ref()) {
            (Some(path), _) => { path },
            (None, Some(sources)) => { sources.deaths.as_path() },
            (None, None) => { return Err(CovidError::MissingSetting("sources.deaths")) }
        };

        SourceFiles::new(confirmed_cases, deaths)
    }
}

#[cfg(test)]
fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_source_files_require_readable_paths() {
    let dir = tempfile::tempdir().unwrap();
    let confirmed = write_file(dir.path(), "confirmed.csv", "Country/Region,Poland\n");
    let deaths = write_file(dir.path(), "deaths.csv", "Country/Region,Poland\n");

    let sources = SourceFiles::new(&confirmed, &deaths).unwrap();
    assert_eq!(sources.confirmed_cases(), confirmed.as_path());
    assert_eq!(sources.deaths(), deaths.as_path());

    let missing = dir.path().join("missing.csv");
    match SourceFiles::new(&confirmed, &missing) {
        Err(CovidError::FileNotReadable { path, .. }) => { assert_eq!(path, missing) },
        other => { panic!("expected FileNotReadable, got {:?}", other) }
    }

    assert!(matches!(SourceFiles::new(dir.path(), &deaths), Err(CovidError::FileNotReadable { .. })));
}

#[test]
fn test_set_files_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let confirmed = write_file(dir.path(), "confirmed.csv", "");
    let deaths = write_file(dir.path(), "deaths.csv", "");
    let other_confirmed = write_file(dir.path(), "confirmed_2.csv", "");
    let other_deaths = write_file(dir.path(), "deaths_2.csv", "");

    let mut sources = SourceFiles::new(&confirmed, &deaths).unwrap();
    let before = sources.clone();

    let result = sources.set_files(&other_confirmed, dir.path().join("nope.csv"));
    assert!(matches!(result, Err(CovidError::FileNotReadable { .. })));
    assert_eq!(sources, before);

    sources.set_files(&other_confirmed, &other_deaths).unwrap();
    assert_eq!(sources.confirmed_cases(), other_confirmed.as_path());
    assert_eq!(sources.deaths(), other_deaths.as_path());
}

#[test]
fn test_parse_config() {
    let config = Config::parse(r#"
        [sources]
        confirmed_cases = "data/confirmed_cases.csv"
        deaths = "data/deaths.csv"

        [ranking]
        start = "2020-03-01"
        end = "2020-03-31"
    "#).unwrap();

    let sources = config.sources.unwrap();
    assert_eq!(sources.confirmed_cases, PathBuf::from("data/confirmed_cases.csv"));
    assert_eq!(sources.deaths, PathBuf::from("data/deaths.csv"));
    assert_eq!(config.ranking.start, NaiveDate::from_ymd_opt(2020, 3, 1));
    assert_eq!(config.ranking.end, NaiveDate::from_ymd_opt(2020, 3, 31));

    let empty = Config::parse("").unwrap();
    assert_eq!(empty, Config::default());

    assert!(matches!(Config::parse("[sources]\nconfirmed_cases = 3"), Err(CovidError::Config(_))));
}

#[test]
fn test_source_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let confirmed = write_file(dir.path(), "confirmed.csv", "");
    let deaths = write_file(dir.path(), "deaths.csv", "");
    let override_deaths = write_file(dir.path(), "deaths_override.csv", "");

    let config = Config {
        sources: Some(SourcesSection { confirmed_cases: confirmed.clone(), deaths }),
        ranking: RankingSection::default(),
    };

    let sources = config.source_files(None, Some(override_deaths.as_path())).unwrap();
    assert_eq!(sources.confirmed_cases(), confirmed.as_path());
    assert_eq!(sources.deaths(), override_deaths.as_path());

    let result = Config::default().source_files(Some(confirmed.as_path()), None);
    assert!(matches!(result, Err(CovidError::MissingSetting("sources.deaths"))));
}
