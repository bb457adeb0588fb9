use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovidError {
    #[error("File not readable: {}: {source}", path.display())]
    FileNotReadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Country not found: {0}")]
    CountryNotFound(String),
    #[error("Malformed row at line {line}: {message}")]
    MalformedRow { line: usize, message: String },
    #[error("Missing setting: {0}")]
    MissingSetting(&'static str),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Region name must not be blank")]
    InvalidName,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CovidError>;

#[test]
fn test_messages_name_the_subject() {
    assert_eq!(CovidError::CountryNotFound("Neverland".to_owned()).to_string(), "Country not found: Neverland");

    let error = CovidError::FileNotReadable {
        path: PathBuf::from("data/missing.csv"),
        source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
    };
    assert_eq!(error.to_string(), "File not readable: data/missing.csv: no such file");
}
