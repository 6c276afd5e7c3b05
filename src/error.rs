use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Load(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

/// Rejections raised while building `MatchSettings`. No match state exists
/// when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingsError {
    #[error("A match needs between {min} and {max} teams, got {got}")]
    TeamCount { min: usize, max: usize, got: usize },
    #[error("Team '{0}' was selected more than once")]
    DuplicateTeam(String),
    #[error("Team '{0}' is not part of the selected theme")]
    UnknownTeam(String),
    #[error("Points required must be between {min} and {max}, got {got}")]
    PointsOutOfRange { min: u32, max: u32, got: u32 },
    #[error("Round duration must be between {min} and {max} seconds, got {got}")]
    DurationOutOfRange { min: u64, max: u64, got: u64 },
    #[error("Theme is invalid: {0}")]
    Theme(#[from] ThemeError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThemeError {
    #[error("Theme '{name}' has {got} words, at least {min} are required")]
    TooFewWords { name: String, min: usize, got: usize },
    #[error("Word '{0}' appears more than once (case-insensitive)")]
    DuplicateWord(String),
    #[error("Word '{word}' is longer than {max} characters")]
    WordTooLong { word: String, max: usize },
    #[error("Word '{word}' has more than {max} space-separated tokens")]
    TooManyTokens { word: String, max: usize },
    #[error("Word list contains an empty entry")]
    EmptyWord,
    #[error("Theme '{name}' has {got} teams, expected {expected}")]
    TeamCount {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("Team '{0}' appears more than once")]
    DuplicateTeam(String),
    #[error("Theme {0} not found")]
    NotFound(Uuid),
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Failed to read theme file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to fetch themes from '{url}': {source}")]
    HttpFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Theme data parsing error: {0}")]
    Parse(String),
    #[error("Theme source configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("No match in progress")]
    NoMatch,
    #[error("Cannot {action} while the round is {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: &'static str,
    },
    #[error("Round outcome rejected: {0}")]
    OutcomeRejected(String),
    #[error("Match settings rejected: {0}")]
    Settings(#[from] SettingsError),
    #[error("Match session is no longer running")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Match store I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Match state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Persisted match is inconsistent: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Ledger returned status {status} for {operation}")]
    Status {
        operation: &'static str,
        status: u16,
    },
    #[error("No remote record exists for this match yet")]
    MissingRecord,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Theme content error: {0}")]
    Content(#[from] ContentError),
    #[error("Theme error: {0}")]
    Theme(#[from] ThemeError),
    #[error("Match error: {0}")]
    Match(#[from] MatchError),
    #[error("Match store error: {0}")]
    Store(#[from] StoreError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Configuration parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
