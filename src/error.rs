use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchlinkError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Compile error: {0}")]
    Compile(String),
    #[error("Search error: {0}")]
    Search(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, SearchlinkError>;

// Helper conversions
impl From<rusqlite::Error> for SearchlinkError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}

impl From<::config::ConfigError> for SearchlinkError {
    fn from(e: ::config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

impl From<reqwest::Error> for SearchlinkError {
    fn from(e: reqwest::Error) -> Self { Self::Search(e.to_string()) }
}

impl From<serde_json::Error> for SearchlinkError {
    fn from(e: serde_json::Error) -> Self { Self::Search(format!("invalid search response: {e}")) }
}

impl<R: pest::RuleType> From<pest::error::Error<R>> for SearchlinkError {
    fn from(e: pest::error::Error<R>) -> Self {
        let (line, col) = match e.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        Self::Parse { message: e.to_string(), line: Some(line), col: Some(col) }
    }
}
