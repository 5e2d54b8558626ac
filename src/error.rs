use thiserror::Error;

/// Errors surfaced by the core subsystems.
///
/// Parse, lifecycle, and lookup errors propagate to the caller; extraction
/// and compression errors are absorbed with partial success; storage
/// corruption aborts the process before this type is ever constructed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("description file error: {0}")]
    ConfigLoad(String),

    #[error("statement prepare failed: {0}")]
    DbPrepare(String),

    #[error("query failed: {0}")]
    DbQuery(String),

    #[error("database busy after {attempts} attempts")]
    DbBusy { attempts: u32 },

    #[error("metadata extraction returned no data for {0}")]
    ExtractionFailed(String),

    #[error("text compression failed: {0}")]
    Compression(String),

    #[error("query parse error at {line}:{column}: {message}")]
    QueryParse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("service '{0}' is not registered")]
    UnknownService(String),

    #[error("field '{0}' is not registered")]
    UnknownField(String),

    #[error("search {0} is closed")]
    SearchClosed(String),

    #[error("search {0} is not active")]
    SearchNotActive(String),

    #[error("session id {0} is not registered")]
    SessionIdNotRegistered(String),

    #[error("search id {0} is not registered")]
    SearchIdNotRegistered(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::QueryParse {
            line,
            column,
            message: message.into(),
        }
    }
}
