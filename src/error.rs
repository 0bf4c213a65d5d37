use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoError {
    #[error("Invalid grade {0}: expected a value between 0 and 5")]
    InvalidGrade(i64),

    #[error("Invalid priority {0}: expected a percentage between 0 and 100")]
    InvalidPriority(f64),

    #[error("Failed to read from storage: {0}")]
    PersistenceRead(String),

    #[error("Failed to write to storage: {0}")]
    PersistenceWrite(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, MemoError>;
