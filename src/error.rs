use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted data: {0}")]
    Corruption(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Wrong number of arguments")]
    WrongNumberOfArgs,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Value is not an integer or out of range")]
    NotInteger,

    #[error("Increment or decrement would overflow")]
    IntegerOverflow,

    #[error("Index out of range")]
    IndexOutOfRange,

    #[error("Discard file has no free slot")]
    DiscardNoSpace,

    #[error("Compaction already running for {0}")]
    CompactionInProgress(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine is closed")]
    Closed,

    #[error("System time error: {0}")]
    SystemTime(String),
}

// Conversion for system time errors
impl From<std::time::SystemTimeError> for StorageError {
    fn from(err: std::time::SystemTimeError) -> Self {
        StorageError::SystemTime(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
