use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A single input or intermediate line could not be parsed. Callers skip
    /// the record and carry on.
    #[error("malformed line {line:?}: {reason}")]
    DataFormat { line: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The final merge hit data it cannot rank. No output is written.
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn data_format(line: &str, reason: impl Into<String>) -> Self {
        Error::DataFormat {
            line: line.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::DataFormat { .. })
    }
}
