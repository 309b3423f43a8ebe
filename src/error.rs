use thiserror::Error;

/// Input errors raised at the strategy / simulator boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("price series is empty")]
    EmptySeries,
    #[error("required column {0} is missing")]
    MissingColumn(String),
    #[error("timestamps must be strictly increasing (bar {index} at {date})")]
    NonMonotonicTimestamps { index: usize, date: String },
    #[error("bar {index} has an invalid {field} price {value}")]
    InvalidPrice {
        index: usize,
        field: &'static str,
        value: f64,
    },
    #[error("column {name} has {actual} rows, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("no strategy selected")]
    NoStrategySelected,
}

/// Failures of the external forecast service. None of these abort a backtest.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("forecast unavailable: {0}")]
    Unavailable(String),
    #[error("forecast timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("forecast transport failure: {0}")]
    Transport(String),
    #[error("forecast response could not be decoded: {0}")]
    Decode(String),
}
