use thiserror::Error;

/// Errors raised while building, reading or (de)serializing cells
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellError {
    /// Bit or reference budget of a builder exceeded
    #[error("Capacity exceeded: {0}")]
    Capacity(String),
    /// Value does not fit the declared width or domain
    #[error("Value out of range: {0}")]
    Range(String),
    /// Malformed input (magic, flags, lengths, checksum, labels, tags)
    #[error("Invalid format: {0}")]
    Format(String),
    /// Read past the end of a slice
    #[error("Not enough data: {0}")]
    Underflow(String),
    /// Broken cell graph ordering or root list
    #[error("Invalid topology: {0}")]
    Topology(String),
    /// Hashmap serialized without any entries
    #[error("Hashmap must contain at least one entry")]
    EmptyMap,
}

pub type Result<T> = std::result::Result<T, CellError>;

macro_rules! capacity {
    ($($arg:tt)*) => { $crate::tvm::error::CellError::Capacity(format!($($arg)*)) };
}

macro_rules! range {
    ($($arg:tt)*) => { $crate::tvm::error::CellError::Range(format!($($arg)*)) };
}

macro_rules! format_err {
    ($($arg:tt)*) => { $crate::tvm::error::CellError::Format(format!($($arg)*)) };
}

macro_rules! underflow {
    ($($arg:tt)*) => { $crate::tvm::error::CellError::Underflow(format!($($arg)*)) };
}

macro_rules! topology {
    ($($arg:tt)*) => { $crate::tvm::error::CellError::Topology(format!($($arg)*)) };
}

pub(crate) use {capacity, format_err, range, topology, underflow};
