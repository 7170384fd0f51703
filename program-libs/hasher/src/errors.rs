use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("Integer overflow, value too large")]
    IntegerOverflow,
    #[error("Empty input")]
    EmptyInput,
}
