use thiserror::Error;

/// Why a trace parent could not be read from call metadata.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ExtractError {
    /// The metadata key is absent.
    #[error("metadata key {0} is missing")]
    Missing(&'static str),

    /// The value is not a lower-case, non-zero hex identifier of the expected width.
    #[error("metadata key {key} has malformed value {value:?}")]
    Malformed {
        /// The offending key.
        key: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}
