use thiserror::Error;

/// Why an interpreter could not resolve a span. The span is dropped from
/// the interpreted trace.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpretError {
    #[error("{interpreter}: required meta {key:?} is missing or empty")]
    MissingMeta {
        interpreter: &'static str,
        key: &'static str,
    },

    #[error("{interpreter}: malformed arn {arn:?}")]
    InvalidArn {
        interpreter: &'static str,
        arn: String,
    },

    #[error("{interpreter}: malformed url {url:?}")]
    InvalidUrl {
        interpreter: &'static str,
        url: String,
    },

    #[error("{interpreter}: unsupported operation {operation:?}")]
    UnsupportedOperation {
        interpreter: &'static str,
        operation: String,
    },
}
