use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a topology or events run.
///
/// None of these abort a run: they are captured into the per-run error
/// channel and forwarded to the sink by the submitter.
#[derive(Error, Debug)]
pub enum Error {
    /// This agent is not the cluster leader; the run exits without output.
    #[error("not the cluster leader")]
    NotLeader,

    /// The API server could not serve a listing.
    #[error("{collector}: api server unavailable: {source}")]
    ApiUnavailable {
        collector: String,
        #[source]
        source: anyhow::Error,
    },

    /// The resume-token store could not be read or written.
    #[error("token store {key}: {source}")]
    TokenStore {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A Kubernetes event lacked a required field.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A relation referenced a component that was never emitted.
    #[error("dropped {count} relation(s) with unknown endpoints, first: {first}")]
    InvariantViolation { count: usize, first: String },

    /// The collect window elapsed before every task finished.
    #[error("collection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A Kubernetes Kind without a URN mapping.
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    /// A node reported no InternalIP address.
    #[error("node {0} has no internal ip, host binding skipped")]
    MissingInternalIp(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn api(collector: &str, source: anyhow::Error) -> Self {
        Error::ApiUnavailable {
            collector: collector.to_string(),
            source,
        }
    }
}
