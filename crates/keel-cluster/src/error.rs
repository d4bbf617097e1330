use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("error in IO: {0}")]
    IoError(#[from] std::io::Error),
    #[error("error in codec: {0}")]
    CodecError(#[from] serde_json::Error),
    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

impl From<keel_common::error::CommonError> for ClusterError {
    fn from(error: keel_common::error::CommonError) -> Self {
        match error {
            keel_common::error::CommonError::InvalidArgument(x) => ClusterError::InvalidArgument(x),
            keel_common::error::CommonError::InternalError(x) => ClusterError::InternalError(x),
        }
    }
}
