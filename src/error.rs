use thiserror::Error;

use crate::common::Endpoint;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("not leader (known leader: {leader:?})")]
    NotLeader { leader: Option<Endpoint> },

    #[error("cannot replicate: {0}")]
    CannotReplicate(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("indeterminate state: {0}")]
    IndeterminateState(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RaftError {
    /// True for errors that leave the request outcome unknown rather than
    /// definitely not applied.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, RaftError::IndeterminateState(_))
    }
}

pub type Result<T> = std::result::Result<T, RaftError>;
