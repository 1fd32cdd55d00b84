//! Broker error taxonomy.

use sixtun_proto::ErrNo;
use sixtun_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed payload or fields; caller-fixable, never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Bad signature, expired timestamp or non-admin caller. Terminal;
    /// callers only ever see the generic message.
    #[error("authorization failed")]
    Auth,

    #[error("{0} not found")]
    NotFound(String),

    #[error("user [{0}] already has a tunnel session on server [{1}]")]
    AlreadyAssigned(i64, i64),

    #[error("user [{0}] has no tunnel session on server [{1}]")]
    NotAssigned(i64, i64),

    #[error("session pool exhausted on server [{0}]")]
    PoolExhausted(i64),

    /// Agent unreachable or reporting failure. Terminal for the
    /// operation, no automatic retry; local state may have diverged.
    #[error("tunnel agent failure: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// In-band result code reported to callers.
    pub fn errno(&self) -> ErrNo {
        match self {
            BrokerError::Validation(_) => ErrNo::Invalid,
            BrokerError::Auth => ErrNo::Forbidden,
            BrokerError::NotFound(_) | BrokerError::NotAssigned(_, _) => ErrNo::NotFound,
            BrokerError::AlreadyAssigned(_, _) => ErrNo::Invalid,
            BrokerError::PoolExhausted(_) => ErrNo::Again,
            BrokerError::Upstream(_) => ErrNo::Again,
            BrokerError::Store(_) => ErrNo::Invalid,
        }
    }
}
