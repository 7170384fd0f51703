use std::io;

use solana_client::client_error::ClientError;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("TransactionError: {0}")]
    TransactionError(#[from] Box<TransactionError>),

    #[error("ClientError: {0}")]
    ClientError(#[from] Box<ClientError>),

    #[error("IoError: {0}")]
    IoError(#[from] Box<io::Error>),

    #[error("Error: `{0}`")]
    CustomError(String),
}

impl From<TransactionError> for RpcError {
    fn from(err: TransactionError) -> Self {
        RpcError::TransactionError(Box::new(err))
    }
}

impl From<ClientError> for RpcError {
    fn from(err: ClientError) -> Self {
        RpcError::ClientError(Box::new(err))
    }
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        RpcError::IoError(Box::new(err))
    }
}

impl RpcError {
    /// Whether the error is a transport-level failure worth retrying, as
    /// opposed to a remote verdict about the transaction itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::ClientError(_) | RpcError::IoError(_))
    }

    /// Whether the error means the transaction's validity anchor elapsed
    /// before the ledger accepted it.
    pub fn is_blockhash_expired(&self) -> bool {
        match self {
            RpcError::TransactionError(err) => {
                matches!(**err, TransactionError::BlockhashNotFound)
            }
            RpcError::CustomError(message) => message.to_lowercase().contains("blockhash"),
            _ => false,
        }
    }
}
