use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EchoError {
    #[error("transaction already succeeded and cannot run again")]
    TransactionComplete,
}
