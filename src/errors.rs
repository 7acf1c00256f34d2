use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("incorrect configuration: {0}")]
    InvalidConfig(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("bls key already registered")]
    KeyAlreadyRegistered,
    #[error("bls public key mismatch")]
    BlsKeyMismatch,
    #[error("not enough arguments: {0}")]
    NotEnoughArguments(String),
    #[error("insufficient gas limit")]
    OutOfGas,
    #[error("transfer error: {0}")]
    Transfer(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
