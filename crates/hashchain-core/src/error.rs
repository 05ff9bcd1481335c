use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("chain has no blocks")]
    EmptyChain,

    #[error("difficulty {difficulty} exceeds the {max} hex digits of a hash")]
    DifficultyOutOfRange { difficulty: u32, max: u32 },

    #[error("mining block {index} cancelled after {attempts} attempts")]
    MiningCancelled { index: u64, attempts: u64 },

    #[error("mining block {index} hit its deadline after {attempts} attempts")]
    MiningDeadlineExceeded { index: u64, attempts: u64 },

    #[error("nonce space exhausted for block {index}")]
    NonceExhausted { index: u64 },

    #[error("dump is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
