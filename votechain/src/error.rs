use thiserror::Error;

/// Crate-wide result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("votechain: invalid threshold {threshold} of {total} (need 2 <= k <= n <= 255)")]
    InvalidThreshold { threshold: usize, total: usize },

    #[error("votechain: cannot share an empty secret")]
    EmptySecret,

    #[error("votechain: custodian roster is full")]
    RosterFull,

    #[error("votechain: custodian roster incomplete: need {required}, have {registered}")]
    IncompleteRoster { required: usize, registered: usize },

    #[error("votechain: key ceremony already started")]
    CeremonyAlreadyStarted,

    #[error("votechain: key ceremony has not completed")]
    CeremonyNotCompleted,

    #[error("votechain: custodian {0} is already registered")]
    DuplicateCustodian(uuid::Uuid),

    #[error("votechain: unknown custodian {0}")]
    UnknownCustodian(uuid::Uuid),

    #[error("votechain: ceremony private data has been destroyed")]
    PrivateDataDestroyed,

    #[error("votechain: key generation failed: {0}")]
    KeyGenError(String),

    #[error("votechain: secret share combination failed: {0}")]
    CombineError(String),

    #[error("votechain: not enough secret shares: need {required}, found {provided}")]
    InsufficientShares { required: usize, provided: usize },

    #[error("votechain: decryption failed")]
    DecryptionFailed,

    #[error("votechain: encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("votechain: signing failed")]
    SigningFailed,

    #[error("votechain: merkle leaf not found")]
    LeafNotFound,

    #[error("votechain: receipt {0} not found")]
    ReceiptNotFound(uuid::Uuid),

    #[error("votechain: vote payload does not match block {index}")]
    VoteNotInBlock { index: u64 },

    #[error("votechain: forbidden: {0}")]
    Forbidden(&'static str),

    #[error("votechain: ledger for election {0} has no genesis block")]
    ChainNotInitialized(uuid::Uuid),

    #[error("votechain: block {index} does not extend the current tail")]
    ChainConflict { index: u64 },

    #[error("votechain: unknown validator {0}")]
    UnknownValidator(String),

    #[error("votechain: nonce search exhausted after {0} attempts")]
    MiningExhausted(u64),

    #[error("votechain: worker pool error: {0}")]
    WorkerPool(String),

    #[error("votechain: configuration error: {0}")]
    Config(String),

    #[error("votechain: RSA error: {0}")]
    RSAError(#[from] rsa::errors::Error),

    #[error("votechain: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),

    #[error("votechain: CBOR error: {0}")]
    CBOR(#[from] serde_cbor::Error),

    #[error("votechain: JSON error: {0}")]
    JSON(#[from] serde_json::Error),
}

impl Error {
    /// Message that is safe to hand to a voter or any other untrusted client.
    ///
    /// Never contains share material, key material or cryptographic internals.
    pub fn public_message(&self) -> &'static str {
        match self {
            Error::ChainNotInitialized(_)
            | Error::ChainConflict { .. }
            | Error::MiningExhausted(_)
            | Error::WorkerPool(_)
            | Error::UnknownValidator(_)
            | Error::SigningFailed => "vote could not be recorded, please retry",
            Error::LeafNotFound | Error::ReceiptNotFound(_) => "vote receipt could not be found",
            Error::Forbidden(_) => "operation not permitted",
            Error::Config(_) => "service is misconfigured",
            Error::InvalidThreshold { .. }
            | Error::RosterFull
            | Error::IncompleteRoster { .. }
            | Error::CeremonyAlreadyStarted
            | Error::CeremonyNotCompleted
            | Error::DuplicateCustodian(_)
            | Error::UnknownCustodian(_)
            | Error::PrivateDataDestroyed => "key ceremony request rejected",
            _ => "request could not be completed",
        }
    }
}

impl From<tokio::sync::AcquireError> for Error {
    fn from(e: tokio::sync::AcquireError) -> Self {
        Error::WorkerPool(e.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(e: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::WorkerPool(e.to_string())
    }
}
