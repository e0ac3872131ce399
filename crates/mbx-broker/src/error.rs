use mbx_fs::FsError;
use mbx_wire::WireError;

/// Errors from box-registry and dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker was configured with a non-positive parameter.
    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),

    /// The box name is empty, over-length, or contains a forbidden byte.
    #[error("invalid box name: {0:?}")]
    InvalidBoxName(String),

    /// A box with this name is already registered.
    #[error("box already exists: {0}")]
    BoxExists(String),

    /// No box with this name is registered.
    #[error("box not found: {0}")]
    BoxNotFound(String),

    /// Every registry slot is taken.
    #[error("box registry full")]
    RegistryFull,

    /// The box already has an active publisher.
    #[error("box already has a publisher: {0}")]
    PublisherPresent(String),

    /// A filesystem call failed during a box operation.
    #[error("backing store error: {0}")]
    BackingStore(#[from] FsError),

    /// A wire record failed to encode or decode.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The transport collaborator failed mid-session.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// The dispatcher queue is closed (broker shutting down).
    #[error("dispatcher queue closed")]
    QueueClosed,
}

/// Result alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
