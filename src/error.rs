use thiserror::Error;

/// The error taxonomy a reservation/delegation kernel can raise.
///
/// Each variant maps to exactly one recovery behavior; see
/// `kernel::dispatcher::Dispatcher::fail_and_notify` for how policy/allocator
/// errors are absorbed into a reservation's own `fail_notify` instead of
/// propagating to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {operation} is not valid from {state}")]
    InvalidState { operation: String, state: String },

    #[error("invalid slice transition: {0}")]
    InvalidSliceTransition(String),

    #[error("term does not extend previous term: {0}")]
    InvalidTerm(String),

    #[error("sequence number smaller than current: incoming={incoming}, current={current}")]
    SequenceSmaller { incoming: u64, current: u64 },

    #[error("request in progress, dropping new request at sequence {incoming}")]
    SequenceInProgress { incoming: u64 },

    #[error("duplicate request at sequence {sequence}")]
    DuplicateRequest { sequence: u64 },

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("unauthorized peer: expected {expected}, got {actual}")]
    UnauthorizedPeer { expected: String, actual: String },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("delegation not found: {0}")]
    DelegationNotFound(String),

    #[error("slice not found: {0}")]
    SliceNotFound(String),

    #[error("duplicate reservation: {0}")]
    DuplicateReservation(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl Error {
    /// Kernel bookkeeping errors propagate to the caller unchanged;
    /// everything else is a candidate for `fail_notify` at the reservation
    /// boundary instead.
    pub fn is_kernel_bookkeeping(&self) -> bool {
        matches!(
            self,
            Error::ReservationNotFound(_)
                | Error::DelegationNotFound(_)
                | Error::SliceNotFound(_)
                | Error::DuplicateReservation(_)
                | Error::InvalidArgument(_)
                | Error::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
