use thiserror::Error;

/// Errors surfaced by encode/decode/recode contexts.
///
/// Per-packet processing never fails fatally; linearly dependent packets are
/// silently absorbed. Errors are reserved for construction, scheduling and
/// persistence paths.
#[derive(Debug, Error)]
pub enum SncError {
    #[error("invalid code parameter: {0}")]
    InvalidParameter(String),
    #[error("random grouping failed to find a duplicate-free index for subgeneration {gid}")]
    GroupingFailed { gid: usize },
    #[error("{kind} decoder does not apply to {code} codes")]
    IncompatibleDecoder { kind: &'static str, code: &'static str },
    #[error("recode buffer has no packets to schedule")]
    BufferExhausted,
    #[error("recovered data is incomplete: packet {0} is still missing")]
    DataIncomplete(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("corrupt decoder state: {0}")]
    CorruptState(String),
}
