use thiserror::Error;

/// Everything that can go wrong while building a tiling plan.
///
/// All of these are detected on the host before any core is launched.
/// Once a plan exists, the executor and merge protocol trust it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilingError {
    #[error("core count must be non-zero")]
    ZeroCoreCount,

    #[error("element size must be non-zero")]
    ZeroElementSize,

    #[error("living buffer multiplier must be non-zero")]
    ZeroLivingBuffers,

    /// Scratch cannot hold one aligned block per living buffer.
    #[error("scratch too small: {available} bytes available, {required} bytes required")]
    InsufficientScratch {
        available: usize,
        required: usize,
    },

    #[error("reserved scratch ({reserved} bytes) does not fit in platform scratch ({scratch} bytes)")]
    ReservedExceedsScratch {
        reserved: usize,
        scratch: usize,
    },

    #[error("buffer holds {actual} elements, tensor describes {expected}")]
    LengthMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("malformed plan buffer: {0}")]
    MalformedPlan(String),

    #[error("platform runtime unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("invalid platform value {key}={value}")]
    InvalidPlatformValue {
        key: String,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, TilingError>;
