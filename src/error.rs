use thiserror::Error;

/// Every fallible path through the engine.
///
/// `NotFound` is deliberately absent: a missing key is an ordinary negative
/// result (`Option::None`), not an error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocError {
    /// Couldn't open the backing file
    #[error("opening the backing file failed")]
    Open(#[source] std::io::Error),
    /// Couldn't lock the backing file
    #[error("failed to lock the backing file for exclusive use")]
    Lock(#[source] std::io::Error),
    /// Couldn't synchronize to the backing file
    #[error("synchronizing to the backing file failed")]
    Sync(#[source] std::io::Error),
    /// Couldn't resize the backing file
    #[error("can't resize the backing file: have 0x{size:x} bytes, wanted 0x{requested:x} bytes")]
    ResizeFailed {
        size: u64,
        requested: u64,
        #[source]
        source: std::io::Error,
    },
    /// Couldn't map or re-map the backing region
    #[error("can't map memory, tried to get 0x{requested:x} bytes")]
    AllocFailed {
        requested: u64,
        #[source]
        source: std::io::Error,
    },
    /// Caller passed an argument the engine can't act on
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A derived offset or header failed validation
    #[error("data corruption: {0}")]
    DataCorruption(&'static str),
    /// Other, miscellaneous errors
    #[error("{0}")]
    Other(&'static str),
}
