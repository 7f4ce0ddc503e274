pub mod bpf;
pub mod config;
pub mod controller;
pub mod registry;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A kernel map call failed for a reason other than a missing key.
    #[error("map i/o error: {0}")]
    MapIo(String),

    /// Lookup miss. Expected in many flows and handled at the call site.
    #[error("not found")]
    NotFound,

    #[error("registry i/o error: {0}")]
    RegistryIo(#[source] std::io::Error),

    /// Input resource is missing required fields; dropped with a log.
    #[error("malformed resource: {0}")]
    Malformed(String),

    /// Table state disagrees with what the operation assumes; logged and the
    /// resource is skipped.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<aya::maps::MapError> for Error {
    fn from(err: aya::maps::MapError) -> Self {
        match err {
            aya::maps::MapError::KeyNotFound => Error::NotFound,
            aya::maps::MapError::SyscallError(ref e)
                if e.io_error.kind() == std::io::ErrorKind::NotFound =>
            {
                Error::NotFound
            }
            other => Error::MapIo(other.to_string()),
        }
    }
}
