use serde_derive::{Deserialize, Serialize};

/// A mvkv result, returning the crate-wide Error type.
pub type CResult<T> = std::result::Result<T, Error>;

/// mvkv errors. Everything except Internal is part of the store contract and
/// must be handled by the caller; the store itself never retries and never
/// swallows an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// commit or rollback was called while no transaction was open.
    NoActiveTransaction,

    /// An outermost commit found a committed version of this key newer than
    /// the transaction's snapshot (first-committer-wins). The transaction's
    /// pending writes are discarded; the caller must start over.
    WriteConflict(
        #[serde(with = "serde_bytes")]
        Vec<u8>,
    ),

    /// A mirror I/O failure. The in-memory state stays consistent, so the
    /// caller decides whether to retry the flush.
    Io(String),

    /// An internal invariant violation, i.e. a bug.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoActiveTransaction => write!(f, "no active transaction"),
            Error::WriteConflict(key) => {
                write!(f, "write conflict on key {}", String::from_utf8_lossy(key))
            }
            Error::Io(msg) => write!(f, "io error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
