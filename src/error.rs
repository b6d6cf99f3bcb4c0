//! Error types returned by table operations.

use std::collections::TryReserveError;
use thiserror::Error;

/// Failure to make room for more entries. The table is unchanged.
#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("requested {requested} slots, more than the supported maximum of {max}")]
    CapacityOverflow { requested: usize, max: usize },

    #[error("failed to allocate {capacity} slots")]
    AllocFailed {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("key is already present")]
    DuplicateKey,

    #[error(transparent)]
    Reserve(#[from] ReserveError),
}
