use thiserror::Error;

use crate::address::Address;

/// Errors surfaced while admitting a basic block into the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The block source could not produce a new executable block.
    #[error("cannot allocate executable block: {0}")]
    Alloc(anyhow::Error),
    /// A single sequence exceeds the capacity of an empty executable
    /// block. The buffer configuration cannot hold this translation;
    /// callers cannot recover.
    #[error("sequence at {0} is larger than an empty executable block")]
    SequenceTooLarge(Address),
}

impl CacheError {
    pub fn alloc<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Alloc(e.into())
    }
}
