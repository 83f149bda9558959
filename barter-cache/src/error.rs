use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `barter-cache`.
///
/// Cache `append` operations never fail; only order book sequencing can.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum CacheError {
    #[error(
        "\
        InvalidSequence: first_nonce {first_nonce} does not follow on from the \
        prev_nonce {prev_nonce} \
    "
    )]
    InvalidSequence { prev_nonce: u64, first_nonce: u64 },

    #[error(
        "SnapshotBehind: snapshot nonce {snapshot_nonce} precedes the first buffered delta {first_nonce}"
    )]
    SnapshotBehind { snapshot_nonce: u64, first_nonce: u64 },
}

impl CacheError {
    /// Determine if the [`OrderBook`](crate::books::OrderBook) must be re-synchronised from a
    /// fresh snapshot after this error.
    pub fn requires_resync(&self) -> bool {
        matches!(self, CacheError::InvalidSequence { .. })
    }
}
