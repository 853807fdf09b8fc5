//! Error types surfaced across the collector's external interface.

use std::fmt;

/// Failure modes a host can observe from the collector (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// An allocation request could not be satisfied even after an emergency
    /// full collection; the embedder must shed memory or abort.
    OutOfMemory,
    /// A stale or out-of-range id was passed to a pool accessor.
    InvalidHandle,
    /// A finalizer re-entered the collector while one was already running
    /// (`GCTM` reentrancy guard in §4.7).
    FinalizerReentrant,
    /// An embedder tried to step or barrier a collector that is stopped.
    CollectorStopped,
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::OutOfMemory => write!(f, "out of memory: allocation exceeds heap limit"),
            GcError::InvalidHandle => write!(f, "object handle is stale or out of range"),
            GcError::FinalizerReentrant => write!(f, "finalizer invoked while another was running"),
            GcError::CollectorStopped => write!(f, "operation requires the collector to be running"),
        }
    }
}

impl std::error::Error for GcError {}

pub type GcResult<T> = Result<T, GcError>;

/// A finalizer raised an error while running. The collector never lets this
/// abort a sweep; it is reported to the host via [`crate::Collector::take_finalizer_warnings`]
/// instead (§7 "errors during finalization do not stop collection").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerError {
    pub object: crate::id::GcId,
    pub message: String,
}

impl fmt::Display for FinalizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "finalizer for {:?} failed: {}", self.object, self.message)
    }
}

impl std::error::Error for FinalizerError {}
