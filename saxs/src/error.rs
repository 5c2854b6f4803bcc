//! Error types for this crate.

use thiserror::Error;

/// Catch-all error for this crate.
///
/// Every failure surfaced by the library is one of these kinds; leaf kernels
/// never fail (out-of-range distances are dropped, NaNs propagate to the
/// accumulators where they are detected by the validation layer).
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input data: unknown elements, NaN coordinates, non-monotonic
    /// data curves, empty molecules.
    #[error("invalid input: {0}")]
    Input(String),
    /// An inconsistent or out-of-range configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A numerical failure: singular linear systems, non-finite objective
    /// values for every evaluation, zero total scattering.
    #[error("numerical failure: {0}")]
    Numerical(String),
    /// An operation was attempted in the wrong order, or through a detached
    /// signaller handle.
    #[error("invalid state: {0}")]
    State(String),
    /// I/O failure. Only the checkpoint file can produce this, and it is
    /// non-fatal: a corrupt checkpoint is discarded and recomputed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type definition for results with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
