//! Crate-wide error type.
//!
//! Mirrors the teacher's `DaqError` enum: a single `thiserror`-derived enum
//! consolidating every fallible boundary in the crate, with `#[from]` used
//! where an underlying error can be adopted unmodified. Every variant here
//! is local to one scan, one edge, or one measurement batch (spec §7) — none
//! of them is meant to be fatal to the calling process.

use thiserror::Error;

/// Convenience alias for results using the crate's error type.
pub type Result<T> = std::result::Result<T, PerceptionError>;

/// Primary error type for the perception core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PerceptionError {
    /// The transform oracle could not resolve `source` -> `target` at the
    /// requested time, or the lookup exceeded its timeout. The caller must
    /// discard the current scan/measurement batch and continue.
    #[error("transform unavailable: {from_frame} -> {target}")]
    TransformUnavailable {
        /// Frame the lookup was resolving from.
        from_frame: String,
        /// Frame the lookup was resolving to.
        target: String,
    },

    /// A configuration value was rejected and clamped to its valid range.
    /// [`crate::config::ParamStore::set`] still returns this so its own
    /// caller can log it, but it never propagates past
    /// [`crate::segmenter::Segmenter::update_param`], which swallows it.
    #[error("parameter '{name}' invalid: {reason}")]
    InvalidParameter {
        /// Name of the rejected parameter.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A matrix inversion needed for Mahalanobis gating or a Kalman update
    /// failed (singular covariance). The caller treats the affected edge as
    /// non-matching rather than propagating the failure.
    #[error("numerical failure in {context}")]
    NumericalFailure {
        /// What computation failed (e.g. "mahalanobis gating").
        context: String,
    },

    /// The downstream channel for a pipeline stage closed while a message
    /// was in flight; this crate's analogue of "no subscribers downstream".
    #[error("subscriber vanished for {stream}")]
    SubscriberVanished {
        /// Which stream lost its consumer.
        stream: String,
    },
}
