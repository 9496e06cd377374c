//! Ring-streaming thin-obstacle segmenter and multi-hypothesis tracker for
//! 3D LiDAR point clouds.
//!
//! Two independent stages live here:
//! - [`segmenter`]: labels each incoming point obstacle/background via a
//!   double sliding-window median filter over a per-ring circular buffer.
//! - [`tracker`]: groups per-scan detections into measurements
//!   ([`measurement`]) and maintains Kalman-filtered hypotheses gated by
//!   Mahalanobis distance ([`tracker`]).
//!
//! [`pipeline`] wires both stages to a `tokio` channel front end; callers
//! that already own an event loop can call [`segmenter::Segmenter`] and
//! [`tracker::HypothesisTracker`] directly instead.

pub mod config;
pub mod error;
pub mod measurement;
pub mod median;
pub mod pipeline;
pub mod ring_buffer;
pub mod segmenter;
pub mod tracker;
pub mod transform;
pub mod types;

pub use error::{PerceptionError, Result};
pub use segmenter::Segmenter;
pub use tracker::HypothesisTracker;
