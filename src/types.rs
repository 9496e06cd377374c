//! Shared data model (spec §3).
//!
//! `Vec3`/`Mat3` are `nalgebra` aliases rather than hand-rolled — every
//! sibling tracker in the retrieval pack (Mahalanobis-gated multi-object
//! trackers, LiDAR pipelines) reaches for `nalgebra` for exactly this.

use serde::{Deserialize, Serialize};

/// 3D column vector, used for positions and measurement means.
pub type Vec3 = nalgebra::Vector3<f64>;
/// 3x3 symmetric covariance / rotation matrix.
pub type Mat3 = nalgebra::Matrix3<f64>;

/// One LiDAR return.
///
/// `ring` selects a per-ring circular buffer; for 2D scanners `ring` is
/// always `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
    /// Range from the sensor origin.
    pub distance: f32,
    pub ring: u16,
}

/// A point in the per-ring circular buffer, carrying its raw return plus
/// the four median-filter outputs.
///
/// `dist_noise`/`dist_object`/`intens_noise`/`intens_object` start as `NaN`
/// and become valid once the filter cursor has passed this sample with
/// enough neighbor coverage (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MedianSample {
    pub point: InputPoint,
    pub dist_noise: f32,
    pub dist_object: f32,
    pub intens_noise: f32,
    pub intens_object: f32,
}

impl MedianSample {
    /// Wrap a raw point with not-yet-computed median fields.
    pub fn new(point: InputPoint) -> Self {
        Self {
            point,
            dist_noise: f32::NAN,
            dist_object: f32::NAN,
            intens_noise: f32::NAN,
            intens_object: f32::NAN,
        }
    }
}

/// Output of the segmenter: a labeled 3D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// `1` iff the point was classified as an obstacle.
    pub segment: u8,
}

/// `debug_obstacle_cloud`: an `OutputPoint` with its scoring internals
/// attached, emitted only when `publish_debug_cloud` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugOutputPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
    pub ring: u16,
    pub segmentation: f32,
    pub segmentation_distance: f32,
    pub segmentation_intensity: f32,
}

/// `filtered_cloud`: a debug point scaled by its filter factor
/// (`dist_noise / point.distance`), in the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub segmentation: f32,
    pub ring: u16,
}

/// Header common to every input/output stream: originating frame and the
/// time the data was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub frame_id: String,
    pub timestamp: f64,
}

/// The single-plane scanner input stream (spec §6): the segmenter projects
/// this to 3D itself via a [`crate::transform::TransformOracle`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawLaserScan {
    pub ranges: Vec<f32>,
    pub intensities: Vec<f32>,
    pub angle_min: f32,
    pub angle_increment: f32,
    pub time_increment: f32,
    pub header: Header,
}

/// One 3D detection pose fed to the [`crate::measurement::MeasurementFrontEnd`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionPose {
    pub position: Vec3,
}

/// A detection batch's header.
pub type DetectionHeader = Header;

/// A single object measurement in a common spatial frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub pos: Vec3,
    pub cov: Mat3,
    /// `'U'` for unknown; the front end never classifies.
    pub color: char,
    pub frame: String,
    pub time: f64,
}

/// A tracked object's current belief: a Gaussian over 3D position.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub id: u64,
    pub mean: Vec3,
    pub cov: Mat3,
    pub born_at: f64,
    pub last_seen_at: f64,
    pub times_seen: u32,
    pub is_active: bool,
}
