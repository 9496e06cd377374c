//! The transform oracle consumed interface (spec §6).
//!
//! Coordinate-frame lookup is an external collaborator (spec §1): this
//! module only owns the trait boundary plus a trivial test double. A real
//! implementation (TF tree, pose graph, whatever the deployment uses)
//! lives outside this crate.

use crate::types::Vec3;

/// A rigid-body transform between two named frames at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: nalgebra::UnitQuaternion<f64>,
}

impl Transform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            translation: Vec3::zeros(),
            rotation: nalgebra::UnitQuaternion::identity(),
        }
    }

    /// Apply this transform to a point.
    pub fn apply(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    /// Rotate (but do not translate) a covariance matrix: `R * cov * R^T`.
    pub fn rotate_cov(&self, cov: &crate::types::Mat3) -> crate::types::Mat3 {
        let r = self.rotation.to_rotation_matrix().into_inner();
        r * cov * r.transpose()
    }
}

/// Consumed interface: map 3D points between named frames at a given time.
///
/// Production wiring (e.g. a TF2 buffer) is out of scope for this crate
/// (spec §1); callers inject whatever oracle fits their deployment.
/// A lookup is expected to internally enforce the 100ms timeout described
/// in spec §5 and report it as [`crate::error::PerceptionError::TransformUnavailable`].
pub trait TransformOracle: Send + Sync {
    /// Resolve the transform that maps a point in `source` into `target`
    /// at `time`.
    fn lookup(
        &self,
        target: &str,
        source: &str,
        time: f64,
    ) -> crate::error::Result<Transform>;
}

/// A fixed-offset oracle: every frame maps to every other frame via one
/// constant transform. Useful as a test double and as the default for the
/// demo binary, where no real frame tree exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTransformOracle {
    transform: Option<Transform>,
}

impl StaticTransformOracle {
    /// An oracle whose lookups always succeed with the identity transform.
    pub fn identity() -> Self {
        Self {
            transform: Some(Transform::identity()),
        }
    }

    /// An oracle whose lookups always succeed with `transform`.
    pub fn fixed(transform: Transform) -> Self {
        Self {
            transform: Some(transform),
        }
    }

    /// An oracle whose lookups always fail, for exercising the
    /// `TransformUnavailable` path.
    pub fn always_fails() -> Self {
        Self { transform: None }
    }
}

impl TransformOracle for StaticTransformOracle {
    fn lookup(&self, target: &str, source: &str, _time: f64) -> crate::error::Result<Transform> {
        self.transform
            .ok_or_else(|| crate::error::PerceptionError::TransformUnavailable {
                from_frame: source.to_string(),
                target: target.to_string(),
            })
    }
}
