//! Measurement front end (spec §4.4): turns detection poses into
//! [`Measurement`]s in a common frame.

use crate::error::Result;
use crate::transform::TransformOracle;
use crate::types::{DetectionHeader, DetectionPose, Mat3, Measurement};

/// Builds [`Measurement`]s from raw detection poses.
pub struct MeasurementFrontEnd;

impl MeasurementFrontEnd {
    /// Turn a batch of detection poses into measurements carrying an
    /// isotropic covariance of `sigma^2` (spec §4.4, open question (c)).
    pub fn build_measurements(
        poses: &[DetectionPose],
        header: &DetectionHeader,
        sigma: f64,
    ) -> Vec<Measurement> {
        let cov = Mat3::identity() * (sigma * sigma);
        poses
            .iter()
            .map(|p| Measurement {
                pos: p.position,
                cov,
                color: 'U',
                frame: header.frame_id.clone(),
                time: header.timestamp,
            })
            .collect()
    }

    /// Re-express every measurement in `target_frame`. Per spec §4.4, a
    /// single lookup failure discards the whole batch rather than
    /// partially transforming it, since a tracker step mixing frames is
    /// worse than skipping a scan.
    pub fn transform_to_frame(
        measurements: Vec<Measurement>,
        target_frame: &str,
        oracle: &dyn TransformOracle,
    ) -> Result<Vec<Measurement>> {
        let mut out = Vec::with_capacity(measurements.len());
        for m in measurements {
            if m.frame == target_frame {
                out.push(m);
                continue;
            }
            let transform = oracle.lookup(target_frame, &m.frame, m.time)?;
            out.push(Measurement {
                pos: transform.apply(m.pos),
                cov: transform.rotate_cov(&m.cov),
                color: m.color,
                frame: target_frame.to_string(),
                time: m.time,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::StaticTransformOracle;
    use crate::types::{Header, Vec3};

    #[test]
    fn build_measurements_carries_isotropic_covariance() {
        let header = Header { frame_id: "sensor".into(), timestamp: 1.0 };
        let poses = vec![DetectionPose { position: Vec3::new(1.0, 2.0, 3.0) }];
        let ms = MeasurementFrontEnd::build_measurements(&poses, &header, 0.03);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].cov[(0, 0)], 0.03 * 0.03);
        assert_eq!(ms[0].frame, "sensor");
    }

    #[test]
    fn transform_failure_discards_whole_batch() {
        let header = Header { frame_id: "sensor".into(), timestamp: 1.0 };
        let poses = vec![
            DetectionPose { position: Vec3::new(1.0, 0.0, 0.0) },
            DetectionPose { position: Vec3::new(2.0, 0.0, 0.0) },
        ];
        let ms = MeasurementFrontEnd::build_measurements(&poses, &header, 0.03);
        let oracle = StaticTransformOracle::always_fails();
        let result = MeasurementFrontEnd::transform_to_frame(ms, "world", &oracle);
        assert!(result.is_err());
    }

    #[test]
    fn transform_to_same_frame_is_a_no_op() {
        let header = Header { frame_id: "world".into(), timestamp: 1.0 };
        let poses = vec![DetectionPose { position: Vec3::new(1.0, 0.0, 0.0) }];
        let ms = MeasurementFrontEnd::build_measurements(&poses, &header, 0.03);
        let oracle = StaticTransformOracle::always_fails();
        let result = MeasurementFrontEnd::transform_to_frame(ms, "world", &oracle).unwrap();
        assert_eq!(result[0].pos, Vec3::new(1.0, 0.0, 0.0));
    }
}
