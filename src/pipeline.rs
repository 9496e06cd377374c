//! Channel-based front end (Design Notes §9 "Callback hell to message
//! loop"): generalizes the teacher's `Source`/`Sink` channel wiring
//! (`daq-core::pipeline`) down to the two loops this crate needs, in place
//! of the original's ROS callback/bus model.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::PerceptionError;
use crate::measurement::MeasurementFrontEnd;
use crate::segmenter::{ProcessOutput, Segmenter};
use crate::tracker::HypothesisTracker;
use crate::transform::TransformOracle;
use crate::types::{DetectionHeader, DetectionPose, Header, InputPoint, Measurement};

/// Work item delivered to the segmenter loop.
pub struct ScanJob {
    pub points: Vec<InputPoint>,
    pub header: Header,
}

/// Drives a [`Segmenter`] from a channel of incoming scans, forwarding
/// each pass's output to `out`. Exits once the job channel closes.
pub async fn run_segmenter_loop(
    mut segmenter: Segmenter,
    mut jobs: mpsc::Receiver<ScanJob>,
    out: mpsc::Sender<ProcessOutput>,
) {
    while let Some(job) = jobs.recv().await {
        let result = segmenter.ingest_scan(&job.points, &job.header);
        if out.send(result).await.is_err() {
            let err = PerceptionError::SubscriberVanished {
                stream: "obstacle_cloud".to_string(),
            };
            warn!(error = %err, "stopping segmenter loop");
            segmenter.set_has_subscribers(false);
            break;
        }
    }
}

/// Work item delivered to the tracker loop.
pub struct DetectionJob {
    pub poses: Vec<DetectionPose>,
    pub header: DetectionHeader,
}

/// Drives a [`HypothesisTracker`] from a channel of detection batches:
/// builds measurements with `sigma` covariance, transforms the whole batch
/// into `world_frame` via `oracle` (spec §4.4 — a failed lookup discards
/// the batch and the tracker is not advanced), then folds survivors in.
pub async fn run_tracker_loop(
    mut tracker: HypothesisTracker,
    mut jobs: mpsc::Receiver<DetectionJob>,
    sigma: f64,
    world_frame: String,
    oracle: Arc<dyn TransformOracle>,
    out: mpsc::Sender<Vec<crate::types::Hypothesis>>,
) {
    while let Some(job) = jobs.recv().await {
        let measurements: Vec<Measurement> =
            MeasurementFrontEnd::build_measurements(&job.poses, &job.header, sigma);
        let measurements = match MeasurementFrontEnd::transform_to_frame(
            measurements,
            &world_frame,
            oracle.as_ref(),
        ) {
            Ok(measurements) => measurements,
            Err(e) => {
                warn!(error = %e, "discarding detection batch, tracker not advanced");
                continue;
            }
        };
        tracker.on_measurements(&measurements, job.header.timestamp);
        let snapshot: Vec<_> = tracker.active_hypotheses().cloned().collect();
        if out.send(snapshot).await.is_err() {
            let err = PerceptionError::SubscriberVanished {
                stream: "hypotheses".to_string(),
            };
            error!(error = %err, "stopping tracker loop");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SegmenterConfig, TrackerConfig};
    use crate::transform::StaticTransformOracle;
    use crate::types::Vec3;

    #[tokio::test]
    async fn segmenter_loop_forwards_each_pass_output() {
        let (job_tx, job_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let segmenter = Segmenter::new(SegmenterConfig::default());
        let handle = tokio::spawn(run_segmenter_loop(segmenter, job_rx, out_tx));

        job_tx
            .send(ScanJob {
                points: vec![],
                header: Header { frame_id: "base".into(), timestamp: 0.0 },
            })
            .await
            .unwrap();
        drop(job_tx);

        let out = out_rx.recv().await.unwrap();
        assert!(out.obstacles.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn tracker_loop_emits_hypotheses_for_each_batch() {
        let (job_tx, job_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let tracker = HypothesisTracker::new(TrackerConfig::default());
        let oracle: Arc<dyn TransformOracle> = Arc::new(StaticTransformOracle::identity());
        let handle = tokio::spawn(run_tracker_loop(
            tracker,
            job_rx,
            0.03,
            "world".to_string(),
            oracle,
            out_tx,
        ));

        job_tx
            .send(DetectionJob {
                poses: vec![DetectionPose { position: Vec3::new(1.0, 0.0, 0.0) }],
                header: Header { frame_id: "world".into(), timestamp: 0.0 },
            })
            .await
            .unwrap();
        drop(job_tx);

        let hyps = out_rx.recv().await.unwrap();
        assert_eq!(hyps.len(), 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn tracker_loop_discards_batch_on_transform_failure() {
        let (job_tx, job_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let tracker = HypothesisTracker::new(TrackerConfig::default());
        // "sensor" != "world", so every batch needs a (failing) lookup.
        let oracle: Arc<dyn TransformOracle> = Arc::new(StaticTransformOracle::always_fails());
        let handle = tokio::spawn(run_tracker_loop(
            tracker,
            job_rx,
            0.03,
            "world".to_string(),
            oracle,
            out_tx,
        ));

        job_tx
            .send(DetectionJob {
                poses: vec![DetectionPose { position: Vec3::new(1.0, 0.0, 0.0) }],
                header: Header { frame_id: "sensor".into(), timestamp: 0.0 },
            })
            .await
            .unwrap();
        drop(job_tx);

        // The batch never reaches the tracker, so nothing is ever sent on
        // `out`; the loop exits cleanly once the job channel closes.
        assert!(out_rx.recv().await.is_none());
        handle.await.unwrap();
    }
}
