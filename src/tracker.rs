//! Multi-hypothesis tracker (spec §4.5): constant-position Kalman filter,
//! Mahalanobis-gated greedy assignment, and covariance-weighted merge.

use tracing::{debug, trace, warn};

use crate::config::TrackerConfig;
use crate::error::PerceptionError;
use crate::types::{Hypothesis, Mat3, Measurement, Vec3};

/// Tracks a population of [`Hypothesis`] beliefs across scans.
pub struct HypothesisTracker {
    cfg: TrackerConfig,
    next_id: u64,
    hypotheses: Vec<Hypothesis>,
}

impl HypothesisTracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self {
            cfg,
            next_id: 1,
            hypotheses: Vec::new(),
        }
    }

    /// Currently active hypotheses.
    pub fn active_hypotheses(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.is_active)
    }

    /// All hypotheses, active or not.
    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    /// Grow every active hypothesis's covariance by the process noise
    /// elapsed since `last_seen_at`, and deactivate any whose TTL expired,
    /// without folding in a measurement (spec §4.5 `predict_without_measurement`).
    pub fn predict_without_measurement(&mut self, now: f64) {
        for h in &mut self.hypotheses {
            if !h.is_active {
                continue;
            }
            let dt = (now - h.last_seen_at).max(0.0);
            if dt > self.cfg.hypothesis_ttl_secs {
                h.is_active = false;
                debug!(id = h.id, "hypothesis expired (ttl)");
                continue;
            }
            h.cov += process_noise(dt, self.cfg.process_noise_density);
        }
    }

    /// Fold a batch of measurements taken at time `t` into the population:
    /// predict, gate by Mahalanobis distance, greedily assign one-to-one,
    /// update matches, spawn hypotheses for the rest, then merge
    /// hypotheses that end up too close together (spec §4.5 `on_measurements`).
    pub fn on_measurements(&mut self, measurements: &[Measurement], t: f64) {
        self.predict_without_measurement(t);

        let active_idx: Vec<usize> = self
            .hypotheses
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_active)
            .map(|(i, _)| i)
            .collect();

        let mut distances = vec![vec![f64::INFINITY; measurements.len()]; active_idx.len()];
        for (row, &hi) in active_idx.iter().enumerate() {
            let h = &self.hypotheses[hi];
            for (col, m) in measurements.iter().enumerate() {
                distances[row][col] = mahalanobis(&h.mean, &h.cov, &m.pos, &m.cov)
                    .unwrap_or(f64::INFINITY);
            }
        }

        let assignment = greedy_assign(&distances, self.cfg.max_mahalanobis_distance);

        let mut matched_measurements = vec![false; measurements.len()];
        for (row, &hi) in active_idx.iter().enumerate() {
            if let Some(col) = assignment[row] {
                matched_measurements[col] = true;
                kalman_update(&mut self.hypotheses[hi], &measurements[col], t);
                trace!(id = self.hypotheses[hi].id, col, "matched measurement");
            }
        }

        for (col, m) in measurements.iter().enumerate() {
            if matched_measurements[col] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.hypotheses.push(Hypothesis {
                id,
                mean: m.pos,
                cov: m.cov,
                born_at: t,
                last_seen_at: t,
                times_seen: 1,
                is_active: true,
            });
            debug!(id, "spawned hypothesis");
        }

        self.merge_close_hypotheses();
    }

    /// Fuse pairs of active hypotheses whose means are within
    /// `merge_close_hypotheses_distance`, via covariance-weighted
    /// (information-form) fusion, keeping the smaller id (spec §4.5 merge).
    fn merge_close_hypotheses(&mut self) {
        loop {
            let active_idx: Vec<usize> = self
                .hypotheses
                .iter()
                .enumerate()
                .filter(|(_, h)| h.is_active)
                .map(|(i, _)| i)
                .collect();

            let mut merge_pair = None;
            'outer: for (a, &ia) in active_idx.iter().enumerate() {
                for &ib in &active_idx[a + 1..] {
                    let d = (self.hypotheses[ia].mean - self.hypotheses[ib].mean).norm();
                    if d < self.cfg.merge_close_hypotheses_distance {
                        merge_pair = Some((ia, ib));
                        break 'outer;
                    }
                }
            }

            let Some((ia, ib)) = merge_pair else { break };
            let fused = fuse(&self.hypotheses[ia], &self.hypotheses[ib]);
            let (keep, drop) = if self.hypotheses[ia].id < self.hypotheses[ib].id {
                (ia, ib)
            } else {
                (ib, ia)
            };
            debug!(
                keep_id = self.hypotheses[keep].id,
                drop_id = self.hypotheses[drop].id,
                "merging close hypotheses"
            );
            self.hypotheses[keep] = fused;
            self.hypotheses[drop].is_active = false;
        }
    }
}

fn process_noise(dt: f64, density: f64) -> Mat3 {
    Mat3::identity() * (density * dt)
}

/// Squared Mahalanobis distance between a hypothesis `(mean, cov)` and a
/// measurement `(pos, meas_cov)`, under the combined covariance. Returns
/// `None` if the combined covariance is singular (spec §4.5: a numerical
/// failure gates the pair out rather than panicking).
fn mahalanobis(mean: &Vec3, cov: &Mat3, pos: &Vec3, meas_cov: &Mat3) -> Option<f64> {
    let combined = cov + meas_cov;
    let Some(inv) = combined.try_inverse() else {
        let err = PerceptionError::NumericalFailure {
            context: "mahalanobis gating".to_string(),
        };
        trace!(error = %err, "treating edge as non-matching");
        return None;
    };
    let diff = pos - mean;
    let d2 = (diff.transpose() * inv * diff)[(0, 0)];
    if d2.is_finite() {
        Some(d2.max(0.0).sqrt())
    } else {
        let err = PerceptionError::NumericalFailure {
            context: "mahalanobis gating".to_string(),
        };
        trace!(error = %err, "treating edge as non-matching");
        None
    }
}

/// Greedy one-to-one assignment: repeatedly pick the globally smallest
/// remaining gated distance and bind its row/column, until nothing under
/// `max_distance` remains (spec §4.5: greedy, not optimal Hungarian).
fn greedy_assign(distances: &[Vec<f64>], max_distance: f64) -> Vec<Option<usize>> {
    let rows = distances.len();
    let cols = distances.first().map_or(0, |r| r.len());
    let mut assignment = vec![None; rows];
    let mut row_used = vec![false; rows];
    let mut col_used = vec![false; cols];

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for r in 0..rows {
            if row_used[r] {
                continue;
            }
            for c in 0..cols {
                if col_used[c] {
                    continue;
                }
                let d = distances[r][c];
                if d > max_distance || !d.is_finite() {
                    continue;
                }
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((r, c, d));
                }
            }
        }
        match best {
            Some((r, c, _)) => {
                assignment[r] = Some(c);
                row_used[r] = true;
                col_used[c] = true;
            }
            None => break,
        }
    }
    assignment
}

/// Constant-position Kalman update: identity observation model, so the
/// innovation covariance is simply `cov + measurement.cov`.
fn kalman_update(h: &mut Hypothesis, m: &Measurement, t: f64) {
    let innovation_cov = h.cov + m.cov;
    let Some(inv) = innovation_cov.try_inverse() else {
        let err = PerceptionError::NumericalFailure {
            context: "kalman update".to_string(),
        };
        warn!(id = h.id, error = %err, "skipping update");
        return;
    };
    let gain = h.cov * inv;
    let innovation = m.pos - h.mean;
    h.mean += gain * innovation;
    h.cov = (Mat3::identity() - gain) * h.cov;
    h.last_seen_at = t;
    h.times_seen += 1;
}

/// Covariance-weighted (information-form) fusion of two Gaussians.
fn fuse(a: &Hypothesis, b: &Hypothesis) -> Hypothesis {
    let (info_a, info_b) = match (a.cov.try_inverse(), b.cov.try_inverse()) {
        (Some(ia), Some(ib)) => (ia, ib),
        _ => {
            let err = PerceptionError::NumericalFailure {
                context: "hypothesis merge fusion".to_string(),
            };
            warn!(a = a.id, b = b.id, error = %err, "falling back to more-observed hypothesis");
            return if a.times_seen >= b.times_seen { a.clone() } else { b.clone() };
        }
    };
    let fused_info = info_a + info_b;
    let Some(fused_cov) = fused_info.try_inverse() else {
        let err = PerceptionError::NumericalFailure {
            context: "hypothesis merge fusion".to_string(),
        };
        warn!(a = a.id, b = b.id, error = %err, "falling back to more-observed hypothesis");
        return if a.times_seen >= b.times_seen { a.clone() } else { b.clone() };
    };
    let fused_mean = fused_cov * (info_a * a.mean + info_b * b.mean);
    Hypothesis {
        id: a.id.min(b.id),
        mean: fused_mean,
        cov: fused_cov,
        born_at: a.born_at.min(b.born_at),
        last_seen_at: a.last_seen_at.max(b.last_seen_at),
        times_seen: a.times_seen + b.times_seen,
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meas(x: f64, y: f64, z: f64, sigma: f64, t: f64) -> Measurement {
        Measurement {
            pos: Vec3::new(x, y, z),
            cov: Mat3::identity() * (sigma * sigma),
            color: 'U',
            frame: "world".into(),
            time: t,
        }
    }

    #[test]
    fn two_measurements_spawn_two_distinct_hypotheses() {
        let mut tracker = HypothesisTracker::new(TrackerConfig::default());
        tracker.on_measurements(&[meas(0.0, 0.0, 0.0, 0.03, 0.0), meas(5.0, 0.0, 0.0, 0.03, 0.0)], 0.0);
        let ids: Vec<u64> = tracker.active_hypotheses().map(|h| h.id).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn same_object_next_scan_keeps_its_id() {
        let mut tracker = HypothesisTracker::new(TrackerConfig::default());
        tracker.on_measurements(&[meas(0.0, 0.0, 0.0, 0.03, 0.0)], 0.0);
        let id_before = tracker.active_hypotheses().next().unwrap().id;
        tracker.on_measurements(&[meas(0.02, 0.0, 0.0, 0.03, 0.1)], 0.1);
        let active: Vec<_> = tracker.active_hypotheses().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id_before);
        assert_eq!(active[0].times_seen, 2);
    }

    #[test]
    fn partial_update_leaves_unmatched_hypothesis_predicted_only() {
        let mut tracker = HypothesisTracker::new(TrackerConfig::default());
        tracker.on_measurements(&[meas(0.0, 0.0, 0.0, 0.03, 0.0), meas(10.0, 0.0, 0.0, 0.03, 0.0)], 0.0);
        tracker.on_measurements(&[meas(0.01, 0.0, 0.0, 0.03, 0.1)], 0.1);
        let active: Vec<_> = tracker.active_hypotheses().collect();
        assert_eq!(active.len(), 2);
        let unmatched = active.iter().find(|h| h.times_seen == 1).unwrap();
        assert!(unmatched.cov[(0, 0)] > Mat3::identity()[(0, 0)] * 0.03 * 0.03);
    }

    #[test]
    fn close_hypotheses_merge_keeping_smaller_id() {
        let mut tracker = HypothesisTracker::new(TrackerConfig::default());
        tracker.on_measurements(&[meas(0.0, 0.0, 0.0, 1.0, 0.0)], 0.0);
        let id_a = tracker.active_hypotheses().next().unwrap().id;
        tracker.on_measurements(
            &[meas(0.0, 0.0, 0.0, 1.0, 0.0), meas(0.01, 0.0, 0.0, 1.0, 0.0)],
            1.0,
        );
        let active: Vec<_> = tracker.active_hypotheses().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id_a);
    }

    #[test]
    fn expired_hypothesis_deactivates() {
        let cfg = TrackerConfig {
            hypothesis_ttl_secs: 1.0,
            ..TrackerConfig::default()
        };
        let mut tracker = HypothesisTracker::new(cfg);
        tracker.on_measurements(&[meas(0.0, 0.0, 0.0, 0.03, 0.0)], 0.0);
        tracker.predict_without_measurement(5.0);
        assert_eq!(tracker.active_hypotheses().count(), 0);
    }
}
