//! Double sliding-window median filter (spec §4.2).
//!
//! Both medians are computed with a selection algorithm
//! (`slice::select_nth_unstable_by`, Rust's `nth_element`) rather than a
//! full sort, but must be bit-exact equivalent to sorting and picking the
//! middle.

use crate::ring_buffer::{Cursor, RingBuffer};
use crate::types::MedianSample;

/// Result of a single [`compute_medians`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Medians {
    pub noise: f32,
    pub object: f32,
}

/// Compute the noise-kernel and object-kernel medians of `f(sample.point)`
/// over the window `[c - h_o, c + h_o]`.
///
/// # Preconditions
/// `buffer.len() > 2 * h_o` and the caller must hold the cursor back far
/// enough that every offset in `[c - h_o, c + h_o]` dereferences to `Some`
/// (spec §4.2 step 5; enforced by the segmenter's filter stage before
/// calling this).
pub fn compute_medians<F>(
    buffer: &RingBuffer<MedianSample>,
    c: Cursor,
    h_n: i64,
    h_o: i64,
    f: F,
    dmax: f32,
) -> Medians
where
    F: Fn(&crate::types::InputPoint) -> f32,
{
    debug_assert!(h_o >= h_n);

    let center_val = buffer
        .get(c)
        .map(|s| f(&s.point))
        .unwrap_or(f32::NAN);

    let mut vals: Vec<f32> = Vec::with_capacity((2 * h_o + 1) as usize);
    let mut ns_off: Option<usize> = None;
    let mut ne_off: usize = 0;

    let mut offset = -h_o;
    while offset <= h_o {
        let cursor = c + offset;
        if let Some(sample) = buffer.get(cursor) {
            let v = f(&sample.point);
            let accepted = dmax == 0.0 || (v - center_val).abs() < dmax;
            if accepted {
                vals.push(v);
                let idx = vals.len() - 1;
                if offset >= -h_n && offset <= h_n {
                    if ns_off.is_none() {
                        ns_off = Some(idx);
                    }
                    ne_off = idx;
                }
            }
        }
        offset += 1;
    }

    if vals.is_empty() {
        return Medians {
            noise: f32::NAN,
            object: f32::NAN,
        };
    }
    let ns_off = ns_off.unwrap_or(0);

    let noise_mid_abs = (ns_off + ne_off) / 2;
    let noise = {
        let window = &mut vals[ns_off..=ne_off];
        let rel = noise_mid_abs - ns_off;
        window.select_nth_unstable_by(rel, |a, b| a.total_cmp(b));
        window[rel]
    };

    let object_mid = vals.len() / 2;
    vals.select_nth_unstable_by(object_mid, |a, b| a.total_cmp(b));
    let object = vals[object_mid];

    Medians { noise, object }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputPoint;

    fn push_point(rb: &mut RingBuffer<MedianSample>, distance: f32) {
        rb.push(MedianSample::new(InputPoint {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            intensity: 0.0,
            distance,
            ring: 0,
        }));
    }

    #[test]
    fn flat_ring_yields_constant_medians() {
        let mut rb = RingBuffer::new(50);
        for _ in 0..41 {
            push_point(&mut rb, 10.0);
        }
        let c = rb.begin() + 20;
        let m = compute_medians(&rb, c, 5, 20, |p| p.distance, 0.0);
        assert_eq!(m.noise, 10.0);
        assert_eq!(m.object, 10.0);
    }

    #[test]
    fn median_matches_full_sort_on_irregular_data() {
        let mut rb = RingBuffer::new(50);
        let data = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0, 5.0];
        for &d in &data {
            push_point(&mut rb, d);
        }
        let c = rb.begin() + 5;
        let m = compute_medians(&rb, c, 0, 5, |p| p.distance, 0.0);
        let mut sorted = data.to_vec();
        sorted.sort_by(|a: &f32, b| a.total_cmp(b));
        assert_eq!(m.object, sorted[sorted.len() / 2]);
    }

    #[test]
    fn gate_excludes_far_values() {
        let mut rb = RingBuffer::new(50);
        for _ in 0..5 {
            push_point(&mut rb, 10.0);
        }
        push_point(&mut rb, 1000.0);
        for _ in 0..5 {
            push_point(&mut rb, 10.0);
        }
        // Query a flat point whose window reaches the outlier at index 5;
        // the gate (dmax=1.0) must keep the outlier from polluting the median.
        let c = rb.begin() + 2;
        let m = compute_medians(&rb, c, 2, 5, |p| p.distance, 1.0);
        assert_eq!(m.object, 10.0);
    }
}
