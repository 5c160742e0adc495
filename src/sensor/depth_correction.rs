//! Optional per-frame depth refinement.

use super::frame::DepthFrame;

/// 3×3 median over valid neighbors.
///
/// Removes isolated speckle and flying pixels at depth edges. Pixels with
/// fewer than five valid neighbors (including themselves) become invalid.
pub fn median_correct_depth(frame: &DepthFrame) -> DepthFrame {
    let (w, h) = (frame.width(), frame.height());
    let mut out = vec![0.0f32; w * h];
    let mut window = Vec::with_capacity(9);

    for v in 0..h {
        for u in 0..w {
            window.clear();
            for dv in -1i64..=1 {
                for du in -1i64..=1 {
                    let (nu, nv) = (u as i64 + du, v as i64 + dv);
                    if nu < 0 || nv < 0 || nu >= w as i64 || nv >= h as i64 {
                        continue;
                    }
                    if let Some(d) = frame.at(nu as usize, nv as usize) {
                        window.push(d);
                    }
                }
            }
            if window.len() >= 5 {
                window.sort_by(f32::total_cmp);
                out[v * w + u] = window[window.len() / 2];
            }
        }
    }

    DepthFrame::new(frame.intrinsics, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::CameraIntrinsics;

    #[test]
    fn test_removes_speckle() {
        let k = CameraIntrinsics::from_fov(5, 5, 60.0);
        let mut depth = vec![2.0f32; 25];
        depth[12] = 9.0;
        let corrected = median_correct_depth(&DepthFrame::new(k, depth));
        assert_eq!(corrected.at(2, 2), Some(2.0));
        assert_eq!(corrected.at(0, 0), None); // corner has only 4 neighbors
    }
}
