//! Weighted summary statistics over 1–3 dimensional coordinates.

use serde::{Deserialize, Serialize};

/// Weighted mean, width (standard deviation) and pairwise correlations.
///
/// Correlations are ordered `[xy, xz, yz]`; entries for missing axes are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    pub sum: f64,
    pub mean: [f64; 3],
    pub width: [f64; 3],
    pub corr: [f64; 3],
}

/// Compute weighted statistics of `(coords, weight)` samples.
///
/// Returns `None` when the total weight is not positive.
pub fn basic_stats<'a, I>(dims: usize, samples: I) -> Option<BasicStats>
where
    I: IntoIterator<Item = (&'a [f64], f64)>,
{
    let dims = dims.min(3);
    let mut sw = 0.0;
    let mut s1 = [0.0; 3];
    let mut s2 = [[0.0; 3]; 3];

    for (x, w) in samples {
        if !w.is_finite() {
            continue;
        }
        sw += w;
        for i in 0..dims {
            s1[i] += w * x[i];
            for j in i..dims {
                s2[i][j] += w * x[i] * x[j];
            }
        }
    }
    if !(sw > 0.0) {
        return None;
    }

    let mut stats = BasicStats {
        sum: sw,
        ..BasicStats::default()
    };
    let mut cov = [[0.0; 3]; 3];
    for i in 0..dims {
        stats.mean[i] = s1[i] / sw;
    }
    for i in 0..dims {
        for j in i..dims {
            cov[i][j] = s2[i][j] / sw - stats.mean[i] * stats.mean[j];
        }
        stats.width[i] = cov[i][i].max(0.0).sqrt();
    }

    let pairs = [(0, 1), (0, 2), (1, 2)];
    for (k, &(i, j)) in pairs.iter().enumerate() {
        if j >= dims {
            continue;
        }
        let denom = stats.width[i] * stats.width[j];
        stats.corr[k] = if denom > 0.0 { (cov[i][j] / denom).clamp(-1.0, 1.0) } else { 0.0 };
    }
    Some(stats)
}
