//! Reporting utilities: per-point pulls, rankings, and formatted terminal output.

use crate::domain::{DataPoint, DatasetSubset};

pub mod format;

pub use format::*;

/// A usable point with its pull `(obs - fit) / err`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointPull {
    /// Position in the dataset's point list.
    pub index: usize,
    pub coords: [f64; 3],
    pub obs: f64,
    pub fit: f64,
    pub pull: f64,
}

/// Largest positive and negative pulls (top-N each side).
#[derive(Debug, Clone, Default)]
pub struct PullRankings {
    pub high: Vec<PointPull>,
    pub low: Vec<PointPull>,
}

/// Pulls of every usable point with a positive error.
pub fn compute_pulls(ds: &DatasetSubset) -> Vec<PointPull> {
    let Some(points) = ds.points() else {
        return Vec::new();
    };
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_usable())
        .filter_map(|(index, p)| pull_of(index, p))
        .collect()
}

fn pull_of(index: usize, p: &DataPoint) -> Option<PointPull> {
    if !(p.err > 0.0) {
        return None;
    }
    let pull = (p.obs - p.fit) / p.err;
    pull.is_finite().then_some(PointPull {
        index,
        coords: p.coords,
        obs: p.obs,
        fit: p.fit,
        pull,
    })
}

/// Rank the top data-above-fit and data-below-fit points.
pub fn rank_pulls(pulls: &[PointPull], top_n: usize) -> PullRankings {
    let mut sorted = pulls.to_vec();
    sorted.sort_by(|a, b| b.pull.total_cmp(&a.pull));
    let high = sorted
        .iter()
        .filter(|p| p.pull > 0.0)
        .take(top_n)
        .cloned()
        .collect();
    let low = sorted
        .iter()
        .rev()
        .filter(|p| p.pull < 0.0)
        .take(top_n)
        .cloned()
        .collect();
    PullRankings { high, low }
}
