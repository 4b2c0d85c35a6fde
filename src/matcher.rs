//! Cross-view marker correspondence for the two-row calibration pattern.
//!
//! The matcher is a two-state machine. It starts `Uninitialized`; the first cycle in which
//! two camera views each report at least `min_points` markers produces a
//! `CorrespondenceMap` and moves it to `Frozen`. There is no way back: later cycles with
//! different marker counts reuse the frozen map.
//!
//! Pairing is order based. Each view is split into a top row (the `top_row_len` highest
//! markers, or the upper half when fewer than `2 * top_row_len` are visible) and a bottom
//! row, both rows are sorted left to right, and markers are paired by rank:
//! - top row: the first five, plus the last when both sides have six or more
//! - bottom row: the first four, plus the last two when both sides have six or more

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::MatcherConfig;
use crate::detect::DetectedMarker;

/// Markers of one detection cycle keyed by camera index.
pub type MarkerSet = BTreeMap<usize, Vec<DetectedMarker>>;

const TOP_DIRECT_PAIRS: usize = 5;
const BOTTOM_DIRECT_PAIRS: usize = 4;
const ROW_TAIL_MIN: usize = 6;

/// Frozen pairing between two camera views. A pair's position is its stable marker ID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CorrespondenceMap {
    pub camera_a: usize,
    pub camera_b: usize,
    pub pairs: Vec<(usize, usize)>,
}

impl CorrespondenceMap {
    /// Stable ID of local marker `index` seen by `camera`, if it is part of a pair.
    pub fn id_of(&self, camera: usize, index: usize) -> Option<usize> {
        if camera == self.camera_a {
            self.pairs.iter().position(|&(a, _)| a == index)
        } else if camera == self.camera_b {
            self.pairs.iter().position(|&(_, b)| b == index)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatcherState {
    Uninitialized,
    Frozen(CorrespondenceMap),
}

pub struct CorrespondenceMatcher {
    state: MatcherState,
    min_points: usize,
    top_row_len: usize,
}

impl CorrespondenceMatcher {
    pub fn new(cfg: &MatcherConfig) -> Self {
        Self {
            state: MatcherState::Uninitialized,
            min_points: cfg.min_points,
            top_row_len: cfg.top_row_len,
        }
    }

    pub fn state(&self) -> &MatcherState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, MatcherState::Frozen(_))
    }

    pub fn correspondence(&self) -> Option<&CorrespondenceMap> {
        match &self.state {
            MatcherState::Frozen(map) => Some(map),
            MatcherState::Uninitialized => None,
        }
    }

    /// Frozen index pairs; empty while uninitialized.
    pub fn matches(&self) -> Vec<(usize, usize)> {
        self.correspondence()
            .map(|map| map.pairs.clone())
            .unwrap_or_default()
    }

    /// Attempt the one allowed transition. Returns true when the matcher is frozen after the
    /// call, whether it froze now or earlier.
    pub fn try_initialize(&mut self, markers: &MarkerSet) -> bool {
        if self.is_initialized() {
            return true;
        }
        let mut views = markers.iter();
        let (Some((&camera_a, points_a)), Some((&camera_b, points_b))) =
            (views.next(), views.next())
        else {
            return false;
        };
        if points_a.len() < self.min_points || points_b.len() < self.min_points {
            log::debug!(
                "not enough points for matching: camera {} has {}, camera {} has {}",
                camera_a,
                points_a.len(),
                camera_b,
                points_b.len()
            );
            return false;
        }

        let (top_a, bottom_a) = self.split_rows(points_a);
        let (top_b, bottom_b) = self.split_rows(points_b);
        let mut pairs = Vec::with_capacity(points_a.len().min(points_b.len()));
        pair_row(&top_a, &top_b, TOP_DIRECT_PAIRS, 1, &mut pairs);
        pair_row(&bottom_a, &bottom_b, BOTTOM_DIRECT_PAIRS, 2, &mut pairs);

        log::info!(
            "matched {} markers between camera {} ({} points) and camera {} ({} points)",
            pairs.len(),
            camera_a,
            points_a.len(),
            camera_b,
            points_b.len()
        );
        self.state = MatcherState::Frozen(CorrespondenceMap {
            camera_a,
            camera_b,
            pairs,
        });
        true
    }

    /// Stable ID for a marker: its pair position when matched, otherwise its local index.
    pub fn label_for(&self, camera: usize, index: usize) -> usize {
        self.correspondence()
            .and_then(|map| map.id_of(camera, index))
            .unwrap_or(index)
    }

    /// Local indices of the top and bottom rows, each sorted left to right.
    fn split_rows(&self, points: &[DetectedMarker]) -> (Vec<usize>, Vec<usize>) {
        let mut by_y: Vec<usize> = (0..points.len()).collect();
        by_y.sort_by(|&i, &j| points[i].y.total_cmp(&points[j].y));
        let top_len = if points.len() >= 2 * self.top_row_len {
            self.top_row_len
        } else {
            points.len() / 2
        };
        let mut bottom = by_y.split_off(top_len);
        let mut top = by_y;
        top.sort_by(|&i, &j| points[i].x.total_cmp(&points[j].x));
        bottom.sort_by(|&i, &j| points[i].x.total_cmp(&points[j].x));
        (top, bottom)
    }
}

/// Pair the first `direct` ranks, then the last `tail` ranks when both rows are long enough.
fn pair_row(
    row_a: &[usize],
    row_b: &[usize],
    direct: usize,
    tail: usize,
    pairs: &mut Vec<(usize, usize)>,
) {
    let shared = direct.min(row_a.len()).min(row_b.len());
    pairs.extend(row_a.iter().copied().zip(row_b.iter().copied()).take(shared));
    if row_a.len() >= ROW_TAIL_MIN && row_b.len() >= ROW_TAIL_MIN {
        for back in (1..=tail).rev() {
            pairs.push((row_a[row_a.len() - back], row_b[row_b.len() - back]));
        }
    }
}
