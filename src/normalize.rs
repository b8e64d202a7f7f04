//! Landmark normalization.
//!
//! Classifiers are trained on landmark coordinates that do not depend on where the subject stands
//! in the frame or how far away from the camera they are. To get there, every landmark set in a
//! feature row is translated to a reference point and scaled by a reference distance:
//!
//! - **Pose** sets are centered on the midpoint between the shoulders and scaled by the distance
//!   from there to the midpoint between the hips (the torso length).
//! - **Hand** sets are centered on the wrist and scaled so that the landmark farthest from the
//!   wrist ends up at distance 1.
//!
//! A set whose coordinates are all exactly zero stands for a part that was not detected and is
//! left untouched.

use nalgebra::Vector2;
use thiserror::Error;

use crate::body::LandmarkIdx as PoseIdx;
use crate::hand::LandmarkIdx as HandIdx;
use crate::landmark::{Part, Position};
use crate::num::TotalF32;

/// Thresholds guarding the division by the reference distance.
///
/// Detections that are numerically unstable can produce reference distances close to zero;
/// dividing by them would blow up the coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Pose sets are only scaled if the torso length is strictly greater than this.
    pub pose_scale: f32,
    /// Hand sets are only scaled if the hand span is strictly greater than this.
    pub hand_scale: f32,
}

impl Thresholds {
    pub const DEFAULT_POSE_SCALE: f32 = 0.01;
    pub const DEFAULT_HAND_SCALE: f32 = 0.0;
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pose_scale: Self::DEFAULT_POSE_SCALE,
            hand_scale: Self::DEFAULT_HAND_SCALE,
        }
    }
}

/// How a block of a feature row is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Pose,
    Hand,
}

/// A contiguous run of landmarks inside a feature row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    kind: BlockKind,
    landmarks: usize,
}

impl Block {
    pub fn for_part(part: Part) -> Self {
        let kind = match part {
            Part::Pose => BlockKind::Pose,
            Part::LeftHand | Part::RightHand => BlockKind::Hand,
        };
        Self {
            kind,
            landmarks: part.num_landmarks(),
        }
    }

    #[inline]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Returns the number of `f32` values this block occupies in a feature row.
    #[inline]
    pub fn row_len(&self) -> usize {
        self.landmarks * 2
    }
}

/// The fixed block layout of a feature row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    blocks: Vec<Block>,
}

impl Layout {
    pub fn new<I: IntoIterator<Item = Part>>(parts: I) -> Self {
        Self {
            blocks: parts.into_iter().map(Block::for_part).collect(),
        }
    }

    /// A single hand, 42 values.
    pub fn hand() -> Self {
        Self::new([Part::RightHand])
    }

    /// Pose, left hand and right hand, 150 values.
    pub fn holistic() -> Self {
        Self::new([Part::Pose, Part::LeftHand, Part::RightHand])
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns the total number of values in a row with this layout.
    pub fn row_len(&self) -> usize {
        self.blocks.iter().map(Block::row_len).sum()
    }
}

/// A feature row did not have the length its [`Layout`] requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("feature row has {actual} values, but its layout requires {expected}")]
pub struct LayoutMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Translates and rescales feature rows block by block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    thresholds: Thresholds,
}

impl Normalizer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    #[inline]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Normalizes a raw feature row, returning a new row of the same length.
    ///
    /// Every block of `layout` is normalized independently and stays at its position in the row.
    pub fn normalize(&self, row: &[f32], layout: &Layout) -> Result<Vec<f32>, LayoutMismatch> {
        if row.len() != layout.row_len() {
            return Err(LayoutMismatch {
                expected: layout.row_len(),
                actual: row.len(),
            });
        }

        let mut out = row.to_vec();
        let mut rest = &mut out[..];
        for block in layout.blocks() {
            let (values, tail) = std::mem::take(&mut rest).split_at_mut(block.row_len());
            match block.kind() {
                BlockKind::Pose => self.normalize_pose(values),
                BlockKind::Hand => self.normalize_hand(values),
            }
            rest = tail;
        }

        Ok(out)
    }

    /// Normalizes a flattened pose block in place.
    pub fn normalize_pose(&self, values: &mut [f32]) {
        if is_degenerate(values) {
            return;
        }

        let shoulders = midpoint(
            point(values, PoseIdx::LeftShoulder as usize),
            point(values, PoseIdx::RightShoulder as usize),
        );
        translate(values, shoulders);

        // The shoulder midpoint is now the origin.
        let hips = midpoint(
            point(values, PoseIdx::LeftHip as usize),
            point(values, PoseIdx::RightHip as usize),
        );
        let torso = hips.norm();
        if torso > self.thresholds.pose_scale {
            scale(values, torso);
        }
    }

    /// Normalizes a flattened hand block in place.
    pub fn normalize_hand(&self, values: &mut [f32]) {
        if is_degenerate(values) {
            return;
        }

        translate(values, point(values, HandIdx::Wrist as usize));

        let span = values
            .chunks_exact(2)
            .map(|xy| TotalF32(Vector2::new(xy[0], xy[1]).norm()))
            .max()
            .map_or(0.0, |max| max.0);
        if span > self.thresholds.hand_scale {
            scale(values, span);
        }
    }
}

/// Returns `true` if every coordinate in `values` is exactly zero.
///
/// Detectors use all-zero landmark sets to mark parts that were not found.
pub fn is_degenerate(values: &[f32]) -> bool {
    values.iter().all(|&v| v == 0.0)
}

fn point(values: &[f32], index: usize) -> Position {
    Vector2::new(values[index * 2], values[index * 2 + 1])
}

fn midpoint(a: Position, b: Position) -> Position {
    (a + b) / 2.0
}

fn translate(values: &mut [f32], origin: Position) {
    for xy in values.chunks_exact_mut(2) {
        xy[0] -= origin.x;
        xy[1] -= origin.y;
    }
}

fn scale(values: &mut [f32], divisor: f32) {
    for v in values {
        *v /= divisor;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::test;

    fn max_norm(values: &[f32]) -> f32 {
        values
            .chunks_exact(2)
            .map(|xy| (xy[0] * xy[0] + xy[1] * xy[1]).sqrt())
            .fold(0.0, f32::max)
    }

    #[test]
    fn layout_lengths() {
        assert_eq!(Layout::hand().row_len(), 42);
        assert_eq!(Layout::holistic().row_len(), 150);
        assert_eq!(Layout::holistic().blocks()[0].kind(), BlockKind::Pose);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Normalizer::default()
            .normalize(&[0.0; 41], &Layout::hand())
            .unwrap_err();
        assert_eq!(
            err,
            LayoutMismatch {
                expected: 42,
                actual: 41
            }
        );
    }

    #[test]
    fn hand_wrist_at_origin_and_unit_span() {
        let row = test::flatten(&test::peace_hand());
        let out = Normalizer::default().normalize(&row, &Layout::hand()).unwrap();

        assert_eq!(out.len(), row.len());
        assert_eq!(&out[..2], &[0.0, 0.0]);
        assert_abs_diff_eq!(max_norm(&out), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn random_hands() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let normalizer = Normalizer::default();
        for _ in 0..200 {
            let row = (0..42).map(|_| rng.f32() * 2.0 - 0.5).collect::<Vec<_>>();
            let out = normalizer.normalize(&row, &Layout::hand()).unwrap();

            assert_abs_diff_eq!(out[0], 0.0);
            assert_abs_diff_eq!(out[1], 0.0);
            assert_abs_diff_eq!(max_norm(&out), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn hand_is_translation_and_scale_invariant() {
        let row = test::flatten(&test::peace_hand());
        let moved = row
            .chunks_exact(2)
            .flat_map(|xy| [xy[0] * 0.5 + 0.3, xy[1] * 0.5 - 0.1])
            .collect::<Vec<_>>();

        let normalizer = Normalizer::default();
        let a = normalizer.normalize(&row, &Layout::hand()).unwrap();
        let b = normalizer.normalize(&moved, &Layout::hand()).unwrap();
        for (a, b) in a.iter().zip(&b) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn degenerate_blocks_pass_through() {
        let normalizer = Normalizer::default();
        let zeros = vec![0.0; 150];
        assert_eq!(
            normalizer.normalize(&zeros, &Layout::holistic()).unwrap(),
            zeros
        );

        let mut hand = [0.0; 42];
        normalizer.normalize_hand(&mut hand);
        assert_eq!(hand, [0.0; 42]);
    }

    #[test]
    fn renormalizing_is_a_fixed_point() {
        let normalizer = Normalizer::default();
        let row = test::flatten(&test::peace_hand());
        let once = normalizer.normalize(&row, &Layout::hand()).unwrap();
        let twice = normalizer.normalize(&once, &Layout::hand()).unwrap();
        for (a, b) in once.iter().zip(&twice) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn pose_centered_on_shoulders_scaled_by_torso() {
        let pose = test::standing_pose();
        let mut values = test::flatten(&pose);
        Normalizer::default().normalize_pose(&mut values);

        let p = |i: PoseIdx| Vector2::new(values[i as usize * 2], values[i as usize * 2 + 1]);
        let shoulders = (p(PoseIdx::LeftShoulder) + p(PoseIdx::RightShoulder)) / 2.0;
        let hips = (p(PoseIdx::LeftHip) + p(PoseIdx::RightHip)) / 2.0;
        assert_abs_diff_eq!(shoulders.norm(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(hips.norm(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn pose_scale_guard() {
        // Shoulders and hips share the same midpoint: torso length is exactly zero.
        let mut values = [0.0; 66];
        let set = |values: &mut [f32; 66], i: PoseIdx, x: f32, y: f32| {
            values[i as usize * 2] = x;
            values[i as usize * 2 + 1] = y;
        };
        set(&mut values, PoseIdx::LeftShoulder, 0.4, 0.5);
        set(&mut values, PoseIdx::RightShoulder, 0.6, 0.5);
        set(&mut values, PoseIdx::LeftHip, 0.5, 0.4);
        set(&mut values, PoseIdx::RightHip, 0.5, 0.6);
        set(&mut values, PoseIdx::Nose, 0.5, 0.2);

        let raw = values;
        Normalizer::default().normalize_pose(&mut values);

        for (out, raw) in values.chunks_exact(2).zip(raw.chunks_exact(2)) {
            assert_abs_diff_eq!(out[0], raw[0] - 0.5, epsilon = 1e-6);
            assert_abs_diff_eq!(out[1], raw[1] - 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn pose_threshold_is_configurable() {
        let pose = test::standing_pose();
        let raw = test::flatten(&pose);

        let mut unscaled = raw.clone();
        Normalizer::new(Thresholds {
            pose_scale: 100.0,
            ..Thresholds::default()
        })
        .normalize_pose(&mut unscaled);

        let mut scaled = raw.clone();
        Normalizer::default().normalize_pose(&mut scaled);

        assert_ne!(unscaled, scaled);
        // Translation is applied either way.
        assert_abs_diff_eq!(
            unscaled[PoseIdx::Nose as usize * 2],
            raw[PoseIdx::Nose as usize * 2] - 0.5,
            epsilon = 1e-6
        );
    }

    #[test]
    fn holistic_blocks_are_independent() {
        let normalizer = Normalizer::default();
        let mut row = test::flatten(&test::standing_pose());
        row.extend([0.0; 42]);
        row.extend(test::flatten(&test::peace_hand()));

        let out = normalizer.normalize(&row, &Layout::holistic()).unwrap();
        assert_eq!(out.len(), 150);
        assert_eq!(&out[66..108], &[0.0; 42]);

        let mut hand = row[108..].to_vec();
        normalizer.normalize_hand(&mut hand);
        assert_eq!(&out[108..], &hand[..]);

        let mut pose = row[..66].to_vec();
        normalizer.normalize_pose(&mut pose);
        assert_eq!(&out[..66], &pose[..]);
    }
}
